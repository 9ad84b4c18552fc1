/// The Buf trait represents a packet buffer.
/// A trait is used so that packet building and the run loop can be tested without the AF_XDP
/// infrastructure.
pub trait Buf {
    /// Handle identifying the buffer within its pool. Stable for the life of the pool.
    fn get_id(&self) -> usize;

    /// Returns the full buffer region
    fn get_data(&self) -> &[u8];

    /// Returns the full buffer region, mutably
    fn get_data_mut(&mut self) -> &mut [u8];

    /// Physical capacity of the region
    fn get_capacity(&self) -> usize;

    /// Bytes of packet data written into the region
    fn get_len(&self) -> u16;

    /// Sets the packet data length. Buffers are single segment so this is also the total length.
    fn set_len(&mut self, len: u16);

    /// Total packet length across segments
    fn get_total_len(&self) -> u32;
}
