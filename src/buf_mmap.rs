use crate::buf::Buf;

/// A frame inside a MmapArea. `addr` is the byte offset of the frame within the area, which is
/// also the value placed in Tx descriptors and returned by the completion ring.
#[derive(Debug)]
pub struct BufMmap<'a> {
    pub(crate) addr: u64,
    pub(crate) len: u16,
    pub(crate) total_len: u32,
    pub(crate) data: &'a mut [u8],
}

impl Buf for BufMmap<'_> {
    fn get_id(&self) -> usize {
        // Frames are equally sized and laid out back to back
        self.addr as usize / self.data.len()
    }

    fn get_data(&self) -> &[u8] {
        &self.data[0..]
    }

    fn get_data_mut(&mut self) -> &mut [u8] {
        &mut self.data[0..]
    }

    fn get_capacity(&self) -> usize {
        self.data.len()
    }

    fn get_len(&self) -> u16 {
        self.len
    }

    fn set_len(&mut self, len: u16) {
        assert!(
            usize::from(len) <= self.data.len(),
            "data length {} exceeds frame capacity {}",
            len,
            self.data.len()
        );
        self.len = len;
        self.total_len = u32::from(len);
    }

    fn get_total_len(&self) -> u32 {
        self.total_len
    }
}

impl<'a> BufMmap<'a> {
    /// Offset of the frame within the umem
    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub(crate) fn from_raw(addr: u64, data: &'a mut [u8]) -> BufMmap<'a> {
        BufMmap {
            addr,
            len: 0,
            total_len: 0,
            data,
        }
    }

    /// Length as carried in a Tx descriptor
    pub(crate) fn desc_len(&self) -> u32 {
        u32::from(self.len)
    }
}
