use crate::buf::Buf;

/// Heap backed buffer. Used to build and test packets without a umem.
#[derive(Debug, Default, Clone)]
pub struct BufVec {
    pub(crate) id: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) len: u16,
    pub(crate) total_len: u32,
}

impl BufVec {
    pub fn new(id: usize, capacity: usize) -> BufVec {
        BufVec {
            id,
            data: vec![0; capacity],
            len: 0,
            total_len: 0,
        }
    }

    /// Create `num` buffers of `capacity` bytes with ids 0..num
    pub fn many(num: usize, capacity: usize) -> Vec<BufVec> {
        (0..num).map(|id| BufVec::new(id, capacity)).collect()
    }
}

impl Buf for BufVec {
    fn get_id(&self) -> usize {
        self.id
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
            "data length {} exceeds buffer capacity {}",
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
