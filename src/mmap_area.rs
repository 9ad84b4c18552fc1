use std::sync::Arc;

use errno::errno;
use libc::{
    c_int, c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_HUGETLB, MAP_POPULATE,
    MAP_PRIVATE, PROT_READ, PROT_WRITE,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::buf_mmap::BufMmap;

/// A mapped memory area holding the packet frames shared with the kernel (the umem area).
#[derive(Debug)]
pub struct MmapArea {
    pub(crate) buf_num: usize,
    pub(crate) buf_len: usize,
    pub(crate) ptr: *mut c_void,
}
// SAFETY: the area is only ever accessed through the disjoint BufMmap slices handed out by new()
// and the pointer itself is only read by umem registration and munmap.
unsafe impl Send for MmapArea {}
unsafe impl Sync for MmapArea {}

#[derive(Debug, Error)]
pub enum MmapError {
    #[error("mmap area must hold at least one buffer of non-zero length")]
    Empty,
    #[error("mmap of {size} bytes failed: errno {errno}")]
    Failed { size: usize, errno: i32 },
}

/// Configuration options for MmapArea
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapAreaOptions {
    /// If set to true, the mmap call is passed MAP_HUGETLB
    pub huge_tlb: bool,

    /// If set to true, the mmap call is passed MAP_POPULATE so pages are faulted in by the
    /// calling thread (and so land on its NUMA node) before any packet is built
    pub populate: bool,
}

impl MmapArea {
    /// Allocate a new memory mapped area based on the size and number of buffers
    ///
    /// # Arguments
    ///
    /// * buf_num: The number of buffers to allocate in the memory mapped area
    /// * buf_len: The length of each buffer
    /// * options: Configuration options
    pub fn new<'a>(
        buf_num: usize,
        buf_len: usize,
        options: MmapAreaOptions,
    ) -> Result<(Arc<MmapArea>, Vec<BufMmap<'a>>), MmapError> {
        if buf_num == 0 || buf_len == 0 {
            return Err(MmapError::Empty);
        }

        let size = buf_num * buf_len;
        let mut flags: c_int = MAP_PRIVATE | MAP_ANONYMOUS;

        if options.huge_tlb {
            flags |= MAP_HUGETLB;
        }
        if options.populate {
            flags |= MAP_POPULATE;
        }

        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if ptr == MAP_FAILED || ptr.is_null() {
            return Err(MmapError::Failed {
                size,
                errno: errno().0,
            });
        }

        debug!(buf_num, buf_len, huge_tlb = options.huge_tlb, "mapped umem area");

        let ma = Arc::new(MmapArea {
            buf_num,
            buf_len,
            ptr,
        });

        // Create the bufs
        let mut bufs = Vec::with_capacity(buf_num);

        for i in 0..buf_num {
            let offset = i * buf_len;
            let data = unsafe {
                let ptr = (ma.ptr as *mut u8).add(offset);
                std::slice::from_raw_parts_mut(ptr, buf_len)
            };

            bufs.push(BufMmap::from_raw(offset as u64, data));
        }

        Ok((ma, bufs))
    }

    pub fn get_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn get_buf_num(&self) -> usize {
        self.buf_num
    }

    pub fn get_buf_len(&self) -> usize {
        self.buf_len
    }

    /// Rebuild the frame view for an offset handed back by the kernel
    ///
    /// # Safety
    ///
    /// `addr` must be the offset of a frame that is not currently referenced by any other
    /// BufMmap, i.e. one whose previous BufMmap was moved into a Tx descriptor.
    pub(crate) unsafe fn frame<'a>(&self, addr: u64) -> BufMmap<'a> {
        // Completions may carry an offset into the frame when headroom is used; align it down.
        let addr = addr - (addr % self.buf_len as u64);
        debug_assert!((addr as usize) < self.buf_num * self.buf_len);

        let ptr = (self.ptr as *mut u8).add(addr as usize);
        BufMmap::from_raw(addr, std::slice::from_raw_parts_mut(ptr, self.buf_len))
    }
}

impl Drop for MmapArea {
    fn drop(&mut self) {
        let r = unsafe { munmap(self.ptr, self.buf_num * self.buf_len) };

        if r != 0 {
            warn!("munmap failed errno: {}", errno().0);
        }
    }
}
