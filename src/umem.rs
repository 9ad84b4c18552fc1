use std::sync::Arc;

use libbpf_sys::{
    _xsk_ring_cons__comp_addr, _xsk_ring_cons__peek, _xsk_ring_cons__release, xsk_ring_cons,
    xsk_ring_prod, xsk_umem, xsk_umem__create, xsk_umem__delete, xsk_umem_config,
    XSK_UMEM__DEFAULT_FRAME_HEADROOM,
};
use thiserror::Error;
use tracing::debug;

use crate::buf_mmap::BufMmap;
use crate::mmap_area::MmapArea;

/// AF_XDP Umem
pub struct Umem {
    pub(crate) area: Arc<MmapArea>,
    pub(crate) umem: *mut xsk_umem,
    // The kernel requires a fill ring per umem even though nothing is ever received
    _fq: Box<xsk_ring_prod>,
}

/// Completion queue per Umem. Frames whose transmission has finished come back through here.
pub struct UmemCompletionQueue {
    umem: Arc<Umem>,
    cq: Box<xsk_ring_cons>,
}

#[derive(Debug, Error)]
pub enum UmemError {
    #[error("xsk_umem__create failed: {0}")]
    Create(i32),
}

impl Umem {
    /// Register the memory mapped area as a umem
    pub fn new(
        area: Arc<MmapArea>,
        completion_ring_size: u32,
        fill_ring_size: u32,
    ) -> Result<(Arc<Umem>, UmemCompletionQueue), UmemError> {
        let cfg = xsk_umem_config {
            fill_size: fill_ring_size,
            comp_size: completion_ring_size,
            frame_size: area.get_buf_len() as u32,
            frame_headroom: XSK_UMEM__DEFAULT_FRAME_HEADROOM,
            flags: 0,
        };

        debug!(
            fill_size = cfg.fill_size,
            comp_size = cfg.comp_size,
            frame_size = cfg.frame_size,
            "creating umem"
        );

        // The rings are written by xsk_umem__create() so they need stable addresses
        let mut cq: Box<xsk_ring_cons> = Default::default();
        let mut fq: Box<xsk_ring_prod> = Default::default();

        let mut umem: *mut xsk_umem = std::ptr::null_mut();

        let size = (area.get_buf_num() * area.get_buf_len()) as u64;
        let ret = unsafe {
            xsk_umem__create(
                &mut umem,
                area.get_ptr(),
                size,
                fq.as_mut(),
                cq.as_mut(),
                &cfg,
            )
        };

        if ret != 0 || umem.is_null() {
            return Err(UmemError::Create(ret));
        }

        let arc = Arc::new(Umem {
            area,
            umem,
            _fq: fq,
        });

        let cq = UmemCompletionQueue {
            umem: arc.clone(),
            cq,
        };

        Ok((arc, cq))
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        unsafe {
            xsk_umem__delete(self.umem);
        }
    }
}

impl UmemCompletionQueue {
    /// After packets have been transmitted, the frame is returned via the completion queue.
    /// Rebuilds a BufMmap for each completed frame and pushes it onto `bufs`.
    #[inline]
    pub fn service<'a>(
        &mut self,
        bufs: &mut Vec<BufMmap<'a>>,
        batch_size: usize,
    ) -> Result<usize, UmemError> {
        let mut idx: u32 = 0;

        let ready =
            unsafe { _xsk_ring_cons__peek(self.cq.as_mut(), batch_size as u64, &mut idx) } as usize;
        if ready == 0 {
            return Ok(0);
        }

        bufs.reserve(ready);
        for _ in 0..ready {
            unsafe {
                let addr = *_xsk_ring_cons__comp_addr(self.cq.as_mut(), idx);
                // The frame left userspace when its BufMmap was moved into a Tx descriptor
                bufs.push(self.umem.area.frame(addr));
            }
            idx += 1;
        }

        unsafe {
            _xsk_ring_cons__release(self.cq.as_mut(), ready as u64);
        }

        Ok(ready)
    }

    pub fn umem(&self) -> &Arc<Umem> {
        &self.umem
    }
}
