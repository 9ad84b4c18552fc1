use std::ffi::CString;
use std::sync::Arc;

use errno::errno;
use libbpf_sys::{
    _xsk_ring_prod__needs_wakeup, _xsk_ring_prod__reserve, _xsk_ring_prod__submit,
    _xsk_ring_prod__tx_desc, xsk_ring_prod, xsk_socket, xsk_socket__create, xsk_socket__delete,
    xsk_socket__fd, xsk_socket_config, XDP_COPY, XDP_FLAGS_UPDATE_IF_NOEXIST,
    XDP_USE_NEED_WAKEUP, XDP_ZEROCOPY, XSK_LIBBPF_FLAGS__INHIBIT_PROG_LOAD,
};
use libc::{sendto, EAGAIN, EBUSY, ENETDOWN, ENOBUFS, MSG_DONTWAIT};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buf_mmap::BufMmap;
use crate::umem::Umem;
use crate::Pending;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("invalid link name {0:?}")]
    LinkName(String),
    #[error("xsk_socket__create failed for {link}:{queue}: {ret}")]
    Create { link: String, queue: usize, ret: i32 },
    #[error("tx wakeup failed: errno {0}")]
    Wakeup(i32),
}

/// Configuration options for Socket
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Force XDP zero copy mode (XDP_ZEROCOPY flag)
    pub zero_copy_mode: bool,

    /// Force XDP copy mode (XDP_COPY flag)
    pub copy_mode: bool,
}

/// A Tx only AF_XDP socket bound to one queue of one link
pub struct SocketTx {
    _umem: Arc<Umem>,
    socket: *mut xsk_socket,
    fd: std::os::raw::c_int,
    tx: Box<xsk_ring_prod>,
}

impl SocketTx {
    /// Create a new Tx only AF_XDP socket. No XDP program is loaded since nothing is received.
    pub fn new(
        umem: Arc<Umem>,
        if_name: &str,
        queue: usize,
        tx_ring_size: u32,
        options: SocketOptions,
    ) -> Result<SocketTx, SocketError> {
        let mut cfg = xsk_socket_config {
            rx_size: 0,
            tx_size: tx_ring_size,
            xdp_flags: XDP_FLAGS_UPDATE_IF_NOEXIST,
            bind_flags: XDP_USE_NEED_WAKEUP as u16,
            libbpf_flags: XSK_LIBBPF_FLAGS__INHIBIT_PROG_LOAD,
        };

        if options.zero_copy_mode {
            cfg.bind_flags |= XDP_ZEROCOPY as u16;
        }

        if options.copy_mode {
            cfg.bind_flags |= XDP_COPY as u16;
        }

        // Written by xsk_socket__create() so it needs a stable address
        let mut tx: Box<xsk_ring_prod> = Default::default();

        let mut xsk: *mut xsk_socket = std::ptr::null_mut();

        let if_name_c =
            CString::new(if_name).map_err(|_| SocketError::LinkName(if_name.to_string()))?;

        let ret = unsafe {
            xsk_socket__create(
                &mut xsk,
                if_name_c.as_ptr(),
                queue as u32,
                umem.umem,
                std::ptr::null_mut(),
                tx.as_mut(),
                &cfg,
            )
        };

        if ret != 0 || xsk.is_null() {
            return Err(SocketError::Create {
                link: if_name.to_string(),
                queue,
                ret,
            });
        }

        let fd = unsafe { xsk_socket__fd(xsk) };
        debug!(link = if_name, queue, fd, "tx socket created");

        Ok(SocketTx {
            _umem: umem,
            socket: xsk,
            fd,
            tx,
        })
    }

    /// Place up to `batch_size` bufs from the front of `bufs` on the Tx ring. Bufs that were
    /// placed are removed from `bufs` and now belong to the kernel until they show up on the
    /// completion queue; the rest stay in `bufs`.
    #[inline]
    pub fn try_send(
        &mut self,
        bufs: &mut Pending<BufMmap<'_>>,
        batch_size: usize,
    ) -> Result<usize, SocketError> {
        let mut idx_tx: u32 = 0;

        let batch_size = std::cmp::min(bufs.len(), batch_size);
        if batch_size == 0 {
            return Ok(0);
        }

        let ready = unsafe {
            _xsk_ring_prod__reserve(self.tx.as_mut(), batch_size as u64, &mut idx_tx) as usize
        };

        let mut placed = 0;
        while placed < ready {
            let b = match bufs.pop_front() {
                Some(b) => b,
                None => break,
            };

            unsafe {
                let desc = _xsk_ring_prod__tx_desc(self.tx.as_mut(), idx_tx);
                (*desc).addr = b.addr;
                (*desc).len = b.desc_len();
            }

            idx_tx += 1;
            placed += 1;
        }

        if placed > 0 {
            unsafe {
                _xsk_ring_prod__submit(self.tx.as_mut(), placed as u64);
            }
        } else {
            trace!("tx ring full");
        }

        match self.wakeup_if_required() {
            // Placed descriptors belong to the kernel regardless, the next kick sends them
            Err(err) if placed > 0 => warn!("{}", err),
            Err(err) => return Err(err),
            Ok(_) => {}
        }

        Ok(placed)
    }

    pub fn needs_wakeup(&mut self) -> bool {
        unsafe { _xsk_ring_prod__needs_wakeup(self.tx.as_mut()) != 0 }
    }

    fn wakeup_if_required(&mut self) -> Result<bool, SocketError> {
        if !self.needs_wakeup() {
            return Ok(false);
        }

        let ret = unsafe {
            sendto(
                self.fd,
                std::ptr::null(),
                0,
                MSG_DONTWAIT,
                std::ptr::null(),
                0,
            )
        };
        if ret < 0 {
            match errno().0 {
                // The kernel is still busy with earlier frames, the next kick will pick these up
                ENOBUFS | EAGAIN | EBUSY | ENETDOWN => {}
                e => return Err(SocketError::Wakeup(e)),
            }
        }

        Ok(true)
    }
}

impl Drop for SocketTx {
    fn drop(&mut self) {
        unsafe {
            xsk_socket__delete(self.socket);
        }
    }
}
