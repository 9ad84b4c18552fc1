//! Transmit submission and buffer reclamation.
//!
//! A buffer handed to [`TxEngine::transmit`] either ends up on the Tx ring ([`TxOutcome::Sent`])
//! or comes straight back to the caller ([`TxOutcome::Rejected`]), who must return it to the pool.
//! Buffers on the ring come back through [`TxEngine::reclaim`] once the queue reports them
//! complete.

use arraydeque::ArrayDeque;
use thiserror::Error;
use tracing::warn;

use crate::buf::Buf;
use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::socket::{SocketError, SocketTx};
use crate::umem::{UmemCompletionQueue, UmemError};
use crate::Pending;

#[derive(Debug, Error)]
pub enum TxError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Umem(#[from] UmemError),
}

/// A hardware transmit queue (or a stand in for one)
pub trait TxQueue<B>
where
    B: Buf,
{
    /// Submit up to `batch_size` bufs from the front of `pending`. Accepted bufs are removed
    /// from `pending`; rejected ones are left in it. Returns the number accepted.
    fn try_send(&mut self, pending: &mut Pending<B>, batch_size: usize) -> Result<usize, TxError>;

    /// Push up to `batch_size` bufs the queue is finished with onto `bufs`. Returns the count.
    fn complete(&mut self, bufs: &mut Vec<B>, batch_size: usize) -> Result<usize, TxError>;
}

/// Tx ring plus completion ring of one AF_XDP socket
pub struct XskTxQueue {
    tx: SocketTx,
    cq: UmemCompletionQueue,
}

impl XskTxQueue {
    pub fn new(tx: SocketTx, cq: UmemCompletionQueue) -> XskTxQueue {
        XskTxQueue { tx, cq }
    }
}

impl<'a> TxQueue<BufMmap<'a>> for XskTxQueue {
    #[inline]
    fn try_send(
        &mut self,
        pending: &mut Pending<BufMmap<'a>>,
        batch_size: usize,
    ) -> Result<usize, TxError> {
        Ok(self.tx.try_send(pending, batch_size)?)
    }

    #[inline]
    fn complete(&mut self, bufs: &mut Vec<BufMmap<'a>>, batch_size: usize) -> Result<usize, TxError> {
        Ok(self.cq.service(bufs, batch_size)?)
    }
}

/// Result of a single packet submission
#[derive(Debug)]
pub enum TxOutcome<B> {
    /// The queue accepted the buf. It is no longer the caller's.
    Sent,
    /// The queue did not accept the buf. The caller owns it again and must release it.
    Rejected(B),
}

impl<B> TxOutcome<B> {
    /// Number of bufs the queue accepted (0 or 1)
    pub fn accepted(&self) -> usize {
        match self {
            TxOutcome::Sent => 1,
            TxOutcome::Rejected(_) => 0,
        }
    }
}

pub struct TxEngine<B, Q>
where
    B: Buf,
    Q: TxQueue<B>,
{
    queue: Q,
    pending: Pending<B>,
    completed: Vec<B>,
    in_flight: usize,
}

impl<B, Q> TxEngine<B, Q>
where
    B: Buf,
    Q: TxQueue<B>,
{
    pub fn new(queue: Q) -> TxEngine<B, Q> {
        TxEngine {
            queue,
            pending: ArrayDeque::new(),
            completed: Vec::new(),
            in_flight: 0,
        }
    }

    /// Submit one buf. No retry is attempted on rejection; a queue error that leaves the buf pending
    /// counts as a rejection.
    pub fn transmit(&mut self, buf: B) -> TxOutcome<B> {
        // Pushing onto a full wrapping deque would evict a buf we still own
        if self.pending.is_full() {
            return TxOutcome::Rejected(buf);
        }
        let evicted = self.pending.push_back(buf);
        debug_assert!(evicted.is_none());

        if let Err(err) = self.queue.try_send(&mut self.pending, 1) {
            warn!("transmit error: {}", err);
        }

        // Whatever is still pending was not taken by the queue
        match self.pending.pop_back() {
            Some(buf) => TxOutcome::Rejected(buf),
            None => {
                self.in_flight += 1;
                TxOutcome::Sent
            }
        }
    }

    /// Return up to `batch_size` completed bufs to `pool`. Returns how many came back.
    pub fn reclaim<P>(&mut self, pool: &mut P, batch_size: usize) -> usize
    where
        P: BufPool<B>,
    {
        if self.in_flight == 0 {
            return 0;
        }

        if let Err(err) = self.queue.complete(&mut self.completed, batch_size) {
            warn!("completion error: {}", err);
        }

        let n = self.completed.len();
        if n > 0 {
            pool.put(&mut self.completed, n);
            debug_assert!(n <= self.in_flight);
            self.in_flight = self.in_flight.saturating_sub(n);
        }

        n
    }

    /// Bufs accepted by the queue and not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }
}
