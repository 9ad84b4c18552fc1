//
// Test infrastructure: a simulated Tx queue so the generator can be driven without a NIC or
// root privileges.
//
#![allow(dead_code)]

use std::cmp::min;
use std::collections::VecDeque;
use std::time::Duration;

use txgen::buf::Buf;
use txgen::buf_pool::BufPool;
use txgen::buf_pool_vec::BufPoolVec;
use txgen::buf_vec::BufVec;
use txgen::generator::GeneratorConfig;
use txgen::socket::SocketError;
use txgen::tx::{TxError, TxQueue};
use txgen::Pending;

pub const BUF_SIZE: usize = 2048;

/// How the simulated queue treats submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    Never,
    Always,
    /// Reject every nth submission (the nth, 2nth, ...)
    EveryNth(usize),
    /// Fail every submission with an error
    Fail,
}

pub struct SimQueue<B> {
    ring_size: usize,
    /// Accepted and not yet completed, oldest first
    ring: VecDeque<B>,
    pub reject: Reject,
    /// When false, accepted bufs are never completed
    pub completions: bool,
    /// try_send calls seen
    pub submissions: usize,
    /// Ids in the order they were accepted
    pub accepted_ids: Vec<usize>,
}

impl<B> SimQueue<B>
where
    B: Buf,
{
    pub fn new(ring_size: usize) -> SimQueue<B> {
        SimQueue {
            ring_size,
            ring: VecDeque::new(),
            reject: Reject::Never,
            completions: false,
            submissions: 0,
            accepted_ids: Vec::new(),
        }
    }

    pub fn rejecting(ring_size: usize, reject: Reject) -> SimQueue<B> {
        SimQueue {
            reject,
            ..SimQueue::new(ring_size)
        }
    }

    pub fn completing(ring_size: usize) -> SimQueue<B> {
        SimQueue {
            completions: true,
            ..SimQueue::new(ring_size)
        }
    }

    /// Bufs the queue currently holds
    pub fn ring(&self) -> impl Iterator<Item = &B> {
        self.ring.iter()
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }
}

impl<B> TxQueue<B> for SimQueue<B>
where
    B: Buf,
{
    fn try_send(&mut self, pending: &mut Pending<B>, batch_size: usize) -> Result<usize, TxError> {
        self.submissions += 1;

        match self.reject {
            Reject::Never => {}
            Reject::Always => return Ok(0),
            Reject::EveryNth(n) => {
                if self.submissions % n == 0 {
                    return Ok(0);
                }
            }
            Reject::Fail => return Err(SocketError::Wakeup(5).into()),
        }

        let room = self.ring_size - self.ring.len();
        let n = min(min(batch_size, room), pending.len());

        for _ in 0..n {
            if let Some(buf) = pending.pop_front() {
                self.accepted_ids.push(buf.get_id());
                self.ring.push_back(buf);
            }
        }

        Ok(n)
    }

    fn complete(&mut self, bufs: &mut Vec<B>, batch_size: usize) -> Result<usize, TxError> {
        if !self.completions {
            return Ok(0);
        }

        let n = min(batch_size, self.ring.len());
        bufs.extend(self.ring.drain(..n));

        Ok(n)
    }
}

/// A pool holding `num` heap bufs with ids 0..num
pub fn pool_of(num: usize) -> BufPoolVec<BufVec> {
    let mut bufs = BufVec::many(num, BUF_SIZE);
    let mut pool = BufPoolVec::new(num);

    let r = pool.put(&mut bufs, num);
    assert_eq!(r, num);

    pool
}

/// Take every buf out of `pool` and return their ids
pub fn drain_ids<B, P>(pool: &mut P) -> Vec<usize>
where
    B: Buf,
    P: BufPool<B>,
{
    let mut bufs = Vec::new();
    let len = pool.len();
    pool.get(&mut bufs, len);

    bufs.iter().map(|b| b.get_id()).collect()
}

/// No pacing, stop after `count` submissions
pub fn unpaced(count: u64) -> GeneratorConfig {
    GeneratorConfig {
        interval: Duration::from_millis(0),
        empty_backoff: Duration::from_millis(0),
        count: Some(count),
    }
}
