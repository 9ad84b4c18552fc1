use std::cmp::min;

use crate::buf::Buf;
use crate::buf_pool::{BufPool, BufPoolError};

/// Vec backed BufPool. Bufs are handed out LIFO so recently used (cache warm) frames are reused
/// first.
#[derive(Debug)]
pub struct BufPoolVec<T>
where
    T: Buf,
{
    bufs: Vec<T>,
    capacity: usize,
    // Indexed by Buf::get_id(), true while the buf is at rest in the pool
    at_rest: Vec<bool>,
}

impl<T> BufPoolVec<T>
where
    T: Buf,
{
    pub fn new(capacity: usize) -> BufPoolVec<T> {
        BufPoolVec {
            bufs: Vec::with_capacity(capacity),
            capacity,
            at_rest: vec![false; capacity],
        }
    }

    fn mark_taken(&mut self, buf: &T) {
        if let Some(slot) = self.at_rest.get_mut(buf.get_id()) {
            *slot = false;
        }
    }

    fn mark_returned(&mut self, buf: &T) {
        let id = buf.get_id();
        debug_assert!(id < self.capacity, "buf {} does not belong to this pool", id);
        debug_assert!(
            self.bufs.len() < self.capacity,
            "pool already holds all {} bufs",
            self.capacity
        );

        if let Some(slot) = self.at_rest.get_mut(id) {
            debug_assert!(!*slot, "buf {} released twice", id);
            *slot = true;
        }
    }
}

impl<T> BufPool<T> for BufPoolVec<T>
where
    T: Buf,
{
    fn get(&mut self, bufs: &mut Vec<T>, num: usize) -> usize {
        let ready = min(num, self.bufs.len());

        for _ in 0..ready {
            if let Some(buf) = self.bufs.pop() {
                self.mark_taken(&buf);
                bufs.push(buf);
            }
        }

        ready
    }

    fn put(&mut self, bufs: &mut Vec<T>, num: usize) -> usize {
        let ready = min(num, bufs.len());

        for _ in 0..ready {
            if let Some(buf) = bufs.pop() {
                self.mark_returned(&buf);
                self.bufs.push(buf);
            }
        }

        ready
    }

    fn acquire(&mut self) -> Result<T, BufPoolError> {
        let buf = self.bufs.pop().ok_or(BufPoolError::Empty)?;
        self.mark_taken(&buf);

        Ok(buf)
    }

    fn release(&mut self, buf: T) {
        self.mark_returned(&buf);
        self.bufs.push(buf);
    }

    fn len(&self) -> usize {
        self.bufs.len()
    }

    fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
