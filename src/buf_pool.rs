use thiserror::Error;

use crate::buf::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufPoolError {
    #[error("buffer pool is empty")]
    Empty,
}

/// BufPool stores Bufs. It is used from a single thread; wrap it in a Mutex to share it.
pub trait BufPool<T>
where
    T: Buf,
{
    /// Move up to `num` bufs from the pool into `bufs`. Returns how many were moved.
    fn get(&mut self, bufs: &mut Vec<T>, num: usize) -> usize;

    /// Move up to `num` bufs from the end of `bufs` into the pool. Returns how many were moved.
    fn put(&mut self, bufs: &mut Vec<T>, num: usize) -> usize;

    /// Take one buf. Never blocks; an exhausted pool returns `BufPoolError::Empty`.
    fn acquire(&mut self) -> Result<T, BufPoolError>;

    /// Return one buf. Each buf must be released exactly once per acquire.
    fn release(&mut self, buf: T);

    /// Number of bufs at rest in the pool
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool;

    /// Number of bufs the pool was created for
    fn capacity(&self) -> usize;
}
