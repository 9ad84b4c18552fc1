use arraydeque::{ArrayDeque, Wrapping};
use thiserror::Error;

pub mod buf;
pub mod buf_mmap;
pub mod buf_vec;
pub mod buf_pool;
pub mod buf_pool_vec;
pub mod config;
pub mod generator;
pub mod mmap_area;
pub mod packet;
pub mod port;
pub mod shutdown;
pub mod socket;
pub mod tx;
pub mod umem;
mod util;

/// Bufs staged for a single Tx submission
pub const PENDING_LEN: usize = 64;

pub type Pending<B> = ArrayDeque<[B; PENDING_LEN], Wrapping>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Port(#[from] port::PortError),
    #[error(transparent)]
    Mmap(#[from] mmap_area::MmapError),
    #[error(transparent)]
    Packet(#[from] packet::PacketError),
    #[error("unable to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
