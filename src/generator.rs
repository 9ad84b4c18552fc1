//! The transmit loop.
//!
//! Each iteration, while running:
//!
//! 1. return completed frames to the pool
//! 2. acquire a frame (an empty pool backs off and retries)
//! 3. stamp the packet template into it
//! 4. submit it; a rejected frame goes straight back to the pool
//! 5. pace
//!
//! The stop flag is only looked at between iterations, never while a frame is held.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buf::Buf;
use crate::buf_pool::{BufPool, BufPoolError};
use crate::packet::PacketTemplate;
use crate::shutdown::Shutdown;
use crate::tx::{TxEngine, TxOutcome, TxQueue};

/// Completed frames returned to the pool per iteration, at most
pub const COMPLETION_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Delay after every submission
    pub interval: Duration,
    /// Delay before retrying when the pool is empty
    pub empty_backoff: Duration,
    /// Stop after this many submissions (accepted or rejected)
    pub count: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            interval: Duration::from_millis(200),
            empty_backoff: Duration::from_millis(100),
            count: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Terminal
    Stopping,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Packets the queue accepted
    pub tx_packets: u64,
    /// Packets the queue rejected
    pub tx_rejected: u64,
    /// Iterations that found the pool empty
    pub pool_empty: u64,
    /// Frames returned by the completion queue
    pub completed: u64,
}

impl Stats {
    pub fn attempts(&self) -> u64 {
        self.tx_packets + self.tx_rejected
    }
}

/// What a single iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Sent,
    Rejected,
    PoolEmpty,
    Stopped,
}

pub struct Generator<B, P, Q>
where
    B: Buf,
    P: BufPool<B>,
    Q: TxQueue<B>,
{
    pool: P,
    engine: TxEngine<B, Q>,
    template: PacketTemplate,
    config: GeneratorConfig,
    stats: Stats,
    state: RunState,
}

impl<B, P, Q> Generator<B, P, Q>
where
    B: Buf,
    P: BufPool<B>,
    Q: TxQueue<B>,
{
    pub fn new(
        pool: P,
        queue: Q,
        template: PacketTemplate,
        config: GeneratorConfig,
    ) -> Generator<B, P, Q> {
        Generator {
            pool,
            engine: TxEngine::new(queue),
            template,
            config,
            stats: Default::default(),
            state: RunState::Running,
        }
    }

    fn limit_reached(&self) -> bool {
        match self.config.count {
            Some(count) => self.stats.attempts() >= count,
            None => false,
        }
    }

    /// One iteration without pacing
    pub fn step(&mut self, shutdown: &Shutdown) -> Step {
        if self.state == RunState::Stopping {
            return Step::Stopped;
        }
        if shutdown.is_requested() || self.limit_reached() {
            debug!("stopping after {} submissions", self.stats.attempts());
            self.state = RunState::Stopping;
            return Step::Stopped;
        }

        let n = self.engine.reclaim(&mut self.pool, COMPLETION_BATCH_SIZE);
        self.stats.completed += n as u64;

        let mut buf = match self.pool.acquire() {
            Ok(buf) => buf,
            Err(BufPoolError::Empty) => {
                self.stats.pool_empty += 1;
                warn!("Unable to get a buffer from the pool");
                return Step::PoolEmpty;
            }
        };

        self.template.write(&mut buf);

        match self.engine.transmit(buf) {
            TxOutcome::Sent => {
                self.stats.tx_packets += 1;
                info!(
                    "Packet transmitted successfully ... ({})",
                    self.stats.tx_packets
                );
                Step::Sent
            }
            TxOutcome::Rejected(buf) => {
                self.pool.release(buf);
                self.stats.tx_rejected += 1;
                warn!("Unable to transmit the packet");
                Step::Rejected
            }
        }
    }

    /// Run until a stop is requested or the configured count is reached
    pub fn run(&mut self, shutdown: &Shutdown) -> Stats {
        info!("Starting packet transmission");

        loop {
            let delay = match self.step(shutdown) {
                Step::Stopped => break,
                Step::PoolEmpty => self.config.empty_backoff,
                Step::Sent | Step::Rejected => {
                    if self.limit_reached() {
                        continue;
                    }
                    self.config.interval
                }
            };

            shutdown.pace(delay);
        }

        info!(
            tx_packets = self.stats.tx_packets,
            tx_rejected = self.stats.tx_rejected,
            "Packet transmission stopped"
        );

        self.stats
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut P {
        &mut self.pool
    }

    pub fn engine(&self) -> &TxEngine<B, Q> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TxEngine<B, Q> {
        &mut self.engine
    }
}
