use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

/// Longest single sleep while pacing, bounds how late a stop request is noticed
const PACE_SLICE: Duration = Duration::from_millis(10);

/// Cooperative stop request shared between the run loop and the signal path.
///
/// Cloning shares the flag. The signal side only ever stores to it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown::default()
    }

    /// Route SIGINT and SIGTERM to `request()`. Can only be installed once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let s = self.clone();

        ctrlc::set_handler(move || {
            s.request();
        })?;
        info!("CTRL-C or SIGTERM to exit");

        Ok(())
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `interval` or until a stop is requested, whichever comes first. Returns true if
    /// a stop was requested.
    pub fn pace(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;

        loop {
            if self.is_requested() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            thread::sleep(std::cmp::min(deadline - now, PACE_SLICE));
        }
    }
}
