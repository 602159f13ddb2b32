//! Running packet/byte counters, reported periodically by a background
//! thread. A flat atomic pair is enough: the original's `Stats` object is
//! just two RLock-guarded counters, and nothing downstream needs more than
//! eventually-consistent totals for a log line.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{STATS_LOG_INTERVAL_SECS, SUPERVISOR_POLL_MS};

#[derive(Debug, Default)]
pub struct Stats {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Stats::default())
    }

    pub fn record(&self, len: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len, Ordering::Relaxed);
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Spawn a thread that logs the running totals every
    /// [`STATS_LOG_INTERVAL_SECS`] seconds until `shutdown` is set. Sleeps in
    /// [`SUPERVISOR_POLL_MS`] slices rather than one long sleep, the same
    /// poll-and-check pattern the Supervisor uses on its completion channel,
    /// so shutdown is observed almost immediately instead of at the end of
    /// the next full period.
    pub fn spawn_logger(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        let stats = Arc::clone(self);
        let period = Duration::from_secs(STATS_LOG_INTERVAL_SECS);
        let poll = Duration::from_millis(SUPERVISOR_POLL_MS);
        std::thread::Builder::new()
            .name("stats-logger".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    let period_start = Instant::now();
                    while period_start.elapsed() < period {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        std::thread::sleep(poll.min(period - period_start.elapsed()));
                    }
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    tracing::info!(
                        packets = stats.packets(),
                        bytes = stats.bytes(),
                        "capture stats"
                    );
                }
            })
            .expect("failed to spawn stats-logger thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_packets_and_bytes() {
        let stats = Stats::new();
        stats.record(100);
        stats.record(50);
        assert_eq!(stats.packets(), 2);
        assert_eq!(stats.bytes(), 150);
    }

    #[test]
    fn fresh_stats_are_zero() {
        let stats = Stats::new();
        assert_eq!(stats.packets(), 0);
        assert_eq!(stats.bytes(), 0);
    }
}
