//! TTL sweeper: periodic removal of expired records.
//!
//! Each collection owns one [`TtlManager`] driving a background thread that
//! fires on a configurable interval (default 60 s) and runs the collection's
//! expiry sweep. The sweep itself (and the on-demand `cleanup_expired_now` /
//! `expiring_within` queries) lives in the collection, which owns the cache;
//! the manager owns pacing, enable/disable, interval restarts, and shutdown.
//!
//! Sweep errors are logged and the next tick proceeds normally. Shutdown is
//! synchronous: the worker is signalled and joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The sweep callback: removes expired records, returns how many.
pub type SweepFn = Arc<dyn Fn() -> acorn_core::Result<usize> + Send + Sync>;

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic expiry sweeper for one collection.
pub struct TtlManager {
    sweep: SweepFn,
    interval: Mutex<Duration>,
    enabled: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl TtlManager {
    /// Creates a manager around `sweep` and starts the worker at the
    /// default interval.
    #[must_use]
    pub fn start(sweep: SweepFn) -> Self {
        Self::start_with_interval(sweep, DEFAULT_SWEEP_INTERVAL)
    }

    /// Creates a manager with an explicit interval and starts the worker.
    #[must_use]
    pub fn start_with_interval(sweep: SweepFn, interval: Duration) -> Self {
        let manager = Self {
            sweep,
            interval: Mutex::new(interval),
            enabled: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        };
        manager.respawn();
        manager
    }

    /// Current sweep interval.
    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Changes the interval and restarts the worker so the new pace takes
    /// effect immediately rather than after one stale tick.
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
        self.respawn();
    }

    /// Whether periodic sweeping is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables periodic sweeping. The worker keeps ticking when
    /// disabled but skips the sweep, so re-enabling needs no restart.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Stops the worker and joins it. Idempotent.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // A send failure means the worker already exited.
            let _ = worker.stop_tx.send(());
            let _ = worker.handle.join();
        }
    }

    fn respawn(&self) {
        self.shutdown();

        let interval = *self.interval.lock();
        let enabled = Arc::clone(&self.enabled);
        let sweep = Arc::clone(&self.sweep);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("acorn-ttl-sweep".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if !enabled.load(Ordering::Relaxed) {
                            continue;
                        }
                        match sweep() {
                            Ok(0) => {}
                            Ok(removed) => {
                                tracing::debug!(removed, "TTL sweep removed expired records");
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "TTL sweep failed; continuing");
                            }
                        }
                    }
                    // Stop signal or manager dropped: exit.
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("spawn TTL sweeper thread");

        *self.worker.lock() = Some(Worker { stop_tx, handle });
    }
}

impl Drop for TtlManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_sweep() -> (SweepFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sweep: SweepFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        (sweep, count)
    }

    fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    #[test]
    fn sweeps_fire_on_the_interval() {
        let (sweep, count) = counting_sweep();
        let manager = TtlManager::start_with_interval(sweep, Duration::from_millis(10));

        assert!(wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) >= 3
        }));
        manager.shutdown();
    }

    #[test]
    fn disabled_manager_ticks_without_sweeping() {
        let (sweep, count) = counting_sweep();
        let manager = TtlManager::start_with_interval(sweep, Duration::from_millis(10));
        manager.set_enabled(false);
        let settled = count.load(Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(100));
        // At most one in-flight sweep can land after the disable.
        assert!(count.load(Ordering::SeqCst) <= settled + 1);

        manager.set_enabled(true);
        assert!(wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) > settled + 1
        }));
        manager.shutdown();
    }

    #[test]
    fn shutdown_stops_the_worker() {
        let (sweep, count) = counting_sweep();
        let manager = TtlManager::start_with_interval(sweep, Duration::from_millis(10));
        assert!(wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) >= 1
        }));

        manager.shutdown();
        let settled = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), settled);

        // Idempotent.
        manager.shutdown();
    }

    #[test]
    fn set_interval_restarts_the_worker() {
        let (sweep, count) = counting_sweep();
        // Start glacial, then speed up; the restart must apply the new pace.
        let manager = TtlManager::start_with_interval(sweep, Duration::from_secs(3_600));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        manager.set_interval(Duration::from_millis(10));
        assert_eq!(manager.interval(), Duration::from_millis(10));
        assert!(wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) >= 2
        }));
        manager.shutdown();
    }

    #[test]
    fn sweep_errors_do_not_kill_the_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sweep: SweepFn = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(acorn_core::AcornError::BackendIo("flaky".into()))
            } else {
                Ok(0)
            }
        });

        let manager = TtlManager::start_with_interval(sweep, Duration::from_millis(10));
        assert!(wait_until(Duration::from_secs(2), || {
            count.load(Ordering::SeqCst) >= 4
        }));
        manager.shutdown();
    }

    #[test]
    fn drop_joins_the_worker() {
        let (sweep, _count) = counting_sweep();
        let manager = TtlManager::start_with_interval(sweep, Duration::from_millis(10));
        drop(manager); // must not hang or leak the thread
    }
}
