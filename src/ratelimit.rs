//! Fixed-window per-identity rate limiter with a background eviction sweep.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;

struct ClientEntry {
    count: i64,
    window_index: i64,
    last_seen: Instant,
}

pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientEntry>>,
    limit: i64,
    window: Duration,
    cleanup_interval: Duration,
}

impl RateLimiter {
    pub fn new(limit: i64, window: Duration, cleanup_interval: Duration) -> Self {
        RateLimiter {
            clients: Mutex::new(HashMap::new()),
            limit,
            window,
            cleanup_interval,
        }
    }

    fn current_window_index(&self) -> i64 {
        let window_ms = self.window.as_millis().max(1) as i64;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64;
        now_ms / window_ms
    }

    /// Admission check for a single identity, serialized by a single mutex.
    pub fn allows(&self, identity: &str) -> bool {
        let current_window = self.current_window_index();
        let mut clients = self.clients.lock().unwrap();

        let entry = clients.entry(identity.to_string()).or_insert_with(|| ClientEntry {
            count: 0,
            window_index: current_window,
            last_seen: Instant::now(),
        });

        if entry.window_index < current_window {
            entry.window_index = current_window;
            entry.count = 0;
            entry.last_seen = Instant::now();
        } else {
            entry.count += 1;
            entry.last_seen = Instant::now();
        }

        entry.count <= self.limit
    }

    fn cleanup(&self) {
        let mut clients = self.clients.lock().unwrap();
        let cleanup_interval = self.cleanup_interval;
        clients.retain(|_, entry| entry.last_seen.elapsed() <= cleanup_interval);
    }

    /// Spawn the background eviction sweep. Returns a shutdown handle and the
    /// sweep task's join handle; `stop` on the handle ends the sweep.
    pub fn start(self: std::sync::Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let limiter = self;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        log::info!("rate limiter stopped");
                        return;
                    }
                    _ = tokio::time::sleep(limiter.cleanup_interval) => {
                        limiter.cleanup();
                    }
                }
            }
        });

        log::info!("rate limiter started!");
        (shutdown_tx, handle)
    }
}

/// Send `true` on the shutdown sender returned by `start` to stop the sweep.
pub fn stop(shutdown_tx: &watch::Sender<bool>) {
    let _ = shutdown_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_one_admits_exactly_one_request_per_window() {
        let rl = RateLimiter::new(1, Duration::from_secs(1), Duration::from_secs(20));
        assert!(rl.allows("dave"));
        assert!(!rl.allows("dave"));
        assert!(!rl.allows("dave"));
    }

    #[test]
    fn limit_zero_admits_nothing() {
        let rl = RateLimiter::new(0, Duration::from_secs(1), Duration::from_secs(20));
        assert!(!rl.allows("dave"));
    }

    #[test]
    fn distinct_identities_have_independent_windows() {
        let rl = RateLimiter::new(1, Duration::from_secs(1), Duration::from_secs(20));
        assert!(rl.allows("alice"));
        assert!(!rl.allows("alice"));
        assert!(rl.allows("bob"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_evicts_idle_entries() {
        let rl = std::sync::Arc::new(RateLimiter::new(
            1,
            Duration::from_secs(1),
            Duration::from_millis(50),
        ));
        assert!(rl.allows("carol"));
        let (shutdown_tx, handle) = rl.clone().start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rl.clients.lock().unwrap().len(), 0);

        stop(&shutdown_tx);
        handle.await.unwrap();
    }
}
