//! Background health-check pool: one prober task per upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::upstream::Upstream;

const PROBE_MESSAGE: &[u8] = b"Health checker: Hello from Doctor\n";

/// Healthy/unhealthy transitions are fire-and-forget deliveries to the
/// server's event loop, which is the sole mutator of `is_alive`. Probes
/// never touch `is_alive` themselves.
pub struct HealthChecker {
    interval: Duration,
    timeout: Duration,
    healthy_tx: mpsc::Sender<Arc<Upstream>>,
    unhealthy_tx: mpsc::Sender<Arc<Upstream>>,
    probers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(
        interval: Duration,
        timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Upstream>>, mpsc::Receiver<Arc<Upstream>>) {
        let (healthy_tx, healthy_rx) = mpsc::channel(64);
        let (unhealthy_tx, unhealthy_rx) = mpsc::channel(64);

        let checker = Arc::new(HealthChecker {
            interval,
            timeout,
            healthy_tx,
            unhealthy_tx,
            probers: std::sync::Mutex::new(Vec::new()),
        });

        (checker, healthy_rx, unhealthy_rx)
    }

    /// A clone of the unhealthy sender, for the connection handler to use
    /// when a dial to a selected upstream fails at forward time (spec.md
    /// §4.7 step 5), outside of the regular probe loop.
    pub fn unhealthy_sender(&self) -> mpsc::Sender<Arc<Upstream>> {
        self.unhealthy_tx.clone()
    }

    /// Spawn one prober per upstream. Runs until `stop`.
    pub fn start(self: &Arc<Self>, upstreams: &[Arc<Upstream>]) {
        let mut probers = self.probers.lock().unwrap();
        for upstream in upstreams {
            let checker = self.clone();
            let upstream = upstream.clone();
            probers.push(tokio::spawn(async move {
                checker.probe_loop(upstream).await;
            }));
        }
        log::info!("health checker started!");
    }

    async fn probe_loop(&self, upstream: Arc<Upstream>) {
        let addr = upstream.address();
        loop {
            tokio::time::sleep(self.interval).await;
            self.check(&upstream, &addr).await;
        }
    }

    async fn check(&self, upstream: &Arc<Upstream>, addr: &str) {
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut conn)) => {
                if let Err(e) = conn.write_all(PROBE_MESSAGE).await {
                    log::error!("doctor write error {}", e);
                }
                let _ = self.healthy_tx.send(upstream.clone()).await;
            }
            _ => {
                let _ = self.unhealthy_tx.send(upstream.clone()).await;
            }
        }
    }

    /// Cancel all probers promptly. Any in-flight dial is abandoned.
    pub fn stop(&self) {
        let mut probers = self.probers.lock().unwrap();
        for handle in probers.drain(..) {
            handle.abort();
        }
        log::info!("health checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn three_unreachable_upstreams_are_all_reported_unhealthy() {
        let upstreams = vec![
            Arc::new(Upstream::new("127.0.0.3", 8000)),
            Arc::new(Upstream::new("127.0.0.4", 8001)),
            Arc::new(Upstream::new("127.0.0.5", 8002)),
        ];

        let (checker, _healthy_rx, mut unhealthy_rx) =
            HealthChecker::new(Duration::from_millis(100), Duration::from_millis(200));
        checker.start(&upstreams);

        let mut seen = std::collections::HashSet::new();
        while seen.len() < 3 {
            let up = unhealthy_rx.recv().await.expect("channel closed early");
            seen.insert(Arc::as_ptr(&up) as usize);
        }

        checker.stop();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reachable_upstream_is_reported_healthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    return;
                }
            }
        });

        let upstream = Arc::new(Upstream::new("127.0.0.1", addr.port()));
        let (checker, mut healthy_rx, _unhealthy_rx) =
            HealthChecker::new(Duration::from_millis(50), Duration::from_millis(200));
        checker.start(&[upstream.clone()]);

        let got = healthy_rx.recv().await.expect("channel closed early");
        assert!(Arc::ptr_eq(&got, &upstream));
        checker.stop();
    }
}
