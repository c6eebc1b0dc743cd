//! The server core: listener, mTLS config, and the single event loop that
//! serializes every mutation of the upstream table. This is THE CORE of the
//! proxy — everything else (authz, balance, ratelimit, healthcheck) is a
//! collaborator the event loop calls into.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::TlsAcceptor;

use crate::authz::AuthzScheme;
use crate::balance::{LeastConnectionBalancer, LoadBalancer};
use crate::config::ServerCfg;
use crate::error::{Result, ServerError};
use crate::healthcheck::HealthChecker;
use crate::ratelimit::{self, RateLimiter};
use crate::tls;
use crate::upstream::Upstream;

const BUFFER_SIZE: usize = 1024;

struct SelectionRequest {
    identity: String,
    reply: oneshot::Sender<Option<Arc<Upstream>>>,
}

/// Inbound events the event loop multiplexes. `Decrement` is the crate's one
/// addition to the source's four streams (§5 of the Go `Server`): the source
/// decrements `num_active_conn` from the connection task with a relaxed
/// write; this port routes it back through the event loop, per spec.md §9's
/// recommended safe refactor.
enum Event {
    Accept(TcpStream),
    Select(SelectionRequest),
    Decrement(Arc<Upstream>),
}

/// Owns the listener, TLS config, and upstream table. All mutation of the
/// table happens inside `run_event_loop`, the proxy's single writer task.
pub struct Server {
    bind: String,
    timeout: Duration,
    upstreams: Vec<Arc<Upstream>>,
    tls_config: Arc<rustls::ServerConfig>,
    balancer: LeastConnectionBalancer,
    rate_limiter: Arc<RateLimiter>,
    health_checker: Arc<HealthChecker>,
    event_tx: mpsc::Sender<Event>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<Event>>>,
    healthy_rx: std::sync::Mutex<Option<mpsc::Receiver<Arc<Upstream>>>>,
    unhealthy_rx: std::sync::Mutex<Option<mpsc::Receiver<Arc<Upstream>>>>,
    unhealthy_tx: mpsc::Sender<Arc<Upstream>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    ratelimit_shutdown: std::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl Server {
    /// Build the server from configuration: CA trust pool, server identity,
    /// hardened TLS config, balancer, rate limiter, health checker. Does not
    /// bind or spawn anything yet — see `start`.
    pub fn new(cfg: &ServerCfg) -> Result<Self, ServerError> {
        let authz = AuthzScheme::new(&cfg.authz.rules)?;
        let tls_config =
            tls::build_server_config(&cfg.tls.cert_path, &cfg.tls.key_path, &cfg.tls.ca_path)?;

        let upstreams: Vec<Arc<Upstream>> = cfg
            .upstreams
            .iter()
            .map(|u| Arc::new(Upstream::new(u.host.clone(), u.port)))
            .collect();

        let rate_limiter = Arc::new(RateLimiter::new(
            cfg.rate.limit,
            cfg.rate.window,
            cfg.rate.cleanup_interval,
        ));

        let (health_checker, healthy_rx, unhealthy_rx) =
            HealthChecker::new(cfg.health.interval, cfg.health.timeout);
        let unhealthy_tx = health_checker.unhealthy_sender();

        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Server {
            bind: cfg.bind.clone(),
            timeout: cfg.timeout,
            upstreams,
            tls_config,
            balancer: LeastConnectionBalancer::new(authz),
            rate_limiter,
            health_checker,
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            healthy_rx: std::sync::Mutex::new(Some(healthy_rx)),
            unhealthy_rx: std::sync::Mutex::new(Some(unhealthy_rx)),
            unhealthy_tx,
            shutdown_tx,
            shutdown_rx,
            ratelimit_shutdown: std::sync::Mutex::new(None),
        })
    }

    /// Starts, in order: the rate limiter sweep, the health checker pool,
    /// the event loop task, and the accept loop. Returns once the listener
    /// is bound; the accept loop itself runs in the background.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        let (rl_shutdown_tx, rl_handle) = self.rate_limiter.clone().start();
        *self.ratelimit_shutdown.lock().unwrap() = Some(rl_shutdown_tx);
        // The sweep task outlives `start`; drop the join handle, it is
        // reaped by `stop` via the shutdown watch instead.
        std::mem::drop(rl_handle);

        self.health_checker.start(&self.upstreams);

        let event_rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .expect("start called more than once");
        let healthy_rx = self.healthy_rx.lock().unwrap().take().expect("start called more than once");
        let unhealthy_rx = self
            .unhealthy_rx
            .lock()
            .unwrap()
            .take()
            .expect("start called more than once");

        let loop_server = self.clone();
        tokio::spawn(async move {
            loop_server.run_event_loop(event_rx, healthy_rx, unhealthy_rx).await;
        });

        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind.clone(),
                source,
            })?;
        log::info!(
            "load balancer server started on {} at {}",
            self.bind,
            chrono::Local::now().to_rfc3339()
        );

        let accept_server = self.clone();
        tokio::spawn(async move {
            accept_server.run_accept_loop(listener).await;
        });

        Ok(())
    }

    /// Snapshot of upstream state for diagnostics and tests:
    /// `(address, is_alive, num_active_conn)` per upstream, in configured
    /// order. Read-only; does not go through the event loop, so a snapshot
    /// may be momentarily stale with respect to in-flight selections.
    pub fn upstream_snapshot(&self) -> Vec<(String, bool, i64)> {
        self.upstreams
            .iter()
            .map(|u| (u.address(), u.is_alive(), u.num_active_conn()))
            .collect()
    }

    /// Signal shutdown. The event loop stops the rate limiter and health
    /// checker and returns; in-flight connection tasks are not forcibly
    /// cancelled (matches the source — see spec.md §9).
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn run_accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    if self.event_tx.send(Event::Accept(stream)).await.is_err() {
                        log::error!("event loop gone, stopping accept loop");
                        return;
                    }
                }
                Err(e) => {
                    log::error!("error in listener accept: {}", e);
                    return;
                }
            }
        }
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut event_rx: mpsc::Receiver<Event>,
        mut healthy_rx: mpsc::Receiver<Arc<Upstream>>,
        mut unhealthy_rx: mpsc::Receiver<Arc<Upstream>>,
    ) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    match event {
                        Event::Accept(stream) => self.handle_accept(stream),
                        Event::Select(req) => self.handle_selection(req),
                        Event::Decrement(upstream) => upstream.decrement(),
                    }
                }
                Some(upstream) = unhealthy_rx.recv() => {
                    self.mark_unhealthy(&upstream);
                }
                Some(upstream) = healthy_rx.recv() => {
                    self.mark_healthy(&upstream);
                }
                _ = shutdown_rx.changed() => {
                    if let Some(tx) = self.ratelimit_shutdown.lock().unwrap().take() {
                        ratelimit::stop(&tx);
                    }
                    self.health_checker.stop();
                    log::info!("event loop stopped");
                    return;
                }
            }
        }
    }

    fn handle_accept(self: &Arc<Self>, stream: TcpStream) {
        let server = self.clone();
        tokio::spawn(async move {
            server.handle_connection(stream).await;
        });
    }

    /// Identifies the upstream by reference equality, same as the source's
    /// linear scan comparing pointers.
    fn find_upstream(&self, needle: &Arc<Upstream>) -> Option<&Arc<Upstream>> {
        self.upstreams.iter().find(|u| Arc::ptr_eq(u, needle))
    }

    fn mark_unhealthy(&self, upstream: &Arc<Upstream>) {
        match self.find_upstream(upstream) {
            Some(found) => {
                found.set_alive(false);
                log::info!("found an unhealthy upstream {}", found.address());
            }
            None => log::info!("unhealthy upstream not found in upstream list"),
        }
    }

    /// Edges only: flips dead -> alive, never re-asserts an already-alive
    /// upstream. Asymmetric with `mark_unhealthy`, which updates on every
    /// result — intentional, per spec.md §9's open question.
    fn mark_healthy(&self, upstream: &Arc<Upstream>) {
        match self.find_upstream(upstream) {
            Some(found) => {
                if !found.is_alive() {
                    found.set_alive(true);
                    log::info!("unhealthy upstream became healthy {}", found.address());
                }
            }
            None => log::info!("upstream not found in upstream list"),
        }
    }

    fn handle_selection(&self, req: SelectionRequest) {
        match self.balancer.select(&req.identity, &self.upstreams) {
            Ok(upstream) => {
                upstream.increment();
                let _ = req.reply.send(Some(upstream));
            }
            Err(e) => {
                log::info!("no upstream selected for {}: {}", req.identity, e);
                let _ = req.reply.send(None);
            }
        }
    }

    /// Per-connection handler (§4.7). Ordering deliberately moves the
    /// rate-limit check before selection, per spec.md §9's stated preference
    /// ("do not silently preserve the bug"): a denied request never touches
    /// `num_active_conn` at all, so there is nothing to decrement.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let acceptor = TlsAcceptor::from(self.tls_config.clone());
        let tls_stream = match acceptor.accept(stream).await {
            Ok(s) => s,
            Err(e) => {
                log::info!("tls handshake failed: {}", e);
                return;
            }
        };

        let identity = {
            let (_, session) = tls_stream.get_ref();
            match session.peer_certificates().and_then(|certs| certs.first()) {
                Some(cert) => match tls::peer_common_name(cert) {
                    Some(cn) => cn,
                    None => {
                        log::info!("peer certificate has no common name");
                        return;
                    }
                },
                None => {
                    log::info!("no peer certificate, client connection closed");
                    return;
                }
            }
        };

        if !self.rate_limiter.allows(&identity) {
            log::info!("rate limit exceeded for {}", identity);
            return;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .event_tx
            .send(Event::Select(SelectionRequest {
                identity: identity.clone(),
                reply: reply_tx,
            }))
            .await
            .is_err()
        {
            return;
        }
        let upstream = match reply_rx.await {
            Ok(Some(upstream)) => upstream,
            _ => {
                log::info!("no upstream available for {}", identity);
                return;
            }
        };

        let addr = upstream.address();
        let upstream_conn = match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(conn)) => conn,
            _ => {
                log::info!("found an unhealthy upstream during regular lb operation {}", addr);
                let _ = self.unhealthy_tx.send(upstream.clone()).await;
                let _ = self.event_tx.send(Event::Decrement(upstream)).await;
                return;
            }
        };

        log::info!("balancer: select upstream {} for {}", addr, identity);
        let (mut client_read, mut client_write) = tokio::io::split(tls_stream);
        let (mut upstream_read, mut upstream_write) = upstream_conn.into_split();
        let idle_timeout = self.timeout;

        let client_to_upstream = copy_direction(
            &mut client_read,
            &mut upstream_write,
            idle_timeout,
            &identity,
            &addr,
            "-> lb ->",
        );
        let upstream_to_client = copy_direction(
            &mut upstream_read,
            &mut client_write,
            idle_timeout,
            &identity,
            &addr,
            "<- lb <-",
        );
        tokio::join!(client_to_upstream, upstream_to_client);

        let _ = self.event_tx.send(Event::Decrement(upstream)).await;
    }
}

/// One direction of the splice: read until EOF/error, write every byte read.
/// A short write or any write error is fatal for this direction; a read
/// error that is not EOF is logged and also terminates only this direction.
/// Resets the idle deadline on every successful read.
async fn copy_direction<R, W>(
    from: &mut R,
    to: &mut W,
    idle_timeout: Duration,
    identity: &str,
    upstream_addr: &str,
    direction: &str,
) where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buf = BytesMut::zeroed(BUFFER_SIZE);
    loop {
        let read = match tokio::time::timeout(idle_timeout, from.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                log::error!("error reading from {} {}: {}", direction, upstream_addr, e);
                break;
            }
            Err(_) => {
                log::info!("idle timeout {} {}", direction, upstream_addr);
                break;
            }
        };

        match to.write_all(&buf[..read]).await {
            Ok(()) => {}
            Err(e) => {
                log::error!("error write {} {}: {}", direction, upstream_addr, e);
                break;
            }
        }
    }
    log::info!("{} {} upstream {}", identity, direction, upstream_addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn fixture(name: &str) -> String {
        format!(
            "{}/tests/fixtures/certs/{}",
            env!("CARGO_MANIFEST_DIR"),
            name
        )
    }

    fn test_cfg(bind: SocketAddr, upstream_addr: SocketAddr) -> ServerCfg {
        use crate::config::{AuthzCfg, HealthCheckCfg, RateLimiterCfg, TlsCfg, UpstreamCfg};
        ServerCfg {
            bind: bind.to_string(),
            timeout: Duration::from_millis(500),
            upstreams: vec![UpstreamCfg {
                host: upstream_addr.ip().to_string(),
                port: upstream_addr.port(),
            }],
            health: HealthCheckCfg {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(1),
            },
            rate: RateLimiterCfg {
                limit: 10,
                window: Duration::from_secs(1),
                cleanup_interval: Duration::from_secs(30),
            },
            authz: AuthzCfg { rules: vec![] },
            tls: TlsCfg {
                cert_path: fixture("server.crt"),
                key_path: fixture("server.key"),
                ca_path: fixture("ca.crt"),
            },
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn construction_succeeds_with_fixture_certs() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        drop(upstream_listener);

        let bind_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bind_addr = bind_listener.local_addr().unwrap();
        drop(bind_listener);

        let cfg = test_cfg(bind_addr, upstream_addr);
        let server = Server::new(&cfg).expect("server should construct");
        assert_eq!(server.upstreams.len(), 1);
    }
}
