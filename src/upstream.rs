//! Upstream record: a mutable descriptor of a single backend.
//!
//! Identity is the record's stable address (`Arc::ptr_eq`), not its fields —
//! two upstreams with identical host:port are distinct entries in the table.
//! `is_alive` and `num_active_conn` are atomics so that health probers and
//! the per-connection handler can read them without a lock, but the event
//! loop remains the only task that ever writes either one.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    is_alive: AtomicBool,
    num_active_conn: AtomicI64,
}

impl Upstream {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Upstream {
            host: host.into(),
            port,
            is_alive: AtomicBool::new(true),
            num_active_conn: AtomicI64::new(0),
        }
    }

    /// `host:port`, used as the authz/balancer lookup key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    pub fn set_alive(&self, alive: bool) {
        self.is_alive.store(alive, Ordering::Relaxed);
    }

    pub fn num_active_conn(&self) -> i64 {
        self.num_active_conn.load(Ordering::Relaxed)
    }

    /// Called by the event loop after a successful selection.
    pub fn increment(&self) {
        self.num_active_conn.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by the event loop when a connection handler reports completion.
    pub fn decrement(&self) {
        self.num_active_conn.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn new_upstream_starts_alive_with_no_connections() {
        let up = Upstream::new("127.0.0.1", 8000);
        assert!(up.is_alive());
        assert_eq!(up.num_active_conn(), 0);
        assert_eq!(up.address(), "127.0.0.1:8000");
    }

    #[test]
    fn increment_and_decrement_track_active_connections() {
        let up = Upstream::new("127.0.0.1", 8000);
        up.increment();
        up.increment();
        assert_eq!(up.num_active_conn(), 2);
        up.decrement();
        assert_eq!(up.num_active_conn(), 1);
    }

    #[test]
    fn identity_is_pointer_equality_not_field_equality() {
        let a = Arc::new(Upstream::new("127.0.0.1", 8000));
        let b = Arc::new(Upstream::new("127.0.0.1", 8000));
        assert!(!Arc::ptr_eq(&a, &b));
        let a2 = a.clone();
        assert!(Arc::ptr_eq(&a, &a2));
    }
}
