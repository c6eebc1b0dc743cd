//! Least-connection upstream selection, intersected with authorization.

use std::sync::Arc;

use crate::authz::AuthzScheme;
use crate::error::BalanceError;
use crate::upstream::Upstream;

/// Given an identity and the live upstream table, pick one to forward to.
/// Implementations must not mutate `num_active_conn` — that is the event
/// loop's job after a successful selection.
pub trait LoadBalancer: Send + Sync {
    fn select(
        &self,
        identity: &str,
        upstreams: &[Arc<Upstream>],
    ) -> Result<Arc<Upstream>, BalanceError>;
}

pub struct LeastConnectionBalancer {
    authz: AuthzScheme,
}

impl LeastConnectionBalancer {
    pub fn new(authz: AuthzScheme) -> Self {
        LeastConnectionBalancer { authz }
    }
}

impl LoadBalancer for LeastConnectionBalancer {
    fn select(
        &self,
        identity: &str,
        upstreams: &[Arc<Upstream>],
    ) -> Result<Arc<Upstream>, BalanceError> {
        if upstreams.is_empty() {
            return Err(BalanceError::NoUpstreams);
        }

        let mut best: Option<&Arc<Upstream>> = None;

        for up in upstreams {
            if !up.is_alive() || !self.authz.allows(identity, &up.address()) {
                continue;
            }

            match best {
                None => best = Some(up),
                Some(current) if up.num_active_conn() < current.num_active_conn() => {
                    best = Some(up)
                }
                _ => {}
            }
        }

        best.cloned().ok_or(BalanceError::NoUpstreamsAvailable)
    }
}
