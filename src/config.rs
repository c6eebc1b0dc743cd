//! Configuration schema and loading. `serde_yaml`-backed, matching the
//! teacher's `configuration.rs` derive style.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckCfg {
    #[serde(with = "secs_as_int")]
    pub interval: Duration,
    #[serde(with = "secs_as_int")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterCfg {
    #[serde(with = "secs_as_int")]
    pub cleanup_interval: Duration,
    pub limit: i64,
    #[serde(with = "secs_as_int")]
    pub window: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthzCfg {
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsCfg {
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamCfg {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerCfg {
    pub bind: String,
    #[serde(with = "secs_as_int")]
    pub timeout: Duration,
    pub upstreams: Vec<UpstreamCfg>,
    pub health: HealthCheckCfg,
    pub rate: RateLimiterCfg,
    pub authz: AuthzCfg,
    pub tls: TlsCfg,
}

impl ServerCfg {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// A runnable default, mirroring the Go source's `InitConfig()`: three
    /// local upstreams, the five-client rule matrix, and fixture cert paths.
    /// Used by demo binaries and tests so the crate runs without a config
    /// file on disk.
    pub fn default_for_demo() -> Self {
        ServerCfg {
            bind: "127.0.0.1:1234".to_string(),
            timeout: Duration::from_secs(1),
            upstreams: vec![
                UpstreamCfg { host: "127.0.0.1".to_string(), port: 8000 },
                UpstreamCfg { host: "127.0.0.1".to_string(), port: 8001 },
                UpstreamCfg { host: "127.0.0.1".to_string(), port: 8002 },
            ],
            health: HealthCheckCfg {
                interval: Duration::from_secs(3),
                timeout: Duration::from_secs(1),
            },
            rate: RateLimiterCfg {
                cleanup_interval: Duration::from_secs(20),
                limit: 1,
                window: Duration::from_secs(1),
            },
            authz: AuthzCfg {
                rules: vec![
                    "client.a-deny-127.0.0.1:8000".to_string(),
                    "client.b-allow-127.0.0.1:8000".to_string(),
                    "client.c-deny-127.0.0.1:8000".to_string(),
                    "client.d-allow-127.0.0.1:8000".to_string(),
                    "client.e-allow-127.0.0.1:8000".to_string(),
                    "client.a-allow-127.0.0.1:8001".to_string(),
                    "client.b-allow-127.0.0.1:8001".to_string(),
                    "client.c-deny-127.0.0.1:8001".to_string(),
                    "client.d-allow-127.0.0.1:8001".to_string(),
                    "client.e-allow-127.0.0.1:8001".to_string(),
                    "client.a-allow-127.0.0.1:8002".to_string(),
                    "client.b-allow-127.0.0.1:8002".to_string(),
                    "client.c-allow-127.0.0.1:8002".to_string(),
                    "client.d-allow-127.0.0.1:8002".to_string(),
                    "client.e-allow-127.0.0.1:8002".to_string(),
                ],
            },
            tls: TlsCfg {
                cert_path: "certs/server.crt".to_string(),
                key_path: "certs/server.key".to_string(),
                ca_path: "certs/ca.crt".to_string(),
            },
        }
    }
}

/// Deserialize a `Duration` from a plain integer count of seconds — the
/// YAML schema expresses every interval in whole seconds.
mod secs_as_int {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
