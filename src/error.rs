//! Error types for the proxy's module boundaries.

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bad authz rule format: {0}")]
    BadAuthzRule(String),

    #[error("unsupported allow/deny value in rule: {0}")]
    BadAuthzVerb(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from the least-connection balancer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    #[error("zero upstreams configured")]
    NoUpstreams,

    #[error("no upstream available for this identity")]
    NoUpstreamsAvailable,
}

/// Errors that can occur while constructing the server's TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("none of the preferred key exchange groups are supported by the crypto provider")]
    NoKeyExchangeGroups,

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Errors that can occur while constructing or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad authz configuration: {0}")]
    Authz(#[from] ConfigError),

    #[error("bad tls configuration: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias used throughout the crate.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
