//! An mTLS-terminating Layer-4 reverse proxy: authorizes clients by
//! certificate identity, enforces per-identity rate limits, and forwards
//! bytes to the least-loaded authorized upstream.

pub mod authz;
pub mod balance;
pub mod config;
pub mod error;
pub mod healthcheck;
pub mod ratelimit;
pub mod server;
pub mod tls;
pub mod upstream;

pub use config::ServerCfg;
pub use error::{Result, ServerError};
pub use server::Server;
