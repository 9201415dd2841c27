// SPDX-License-Identifier: MIT OR Apache-2.0

//! Crate-wide error type.
//!
//! Mirrors the error taxonomy described for the core: configuration and
//! privilege-installation failures are fatal at startup; transient-remote
//! and protocol errors are handled per call by the component that produced
//! them, so a failing provider or backend never takes down its siblings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CeemsError {
    /// Missing token, unknown provider, unparseable URL, unknown strategy,
    /// invalid UID/GID bounds. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP timeout, non-2xx response, response parse failure. The caller
    /// keeps its last-good value, if any.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// IPMI nonzero completion code, unexpected message id, truncated frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Capability raise failed, ACL apply failed, path unreachable after the
    /// UID/GID switch.
    #[error("privilege error: {0}")]
    Privilege(String),

    /// Type assertion mismatch in a dispatched payload, nil pool id, and
    /// other invariant violations that indicate a bug in the caller.
    #[error("programmer error: {0}")]
    Invariant(String),

    /// The load balancer's strategy found no live backend for a pool.
    #[error("no live backend available for pool {0:?}")]
    NoBackendAvailable(String),

    /// The load balancer received a cluster-id it has no pool for.
    #[error("unknown cluster id: {0}")]
    UnknownCluster(String),

    /// A circuit breaker is currently open for the named target.
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("capability error: {0}")]
    Caps(String),

    #[error("acl error: {0}")]
    Acl(String),

    #[error("posix error: {0}")]
    Nix(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, CeemsError>;
