//! Error taxonomy for remote platform calls.
//!
//! Every platform operation resolves to one of these classes, which is
//! what the backoff controller keys its retry decisions on.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The platform told us to slow down for at least `wait`.
    #[error("rate limited, told to wait {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// Network or protocol hiccup. Worth another try after a short pause.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Entity private, message id invalid, banned, and the like.
    /// Retrying cannot help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The owning account was stopped while the call was pending.
    #[error("cancelled")]
    Cancelled,
}

impl PlatformError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
