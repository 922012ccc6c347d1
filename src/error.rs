//! Error taxonomy for the core.
//! Mission: classify failures the way spec §7 requires so callers can react
//! instead of unwinding.

use thiserror::Error;

/// The five error classes of §7. Every public fallible operation on a
/// component returns `Result<T, CoreError>`; nothing here is ever rethrown
/// across the message bus — a handler that observes one publishes an
/// `activity.*` event instead (see `crate::activity`).
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// Venue RPC timeout, network blip, 5xx. Caller may retry or fail soft.
    #[error("transient error from {venue}: {detail}")]
    Transient { venue: String, detail: String },

    /// Bad input, missing credentials, blacklisted symbol. No state change.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Not an error in the exceptional sense — a gate declined the trade.
    #[error("risk rejected: {reason}")]
    RiskRejected { reason: String },

    /// An invariant the spec asserts was violated (e.g. close on unknown
    /// position). Logged at error severity; never cascades.
    #[error("invariant violated: {detail}")]
    InvariantViolated { detail: String },

    /// Persistent store unreachable beyond tolerance, or another
    /// fatal-infra condition. Triggers the circuit breaker.
    #[error("fatal infrastructure failure: {detail}")]
    FatalInfra { detail: String },
}

impl CoreError {
    pub fn validation(reason: impl Into<String>) -> Self {
        CoreError::Validation { reason: reason.into() }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        CoreError::InvariantViolated { detail: detail.into() }
    }

    pub fn transient(venue: impl Into<String>, detail: impl Into<String>) -> Self {
        CoreError::Transient { venue: venue.into(), detail: detail.into() }
    }

    pub fn risk_rejected(reason: impl Into<String>) -> Self {
        CoreError::RiskRejected { reason: reason.into() }
    }

    pub fn fatal_infra(detail: impl Into<String>) -> Self {
        CoreError::FatalInfra { detail: detail.into() }
    }

    /// Whether this class should ever trip the circuit breaker on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::FatalInfra { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
