//! Error type for the receiver contract.
//!
//! Contract violations (`InvalidState`, `MissingSnapshot`) are programming
//! errors on the caller's side and are surfaced immediately. `Emit` wraps a
//! failing output channel. Persistence helpers in [`crate::io`] use
//! `anyhow::Result` instead.

use std::io;

/// Errors raised by sessions and sinks.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A step was reported while the session was not active.
    #[error("step reported on inactive session")]
    InvalidState,

    /// The filter policy requires a snapshot but none was supplied.
    #[error("filter policy requires a snapshot for step {count}, none was supplied")]
    MissingSnapshot {
        /// Step count of the rejected record.
        count: u64,
    },

    /// Writing a record to the sink's output channel failed.
    #[error("emit record: {0}")]
    Emit(#[from] io::Error),
}

impl TraceError {
    /// Whether this error is a contract violation rather than an I/O failure.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidState | Self::MissingSnapshot { .. })
    }
}

/// Result alias used across the contract.
pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable() {
        assert_eq!(
            TraceError::InvalidState.to_string(),
            "step reported on inactive session"
        );
        let e = TraceError::MissingSnapshot { count: 3 };
        assert!(e.to_string().contains("step 3"));
        assert!(e.is_contract_violation());
        let io = TraceError::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(!io.is_contract_violation());
    }
}
