//! Error types for fleetlock.
//!
//! Uses thiserror for derive macros. Acquisition failures carry enough context
//! (lock name, attempt uid, reason) to diagnose which task is in the way.

use crate::exit_codes;
use std::fmt;
use thiserror::Error;

/// Why an acquisition attempt gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionReason {
    /// The lease is live and held by the given task (if the holder recorded one).
    HeldBy(Option<String>),
    /// The record names a holder task that no longer exists.
    LockIsGone,
    /// The `blocked_by` dependency lock could not be obtained, or appeared mid-acquisition.
    BlockedByOtherLocks,
}

impl fmt::Display for AcquisitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionReason::HeldBy(Some(task_id)) => {
                write!(f, "Locking task id is {}", task_id)
            }
            AcquisitionReason::HeldBy(None) => write!(f, "Locking task id is unknown"),
            AcquisitionReason::LockIsGone => write!(f, "Lock is gone"),
            AcquisitionReason::BlockedByOtherLocks => write!(f, "Blocked by other locks"),
        }
    }
}

/// Main error type for fleetlock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// User provided invalid arguments or configuration.
    #[error("{0}")]
    UserError(String),

    /// A lock was constructed with an invalid definition.
    #[error("Invalid lock: {0}")]
    InvalidLock(String),

    /// The lease could not be acquired within the timeout budget.
    #[error("Failed to acquire lock for {name} uid: {uid}. {reason}")]
    AcquisitionTimeout {
        name: String,
        uid: String,
        reason: AcquisitionReason,
    },

    /// The underlying lock store failed.
    #[error("Lock store failure: {0}")]
    Store(String),

    /// A cooperative checkpoint observed a cancellation request.
    #[error("Task {0} was cancelled")]
    Cancelled(String),
}

impl LockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::UserError(_) => exit_codes::USER_ERROR,
            LockError::InvalidLock(_) => exit_codes::USER_ERROR,
            LockError::AcquisitionTimeout { .. } => exit_codes::LOCK_FAILURE,
            LockError::Store(_) => exit_codes::STORE_FAILURE,
            LockError::Cancelled(_) => exit_codes::CANCELLED,
        }
    }

    /// The acquisition reason, if this is an acquisition failure.
    pub fn acquisition_reason(&self) -> Option<&AcquisitionReason> {
        match self {
            LockError::AcquisitionTimeout { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Result type alias for fleetlock operations.
pub type Result<T> = std::result::Result<T, LockError>;
