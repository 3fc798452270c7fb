//! Exit code constants for the fleetlock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, invalid lock definition)
//! - 2: Lock store failure
//! - 3: Protected task was cancelled (lease lost or cancelled externally)
//! - 4: Lock acquisition failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, or invalid lock definition.
pub const USER_ERROR: i32 = 1;

/// Lock store failure: the shared lock table could not be read or written.
pub const STORE_FAILURE: i32 = 2;

/// The protected task observed a cancellation request and stopped.
pub const CANCELLED: i32 = 3;

/// Lock acquisition failure: the lease could not be obtained within its timeout.
pub const LOCK_FAILURE: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, STORE_FAILURE, CANCELLED, LOCK_FAILURE];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn lock_failure_keeps_its_historic_code() {
        assert_eq!(SUCCESS, 0);
        assert_eq!(LOCK_FAILURE, 4);
    }
}
