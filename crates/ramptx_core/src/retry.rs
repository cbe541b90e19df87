//! Retrying store calls through transient failures.

use crate::config::RetryConfig;
use ramptx_store::StoreResult;
use tracing::warn;

/// Runs `call` until it succeeds, fails with a non-transient code, or the
/// attempt budget is spent.
///
/// The store may have applied a call that reported `Unavailable`, so `call`
/// must be a step whose repetition the caller tolerates; every protocol
/// step interprets `KeyExists`, `FieldExists`, `FieldNotFound` or
/// `CasMismatch` on a retry accordingly.
pub(crate) fn with_retry<T>(
    retry: &RetryConfig,
    op: &'static str,
    key: &str,
    mut call: impl FnMut() -> StoreResult<T>,
) -> StoreResult<T> {
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match call() {
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                warn!(op, key, attempt, ?delay, error = %err, "store unavailable, retrying");
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramptx_store::StoreError;
    use std::cell::Cell;

    #[test]
    fn retries_transient_failures() {
        let calls = Cell::new(0);
        let result = with_retry(&RetryConfig::immediate(3), "get", "a", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::unavailable("timeout"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: StoreResult<()> = with_retry(&RetryConfig::immediate(2), "get", "a", || {
            calls.set(calls.get() + 1);
            Err(StoreError::unavailable("down"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn does_not_retry_result_codes() {
        let calls = Cell::new(0);
        let result: StoreResult<()> = with_retry(&RetryConfig::immediate(5), "get", "a", || {
            calls.set(calls.get() + 1);
            Err(StoreError::key_not_found("a"))
        });
        assert!(result.unwrap_err().is_key_not_found());
        assert_eq!(calls.get(), 1);
    }
}
