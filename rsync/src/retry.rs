//! Bounded retries around transfer invocations.

use std::time::Duration;

use crate::Error;

/// How often to re-run a failed invocation and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub times: u32,
    /// Pause between attempts.
    pub sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: 0,
            sleep: Duration::from_secs(30),
        }
    }
}

/// Notification callback, invoked before every retry with the 1-based
/// number of the attempt about to run and the error that triggered it.
pub type RetryHook = dyn Fn(u32, &Error) + Send + Sync;

/// Run `op` under `policy`.
///
/// A success on any attempt returns immediately. Exhausting the budget
/// (`times + 1` attempts in total) yields [`Error::MaxRetriesExceeded`]
/// wrapping the last failure, so callers can always tell a budget overrun
/// from a first-try error.
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    hook: Option<&RetryHook>,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempts = policy.times + 1;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                tracing::warn!(
                    "attempt {attempt} of {attempts} failed, retrying in {:?}: {error}",
                    policy.sleep
                );
                if let Some(hook) = hook {
                    hook(attempt + 1, &error);
                }
                tokio::time::sleep(policy.sleep).await;
            }
            Err(error) => {
                return Err(Error::MaxRetriesExceeded {
                    attempts,
                    source: Box::new(error),
                });
            }
        }
    }
    unreachable!("the retry loop runs at least one attempt")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use test_log::test;

    use super::*;

    fn failure() -> Error {
        Error::Failed {
            code: 10,
            stderr: "connection refused".to_string(),
        }
    }

    fn quick(times: u32) -> RetryPolicy {
        RetryPolicy {
            times,
            sleep: Duration::from_millis(1),
        }
    }

    #[test(tokio::test)]
    async fn always_failing_op_runs_exactly_budget_plus_one() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retries(quick(2), None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(failure()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            Error::MaxRetriesExceeded { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::Failed { code: 10, .. }));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test(tokio::test)]
    async fn zero_budget_still_wraps_the_failure() {
        let result: Result<(), Error> = with_retries(quick(0), None, || async { Err(failure()) }).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::MaxRetriesExceeded { attempts: 1, .. }
        ));
    }

    #[test(tokio::test)]
    async fn success_midway_stops_the_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retries(quick(5), None, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(failure())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test(tokio::test)]
    async fn hook_sees_every_retry() {
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let hook = {
            let seen = seen.clone();
            move |attempt: u32, _error: &Error| {
                seen.lock().unwrap().push(attempt);
            }
        };
        let result: Result<(), Error> =
            with_retries(quick(2), Some(&hook), || async { Err(failure()) }).await;
        assert!(result.is_err());
        // the hook announces the attempt about to run, so the first try is
        // never announced and the final failure triggers no further retry
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }
}
