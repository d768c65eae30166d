//! `WithRetry`: re-run an operation that fails with a transient Postgres
//! error (serialization failure, deadlock, connection reset) up to a bounded
//! number of attempts with jittered exponential backoff. Every other error
//! propagates on the first attempt.

use akashi_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(10);

/// Postgres SQLSTATE for a serialization failure under `SERIALIZABLE`/
/// `REPEATABLE READ` isolation.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// Postgres SQLSTATE for a detected deadlock.
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// Whether `err` is the kind of failure `with_retry` should re-run: a
/// database serialization/deadlock conflict, or a connection-level
/// transient (pool timeout, reset, closed connection).
fn is_retryable_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SQLSTATE_SERIALIZATION_FAILURE) | Some(SQLSTATE_DEADLOCK_DETECTED)
        ),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

/// Postgres SQLSTATE class for integrity-constraint violations.
const SQLSTATE_CLASS_INTEGRITY_CONSTRAINT: &str = "23";
/// Postgres SQLSTATE class for data exceptions (bad input to a function,
/// invalid cast, numeric overflow).
const SQLSTATE_CLASS_DATA_EXCEPTION: &str = "22";

/// Map a raw `sqlx::Error` into the workspace's [`Error`], classifying
/// retryable Postgres failures as [`Error::Transient`] and everything else
/// by SQLSTATE per specification §7: a duplicate key is a [`Error::Conflict`],
/// other constraint/data errors are caller mistakes ([`Error::Validation`]),
/// a missing row is [`Error::NotFound`], and anything left over is treated
/// as an unrecoverable, non-retryable [`Error::Fatal`].
pub fn map_sqlx_error(err: sqlx::Error) -> Error {
    if is_retryable_sqlx_error(&err) {
        return Error::Transient(err.to_string());
    }

    match &err {
        sqlx::Error::RowNotFound => Error::NotFound(err.to_string()),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => Error::Conflict(err.to_string()),
            Some(code)
                if code.starts_with(SQLSTATE_CLASS_INTEGRITY_CONSTRAINT)
                    || code.starts_with(SQLSTATE_CLASS_DATA_EXCEPTION) =>
            {
                Error::Validation(err.to_string())
            }
            _ => Error::Fatal(format!("storage error: {err}")),
        },
        _ => Error::Fatal(format!("storage error: {err}")),
    }
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, retrying only on [`Error::Transient`]
/// with exponential backoff (`BASE_DELAY * 2^attempt` plus up to 50% jitter,
/// capped so the whole retry window stays sub-second).
pub async fn with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = BASE_DELAY * 2u32.pow(attempt);
                let jitter_frac: f64 = rand::random::<f64>() * 0.5;
                let jittered = backoff + Duration::from_secs_f64(backoff.as_secs_f64() * jitter_frac);
                tracing::warn!(attempt, error = %err, "retrying transient storage error");
                tokio::time::sleep(jittered).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_op_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Transient("serialization failure".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_transient_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("bad input".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
