//! Bounded retry for remote store calls.
//!
//! A call is attempted at most [`MAX_ATTEMPTS`] times with a doubling
//! delay starting at [`BASE_DELAY`]. Only transient errors are retried, and
//! the whole sequence lives under one deadline: an attempt in flight when
//! it expires is dropped and no further sleep starts past it.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use super::{StorageError, StorageResult};
use crate::logging::*;

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_DELAY: Duration = Duration::from_millis(50);

/// Run `f` with retries until it succeeds, fails permanently, runs out of
/// attempts or hits `timeout`.
pub async fn with_retry<T, F, Fut>(op: &'static str, timeout: Duration, mut f: F) -> StorageResult<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = StorageResult<T>>,
{
	let deadline = Instant::now() + timeout;
	let mut delay = BASE_DELAY;
	let mut attempt = 1;

	loop {
		let result = match tokio::time::timeout_at(deadline, f()).await {
			Ok(r) => r,
			Err(_) => return Err(StorageError::Timeout { op }),
		};

		match result {
			Ok(value) => return Ok(value),
			Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
				if Instant::now() + delay >= deadline {
					return Err(StorageError::Timeout { op });
				}
				warn!(attempt, max_attempts = MAX_ATTEMPTS, "{} failed, retrying in {:?}: {}", op, delay, e);
				tokio::time::sleep(delay).await;
				delay *= 2;
				attempt += 1;
			}
			Err(e) => return Err(e),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	fn transient() -> StorageError {
		StorageError::Backend { op: "get", message: "connection reset".into(), transient: true }
	}

	#[tokio::test]
	async fn test_retry_exhausts_attempts_on_transient_failure() {
		let calls = Arc::new(AtomicU32::new(0));
		let c = calls.clone();

		let result: StorageResult<()> = with_retry("get", Duration::from_secs(5), || {
			let c = c.clone();
			async move {
				c.fetch_add(1, Ordering::SeqCst);
				Err(transient())
			}
		})
		.await;

		assert!(matches!(result, Err(StorageError::Backend { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
	}

	#[tokio::test]
	async fn test_retry_recovers_after_transient_failure() {
		let calls = Arc::new(AtomicU32::new(0));
		let c = calls.clone();

		let result = with_retry("get", Duration::from_secs(5), || {
			let c = c.clone();
			async move {
				if c.fetch_add(1, Ordering::SeqCst) == 0 {
					Err(transient())
				} else {
					Ok(42)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_permanent_error_is_not_retried() {
		let calls = Arc::new(AtomicU32::new(0));
		let c = calls.clone();

		let result: StorageResult<()> = with_retry("get", Duration::from_secs(5), || {
			let c = c.clone();
			async move {
				c.fetch_add(1, Ordering::SeqCst);
				Err(StorageError::Corrupt { key: "u/a".into(), message: "bad manifest".into() })
			}
		})
		.await;

		assert!(matches!(result, Err(StorageError::Corrupt { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_deadline_cancels_slow_attempt() {
		let result: StorageResult<()> = with_retry("set", Duration::from_millis(20), || async {
			tokio::time::sleep(Duration::from_secs(10)).await;
			Ok(())
		})
		.await;

		assert!(matches!(result, Err(StorageError::Timeout { op: "set" })));
	}
}

// vim: ts=4
