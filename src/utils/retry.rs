//! 共用的重試工具：字組寫入、位元寫入、PLC 重新連線都走同一套邏輯。

use crate::utils::error::{BridgeError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 每多失敗一次額外增加的等待時間
    pub step: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            step,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, Duration::ZERO)
    }

    /// 第 `attempt` 次（從 1 開始）失敗後的等待時間
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_millis(100))
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// The stop token is checked before every attempt and raced against every
/// back-off delay, so a shutdown aborts the loop with [`BridgeError::Cancelled`]
/// without interrupting an attempt that is already running.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    stop: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if stop.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("✅ {} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(
                    "🔁 Retry {}/{}: {} failed: {}",
                    attempt,
                    policy.max_attempts,
                    operation,
                    e
                );
                last_error = Some(e);
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                _ = stop.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
            }
        }
    }

    Err(BridgeError::RetryExhausted {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
        last: Box::new(last_error.unwrap_or(BridgeError::ProcessingError {
            message: "no attempt was made".to_string(),
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_delay_grows_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(50));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(150));
        assert_eq!(policy.delay_after(3), Duration::from_millis(200));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(100));
        let stop = CancellationToken::new();
        let started = Instant::now();

        let counter = calls.clone();
        let result = retry_with_backoff(&policy, "write", &stop, |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(BridgeError::plc("not yet"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));
        let stop = CancellationToken::new();

        let result: Result<()> = retry_with_backoff(&policy, "verify", &stop, |_| async {
            Err(BridgeError::plc("mismatch"))
        })
        .await;

        match result {
            Err(BridgeError::RetryExhausted {
                operation,
                attempts,
                last,
            }) => {
                assert_eq!(operation, "verify");
                assert_eq!(attempts, 2);
                assert!(matches!(*last, BridgeError::PlcError { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let stop = CancellationToken::new();
        stop.cancel();

        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<()> =
            retry_with_backoff(&RetryPolicy::default(), "write", &stop, |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(BridgeError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
