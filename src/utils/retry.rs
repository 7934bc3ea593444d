use std::future::Future;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;
use crate::core::TransferError;
use super::duration_ms;

/// 指数退避重试策略，分片上传与合并共用
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// 退避倍数
    pub multiplier: f64,
    /// 单次等待上限
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// 重试耗尽或遇到不可重试错误
#[derive(Debug)]
pub struct RetryError {
    pub attempts: u32,
    pub error: TransferError,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// 第 `failed_attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// 执行带重试的操作
    ///
    /// `operation` 接收当前尝试序号（从 1 开始）。每次可重试的失败在等待前调用
    /// `on_retry(attempt, &error, delay)`；最后一次失败直接返回。
    pub async fn run<T, F, Fut, H>(&self, mut operation: F, mut on_retry: H) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
        H: FnMut(u32, &TransferError, Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || attempt >= max_attempts {
                        return Err(RetryError { attempts: attempt, error });
                    }

                    let delay = self.delay_for(attempt);
                    warn!(attempt, max_attempts, ?delay, %error, "attempt failed, retrying");
                    on_retry(attempt, &error, delay);

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(30), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retries = Vec::new();

        let result = fast_policy()
            .run(
                |attempt| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(TransferError::Timeout(Duration::from_millis(1)))
                    } else {
                        Ok(42)
                    }
                },
                |attempt, _, _| retries.push(attempt),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = fast_policy()
            .run(
                |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TransferError::server_error(503, "unavailable"))
                },
                |_, _, _| {},
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.error, TransferError::Server { status_code: 503, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = fast_policy()
            .run(
                |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TransferError::Cancelled)
                },
                |_, _, _| {},
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5\nbase_delay_ms = 250").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.multiplier, 2.0);
    }
}
