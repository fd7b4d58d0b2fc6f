//! 有限次数的异步重试，用于批量发送这类可以稍后人工补发的场景。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// 指数退避：第 n 次失败后等待 `base * 2^(n-1)`。
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self { base }
    }

    pub fn delay_at(&self, attempt: u32) -> Duration {
        let exp = std::cmp::min(attempt.saturating_sub(1), 20);
        self.base.saturating_mul(1u32 << exp)
    }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// 执行 `op`，失败且 `is_retryable` 为真时按退避间隔重试，最多 `max_attempts` 次。
///
/// 退避等待期间 `cancel` 触发时立即返回最近一次的错误，不再发起新的尝试。
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let delay = config.backoff.delay_at(attempt);
                tracing::debug!(attempt, ?delay, error = %e, "操作失败，稍后重试");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempt, error = %e, "重试等待被取消");
                        return Err(e);
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, base: Duration) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Backoff::exponential(base),
        }
    }

    #[test]
    fn exponential_delay_doubles() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay_at(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_at(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let config = config(3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry_async(
            &config,
            &CancellationToken::new(),
            |_| true,
            |_| async { Err("down".to_string()) },
        )
        .await;

        assert!(result.is_err());
        // 1s + 2s
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let config = config(5, Duration::from_secs(1));
        let mut calls = 0;
        let result: Result<(), String> = retry_async(
            &config,
            &CancellationToken::new(),
            |e: &String| e != "bad address",
            |_| {
                calls += 1;
                async { Err("bad address".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let config = config(3, Duration::from_millis(10));
        let result = retry_async(
            &config,
            &CancellationToken::new(),
            |_: &String| true,
            |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let config = config(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let mut calls = 0;
        let result: Result<(), String> = retry_async(
            &config,
            &cancel,
            |_| true,
            |_| {
                calls += 1;
                async { Err("down".to_string()) }
            },
        )
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls, 1);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_stops_after_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0;
        let result: Result<(), String> = retry_async(
            &config(3, Duration::from_secs(1)),
            &cancel,
            |_| true,
            |_| {
                calls += 1;
                async { Err("down".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
