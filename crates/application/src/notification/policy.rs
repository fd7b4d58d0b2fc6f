//! 重试与节流策略
//!
//! 确认通知对时效不敏感，按固定间隔重试直到成功或达到总时长上限；
//! 批量提醒对时效敏感，只发一次，失败即跳过，但两次调用之间保持最小间隔，
//! 避免触发服务商的每小时调用上限。两种策略的等待都可以被取消。

use std::time::Duration;

use config::NotificationConfig;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::{DeliveryError, DeliveryPipeline, DeliveryReceipt, NotificationJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        attempts: u32,
        receipt: DeliveryReceipt,
    },
    /// 永久失败或达到重试总时长上限
    Abandoned { attempts: u32, reason: DeliveryError },
    /// 进程关闭，任务被取消
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    pub retry_interval: Duration,
    pub ceiling: Duration,
}

impl ConfirmationPolicy {
    pub fn new(retry_interval: Duration, ceiling: Duration) -> Self {
        Self {
            retry_interval,
            ceiling,
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(
            config.confirmation_retry_interval(),
            config.confirmation_ceiling(),
        )
    }

    /// 首次发送立即执行；可重试错误按固定间隔重试，直到成功、遇到永久错误、
    /// 到达总时长上限或被取消。上限一到立即放弃，不等待下一次重试。
    pub async fn run(
        &self,
        pipeline: &DeliveryPipeline,
        job: &NotificationJob,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let deadline = Instant::now() + self.ceiling;

        let message = match pipeline.render(job) {
            Ok(message) => message,
            Err(reason) => return abandon(job, 0, reason),
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let last_error = match pipeline.send(&message).await {
                Ok(receipt) => {
                    tracing::info!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        channel = %job.channel,
                        attempt = attempts,
                        "通知发送成功"
                    );
                    return DeliveryOutcome::Delivered { attempts, receipt };
                }
                Err(err) if !err.is_retryable() => return abandon(job, attempts, err),
                Err(err) => {
                    tracing::warn!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        channel = %job.channel,
                        attempt = attempts,
                        error = %err,
                        "通知发送失败，稍后重试"
                    );
                    err
                }
            };

            let wake_at = std::cmp::min(Instant::now() + self.retry_interval, deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        channel = %job.channel,
                        attempt = attempts,
                        "服务关闭，确认通知未发送"
                    );
                    return DeliveryOutcome::Cancelled { attempts };
                }
                _ = sleep_until(wake_at) => {}
            }

            if Instant::now() >= deadline {
                return abandon(job, attempts, last_error);
            }
        }
    }
}

fn abandon(job: &NotificationJob, attempts: u32, reason: DeliveryError) -> DeliveryOutcome {
    tracing::error!(
        recipient = %job.recipient.address,
        kind = %job.kind,
        channel = %job.channel,
        attempt = attempts,
        error = %reason,
        "通知投递已放弃，需要人工补发"
    );
    DeliveryOutcome::Abandoned { attempts, reason }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    /// 因取消而未尝试的条目
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ReminderPolicy {
    pub spacing: Duration,
}

impl ReminderPolicy {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(config.reminder_spacing())
    }

    /// 逐条发送，每条只尝试一次，失败记录日志后继续下一条。
    ///
    /// 任意两次服务商调用的间隔不小于 `spacing`。`last_call` 由调用方持有，
    /// 同一轮内连续的多个批次共用它，批次之间同样保持间隔。
    /// 取消信号在条目之间检查，不会中断正在进行的调用。
    pub async fn dispatch_batch(
        &self,
        pipeline: &DeliveryPipeline,
        jobs: &[NotificationJob],
        last_call: &mut Option<Instant>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, job) in jobs.iter().enumerate() {
            if cancel.is_cancelled() {
                report.skipped = jobs.len() - index;
                break;
            }

            let message = match pipeline.render(job) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        channel = %job.channel,
                        error = %err,
                        "提醒渲染失败，跳过"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            if let Some(last) = *last_call {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.skipped = jobs.len() - index;
                        break;
                    }
                    _ = sleep_until(last + self.spacing) => {}
                }
            }

            *last_call = Some(Instant::now());
            match pipeline.send(&message).await {
                Ok(_) => report.sent += 1,
                Err(err) => {
                    tracing::warn!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        channel = %job.channel,
                        attempt = 1,
                        error = %err,
                        "提醒发送失败，本轮跳过"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.skipped > 0 {
            tracing::info!(skipped = report.skipped, "批量提醒被取消");
        }
        report
    }
}
