use std::sync::Arc;
use std::time::Duration;

use domain::VolunteerRepository;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::{DeliveryError, DeliveryPipeline, MessagePayload, NotificationJob, NotificationKind};
use crate::error::ApplicationError;
use crate::retry::{retry_async, Backoff, RetryConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// 活动结束后给所有志愿者发送感谢邮件。
///
/// 逐个发送，两次发送之间间隔 `spacing`；单个收件人遇到临时错误时按指数退避重试。
/// 取消后正在退避的收件人记为失败，其余收件人记为跳过。
pub struct ThankYouCampaign {
    volunteers: Arc<dyn VolunteerRepository>,
    pipeline: DeliveryPipeline,
    retry: RetryConfig,
    spacing: Duration,
}

impl ThankYouCampaign {
    pub fn new(
        volunteers: Arc<dyn VolunteerRepository>,
        pipeline: DeliveryPipeline,
        spacing: Duration,
    ) -> Self {
        Self {
            volunteers,
            pipeline,
            retry: RetryConfig {
                max_attempts: 3,
                backoff: Backoff::exponential(Duration::from_secs(1)),
            },
            spacing,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<CampaignReport, ApplicationError> {
        let volunteers = self.volunteers.list_all().await?;
        let mut report = CampaignReport {
            total: volunteers.len(),
            ..CampaignReport::default()
        };
        tracing::info!(total = report.total, "开始发送感谢邮件");

        let mut last_send: Option<Instant> = None;
        for (index, volunteer) in volunteers.iter().enumerate() {
            if let Some(last) = last_send {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.skipped = volunteers.len() - index;
                        break;
                    }
                    _ = sleep_until(last + self.spacing) => {}
                }
            }

            let job = NotificationJob::email(
                NotificationKind::ThankYou,
                volunteer,
                MessagePayload::for_volunteer(volunteer),
            );
            let message = match self.pipeline.render(&job) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(recipient = %job.recipient.address, error = %err, "感谢邮件渲染失败");
                    report.failed += 1;
                    continue;
                }
            };

            last_send = Some(Instant::now());
            let result = retry_async(
                &self.retry,
                cancel,
                |e: &DeliveryError| e.is_retryable(),
                |_| self.pipeline.send(&message),
            )
            .await;

            match result {
                Ok(_) => {
                    report.sent += 1;
                    tracing::info!(
                        recipient = %job.recipient.address,
                        progress = index + 1,
                        total = report.total,
                        "感谢邮件已发送"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        recipient = %job.recipient.address,
                        kind = %job.kind,
                        error = %err,
                        "感谢邮件发送失败"
                    );
                }
            }
        }

        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "感谢邮件发送结束"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::test_support::*;
    use super::super::{Channel, MockNotificationSender};
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_and_spaces_recipients() {
        let store = InMemoryStore::new();
        store.create(volunteer("a@example.com", false)).await.unwrap();
        store.create(volunteer("b@example.com", false)).await.unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut email = MockNotificationSender::new();
        email.expect_send().times(4).returning(move |message| {
            let mut calls = recorded.lock().unwrap();
            calls.push((Instant::now(), message.recipient.address.clone()));
            // 第一个收件人前两次失败
            if calls.len() <= 2 {
                Err(DeliveryError::Transient("timeout".into()))
            } else {
                Ok(receipt(Channel::Email))
            }
        });

        let started = Instant::now();
        let campaign = ThankYouCampaign::new(
            Arc::new(store),
            DeliveryPipeline::new(Arc::new(email), Arc::new(MockNotificationSender::new())),
            Duration::from_secs(24),
        );
        let report = campaign.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            report,
            CampaignReport {
                total: 2,
                sent: 2,
                failed: 0,
                skipped: 0
            }
        );
        let calls = calls.lock().unwrap();
        // 1s + 2s 退避
        assert_eq!(calls[2].0 - started, Duration::from_secs(3));
        // 第二个收件人在第一个开始后 24s 发送
        assert_eq!(calls[3].0 - started, Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_on_recipient_after_three_attempts() {
        let store = InMemoryStore::new();
        store.create(volunteer("a@example.com", false)).await.unwrap();

        let mut email = MockNotificationSender::new();
        email
            .expect_send()
            .times(3)
            .returning(|_| Err(DeliveryError::Transient("timeout".into())));

        let campaign = ThankYouCampaign::new(
            Arc::new(store),
            DeliveryPipeline::new(Arc::new(email), Arc::new(MockNotificationSender::new())),
            Duration::from_secs(24),
        );
        let report = campaign.run(&CancellationToken::new()).await.unwrap();
        assert_eq!((report.sent, report.failed), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_campaign() {
        let store = InMemoryStore::new();
        store.create(volunteer("a@example.com", false)).await.unwrap();
        store.create(volunteer("b@example.com", false)).await.unwrap();

        let mut email = MockNotificationSender::new();
        email
            .expect_send()
            .times(1)
            .returning(|_| Err(DeliveryError::Transient("timeout".into())));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let campaign = ThankYouCampaign::new(
            Arc::new(store),
            DeliveryPipeline::new(Arc::new(email), Arc::new(MockNotificationSender::new())),
            Duration::from_secs(24),
        );
        let report = campaign.run(&cancel).await.unwrap();

        assert_eq!(
            report,
            CampaignReport {
                total: 2,
                sent: 0,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }
}
