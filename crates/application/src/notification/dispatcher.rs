use std::time::Duration;

use domain::RegistrationDetails;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{
    ConfirmationPolicy, DeliveryPipeline, MessagePayload, NotificationJob,
    NotificationKind,
};

/// 确认通知派发器
///
/// 每条通知在独立的后台任务中按 `ConfirmationPolicy` 发送，HTTP 响应不等待投递结果。
/// 所有任务都登记在同一个 `TaskTracker` 中，进程关闭时可以等待或取消。
#[derive(Clone)]
pub struct ConfirmationDispatcher {
    pipeline: DeliveryPipeline,
    policy: ConfirmationPolicy,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl ConfirmationDispatcher {
    pub fn new(pipeline: DeliveryPipeline, policy: ConfirmationPolicy) -> Self {
        Self {
            pipeline,
            policy,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// 报名成功后调用：邮件总是发送，短信仅在志愿者同意且留有手机号时发送
    pub fn dispatch_confirmation(&self, details: &RegistrationDetails) -> usize {
        self.dispatch_for(NotificationKind::Confirmation, details)
    }

    pub fn dispatch_cancellation(&self, details: &RegistrationDetails) -> usize {
        self.dispatch_for(NotificationKind::Cancellation, details)
    }

    fn dispatch_for(&self, kind: NotificationKind, details: &RegistrationDetails) -> usize {
        let payload = MessagePayload::for_registration(
            &details.volunteer,
            &details.project,
            details.registration.guest_count.value(),
        );

        let mut jobs = vec![NotificationJob::email(
            kind,
            &details.volunteer,
            payload.clone(),
        )];
        jobs.extend(NotificationJob::sms(kind, &details.volunteer, payload));

        let count = jobs.len();
        for job in jobs {
            self.spawn(job);
        }
        count
    }

    /// 派发单个任务。已关闭的派发器不再接受新任务。
    pub fn spawn(&self, job: NotificationJob) {
        if self.tracker.is_closed() {
            tracing::warn!(
                recipient = %job.recipient.address,
                kind = %job.kind,
                channel = %job.channel,
                "派发器已关闭，通知未发送"
            );
            return;
        }

        let pipeline = self.pipeline.clone();
        let policy = self.policy.clone();
        let cancel = self.cancel.child_token();
        self.tracker.spawn(async move {
            let outcome = policy.run(&pipeline, &job, &cancel).await;
            tracing::debug!(
                kind = %job.kind,
                channel = %job.channel,
                delivered = outcome.is_delivered(),
                "确认通知任务结束"
            );
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 停止接收新任务，等待在途任务最多 `grace`；超时后取消剩余任务的重试等待。
    ///
    /// 返回是否在宽限期内全部完成。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "等待确认通知任务完成");
        }

        let drained = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(pending = self.tracker.len(), "宽限期已到，取消剩余确认通知");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
        drained
    }
}
