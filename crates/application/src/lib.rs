//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：名额账本负责报名与取消，
//! 通知子系统负责确认通知、定期提醒和感谢邮件的投递、重试与节流。

pub mod clock;
pub mod error;
pub mod memory;
pub mod notification;
pub mod rate_limiter;
pub mod retry;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ApplicationError;
pub use memory::InMemoryStore;
pub use notification::{
    Channel, ConfirmationDispatcher, ConfirmationPolicy, DeliveryError, DeliveryOutcome,
    DeliveryPipeline, DeliveryReceipt, NotificationJob, NotificationKind, NotificationSender,
    OutboundMessage, Recipient, ReminderPolicy, ReminderScheduler, SchedulerState,
    ThankYouCampaign,
};
pub use rate_limiter::{RateLimitError, RequestRateGuard};
pub use retry::{retry_async, Backoff, RetryConfig};
pub use services::{
    CancelRequest, CapacityLedger, CapacityLedgerDependencies, ProjectOverview, RegisterRequest,
};

#[cfg(any(test, feature = "testing"))]
pub use notification::MockNotificationSender;
