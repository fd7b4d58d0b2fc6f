//! 通知投递子系统
//!
//! - `templates`：根据通知类型与渠道渲染正文
//! - `pipeline`：渲染 + 一次服务商调用
//! - `policy`：确认通知的重试策略与批量提醒的节流策略
//! - `dispatcher`：报名成功后在受监管的后台任务中发送确认通知
//! - `scheduler`：按固定周期扫描提醒窗口并批量发送
//! - `campaign`：活动结束后的感谢邮件群发

pub mod campaign;
pub mod dispatcher;
pub mod pipeline;
pub mod policy;
pub mod scheduler;
pub mod templates;

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use domain::{Project, Volunteer};
use thiserror::Error;

pub use campaign::{CampaignReport, ThankYouCampaign};
pub use dispatcher::ConfirmationDispatcher;
pub use pipeline::DeliveryPipeline;
pub use policy::{BatchReport, ConfirmationPolicy, DeliveryOutcome, ReminderPolicy};
pub use scheduler::{CycleReport, ReminderScheduler, SchedulerState};
pub use templates::{render, RenderedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => f.write_str("email"),
            Channel::Sms => f.write_str("sms"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Confirmation,
    Cancellation,
    /// 活动前 `days` 天的提醒
    Reminder { days: i64 },
    ThankYou,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Confirmation => f.write_str("confirmation"),
            NotificationKind::Cancellation => f.write_str("cancellation"),
            NotificationKind::Reminder { days } => write!(f, "reminder({days}d)"),
            NotificationKind::ThankYou => f.write_str("thank_you"),
        }
    }
}

/// 收件人：邮箱地址或手机号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub address: String,
}

/// 渲染模板所需的数据。缺少模板要求的字段时渲染失败。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePayload {
    pub volunteer_name: String,
    pub project_title: Option<String>,
    pub project_description: Option<String>,
    pub area: Option<String>,
    pub address: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<String>,
    pub guest_count: u32,
    pub serve_lead_name: Option<String>,
    pub serve_lead_email: Option<String>,
}

impl MessagePayload {
    pub fn for_volunteer(volunteer: &Volunteer) -> Self {
        Self {
            volunteer_name: volunteer.full_name(),
            ..Self::default()
        }
    }

    pub fn for_registration(volunteer: &Volunteer, project: &Project, guest_count: u32) -> Self {
        Self {
            volunteer_name: volunteer.full_name(),
            project_title: Some(project.title.clone()),
            project_description: Some(project.description.clone()),
            area: Some(project.area.clone()),
            address: Some(project.location_address.clone()),
            event_date: Some(project.event_date),
            event_time: Some(project.event_time.clone()),
            guest_count,
            serve_lead_name: project.serve_lead_name.clone(),
            serve_lead_email: project.serve_lead_email.clone(),
        }
    }
}

/// 一次通知任务，只在发送过程中存在，不落库。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub channel: Channel,
    pub kind: NotificationKind,
    pub recipient: Recipient,
    pub payload: MessagePayload,
}

impl NotificationJob {
    pub fn email(kind: NotificationKind, volunteer: &Volunteer, payload: MessagePayload) -> Self {
        Self {
            channel: Channel::Email,
            kind,
            recipient: Recipient {
                name: volunteer.full_name(),
                address: volunteer.email.as_str().to_owned(),
            },
            payload,
        }
    }

    /// 志愿者未同意接收短信或没有手机号时返回 `None`
    pub fn sms(
        kind: NotificationKind,
        volunteer: &Volunteer,
        payload: MessagePayload,
    ) -> Option<Self> {
        if !volunteer.accepts_sms() {
            return None;
        }
        let phone = volunteer.phone.clone()?;
        Some(Self {
            channel: Channel::Sms,
            kind,
            recipient: Recipient {
                name: volunteer.full_name(),
                address: phone,
            },
            payload,
        })
    }
}

/// 渲染完成、可直接交给服务商的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub channel: Channel,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// 模板缺失或数据不完整，重试无意义
    #[error("template error: {0}")]
    Template(String),
    /// 网络故障、超时或无法解析的非 2xx 响应
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// 服务商明确拒绝，`retryable` 表示拒绝原因本身是暂时的（例如限流）
    #[error("provider rejected message: {message}")]
    Rejected { message: String, retryable: bool },
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Template(_) => false,
            DeliveryError::Transient(_) => true,
            DeliveryError::Rejected { retryable, .. } => *retryable,
        }
    }
}

/// 单一渠道的服务商适配器：每次调用只发起一次网络请求，不做重试。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}
