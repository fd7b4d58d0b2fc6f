use std::sync::Arc;

use super::{
    templates, Channel, DeliveryError, DeliveryReceipt, NotificationJob, NotificationSender,
    OutboundMessage,
};

/// 渲染 + 单次服务商调用。不做重试，重试和节流由 `policy` 负责。
#[derive(Clone)]
pub struct DeliveryPipeline {
    email: Arc<dyn NotificationSender>,
    sms: Arc<dyn NotificationSender>,
}

impl DeliveryPipeline {
    pub fn new(email: Arc<dyn NotificationSender>, sms: Arc<dyn NotificationSender>) -> Self {
        Self { email, sms }
    }

    pub fn render(&self, job: &NotificationJob) -> Result<OutboundMessage, DeliveryError> {
        let rendered = templates::render(job.kind, job.channel, &job.payload)?;
        Ok(OutboundMessage {
            channel: job.channel,
            recipient: job.recipient.clone(),
            subject: rendered.subject,
            body: rendered.body,
        })
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let sender = match message.channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
        };
        sender.send(message).await
    }

    /// 渲染后发送一次
    pub async fn deliver(&self, job: &NotificationJob) -> Result<DeliveryReceipt, DeliveryError> {
        let message = self.render(job)?;
        self.send(&message).await
    }
}
