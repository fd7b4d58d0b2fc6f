use std::time::Duration;

use application::{Channel, DeliveryError, DeliveryReceipt, NotificationSender, OutboundMessage};
use async_trait::async_trait;
use config::EmailProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{build_client, retryable_status, transport_error, unparseable};

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    success: bool,
    #[serde(default)]
    message_ids: Vec<String>,
    #[serde(default)]
    errors: Vec<String>,
}

/// Mailtrap 发送 API（Bearer 令牌认证）
#[derive(Clone)]
pub struct MailtrapEmailSender {
    client: Client,
    config: EmailProviderConfig,
}

impl MailtrapEmailSender {
    pub fn new(config: EmailProviderConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl NotificationSender for MailtrapEmailSender {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let request = SendRequest {
            from: Address {
                email: &self.config.from_address,
                name: Some(&self.config.from_name),
            },
            to: vec![Address {
                email: &message.recipient.address,
                name: Some(&message.recipient.name).filter(|n| !n.is_empty()).map(String::as_str),
            }],
            subject: &message.subject,
            html: &message.body,
            text: &message.subject,
            reply_to: self.config.reply_to_address.as_deref().map(|email| Address {
                email,
                name: self.config.reply_to_name.as_deref(),
            }),
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        match serde_json::from_str::<SendResponse>(&body) {
            Ok(parsed) if parsed.success => {
                tracing::debug!(recipient = %message.recipient.address, "邮件已提交给服务商");
                Ok(DeliveryReceipt {
                    channel: Channel::Email,
                    provider_message_id: parsed.message_ids.into_iter().next(),
                })
            }
            Ok(parsed) => Err(DeliveryError::Rejected {
                message: if parsed.errors.is_empty() {
                    format!("provider reported failure ({status})")
                } else {
                    parsed.errors.join("; ")
                },
                retryable: retryable_status(status),
            }),
            Err(_) => Err(unparseable(status, &body)),
        }
    }
}
