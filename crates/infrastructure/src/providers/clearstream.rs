use std::time::Duration;

use application::{Channel, DeliveryError, DeliveryReceipt, NotificationSender, OutboundMessage};
use async_trait::async_trait;
use config::SmsProviderConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{build_client, retryable_status, transport_error, unparseable};

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    to: Vec<&'a str>,
    from: &'a str,
    text_header: &'a str,
    text_body: &'a str,
    use_default_header: bool,
    /// 始终尊重收件人的退订设置
    override_optouts: bool,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    data: Option<TextData>,
    error: Option<TextError>,
}

#[derive(Debug, Deserialize)]
struct TextData {
    id: Option<serde_json::Value>,
    #[serde(default)]
    skipped: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TextError {
    message: String,
    #[serde(default)]
    http_code: Option<u16>,
}

/// Clearstream 短信 API（`X-API-KEY` 认证）
#[derive(Clone)]
pub struct ClearstreamSmsSender {
    client: Client,
    config: SmsProviderConfig,
}

impl ClearstreamSmsSender {
    pub fn new(config: SmsProviderConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl NotificationSender for ClearstreamSmsSender {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let request = TextRequest {
            to: vec![message.recipient.address.as_str()],
            from: &self.config.from,
            text_header: &self.config.header,
            text_body: &message.body,
            use_default_header: false,
            override_optouts: false,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("X-API-KEY", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        match serde_json::from_str::<TextResponse>(&body) {
            Ok(TextResponse {
                error: Some(error), ..
            }) => {
                let code = error
                    .http_code
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .unwrap_or(status);
                Err(DeliveryError::Rejected {
                    message: error.message,
                    retryable: retryable_status(code),
                })
            }
            Ok(TextResponse {
                data: Some(data), ..
            }) if status.is_success() => {
                if !data.skipped.is_empty() {
                    tracing::warn!(
                        recipient = %message.recipient.address,
                        skipped = ?data.skipped,
                        "服务商跳过了部分短信收件人"
                    );
                }
                Ok(DeliveryReceipt {
                    channel: Channel::Sms,
                    provider_message_id: data.id.map(|id| match id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    }),
                })
            }
            _ => Err(unparseable(status, &body)),
        }
    }
}
