//! 邮件 / 短信服务商适配器
//!
//! 每次 `send` 只发起一次 HTTP 调用，并把结果归类为：
//! - 传输层失败、超时、或无法解析的非 2xx 响应 → `DeliveryError::Transient`
//! - 可解析但服务商声明失败 → `DeliveryError::Rejected`，仅 429 / 5xx 可重试
//! - 可解析的成功响应 → `DeliveryReceipt`

mod clearstream;
mod mailtrap;

use std::time::Duration;

use application::DeliveryError;
use reqwest::{Client, StatusCode};

pub use clearstream::ClearstreamSmsSender;
pub use mailtrap::MailtrapEmailSender;

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

fn transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Transient(format!("provider call timed out: {err}"))
    } else {
        DeliveryError::Transient(format!("provider call failed: {err}"))
    }
}

/// 服务商拒绝的原因本身是暂时的（限流或服务端故障）
fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn unparseable(status: StatusCode, body: &str) -> DeliveryError {
    let snippet: String = body.chars().take(200).collect();
    DeliveryError::Transient(format!("unexpected provider response ({status}): {snippet}"))
}
