//! 按客户端地址的请求限流中间件

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer);

    if let Err(err) = state.rate_guard.check(&client) {
        tracing::warn!(client = %client, "请求频率超限");
        return ApiError::from(err).into_response();
    }

    next.run(request).await
}

/// 取客户端地址：X-Forwarded-For 第一跳，其次 X-Real-IP，最后是连接对端地址
///
/// 部署前提：服务只经由反向代理对外暴露，代理会覆盖（而非追加）这两个头。
/// 直接暴露时这两个头由客户端任意填写，每次换一个值就能拿到新的令牌桶，
/// 此时应在代理层剥离它们，或只监听内网地址。
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_owned();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}
