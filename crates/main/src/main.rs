//! 主应用程序入口
//!
//! 默认启动 HTTP 服务与提醒调度器；`send-thank-you` 子命令发送活动结束后的感谢邮件并退出。

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    CapacityLedger, CapacityLedgerDependencies, Clock, ConfirmationDispatcher, ConfirmationPolicy,
    DeliveryPipeline, ReminderScheduler, RequestRateGuard, SystemClock, ThankYouCampaign,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, ClearstreamSmsSender, MailtrapEmailSender, PgStorage, MIGRATOR,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

/// 关闭时等待在途确认通知的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置已加载");
    for missing in config.missing_credentials() {
        tracing::warn!(credential = missing, "服务商凭据未配置，相关通知将发送失败");
    }

    let pool = create_pg_pool(
        &config.database.url,
        config.database.max_connections,
        Duration::from_secs(config.database.acquire_timeout_seconds),
    )
    .await
    .context("连接数据库失败")?;

    // 运行迁移
    MIGRATOR.run(&pool).await.context("数据库迁移失败")?;

    let storage = PgStorage::new(pool);
    let pipeline = build_pipeline(&config)?;

    match env::args().nth(1).as_deref() {
        Some("send-thank-you") => send_thank_you(&config, storage, pipeline).await,
        Some(other) => anyhow::bail!("unknown command: {other}"),
        None => serve(config, storage, pipeline).await,
    }
}

fn build_pipeline(config: &AppConfig) -> anyhow::Result<DeliveryPipeline> {
    let timeout = config.notifications.request_timeout();
    let email = MailtrapEmailSender::new(config.email.clone(), timeout)
        .context("创建邮件客户端失败")?;
    let sms = ClearstreamSmsSender::new(config.sms.clone(), timeout)
        .context("创建短信客户端失败")?;
    Ok(DeliveryPipeline::new(Arc::new(email), Arc::new(sms)))
}

async fn serve(
    config: AppConfig,
    storage: PgStorage,
    pipeline: DeliveryPipeline,
) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger = Arc::new(CapacityLedger::new(CapacityLedgerDependencies {
        project_repository: storage.project_repository.clone(),
        volunteer_repository: storage.volunteer_repository.clone(),
        registration_repository: storage.registration_repository.clone(),
        clock: clock.clone(),
    }));
    let dispatcher = ConfirmationDispatcher::new(
        pipeline.clone(),
        ConfirmationPolicy::from_config(&config.notifications),
    );
    let rate_guard = Arc::new(RequestRateGuard::from_config(&config.rate_limit));

    let cancel = CancellationToken::new();

    // 定期清理空闲的限流桶
    let cleanup = {
        let guard = rate_guard.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(config.rate_limit.cleanup_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = guard.cleanup_idle();
                        tracing::debug!(removed, "清理空闲限流桶");
                    }
                }
            }
        })
    };

    let scheduler = Arc::new(ReminderScheduler::from_config(
        storage.registration_repository.clone(),
        pipeline,
        clock,
        &config.notifications,
    ));
    let scheduler_handle = scheduler.spawn(cancel.clone());

    let state = AppState::new(ledger, dispatcher.clone(), rate_guard);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {addr} 失败"))?;
    tracing::info!("志愿服务报名系统启动在 http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("HTTP 服务已停止，正在关闭后台任务");
    cancel.cancel();
    if let Err(err) = scheduler_handle.await {
        tracing::error!(error = %err, "提醒调度器异常退出");
    }
    let _ = cleanup.await;

    if dispatcher.shutdown(SHUTDOWN_GRACE).await {
        tracing::info!("在途通知已全部完成");
    } else {
        tracing::warn!("部分在途通知被取消");
    }

    Ok(())
}

async fn send_thank_you(
    config: &AppConfig,
    storage: PgStorage,
    pipeline: DeliveryPipeline,
) -> anyhow::Result<()> {
    let campaign = ThankYouCampaign::new(
        storage.volunteer_repository.clone(),
        pipeline,
        config.notifications.reminder_spacing(),
    );

    let cancel = CancellationToken::new();
    let run = campaign.run(&cancel);
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report?,
        _ = shutdown_signal() => {
            cancel.cancel();
            run.await?
        }
    };

    tracing::info!(
        total = report.total,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        "感谢邮件发送完成"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听 SIGTERM 信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("收到关闭信号");
}
