//! 礼品卡履约服务
//!
//! 提供条件完成领卡、库存管理 REST API 与投递后台 Worker。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, middleware, routing::get};
use reward_fulfillment::delivery::{
    DeliveryTransport, EmailTransport, SmsTransport, TransportConfig,
};
use reward_fulfillment::provider::HttpCardProvider;
use reward_fulfillment::worker::DeliveryWorker;
use reward_fulfillment::{routes, state::AppState};
use reward_shared::{
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
    retry::RetryPolicy,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 统一加载配置：default.toml → {env}.toml → {service}.toml → REWARD_ 环境变量
    let config = AppConfig::load("reward-fulfillment-service").unwrap_or_default();

    // 从 AppConfig 中提取可观测性配置并注入服务名
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        "Starting reward-fulfillment-service on {}",
        config.server_addr()
    );

    // 初始化数据库
    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    // 供应商客户端与全部业务服务
    let provider = Arc::new(HttpCardProvider::new(config.provider.clone())?);
    let retry_policy = RetryPolicy::for_provider(config.provider.max_retries);
    let state = AppState::build(db.pool().clone(), provider, retry_policy);

    // 投递通道：短信 + 邮件，发送超时与 Worker 的 send_timeout 一致
    let transports: Vec<Arc<dyn DeliveryTransport>> = vec![
        Arc::new(SmsTransport::new(
            TransportConfig::new(&config.delivery.sms_sender_id)
                .with_timeout(config.delivery.send_timeout_ms),
        )),
        Arc::new(EmailTransport::new(
            TransportConfig::new(&config.delivery.email_from)
                .with_timeout(config.delivery.send_timeout_ms),
        )),
    ];

    // 启动投递后台 Worker，watch 通道用于停机时通知其退出轮询
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker_pool = db.pool().clone();
    let delivery_config = config.delivery.clone();
    let worker_handle = tokio::spawn(async move {
        let worker = DeliveryWorker::new(worker_pool, transports, &delivery_config);
        worker.run(worker_shutdown_rx).await;
    });

    let app = Router::new()
        .nest("/api/v1", routes::api_routes())
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db;
                move || readiness_check(db_for_ready.clone())
            }),
        )
        // 请求超时兜底，避免慢查询拖住连接
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        // 可观测性中间件：请求追踪和指标收集
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM（K8s 停止 Pod）或 Ctrl+C 时，
    // 停止接收新连接并等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP 停止后再停 Worker，让在途投递批次跑完
    let _ = worker_shutdown_tx.send(true);
    let _ = worker_handle.await;

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
/// 收到任一信号后返回，触发 axum 的优雅关闭流程。
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "reward-fulfillment-service"
    }))
}

/// 就绪探针：检查数据库连接是否可用
///
/// K8s 就绪探针失败时会将 Pod 从 Service 端点移除，
/// 避免将流量路由到无法正常处理请求的实例。
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "reward-fulfillment-service",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
