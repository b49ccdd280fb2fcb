//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    // 构建 Prometheus recorder
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    // 注册服务级别的标签
    register_common_metrics(&config.service_name);

    // 启动指标 HTTP 服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标（预定义的业务指标）
fn register_common_metrics(service_name: &str) {
    // 使用 metrics crate 的宏来描述指标
    // 这些描述会出现在 /metrics 端点的 HELP 注释中

    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "giftcard_claims_total",
        "Total number of gift card claim attempts"
    );
    metrics::describe_histogram!(
        "giftcard_claim_duration_seconds",
        "Gift card claim duration in seconds"
    );

    metrics::describe_counter!(
        "provider_calls_total",
        "Total number of external provider calls"
    );
    metrics::describe_histogram!(
        "provider_call_duration_seconds",
        "External provider call duration in seconds"
    );

    metrics::describe_counter!(
        "delivery_attempts_total",
        "Total number of delivery send attempts"
    );

    metrics::describe_counter!(
        "fulfillment_requests_total",
        "Total number of condition completion requests"
    );
    metrics::describe_histogram!(
        "fulfillment_request_duration_seconds",
        "Condition completion duration in seconds"
    );

    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker sweep"
    );
    metrics::describe_gauge!("pool_available_units", "Available units per card pool");

    // 记录服务启动
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录礼品卡认领
///
/// source 为 inventory / external_api，result 为 success / already_assigned /
/// no_cards_available / error。
#[inline]
pub fn record_claim(source: &str, result: &str, duration_secs: f64) {
    metrics::counter!(
        "giftcard_claims_total",
        "source" => source.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "giftcard_claim_duration_seconds",
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// 记录供应商调用
#[inline]
pub fn record_provider_call(provider: &str, result: &str, duration_secs: f64) {
    metrics::counter!(
        "provider_calls_total",
        "provider" => provider.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "provider_call_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

/// 记录投递尝试
#[inline]
pub fn record_delivery_attempt(method: &str, result: &str) {
    metrics::counter!(
        "delivery_attempts_total",
        "method" => method.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录条件完成请求
#[inline]
pub fn record_fulfillment_request(result: &str, duration_secs: f64) {
    metrics::counter!(
        "fulfillment_requests_total",
        "result" => result.to_string()
    )
    .increment(1);

    metrics::histogram!("fulfillment_request_duration_seconds").record(duration_secs);
}

/// 更新 worker 最近一次扫描时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}

/// 更新卡池可用库存快照
#[inline]
pub fn set_pool_available(pool_id: i64, available: f64) {
    metrics::gauge!(
        "pool_available_units",
        "pool_id" => pool_id.to_string()
    )
    .set(available);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("POST", "/api/v1/conditions/complete", 200, 0.1);
        record_claim("inventory", "success", 0.05);
        record_provider_call("cardmint", "success", 0.2);
        record_delivery_attempt("sms", "sent");
        record_fulfillment_request("success", 0.3);
        set_worker_last_run("delivery");
        set_pool_available(1, 100.0);
    }
}
