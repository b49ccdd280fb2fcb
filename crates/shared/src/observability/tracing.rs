//! OpenTelemetry 追踪模块
//!
//! 提供分布式追踪的初始化和配置，让一次领卡请求的完整链路
//! （HTTP 入口 → 领卡编排 → 供应商 HTTP 调用）在同一条 trace 下可见。
//! 支持 OTLP 协议导出到 Jaeger/Tempo 等后端。

use anyhow::Result;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_NAMESPACE, SERVICE_VERSION};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 所有奖励侧服务共用的 service.namespace
const SERVICE_NAMESPACE_VALUE: &str = "reward";

/// Tracing 资源守卫
///
/// 持有 TracerProvider，在 Drop 时优雅关闭并刷新待发送的 span。
/// 履约服务停机时最后一批投递 span 依赖这次刷新才能落到后端。
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            // 优雅关闭 provider，确保所有 span 都被导出
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
        }
    }
}

/// 初始化 tracing（日志 + 追踪）
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    // 构建环境过滤器。RUST_LOG 优先；否则在配置级别的基础上
    // 压低 sqlx/hyper 的逐条查询与连接日志，供应商调用高峰时它们会刷屏
    let default_directives = format!("{},sqlx=warn,hyper=warn,reqwest=warn", config.log_level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // 构建日志层
    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    // 根据是否配置 OTLP 端点决定是否启用分布式追踪
    let (otel_layer, provider) = if let Some(endpoint) = &config.otlp_endpoint {
        let provider = init_tracer_provider(&config.service_name, endpoint)?;
        let tracer = provider.tracer(config.service_name.clone());
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        (Some(otel_layer), Some(provider))
    } else {
        (None, None)
    };

    // 组合所有层并初始化
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(otel_layer) = otel_layer {
        subscriber.with(otel_layer).try_init()?;
    } else {
        subscriber.try_init()?;
    }

    Ok(TracingGuard { provider })
}

/// 初始化 OpenTelemetry TracerProvider
///
/// 履约服务与 mock 供应商挂在同一个 namespace 下，
/// 后端按 service.name 区分两端的 span。
fn init_tracer_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let resource = Resource::builder()
        .with_attributes(vec![
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_NAMESPACE, SERVICE_NAMESPACE_VALUE),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    // 设置为全局 provider
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// 从当前 span 获取 trace ID（用于日志关联）
pub fn current_trace_id() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

// ============================================================================
// 追踪上下文传播
// ============================================================================

use opentelemetry::propagation::{Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;

/// HTTP Header 注入器
struct HeaderInjector<'a>(&'a mut HashMap<String, String>);

impl<'a> Injector for HeaderInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// 将当前追踪上下文注入到 HTTP headers
///
/// 用于在发起下游请求（如发卡供应商调用）时传播追踪上下文，
/// 注入 W3C Trace Context 标准格式的 headers（traceparent, tracestate）。
pub fn inject_to_headers(headers: &mut HashMap<String, String>) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();

    let propagator = TraceContextPropagator::new();
    propagator.inject_context(&context, &mut HeaderInjector(headers));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_trace_id_without_init() {
        // 没有初始化时应该返回 None
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn test_default_directives_are_valid_filter() {
        // 组合出的默认指令串必须能被 EnvFilter 解析，
        // 否则会静默退回裸 "info" 并丢掉压噪配置
        let directives = format!("{},sqlx=warn,hyper=warn,reqwest=warn", "debug");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_inject_keeps_signature_headers() {
        // 供应商客户端先放签名头再注入追踪上下文，注入不得覆盖已有条目
        let mut headers = HashMap::new();
        headers.insert("x-signature".to_string(), "deadbeef".to_string());
        headers.insert("x-signature-timestamp".to_string(), "1717200000".to_string());

        inject_to_headers(&mut headers);

        assert_eq!(headers.get("x-signature").map(String::as_str), Some("deadbeef"));
        assert!(headers.contains_key("x-signature-timestamp"));
    }
}
