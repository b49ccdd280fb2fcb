//! 发卡供应商 HTTP 客户端
//!
//! 每个请求携带 `X-Signature-Timestamp` 与 `X-Signature`（HMAC-SHA256），
//! 并注入 W3C trace 头以便跨服务追踪。错误按可重试性分类：
//! 超时/连接失败/5xx 是瞬态，402/429/其余 4xx 快速失败。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use tracing::{info, instrument, warn};

use reward_shared::config::ProviderConfig;
use reward_shared::observability::{metrics, tracing as obs_tracing};
use reward_shared::signing::{SIGNATURE_HEADER, TIMESTAMP_HEADER, sign_request};

use super::{BrandInfo, CardProvider, IssueCardRequest, IssuedCard};
use crate::error::{FulfillmentError, Result};

/// 发卡供应商 HTTP 客户端
pub struct HttpCardProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpCardProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FulfillmentError::Internal(format!("HTTP 客户端构建失败: {}", e)))?;

        Ok(Self { config, client })
    }

    /// 发送带签名的请求
    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        body: String,
    ) -> Result<reqwest::Response> {
        let timestamp = Utc::now().timestamp();
        let signature = sign_request(
            &self.config.signing_secret,
            timestamp,
            method.as_str(),
            path,
            &body,
        )
        .map_err(|e| FulfillmentError::Internal(e.to_string()))?;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut trace_headers = HashMap::new();
        obs_tracing::inject_to_headers(&mut trace_headers);

        let mut request = self
            .client
            .request(method, &url)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature);
        for (key, value) in &trace_headers {
            request = request.header(key, value);
        }
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        request.send().await.map_err(|e| self.transport_error(e))
    }

    /// 传输层错误（超时、连接失败）统一归为瞬态故障
    fn transport_error(&self, err: reqwest::Error) -> FulfillmentError {
        let message = if err.is_timeout() {
            "请求超时".to_string()
        } else if err.is_connect() {
            format!("连接失败: {}", err)
        } else {
            err.to_string()
        };

        FulfillmentError::ProviderUnavailable {
            provider: self.config.name.clone(),
            message,
        }
    }

    /// 非 2xx 响应映射为领域错误
    async fn error_from_status(&self, response: reqwest::Response) -> FulfillmentError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        let provider = self.config.name.clone();

        match status {
            StatusCode::PAYMENT_REQUIRED => FulfillmentError::PaymentRequired { provider },
            StatusCode::TOO_MANY_REQUESTS => FulfillmentError::RateLimited { provider },
            s if s.is_server_error() => FulfillmentError::ProviderUnavailable {
                provider,
                message: format!("HTTP {}: {}", s.as_u16(), message),
            },
            s => FulfillmentError::ProviderRejected {
                provider,
                status: s.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl CardProvider for HttpCardProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(
        skip(self, request),
        fields(provider = %self.config.name, brand = %request.brand_code, reference = %request.reference)
    )]
    async fn issue_card(&self, request: &IssueCardRequest) -> Result<IssuedCard> {
        let body = serde_json::to_string(request)?;
        let started = std::time::Instant::now();

        let response = match self.send_signed(Method::POST, "/v1/cards/issue", body).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_provider_call(
                    &self.config.name,
                    "transport_error",
                    started.elapsed().as_secs_f64(),
                );
                return Err(e);
            }
        };

        if !response.status().is_success() {
            let err = self.error_from_status(response).await;
            metrics::record_provider_call(
                &self.config.name,
                err.error_code(),
                started.elapsed().as_secs_f64(),
            );
            warn!(error = %err, "发卡请求失败");
            return Err(err);
        }

        // 响应解析失败按瞬态处理：发卡已在供应商侧生效，
        // 重试携带同一 reference 会命中其幂等缓存而不是重复扣费
        let card: IssuedCard = response.json().await.map_err(|e| {
            FulfillmentError::ProviderUnavailable {
                provider: self.config.name.clone(),
                message: format!("响应解析失败: {}", e),
            }
        })?;

        metrics::record_provider_call(
            &self.config.name,
            "success",
            started.elapsed().as_secs_f64(),
        );
        info!(
            transaction_id = %card.transaction_id,
            cost_cents = card.cost_cents,
            "发卡成功"
        );
        Ok(card)
    }

    async fn get_brand(&self, brand_code: &str) -> Result<BrandInfo> {
        let path = format!("/v1/brands/{}", brand_code);
        let response = self.send_signed(Method::GET, &path, String::new()).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FulfillmentError::NotFound(format!(
                "品牌不存在: {}",
                brand_code
            )));
        }
        if !response.status().is_success() {
            return Err(self.error_from_status(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| FulfillmentError::ProviderUnavailable {
                provider: self.config.name.clone(),
                message: format!("响应解析失败: {}", e),
            })
    }
}
