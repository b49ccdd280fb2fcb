//! Mock 发卡供应商服务
//!
//! 模拟外部礼品卡供应商的 REST API，供开发环境和集成测试使用。
//! 与真实供应商保持同一套契约：HMAC 请求签名校验、按 `reference`
//! 幂等去重、402/429/5xx 错误语义。管理端点可注入失败。

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reward_shared::signing::{
    SIGNATURE_HEADER, TIMESTAMP_HEADER, is_timestamp_fresh, verify_signature,
};

/// 批发折扣：发卡成本 = 面额 × 94%
const WHOLESALE_RATE_PERCENT: i64 = 94;

/// Mock 供应商服务状态
pub struct CardServiceState {
    /// 验签密钥，与客户端共享
    secret: String,
    /// 品牌目录
    brands: DashMap<String, Brand>,
    /// 已发卡记录，按幂等 reference 去重
    issued: DashMap<String, IssuedCardResponse>,
    /// 失败注入配置
    failure: Mutex<FailureInjection>,
    /// 交易序号
    sequence: AtomicU64,
}

impl CardServiceState {
    /// 创建状态并预置品牌目录
    pub fn new(secret: impl Into<String>) -> Self {
        let state = Self {
            secret: secret.into(),
            brands: DashMap::new(),
            issued: DashMap::new(),
            failure: Mutex::new(FailureInjection::default()),
            sequence: AtomicU64::new(1),
        };

        state.seed_brand(Brand {
            code: "STARBUCKS".to_string(),
            name: "Starbucks".to_string(),
            currency: "USD".to_string(),
            denominations_cents: vec![500, 1000, 2500, 5000],
        });
        state.seed_brand(Brand {
            code: "AMAZON".to_string(),
            name: "Amazon".to_string(),
            currency: "USD".to_string(),
            denominations_cents: vec![1000, 2500, 5000, 10000],
        });

        state
    }

    /// 注册或覆盖品牌
    pub fn seed_brand(&self, brand: Brand) {
        self.brands.insert(brand.code.clone(), brand);
    }

    /// 已发卡张数（测试断言用）
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    /// 配置失败注入
    pub fn set_failure(&self, injection: FailureInjection) {
        *self.failure.lock().unwrap() = injection;
    }
}

// ============================================================================
// 请求/响应 DTO（供应商线缆格式为 snake_case）
// ============================================================================

/// 品牌目录项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub code: String,
    pub name: String,
    pub currency: String,
    pub denominations_cents: Vec<i64>,
}

/// 发卡请求
#[derive(Debug, Deserialize)]
pub struct IssueCardRequest {
    pub brand_code: String,
    pub denomination_cents: i64,
    pub currency: String,
    /// 幂等键，重试携带同一值时返回首次结果
    pub reference: String,
}

/// 发卡响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCardResponse {
    pub transaction_id: String,
    pub code: String,
    pub card_number: Option<String>,
    pub cost_cents: i64,
    pub currency: String,
    pub status: String,
}

/// 失败注入配置
///
/// `fail_times` 耗尽后自动恢复；`rate_limit` / `payment_required`
/// 持续生效直到下一次配置覆盖。幂等命中不消耗 `fail_times`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureInjection {
    /// 接下来 N 次发卡请求返回 503
    #[serde(default)]
    pub fail_times: u32,
    /// 固定返回 429
    #[serde(default)]
    pub rate_limit: bool,
    /// 固定返回 402
    #[serde(default)]
    pub payment_required: bool,
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// 路由配置
// ============================================================================

/// 构建供应商服务路由
///
/// `/v1/*` 为对外契约（验签）；`/admin/*` 为测试控制面（不验签）
pub fn provider_routes() -> Router<Arc<CardServiceState>> {
    Router::new()
        .route("/v1/cards/issue", post(issue_card))
        .route("/v1/brands/{code}", get(get_brand))
        .route("/admin/failures", post(configure_failures))
        .route("/admin/brands", post(upsert_brand))
}

// ============================================================================
// 签名校验
// ============================================================================

/// 校验请求签名与时间戳
///
/// 缺头、过期、验签失败一律 401，错误信息不区分具体原因之外的细节
fn verify_signed_request(
    state: &CardServiceState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &str,
) -> Result<(), HandlerError> {
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "缺少或非法的签名时间戳"))?;

    if !is_timestamp_fresh(timestamp, Utc::now().timestamp()) {
        return Err(error_response(StatusCode::UNAUTHORIZED, "签名时间戳过期"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "缺少签名"))?;

    let valid = verify_signature(&state.secret, timestamp, method, path, body, signature)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !valid {
        return Err(error_response(StatusCode::UNAUTHORIZED, "签名无效"));
    }

    Ok(())
}

// ============================================================================
// 端点处理函数
// ============================================================================

/// 发卡
///
/// POST /v1/cards/issue
#[tracing::instrument(skip(state, headers, body))]
async fn issue_card(
    State(state): State<Arc<CardServiceState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IssuedCardResponse>, HandlerError> {
    let body_str = String::from_utf8_lossy(&body);
    verify_signed_request(&state, &headers, "POST", "/v1/cards/issue", &body_str)?;

    let req: IssueCardRequest = serde_json::from_slice(&body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("请求体非法: {}", e)))?;

    // 幂等：同一 reference 原样返回首次结果，不重复扣费也不消耗失败注入
    if let Some(existing) = state.issued.get(&req.reference) {
        tracing::info!(reference = %req.reference, "幂等命中，返回已有发卡结果");
        return Ok(Json(existing.clone()));
    }

    {
        let mut failure = state.failure.lock().unwrap();
        if failure.payment_required {
            return Err(error_response(
                StatusCode::PAYMENT_REQUIRED,
                "账户余额不足",
            ));
        }
        if failure.rate_limit {
            return Err(error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "请求频率超限",
            ));
        }
        if failure.fail_times > 0 {
            failure.fail_times -= 1;
            return Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "模拟供应商故障",
            ));
        }
    }

    let Some(brand) = state.brands.get(&req.brand_code).map(|b| b.clone()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown brand: {}", req.brand_code),
        ));
    };
    if !brand.denominations_cents.contains(&req.denomination_cents) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!(
                "品牌 {} 不支持面额 {}",
                req.brand_code, req.denomination_cents
            ),
        ));
    }
    if !brand.currency.eq_ignore_ascii_case(&req.currency) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("币种不匹配: 期望 {}", brand.currency),
        ));
    }

    let response = IssuedCardResponse {
        transaction_id: format!("txn_{:08}", state.sequence.fetch_add(1, Ordering::Relaxed)),
        code: generate_code(&req.brand_code),
        card_number: Some(generate_card_number()),
        cost_cents: req.denomination_cents * WHOLESALE_RATE_PERCENT / 100,
        currency: brand.currency.clone(),
        status: "completed".to_string(),
    };

    // 并发携带同一 reference 时以先插入者为准，双方拿到同一张卡
    let stored = state
        .issued
        .entry(req.reference.clone())
        .or_insert(response)
        .clone();

    tracing::info!(
        reference = %req.reference,
        transaction_id = %stored.transaction_id,
        brand = %req.brand_code,
        "发卡成功"
    );
    Ok(Json(stored))
}

/// 查询品牌目录项
///
/// GET /v1/brands/{code}
#[tracing::instrument(skip(state, headers))]
async fn get_brand(
    State(state): State<Arc<CardServiceState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Brand>, HandlerError> {
    let path = format!("/v1/brands/{}", code);
    verify_signed_request(&state, &headers, "GET", &path, "")?;

    state.brands.get(&code).map(|b| Json(b.clone())).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, format!("品牌不存在: {}", code))
    })
}

/// 配置失败注入
///
/// POST /admin/failures
async fn configure_failures(
    State(state): State<Arc<CardServiceState>>,
    Json(injection): Json<FailureInjection>,
) -> Json<FailureInjection> {
    tracing::info!(?injection, "更新失败注入配置");
    state.set_failure(injection.clone());
    Json(injection)
}

/// 注册或覆盖品牌
///
/// POST /admin/brands
async fn upsert_brand(
    State(state): State<Arc<CardServiceState>>,
    Json(brand): Json<Brand>,
) -> (StatusCode, Json<Brand>) {
    tracing::info!(code = %brand.code, "注册品牌");
    state.seed_brand(brand.clone());
    (StatusCode::CREATED, Json(brand))
}

// ============================================================================
// 卡密生成
// ============================================================================

/// 生成卡密："{品牌}-{12位大写十六进制}"
fn generate_code(brand_code: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}-{}", brand_code, &hex[..12])
}

/// 生成 16 位数字卡号
fn generate_card_number() -> String {
    let mut rng = rand::rng();
    (0..16).map(|_| rng.random_range(0..10).to_string()).collect()
}

// ============================================================================
// 单元测试
// ============================================================================
