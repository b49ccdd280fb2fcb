//! 履约服务错误类型定义
//!
//! 覆盖领取、外部发卡、投递全链路的错误，同时承担 HTTP 响应映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// 履约服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    // 验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    // 资源不存在
    #[error("卡池不存在: {0}")]
    PoolNotFound(i64),
    #[error("库存卡不存在: {0}")]
    UnitNotFound(i64),
    #[error("活动条件不存在: campaign={campaign_id}, condition={condition_number}")]
    ConditionNotFound {
        campaign_id: i64,
        condition_number: i32,
    },
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 业务冲突
    #[error("卡池 {pool_id} 无可用库存")]
    NoCardsAvailable { pool_id: i64 },
    #[error("条件已被其他收件人完成: session={call_session_id}, condition={condition_number}")]
    ConditionAlreadyCompleted {
        call_session_id: String,
        condition_number: i32,
    },
    #[error("库存卡 {unit_id} 不可回滚: {reason}")]
    UnitNotReleasable { unit_id: i64, reason: String },
    #[error("卡密重复: {0}")]
    DuplicateCardCode(String),

    // 外部供应商错误
    #[error("发卡服务不可用: provider={provider}, {message}")]
    ProviderUnavailable { provider: String, message: String },
    #[error("发卡请求被拒绝: provider={provider}, status={status}, {message}")]
    ProviderRejected {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("发卡服务限流: provider={provider}")]
    RateLimited { provider: String },
    #[error("发卡账户余额不足: provider={provider}")]
    PaymentRequired { provider: String },

    // 系统错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl FulfillmentError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,

            Self::PoolNotFound(_)
            | Self::UnitNotFound(_)
            | Self::ConditionNotFound { .. }
            | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::NoCardsAvailable { .. }
            | Self::ConditionAlreadyCompleted { .. }
            | Self::UnitNotReleasable { .. }
            | Self::DuplicateCardCode(_) => StatusCode::CONFLICT,

            // 上游发卡失败统一 502，限流单独用 503 提示稍后重试
            Self::ProviderUnavailable { .. }
            | Self::ProviderRejected { .. }
            | Self::PaymentRequired { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,

            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应和完成记录的失败原因）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::PoolNotFound(_) => "POOL_NOT_FOUND",
            Self::UnitNotFound(_) => "UNIT_NOT_FOUND",
            Self::ConditionNotFound { .. } => "CONDITION_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NoCardsAvailable { .. } => "NO_CARDS_AVAILABLE",
            Self::ConditionAlreadyCompleted { .. } => "CONDITION_ALREADY_COMPLETED",
            Self::UnitNotReleasable { .. } => "UNIT_NOT_RELEASABLE",
            Self::DuplicateCardCode(_) => "DUPLICATE_CARD_CODE",
            // 供应商不可用与拒绝对调用方是同一类失败
            Self::ProviderUnavailable { .. } | Self::ProviderRejected { .. } => "PROVIDER_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 判断错误是否可重试
    ///
    /// 只有瞬态故障（连接、超时、5xx）适合重试；
    /// 4xx 类拒绝重试也不会变成功，必须快速失败
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ProviderUnavailable { .. })
    }

    /// 判断是否为业务错误（非系统故障）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::PoolNotFound(_)
                | Self::UnitNotFound(_)
                | Self::ConditionNotFound { .. }
                | Self::NotFound(_)
                | Self::NoCardsAvailable { .. }
                | Self::ConditionAlreadyCompleted { .. }
                | Self::UnitNotReleasable { .. }
                | Self::DuplicateCardCode(_)
        )
    }
}

impl IntoResponse for FulfillmentError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for FulfillmentError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 从 JSON 序列化错误转换
impl From<serde_json::Error> for FulfillmentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    // ---- 辅助函数 ----

    /// 构造所有错误变体及其期望的 (StatusCode, error_code) 映射。
    /// 表驱动方式保证新增变体时只需在一处维护。
    fn all_error_variants() -> Vec<(FulfillmentError, StatusCode, &'static str)> {
        vec![
            // 参数校验
            (
                FulfillmentError::Validation("recipientId is required".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            // 资源不存在类
            (
                FulfillmentError::PoolNotFound(10),
                StatusCode::NOT_FOUND,
                "POOL_NOT_FOUND",
            ),
            (
                FulfillmentError::UnitNotFound(20),
                StatusCode::NOT_FOUND,
                "UNIT_NOT_FOUND",
            ),
            (
                FulfillmentError::ConditionNotFound {
                    campaign_id: 100,
                    condition_number: 2,
                },
                StatusCode::NOT_FOUND,
                "CONDITION_NOT_FOUND",
            ),
            (
                FulfillmentError::NotFound("completion".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            // 业务冲突类：请求合法但与当前状态冲突
            (
                FulfillmentError::NoCardsAvailable { pool_id: 7 },
                StatusCode::CONFLICT,
                "NO_CARDS_AVAILABLE",
            ),
            (
                FulfillmentError::ConditionAlreadyCompleted {
                    call_session_id: "cs-1".into(),
                    condition_number: 3,
                },
                StatusCode::CONFLICT,
                "CONDITION_ALREADY_COMPLETED",
            ),
            (
                FulfillmentError::UnitNotReleasable {
                    unit_id: 5,
                    reason: "已投递".into(),
                },
                StatusCode::CONFLICT,
                "UNIT_NOT_RELEASABLE",
            ),
            (
                FulfillmentError::DuplicateCardCode("CARD-001".into()),
                StatusCode::CONFLICT,
                "DUPLICATE_CARD_CODE",
            ),
            // 外部供应商类
            (
                FulfillmentError::ProviderUnavailable {
                    provider: "cardco".into(),
                    message: "connect timeout".into(),
                },
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
            (
                FulfillmentError::ProviderRejected {
                    provider: "cardco".into(),
                    status: 400,
                    message: "unknown brand".into(),
                },
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
            (
                FulfillmentError::RateLimited {
                    provider: "cardco".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "RATE_LIMITED",
            ),
            (
                FulfillmentError::PaymentRequired {
                    provider: "cardco".into(),
                },
                StatusCode::BAD_GATEWAY,
                "PAYMENT_REQUIRED",
            ),
            // 系统级错误：统一 500，防止内部实现细节泄露
            (
                FulfillmentError::Internal("unexpected state".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ]
    }

    // ---- 表驱动：全量 status_code / error_code 覆盖 ----

    /// 状态码错误会导致调用方误判请求结果（如把 409 当 500 重试），逐一验证。
    #[test]
    fn test_all_variants_status_code() {
        for (error, expected_status, label) in all_error_variants() {
            assert_eq!(
                error.status_code(),
                expected_status,
                "状态码不匹配: variant={label}"
            );
        }
    }

    /// 错误码是 API 契约的一部分，客户端用它做条件分支，必须逐一锁定。
    #[test]
    fn test_all_variants_error_code() {
        for (error, _status, expected_code) in all_error_variants() {
            assert_eq!(
                error.error_code(),
                expected_code,
                "错误码不匹配: expected={expected_code}"
            );
        }
    }

    /// 表驱动用例数量与变体总数一致（Database 依赖 sqlx::Error 不易构造，排除 1 个）。
    #[test]
    fn test_all_variants_covered_in_table() {
        assert_eq!(
            all_error_variants().len(),
            14,
            "表驱动用例数量与变体总数不一致，可能新增了变体但未更新测试"
        );
    }

    // ---- 重试与分类判定 ----

    /// 重试判定直接驱动外部发卡的退避循环：
    /// 瞬态错误必须可重试，4xx 拒绝必须快速失败。
    #[test]
    fn test_is_retryable() {
        assert!(
            FulfillmentError::ProviderUnavailable {
                provider: "cardco".into(),
                message: "503".into(),
            }
            .is_retryable()
        );
        assert!(FulfillmentError::Database(sqlx::Error::PoolTimedOut).is_retryable());

        // 4xx 类拒绝不可重试
        assert!(
            !FulfillmentError::ProviderRejected {
                provider: "cardco".into(),
                status: 400,
                message: "bad request".into(),
            }
            .is_retryable()
        );
        assert!(
            !FulfillmentError::RateLimited {
                provider: "cardco".into(),
            }
            .is_retryable()
        );
        assert!(
            !FulfillmentError::PaymentRequired {
                provider: "cardco".into(),
            }
            .is_retryable()
        );
        assert!(!FulfillmentError::NoCardsAvailable { pool_id: 1 }.is_retryable());
    }

    #[test]
    fn test_is_business_error() {
        assert!(FulfillmentError::NoCardsAvailable { pool_id: 1 }.is_business_error());
        assert!(FulfillmentError::Validation("bad".into()).is_business_error());
        assert!(FulfillmentError::PoolNotFound(1).is_business_error());
        assert!(
            !FulfillmentError::ProviderUnavailable {
                provider: "cardco".into(),
                message: "down".into(),
            }
            .is_business_error()
        );
        assert!(!FulfillmentError::Internal("oops".into()).is_business_error());
    }

    // ---- Display trait 测试 ----

    /// Display 输出作为 API 响应的 message 字段返回给调用方，
    /// 必须包含关键上下文（ID、会话号），否则无法定位问题。
    #[test]
    fn test_display_contains_context() {
        assert!(
            FulfillmentError::PoolNotFound(42)
                .to_string()
                .contains("42")
        );
        assert!(
            FulfillmentError::NoCardsAvailable { pool_id: 7 }
                .to_string()
                .contains("7")
        );
        assert!(
            FulfillmentError::ConditionNotFound {
                campaign_id: 100,
                condition_number: 2,
            }
            .to_string()
            .contains("100")
        );
        assert!(
            FulfillmentError::ConditionAlreadyCompleted {
                call_session_id: "cs-abc".into(),
                condition_number: 1,
            }
            .to_string()
            .contains("cs-abc")
        );
        assert!(
            FulfillmentError::DuplicateCardCode("CARD-X".into())
                .to_string()
                .contains("CARD-X")
        );
        assert!(
            FulfillmentError::ProviderRejected {
                provider: "cardco".into(),
                status: 422,
                message: "denomination not offered".into(),
            }
            .to_string()
            .contains("422")
        );
    }

    // ---- IntoResponse 测试 ----

    /// IntoResponse 是错误到 HTTP 响应的最终出口。
    /// 必须验证状态码正确、响应体结构完整（success/code/message/data 四字段）。
    #[tokio::test]
    async fn test_into_response_body_structure() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let label = format!("{:?}", error);
            let response = error.into_response();

            assert_eq!(
                response.status(),
                expected_status,
                "响应状态码不匹配: {label}"
            );

            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("读取响应体失败");
            let body: serde_json::Value =
                serde_json::from_slice(&body_bytes).expect("响应体不是合法 JSON");

            assert_eq!(body["success"], json!(false), "success 应为 false: {label}");
            assert_eq!(body["code"], json!(expected_code), "code 不匹配: {label}");
            assert!(
                !body["message"].as_str().unwrap_or("").is_empty(),
                "message 不应为空: {label}"
            );
            assert!(body["data"].is_null(), "data 字段应为 null: {label}");
        }
    }

    /// 系统级错误的响应消息不应泄露内部细节，只返回通用提示。
    #[tokio::test]
    async fn test_system_errors_hide_internal_details() {
        let system_errors: Vec<(FulfillmentError, &str)> = vec![
            (
                FulfillmentError::Internal("stack overflow at module X".into()),
                "stack overflow",
            ),
            (
                FulfillmentError::Database(sqlx::Error::PoolTimedOut),
                "pool",
            ),
        ];

        for (error, leaked_detail) in system_errors {
            let response = error.into_response();
            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("读取响应体失败");
            let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
            let message = body["message"].as_str().unwrap();

            assert!(
                !message.to_lowercase().contains(leaked_detail),
                "系统错误消息泄露了内部细节: message={message}"
            );
            assert!(
                message.contains("服务内部错误"),
                "系统错误应返回通用提示，实际: {message}"
            );
        }
    }

    /// 业务错误的响应消息应保留原始描述，帮助调用方理解问题。
    #[tokio::test]
    async fn test_business_errors_preserve_display_message() {
        let business_errors: Vec<(FulfillmentError, &str)> = vec![
            (FulfillmentError::PoolNotFound(42), "42"),
            (
                FulfillmentError::Validation("recipientId 不能为空".into()),
                "recipientId",
            ),
            (FulfillmentError::NoCardsAvailable { pool_id: 9 }, "9"),
        ];

        for (error, expected_fragment) in business_errors {
            let response = error.into_response();
            let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("读取响应体失败");
            let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
            let message = body["message"].as_str().unwrap();

            assert!(
                message.contains(expected_fragment),
                "业务错误消息应包含上下文: message={message}, expected={expected_fragment}"
            );
        }
    }

    // ---- From 转换测试 ----

    /// validator 是请求参数校验的统一入口，转换必须把字段级错误信息带入。
    #[test]
    fn test_from_validation_errors() {
        use validator::{ValidationError, ValidationErrors};

        let mut errors = ValidationErrors::new();
        let mut field_error = ValidationError::new("length");
        field_error.message = Some("recipientId 长度不能超过 64 个字符".into());
        errors.add("recipientId", field_error);

        let err: FulfillmentError = errors.into();
        match &err {
            FulfillmentError::Validation(msg) => {
                assert!(msg.contains("recipientId"), "转换后应保留字段名: {msg}");
            }
            other => panic!("期望 Validation 变体，实际: {:?}", other),
        }
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    /// sqlx::Error 通过 #[from] 自动派生，验证转换后类型和状态码正确。
    #[test]
    fn test_from_sqlx_error() {
        let err = FulfillmentError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, FulfillmentError::Database(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err = FulfillmentError::from(json_err);
        assert!(matches!(err, FulfillmentError::Internal(_)));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
