//! REST API 响应 DTO 定义
//!
//! 统一响应信封与管理端视图结构。卡密只在领卡接口的
//! `GiftCardPayload` 中完整返回，管理端视图一律脱敏。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CardPool, InventoryUnit, UnitStatus};

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    /// 创建成功响应（无数据）
    pub fn success_empty() -> ApiResponse<()> {
        ApiResponse {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: None,
        }
    }

    /// 创建错误响应
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// 卡池响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDto {
    pub id: i64,
    pub brand_code: String,
    pub denomination_cents: i64,
    pub currency: String,
    pub client_id: String,
    pub name: Option<String>,
    pub total_count: i64,
    pub available_count: i64,
    pub claimed_count: i64,
    pub delivered_count: i64,
    pub failed_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CardPool> for PoolDto {
    fn from(pool: CardPool) -> Self {
        Self {
            id: pool.id,
            brand_code: pool.brand_code,
            denomination_cents: pool.denomination_cents,
            currency: pool.currency,
            client_id: pool.client_id,
            name: pool.name,
            total_count: pool.total_count,
            available_count: pool.available_count,
            claimed_count: pool.claimed_count,
            delivered_count: pool.delivered_count,
            failed_count: pool.failed_count,
            created_at: pool.created_at,
            updated_at: pool.updated_at,
        }
    }
}

/// 库存卡管理端视图 DTO
///
/// 卡密脱敏后返回，完整卡密只走领卡接口
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDto {
    pub id: i64,
    pub pool_id: i64,
    pub masked_code: String,
    pub status: UnitStatus,
    pub claimed_by_recipient_id: Option<String>,
    pub claimed_by_condition_id: Option<i64>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<InventoryUnit> for UnitDto {
    fn from(unit: InventoryUnit) -> Self {
        Self {
            id: unit.id,
            pool_id: unit.pool_id,
            masked_code: mask_code(&unit.code),
            status: unit.status,
            claimed_by_recipient_id: unit.claimed_by_recipient_id,
            claimed_by_condition_id: unit.claimed_by_condition_id,
            claimed_at: unit.claimed_at,
            delivered_at: unit.delivered_at,
            created_at: unit.created_at,
        }
    }
}

/// 批量上传结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUnitsResponse {
    pub pool_id: i64,
    pub loaded_count: i64,
}

/// 卡密脱敏：只保留末四位
fn mask_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.code, "SUCCESS");
        assert_eq!(response.data, Some("ok"));
    }

    #[test]
    fn test_api_response_error() {
        let response = ApiResponse::<()>::error("NO_CARDS_AVAILABLE", "卡池无可用库存");
        assert!(!response.success);
        assert_eq!(response.code, "NO_CARDS_AVAILABLE");
        assert!(response.data.is_none());
    }

    #[test]
    fn test_api_response_serialization() {
        let response = ApiResponse::success(UploadUnitsResponse {
            pool_id: 7,
            loaded_count: 120,
        });
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"poolId\":7"));
        assert!(json.contains("\"loadedCount\":120"));
    }

    #[test]
    fn test_mask_code() {
        assert_eq!(mask_code("GC-2024-88841234"), "****1234");
        assert_eq!(mask_code("abc"), "****");
        assert_eq!(mask_code("1234"), "****");
    }
}
