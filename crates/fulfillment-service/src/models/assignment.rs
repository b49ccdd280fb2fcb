//! 分配记录与外部采购实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{AssignmentSource, PurchaseStatus};

/// 分配记录
///
/// 一个单元与一个 (recipient, condition) 的持久绑定。
/// (recipient_id, condition_id) 唯一约束是整个系统 exactly-once 的根基；
/// unit_id 同样唯一，保证一张卡不会被分给两个人。记录只增不删。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    pub recipient_id: String,
    pub condition_id: i64,
    pub unit_id: i64,
    pub source: AssignmentSource,
    /// 触发领取的会话（用于审计串联）
    #[sqlx(default)]
    pub call_session_id: Option<String>,
    /// 经办坐席（人工触发时填充）
    #[sqlx(default)]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 外部采购记录
///
/// 回退发卡的审计痕迹。pending 行在调用供应商之前写入，
/// 这样调用与落库之间崩溃时留有对账线索，而不是静默丢单。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPurchase {
    pub id: i64,
    pub pool_id: i64,
    /// 供应商名称（来自配置）
    pub provider: String,
    pub brand_code: String,
    pub denomination_cents: i64,
    pub currency: String,
    /// 实际成本（分），供应商返回后填充
    #[sqlx(default)]
    pub cost_cents: Option<i64>,
    pub status: PurchaseStatus,
    /// 供应商侧交易号
    #[sqlx(default)]
    pub transaction_id: Option<String>,
    /// 供应商原始响应（JSON），排障用
    #[sqlx(default)]
    pub raw_response: Option<Value>,
    #[sqlx(default)]
    pub error_message: Option<String>,
    /// 发卡成功后创建的库存单元
    #[sqlx(default)]
    pub unit_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalPurchase {
    /// 供应商侧幂等键：同一采购的重试使用同一 reference
    pub fn reference(&self) -> String {
        format!("purchase-{}", self.id)
    }
}
