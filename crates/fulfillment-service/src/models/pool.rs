//! 卡池与库存单元实体定义
//!
//! 卡池按 (brand_code, denomination_cents, client_id) 唯一，
//! 计数列是单元状态的派生投影，任何单元状态变更都在同一事务内重算计数。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::UnitStatus;

/// 礼品卡池
///
/// 同一品牌、同一面额、同一客户的库存桶。
/// total_count 恒等于四个状态计数之和（数据库 CHECK 约束兜底）。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CardPool {
    pub id: i64,
    /// 供应商侧品牌编码，如 "STARBUCKS"
    pub brand_code: String,
    /// 面额（分）
    pub denomination_cents: i64,
    /// 币种（ISO 4217）
    pub currency: String,
    /// 所属客户标识
    pub client_id: String,
    /// 展示名称（可选）
    #[sqlx(default)]
    pub name: Option<String>,
    pub total_count: i64,
    pub available_count: i64,
    pub claimed_count: i64,
    pub delivered_count: i64,
    pub failed_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardPool {
    /// 检查计数不变式：total = available + claimed + delivered + failed
    pub fn counts_consistent(&self) -> bool {
        self.total_count
            == self.available_count + self.claimed_count + self.delivered_count + self.failed_count
    }

    /// 是否还有可领取库存
    pub fn has_available(&self) -> bool {
        self.available_count > 0
    }

    /// 面向用户的品牌展示名，未配置时退回品牌编码
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.brand_code)
    }
}

/// 库存单元
///
/// 一条可兑换的礼品卡记录。code 创建后不可变；
/// 状态迁移见 [`UnitStatus::can_transition_to`]。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUnit {
    pub id: i64,
    pub pool_id: i64,
    /// 兑换码
    pub code: String,
    /// 实体卡号（可选，部分品牌提供）
    #[sqlx(default)]
    pub card_number: Option<String>,
    pub status: UnitStatus,
    /// 领取人（status 进入 claimed 时填充）
    #[sqlx(default)]
    pub claimed_by_recipient_id: Option<String>,
    /// 领取条件（与 claimed_by_recipient_id 同时填充）
    #[sqlx(default)]
    pub claimed_by_condition_id: Option<i64>,
    #[sqlx(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InventoryUnit {
    /// 是否可被领取
    pub fn is_claimable(&self) -> bool {
        self.status == UnitStatus::Available
    }

    /// 是否可被管理端释放回 available
    ///
    /// 仅 claimed 且尚未送达的单元可释放；
    /// 已有 sent/delivered 投递记录的单元由仓储层另行拦截。
    pub fn is_releasable(&self) -> bool {
        self.status == UnitStatus::Claimed
    }
}
