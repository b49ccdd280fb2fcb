//! 活动条件、完成记录与收件人实体定义
//!
//! campaign_conditions 由活动配置方写入，本服务只读；
//! condition_completions 持久化每个 (call_session, condition_number) 的状态机。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::CompletionState;

/// 奖励配置（存储在 campaign_conditions.reward_config JSONB 列）
///
/// 两种形态：
/// - `pool`：直接指向某个卡池（兼容旧配置，无品牌信息，库存耗尽不可回退）
/// - `brandDenomination`：品牌 + 面额，解析时定位或创建卡池，耗尽可走外部发卡
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RewardConfig {
    #[serde(rename_all = "camelCase")]
    Pool { pool_id: i64 },
    #[serde(rename_all = "camelCase")]
    BrandDenomination {
        brand_code: String,
        denomination_cents: i64,
        currency: String,
    },
}

impl RewardConfig {
    /// 该配置是否支持外部供应商回退
    ///
    /// pool 形态没有品牌和面额可供发卡，库存耗尽即终态
    pub fn supports_fallback(&self) -> bool {
        matches!(self, Self::BrandDenomination { .. })
    }
}

/// 活动条件配置
///
/// 唯一键 (campaign_id, condition_number)。reward_config 为 NULL
/// 表示该条件不发放礼品卡，完成时走短路路径。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCondition {
    pub id: i64,
    pub campaign_id: i64,
    pub condition_number: i32,
    pub client_id: String,
    #[sqlx(default)]
    pub name: Option<String>,
    /// 奖励配置（JSON），存储 RewardConfig 结构
    #[sqlx(default)]
    pub reward_config: Option<Value>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignCondition {
    /// 解析奖励配置
    ///
    /// None 表示无奖励条件；解析失败说明配置方写入了非法 JSON
    pub fn parse_reward_config(&self) -> Result<Option<RewardConfig>, serde_json::Error> {
        match &self.reward_config {
            Some(value) => serde_json::from_value(value.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// 是否发放礼品卡
    pub fn awards_gift_card(&self) -> bool {
        self.reward_config.is_some()
    }
}

/// 条件完成记录
///
/// (call_session_id, condition_number) 唯一——既是状态机的持久化载体，
/// 也是防止同一条件重复产生副作用的完成守卫。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCompletion {
    pub id: i64,
    pub call_session_id: String,
    pub condition_id: i64,
    pub condition_number: i32,
    pub recipient_id: String,
    pub state: CompletionState,
    #[sqlx(default)]
    pub unit_id: Option<i64>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 收件人
///
/// 收件人目录协作方的最小投影，仅用于投递寻址
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    #[sqlx(default)]
    pub phone: Option<String>,
    #[sqlx(default)]
    pub email: Option<String>,
    #[sqlx(default)]
    pub display_name: Option<String>,
}

impl Recipient {
    /// 选择投递联系方式：手机号优先，其次邮箱
    ///
    /// 返回 (渠道, 地址)；两者皆无时返回 None，
    /// 调用方应直接记 delivery_failed 而不入队
    pub fn preferred_contact(&self) -> Option<(super::enums::DeliveryMethod, &str)> {
        use super::enums::DeliveryMethod;

        if let Some(phone) = self.phone.as_deref()
            && !phone.is_empty()
        {
            return Some((DeliveryMethod::Sms, phone));
        }
        if let Some(email) = self.email.as_deref()
            && !email.is_empty()
        {
            return Some((DeliveryMethod::Email, email));
        }
        None
    }
}
