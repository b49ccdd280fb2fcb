//! 投递记录实体定义
//!
//! deliveries 表同时充当持久化投递队列：入队即 INSERT pending 行，
//! Worker 通过 FOR UPDATE SKIP LOCKED 认领到期行，进程重启不丢任务。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{DeliveryMethod, DeliveryStatus};

/// 自动重试上限（不含首次发送）
///
/// 超过后行进入终态，条件完成状态机记为 delivery_failed；
/// 单元保持 claimed，码不会重新生成，人工可恢复。
pub const MAX_AUTO_RETRIES: i32 = 1;

/// 投递记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: i64,
    pub unit_id: i64,
    pub recipient_id: String,
    pub method: DeliveryMethod,
    /// 收件地址（手机号或邮箱，日志中须脱敏）
    pub address: String,
    /// 渲染好的消息正文
    pub message: String,
    pub status: DeliveryStatus,
    pub retry_count: i32,
    #[sqlx(default)]
    pub error_message: Option<String>,
    /// 渠道返回的消息 ID
    #[sqlx(default)]
    pub provider_message_id: Option<String>,
    #[sqlx(default)]
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// 是否已达自动重试上限
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > MAX_AUTO_RETRIES
    }

    /// 是否处于可被 Worker 认领的状态
    ///
    /// failed 行还要满足退避时间，那个条件在 SQL 里判断
    pub fn is_claimable_by_worker(&self) -> bool {
        match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Failed => self.retry_count <= MAX_AUTO_RETRIES,
            DeliveryStatus::Sent | DeliveryStatus::Delivered => false,
        }
    }
}
