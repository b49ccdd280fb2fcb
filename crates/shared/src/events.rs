//! 审计事件模型
//!
//! 定义履约引擎的审计事件类型与统一信封格式。审计事件只追加、不修改，
//! 并且尽可能与其描述的状态变更在同一事务内写入，保证事后对账时
//! 事件流与表状态一致。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AuditEventType — 审计事件类型
// ---------------------------------------------------------------------------

/// 审计事件类型枚举
///
/// 每个终态转换都会产生一条事件；审计消费方按类型回放完整的履约时间线。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // 条件完成编排产生的事件
    ConditionCompleted,
    GiftCardClaimed,

    // 投递 worker 产生的事件
    DeliverySent,
    DeliveryFailed,

    // 库存管理产生的事件
    InventoryLoaded,
    UnitRolledBack,
}

impl AuditEventType {
    /// 数据库存储用的稳定标识
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConditionCompleted => "condition_completed",
            Self::GiftCardClaimed => "gift_card_claimed",
            Self::DeliverySent => "delivery_sent",
            Self::DeliveryFailed => "delivery_failed",
            Self::InventoryLoaded => "inventory_loaded",
            Self::UnitRolledBack => "unit_rolled_back",
        }
    }

    /// 投递类事件由异步 worker 产生，没有关联的调用会话上下文时也合法
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::DeliverySent | Self::DeliveryFailed)
    }

    /// 库存管理类事件由管理接口产生
    pub fn is_inventory(&self) -> bool {
        matches!(self, Self::InventoryLoaded | Self::UnitRolledBack)
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "condition_completed" => Ok(Self::ConditionCompleted),
            "gift_card_claimed" => Ok(Self::GiftCardClaimed),
            "delivery_sent" => Ok(Self::DeliverySent),
            "delivery_failed" => Ok(Self::DeliveryFailed),
            "inventory_loaded" => Ok(Self::InventoryLoaded),
            "unit_rolled_back" => Ok(Self::UnitRolledBack),
            other => Err(format!("未知的审计事件类型: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditEvent — 审计事件信封
// ---------------------------------------------------------------------------

/// 审计事件信封
///
/// - `event_id`（UUID v7）时间有序，按 id 排序即按时间排序
/// - 关联 id 全部可选：不同事件类型携带不同的关联维度
/// - `data` 以 JSON 承载事件特有字段（如失败原因、上传数量）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub call_session_id: Option<String>,
    pub recipient_id: Option<String>,
    pub condition_id: Option<i64>,
    pub unit_id: Option<i64>,
    pub pool_id: Option<i64>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// 构建新事件，自动生成 UUID v7 作为 event_id 并记录当前时间
    pub fn new(event_type: AuditEventType, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type,
            call_session_id: None,
            recipient_id: None,
            condition_id: None,
            unit_id: None,
            pool_id: None,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn with_call_session(mut self, call_session_id: impl Into<String>) -> Self {
        self.call_session_id = Some(call_session_id.into());
        self
    }

    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn with_condition(mut self, condition_id: i64) -> Self {
        self.condition_id = Some(condition_id);
        self
    }

    pub fn with_unit(mut self, unit_id: i64) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn with_pool(mut self, pool_id: i64) -> Self {
        self.pool_id = Some(pool_id);
        self
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(AuditEventType::ConditionCompleted.as_str(), "condition_completed");
        assert_eq!(AuditEventType::GiftCardClaimed.as_str(), "gift_card_claimed");
        assert_eq!(AuditEventType::DeliverySent.as_str(), "delivery_sent");
        assert_eq!(AuditEventType::DeliveryFailed.as_str(), "delivery_failed");
        assert_eq!(AuditEventType::InventoryLoaded.as_str(), "inventory_loaded");
        assert_eq!(AuditEventType::UnitRolledBack.as_str(), "unit_rolled_back");
    }

    #[test]
    fn test_event_type_from_str_round_trip() {
        for event_type in [
            AuditEventType::ConditionCompleted,
            AuditEventType::GiftCardClaimed,
            AuditEventType::DeliverySent,
            AuditEventType::DeliveryFailed,
            AuditEventType::InventoryLoaded,
            AuditEventType::UnitRolledBack,
        ] {
            let parsed: AuditEventType = event_type.as_str().parse().unwrap();
            assert_eq!(parsed, event_type);
        }

        assert!("mystery_event".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn test_event_type_serde_matches_as_str() {
        // serde 序列化与 as_str 必须一致，否则审计消费方按类型过滤会漏事件
        for event_type in [
            AuditEventType::ConditionCompleted,
            AuditEventType::GiftCardClaimed,
            AuditEventType::DeliverySent,
            AuditEventType::DeliveryFailed,
            AuditEventType::InventoryLoaded,
            AuditEventType::UnitRolledBack,
        ] {
            let json = serde_json::to_string(&event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type.as_str()));
        }
    }

    #[test]
    fn test_event_type_classification() {
        assert!(AuditEventType::DeliverySent.is_delivery());
        assert!(AuditEventType::DeliveryFailed.is_delivery());
        assert!(!AuditEventType::GiftCardClaimed.is_delivery());

        assert!(AuditEventType::InventoryLoaded.is_inventory());
        assert!(AuditEventType::UnitRolledBack.is_inventory());
        assert!(!AuditEventType::ConditionCompleted.is_inventory());
    }

    #[test]
    fn test_audit_event_builder() {
        let event = AuditEvent::new(
            AuditEventType::GiftCardClaimed,
            json!({"source": "inventory"}),
        )
        .with_call_session("cs-001")
        .with_recipient("recipient-42")
        .with_condition(7)
        .with_unit(1001)
        .with_pool(3);

        assert_eq!(event.event_type, AuditEventType::GiftCardClaimed);
        assert_eq!(event.call_session_id.as_deref(), Some("cs-001"));
        assert_eq!(event.recipient_id.as_deref(), Some("recipient-42"));
        assert_eq!(event.condition_id, Some(7));
        assert_eq!(event.unit_id, Some(1001));
        assert_eq!(event.pool_id, Some(3));
        assert_eq!(event.data["source"], "inventory");
    }

    #[test]
    fn test_event_ids_are_time_ordered() {
        // UUID v7 带时间戳前缀，先创建的事件 id 字典序更小
        let first = AuditEvent::new(AuditEventType::DeliverySent, json!({}));
        let second = AuditEvent::new(AuditEventType::DeliverySent, json!({}));
        assert!(first.event_id < second.event_id);
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(
            AuditEventType::DeliveryFailed,
            json!({"error": "连接超时", "retryCount": 1}),
        )
        .with_unit(55);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("eventId"));
        assert!(json.contains("delivery_failed"));
        assert!(json.contains("unitId"));

        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type, AuditEventType::DeliveryFailed);
        assert_eq!(deserialized.unit_id, Some(55));
    }
}
