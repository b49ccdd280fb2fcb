//! 服务层数据传输对象
//!
//! 定义履约编排的输入命令与输出结果，与内部领域模型解耦

use serde::{Deserialize, Serialize};

use crate::models::{AssignmentSource, CompletionState, DeliveryStatus};

/// 条件完成命令
///
/// 由 HTTP 层构造后交给编排服务处理
#[derive(Debug, Clone)]
pub struct CompleteConditionCommand {
    /// 通话会话标识，幂等键的一半
    pub call_session_id: String,
    pub campaign_id: i64,
    pub recipient_id: String,
    /// 活动内条件序号，幂等键的另一半
    pub condition_number: i32,
    /// 经办坐席
    pub agent_id: Option<String>,
    /// 坐席备注，只进审计日志
    pub notes: Option<String>,
}

impl CompleteConditionCommand {
    pub fn new(
        call_session_id: impl Into<String>,
        campaign_id: i64,
        recipient_id: impl Into<String>,
        condition_number: i32,
    ) -> Self {
        Self {
            call_session_id: call_session_id.into(),
            campaign_id,
            recipient_id: recipient_id.into(),
            condition_number,
            agent_id: None,
            notes: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// 条件完成结果
///
/// POST 完成接口与 GET 查询接口共用的输出形态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub call_session_id: String,
    pub condition_number: i32,
    pub recipient_id: String,
    pub state: CompletionState,
    /// 重放请求命中已有分配
    pub already_assigned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_card: Option<GiftCardPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
}

/// 礼品卡载荷
///
/// 返回给坐席端展示，包含完整卡密
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftCardPayload {
    pub unit_id: i64,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    pub brand_code: String,
    pub value_cents: i64,
    pub currency: String,
    pub source: AssignmentSource,
    /// 外部发卡时的供应商名称
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}
