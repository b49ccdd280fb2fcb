//! REST API 请求 DTO 定义
//!
//! 所有请求体和查询参数结构，负责线上格式（camelCase）到
//! 内部命令/仓储类型的转换

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::repository::{NewCardPool, NewInventoryUnit, PoolFilter, RollbackAction};
use crate::service::CompleteConditionCommand;

/// 条件完成请求（领卡入口）
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteConditionRequest {
    #[validate(length(min = 1, max = 128, message = "callSessionId 长度必须在1-128个字符之间"))]
    pub call_session_id: String,
    #[validate(range(min = 1, message = "campaignId 必须为正数"))]
    pub campaign_id: i64,
    #[validate(length(min = 1, max = 128, message = "recipientId 长度必须在1-128个字符之间"))]
    pub recipient_id: String,
    #[validate(range(min = 1, message = "conditionNumber 必须为正数"))]
    pub condition_number: i32,
    pub agent_id: Option<String>,
    /// 坐席备注，只进审计日志
    #[validate(length(max = 500, message = "备注不超过500个字符"))]
    pub notes: Option<String>,
}

impl CompleteConditionRequest {
    /// 转换为编排服务的输入命令
    pub fn into_command(self) -> CompleteConditionCommand {
        let mut command = CompleteConditionCommand::new(
            self.call_session_id,
            self.campaign_id,
            self.recipient_id,
            self.condition_number,
        );
        if let Some(agent_id) = self.agent_id {
            command = command.with_agent(agent_id);
        }
        if let Some(notes) = self.notes {
            command = command.with_notes(notes);
        }
        command
    }
}

/// 完成记录查询参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionQuery {
    pub call_session_id: String,
    pub condition_number: i32,
}

/// 创建卡池请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    #[validate(length(min = 1, max = 64, message = "brandCode 长度必须在1-64个字符之间"))]
    pub brand_code: String,
    #[validate(range(min = 1, message = "denominationCents 必须为正数"))]
    pub denomination_cents: i64,
    #[validate(length(equal = 3, message = "currency 必须是3位 ISO 代码"))]
    pub currency: String,
    #[validate(length(min = 1, max = 64, message = "clientId 长度必须在1-64个字符之间"))]
    pub client_id: String,
    #[validate(length(max = 128, message = "名称不超过128个字符"))]
    pub name: Option<String>,
}

impl CreatePoolRequest {
    pub fn into_new_pool(self) -> NewCardPool {
        NewCardPool {
            brand_code: self.brand_code,
            denomination_cents: self.denomination_cents,
            currency: self.currency,
            client_id: self.client_id,
            name: self.name,
        }
    }
}

/// 卡池列表查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolListQuery {
    pub brand_code: Option<String>,
    pub denomination_cents: Option<i64>,
    pub client_id: Option<String>,
}

impl PoolListQuery {
    pub fn into_filter(self) -> PoolFilter {
        PoolFilter {
            brand_code: self.brand_code,
            denomination_cents: self.denomination_cents,
            client_id: self.client_id,
        }
    }
}

/// 待上传的单张卡片
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadUnitItem {
    #[validate(length(min = 1, max = 128, message = "卡密长度必须在1-128个字符之间"))]
    pub code: String,
    pub card_number: Option<String>,
}

/// 批量上传库存请求
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadUnitsRequest {
    #[validate(length(min = 1, max = 5000, message = "单次上传数量必须在1-5000之间"))]
    #[validate(nested)]
    pub units: Vec<UploadUnitItem>,
}

impl UploadUnitsRequest {
    pub fn into_new_units(self) -> Vec<NewInventoryUnit> {
        self.units
            .into_iter()
            .map(|item| NewInventoryUnit {
                code: item.code,
                card_number: item.card_number,
            })
            .collect()
    }
}

/// 卡片回滚请求
///
/// `action=release` 放回可用库存，`action=mark_failed` 作废卡密
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RollbackUnitRequest {
    pub action: RollbackAction,
    #[validate(length(max = 500, message = "回滚原因不超过500个字符"))]
    pub reason: Option<String>,
}
