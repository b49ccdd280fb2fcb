//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use reward_shared::events::AuditEvent;

use crate::error::Result;
use crate::models::{
    Assignment, CampaignCondition, CardPool, CompletionState, ConditionCompletion, Delivery,
    ExternalPurchase, InventoryUnit, Recipient,
};

use super::delivery_repo::NewDelivery;
use super::pool_repo::{NewCardPool, NewInventoryUnit, PoolFilter, RollbackAction};

/// 卡池仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoolRepositoryTrait: Send + Sync {
    // 卡池
    async fn get_pool_by_id(&self, id: i64) -> Result<Option<CardPool>>;
    async fn get_pool(
        &self,
        brand_code: &str,
        denomination_cents: i64,
        client_id: &str,
    ) -> Result<Option<CardPool>>;
    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<CardPool>>;
    async fn create_pool(&self, request: &NewCardPool) -> Result<CardPool>;

    // 库存
    async fn get_unit(&self, id: i64) -> Result<Option<InventoryUnit>>;
    async fn upload_units(&self, pool_id: i64, units: &[NewInventoryUnit]) -> Result<i64>;
    async fn rollback_unit(
        &self,
        unit_id: i64,
        action: RollbackAction,
        reason: Option<String>,
    ) -> Result<InventoryUnit>;
}

/// 活动条件与完成记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConditionRepositoryTrait: Send + Sync {
    async fn find_active_condition(
        &self,
        campaign_id: i64,
        condition_number: i32,
    ) -> Result<Option<CampaignCondition>>;
    async fn find_completion(
        &self,
        call_session_id: &str,
        condition_number: i32,
    ) -> Result<Option<ConditionCompletion>>;
    async fn upsert_claiming(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<ConditionCompletion>;
    async fn insert_completed_guard(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<bool>;
    async fn set_claimed(&self, completion_id: i64, unit_id: i64) -> Result<()>;
    async fn advance_state(&self, completion_id: i64, state: CompletionState) -> Result<()>;
}

/// 分配台账仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentRepositoryTrait: Send + Sync {
    async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Assignment>>;
    async fn find_by_recipient_condition(
        &self,
        recipient_id: &str,
        condition_id: i64,
    ) -> Result<Option<Assignment>>;
}

/// 投递任务仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryRepositoryTrait: Send + Sync {
    async fn enqueue(&self, delivery: &NewDelivery) -> Result<Delivery>;
    async fn get(&self, id: i64) -> Result<Option<Delivery>>;
    async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Delivery>>;
    async fn exists_for_unit(&self, unit_id: i64) -> Result<bool>;
}

/// 外部采购仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PurchaseRepositoryTrait: Send + Sync {
    async fn create_pending(
        &self,
        pool_id: i64,
        provider: &str,
        brand_code: &str,
        denomination_cents: i64,
        currency: &str,
    ) -> Result<ExternalPurchase>;
    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()>;
    async fn get(&self, id: i64) -> Result<Option<ExternalPurchase>>;
}

/// 审计事件仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepositoryTrait: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
    async fn list_by_call_session(&self, call_session_id: &str) -> Result<Vec<AuditEvent>>;
}

/// 收件人目录接口
///
/// 投递寻址的唯一入口。生产实现读 recipients 投影表，
/// 测试中可 mock 以构造缺失联系方式等场景。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find(&self, recipient_id: &str) -> Result<Option<Recipient>>;
}
