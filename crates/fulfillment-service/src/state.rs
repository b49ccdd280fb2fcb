//! 应用状态定义
//!
//! 包含 Axum 路由共享的应用状态与服务装配

use std::sync::Arc;

use reward_shared::retry::RetryPolicy;
use sqlx::PgPool;

use crate::provider::CardProvider;
use crate::repository::{
    AssignmentRepository, AuditRepository, ConditionRepository, DeliveryRepository,
    PgRecipientDirectory, PoolRepository, PurchaseRepository,
};
use crate::service::{ClaimService, FulfillmentService, InventoryService, ProvisionService};

/// 编排服务的具体仓储组合
pub type AppFulfillmentService = FulfillmentService<
    ConditionRepository,
    PoolRepository,
    AssignmentRepository,
    DeliveryRepository,
    AuditRepository,
    PgRecipientDirectory,
>;

/// Axum 应用共享状态
///
/// 服务实例通过 Arc 在 handler 间共享
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池（就绪探针用）
    pub pool: PgPool,
    /// 履约编排服务
    pub fulfillment: Arc<AppFulfillmentService>,
    /// 库存管理服务
    pub inventory: Arc<InventoryService<PoolRepository>>,
}

impl AppState {
    /// 从连接池和供应商客户端装配全部服务
    ///
    /// main 和集成测试共用同一套装配，避免两处接线不一致
    pub fn build(pool: PgPool, provider: Arc<dyn CardProvider>, retry_policy: RetryPolicy) -> Self {
        let condition_repo = Arc::new(ConditionRepository::new(pool.clone()));
        let pool_repo = Arc::new(PoolRepository::new(pool.clone()));
        let assignment_repo = Arc::new(AssignmentRepository::new(pool.clone()));
        let delivery_repo = Arc::new(DeliveryRepository::new(pool.clone()));
        let audit_repo = Arc::new(AuditRepository::new(pool.clone()));
        let recipients = Arc::new(PgRecipientDirectory::new(pool.clone()));
        let purchase_repo = Arc::new(PurchaseRepository::new(pool.clone()));

        let claim_service = Arc::new(ClaimService::new(pool.clone()));
        let provision_service = Arc::new(ProvisionService::new(
            pool.clone(),
            purchase_repo,
            provider,
            retry_policy,
        ));

        let fulfillment = Arc::new(FulfillmentService::new(
            condition_repo,
            pool_repo.clone(),
            assignment_repo,
            delivery_repo,
            audit_repo,
            recipients,
            claim_service,
            provision_service,
        ));
        let inventory = Arc::new(InventoryService::new(pool_repo));

        Self {
            pool,
            fulfillment,
            inventory,
        }
    }
}
