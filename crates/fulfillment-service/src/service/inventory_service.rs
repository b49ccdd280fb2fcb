//! 库存管理服务
//!
//! 管理端的卡池与卡片操作：建池、批量入库、回滚。
//! 入参校验在这里完成，数据访问全部委托仓储层。

use std::sync::Arc;

use tracing::instrument;

use crate::error::{FulfillmentError, Result};
use crate::models::{CardPool, InventoryUnit};
use crate::repository::{
    NewCardPool, NewInventoryUnit, PoolFilter, PoolRepositoryTrait, RollbackAction,
};

/// 单批入库卡片数量上限
pub const MAX_UPLOAD_BATCH: usize = 5000;

/// 库存管理服务
pub struct InventoryService<PR>
where
    PR: PoolRepositoryTrait,
{
    pool_repo: Arc<PR>,
}

impl<PR> InventoryService<PR>
where
    PR: PoolRepositoryTrait,
{
    pub fn new(pool_repo: Arc<PR>) -> Self {
        Self { pool_repo }
    }

    /// 创建卡池（幂等：同 (brand, denomination, client) 返回已有池）
    #[instrument(skip(self, request), fields(brand = %request.brand_code, client_id = %request.client_id))]
    pub async fn create_pool(&self, request: &NewCardPool) -> Result<CardPool> {
        Self::validate_pool_request(request)?;
        self.pool_repo.create_pool(request).await
    }

    /// 批量入库卡片
    #[instrument(skip(self, units), fields(pool_id, count = units.len()))]
    pub async fn upload_units(&self, pool_id: i64, units: &[NewInventoryUnit]) -> Result<i64> {
        Self::validate_units(units)?;
        self.pool_repo.upload_units(pool_id, units).await
    }

    /// 回滚卡片（释放回池或作废）
    #[instrument(skip(self), fields(unit_id, ?action))]
    pub async fn rollback_unit(
        &self,
        unit_id: i64,
        action: RollbackAction,
        reason: Option<String>,
    ) -> Result<InventoryUnit> {
        self.pool_repo.rollback_unit(unit_id, action, reason).await
    }

    pub async fn get_pool(&self, id: i64) -> Result<CardPool> {
        self.pool_repo
            .get_pool_by_id(id)
            .await?
            .ok_or(FulfillmentError::PoolNotFound(id))
    }

    pub async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<CardPool>> {
        self.pool_repo.list_pools(filter).await
    }

    // ==================== 校验 ====================

    fn validate_pool_request(request: &NewCardPool) -> Result<()> {
        if request.brand_code.trim().is_empty() {
            return Err(FulfillmentError::Validation("品牌编码不能为空".to_string()));
        }
        if request.denomination_cents <= 0 {
            return Err(FulfillmentError::Validation("面额必须为正数".to_string()));
        }
        if request.currency.len() != 3 || !request.currency.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err(FulfillmentError::Validation(
                "币种须为 3 位大写字母代码".to_string(),
            ));
        }
        if request.client_id.trim().is_empty() {
            return Err(FulfillmentError::Validation("客户标识不能为空".to_string()));
        }
        Ok(())
    }

    fn validate_units(units: &[NewInventoryUnit]) -> Result<()> {
        if units.len() > MAX_UPLOAD_BATCH {
            return Err(FulfillmentError::Validation(format!(
                "单批最多入库 {} 张卡片",
                MAX_UPLOAD_BATCH
            )));
        }
        for unit in units {
            if unit.code.trim().is_empty() {
                return Err(FulfillmentError::Validation("卡密不能为空".to_string()));
            }
            if unit.code.len() > 128 {
                return Err(FulfillmentError::Validation(
                    "卡密长度超出 128 字符".to_string(),
                ));
            }
        }
        Ok(())
    }
}
