//! 卡池仓储
//!
//! 提供卡池与库存卡片的数据访问，包括批量入库与管理端回滚。
//! 所有改变卡片状态的写入都在同一事务内重算池子计数。

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use reward_shared::events::{AuditEvent, AuditEventType};
use reward_shared::observability::metrics;

use super::audit_repo::AuditRepository;
use super::traits::PoolRepositoryTrait;
use crate::error::{FulfillmentError, Result};
use crate::models::{CardPool, InventoryUnit, UnitStatus};

/// 创建卡池请求
#[derive(Debug, Clone)]
pub struct NewCardPool {
    pub brand_code: String,
    pub denomination_cents: i64,
    pub currency: String,
    pub client_id: String,
    pub name: Option<String>,
}

/// 待入库的卡片
#[derive(Debug, Clone)]
pub struct NewInventoryUnit {
    pub code: String,
    pub card_number: Option<String>,
}

/// 卡池列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct PoolFilter {
    pub brand_code: Option<String>,
    pub denomination_cents: Option<i64>,
    pub client_id: Option<String>,
}

/// 回滚动作
///
/// - `Release`：领取有误，卡片放回可用库存，收件人可换卡重领
/// - `MarkFailed`：卡密作废（如供应商召回），不再参与领取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackAction {
    Release,
    MarkFailed,
}

/// 卡池仓储
///
/// 负责卡池（brand + denomination + client 唯一）与库存卡片的数据访问
pub struct PoolRepository {
    pool: PgPool,
}

impl PoolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 卡池 ====================

    /// 获取单个卡池
    pub async fn get_pool_by_id(&self, id: i64) -> Result<Option<CardPool>> {
        let pool = sqlx::query_as::<_, CardPool>(
            r#"
            SELECT id, brand_code, denomination_cents, currency, client_id, name,
                   total_count, available_count, claimed_count, delivered_count,
                   failed_count, created_at, updated_at
            FROM card_pools
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pool)
    }

    /// 按业务键获取卡池
    pub async fn get_pool(
        &self,
        brand_code: &str,
        denomination_cents: i64,
        client_id: &str,
    ) -> Result<Option<CardPool>> {
        let pool = sqlx::query_as::<_, CardPool>(
            r#"
            SELECT id, brand_code, denomination_cents, currency, client_id, name,
                   total_count, available_count, claimed_count, delivered_count,
                   failed_count, created_at, updated_at
            FROM card_pools
            WHERE brand_code = $1 AND denomination_cents = $2 AND client_id = $3
            "#,
        )
        .bind(brand_code)
        .bind(denomination_cents)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pool)
    }

    /// 按条件列出卡池
    pub async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<CardPool>> {
        let pools = sqlx::query_as::<_, CardPool>(
            r#"
            SELECT id, brand_code, denomination_cents, currency, client_id, name,
                   total_count, available_count, claimed_count, delivered_count,
                   failed_count, created_at, updated_at
            FROM card_pools
            WHERE ($1::text IS NULL OR brand_code = $1)
              AND ($2::bigint IS NULL OR denomination_cents = $2)
              AND ($3::text IS NULL OR client_id = $3)
            ORDER BY id ASC
            "#,
        )
        .bind(&filter.brand_code)
        .bind(filter.denomination_cents)
        .bind(&filter.client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(pools)
    }

    /// 创建卡池（幂等 upsert）
    ///
    /// 同一 (brand_code, denomination_cents, client_id) 重复创建时
    /// 返回已有池子，计数不受影响；name 只在提供时覆盖。
    pub async fn create_pool(&self, request: &NewCardPool) -> Result<CardPool> {
        let pool = sqlx::query_as::<_, CardPool>(
            r#"
            INSERT INTO card_pools (brand_code, denomination_cents, currency, client_id, name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (brand_code, denomination_cents, client_id)
            DO UPDATE SET
                name = COALESCE(EXCLUDED.name, card_pools.name),
                updated_at = NOW()
            RETURNING id, brand_code, denomination_cents, currency, client_id, name,
                      total_count, available_count, claimed_count, delivered_count,
                      failed_count, created_at, updated_at
            "#,
        )
        .bind(&request.brand_code)
        .bind(request.denomination_cents)
        .bind(&request.currency)
        .bind(&request.client_id)
        .bind(&request.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(pool)
    }

    // ==================== 库存 ====================

    /// 获取单个库存卡片
    pub async fn get_unit(&self, id: i64) -> Result<Option<InventoryUnit>> {
        let unit = sqlx::query_as::<_, InventoryUnit>(
            r#"
            SELECT id, pool_id, code, card_number, status, claimed_by_recipient_id,
                   claimed_by_condition_id, claimed_at, delivered_at, created_at
            FROM inventory_units
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(unit)
    }

    /// 批量入库卡片
    ///
    /// 整批原子写入：批内或与已有库存重复的卡密会使整批被拒绝。
    /// 入库、计数重算与 inventory_loaded 审计事件在同一事务内完成。
    pub async fn upload_units(&self, pool_id: i64, units: &[NewInventoryUnit]) -> Result<i64> {
        if units.is_empty() {
            return Ok(0);
        }

        // 批内重复先行拒绝，避免触发唯一约束后难以定位具体卡密
        let mut seen = HashSet::new();
        for unit in units {
            if !seen.insert(unit.code.as_str()) {
                return Err(FulfillmentError::DuplicateCardCode(unit.code.clone()));
            }
        }

        let mut tx = self.pool.begin().await?;

        // 锁住池子行，串行化并发入库与计数重算
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM card_pools WHERE id = $1 FOR UPDATE")
                .bind(pool_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(FulfillmentError::PoolNotFound(pool_id));
        }

        let codes: Vec<String> = units.iter().map(|u| u.code.clone()).collect();
        let card_numbers: Vec<Option<String>> =
            units.iter().map(|u| u.card_number.clone()).collect();

        // 与已有库存冲突的卡密整批拒绝
        let duplicate: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT code FROM inventory_units
            WHERE pool_id = $1 AND code = ANY($2)
            LIMIT 1
            "#,
        )
        .bind(pool_id)
        .bind(&codes)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((code,)) = duplicate {
            return Err(FulfillmentError::DuplicateCardCode(code));
        }

        let loaded = sqlx::query(
            r#"
            INSERT INTO inventory_units (pool_id, code, card_number, status)
            SELECT $1, u.code, u.card_number, 'available'
            FROM UNNEST($2::text[], $3::text[]) AS u(code, card_number)
            "#,
        )
        .bind(pool_id)
        .bind(&codes)
        .bind(&card_numbers)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, || {
            FulfillmentError::DuplicateCardCode("并发入库冲突".to_string())
        }))?
        .rows_affected() as i64;

        let available = Self::recompute_counters(&mut tx, pool_id).await?;

        let event = AuditEvent::new(
            AuditEventType::InventoryLoaded,
            serde_json::json!({ "count": loaded }),
        )
        .with_pool(pool_id);
        AuditRepository::record_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        metrics::set_pool_available(pool_id, available as f64);
        info!(pool_id, count = loaded, "库存卡片已入库");
        Ok(loaded)
    }

    /// 管理端回滚卡片
    ///
    /// Release 仅允许 claimed 且未发出投递的卡片；两种动作都会清理
    /// 未执行的投递任务、解除分配占用，并把引用该卡的完成记录退回
    /// claiming，让收件人可以重新领卡。
    pub async fn rollback_unit(
        &self,
        unit_id: i64,
        action: RollbackAction,
        reason: Option<String>,
    ) -> Result<InventoryUnit> {
        let mut tx = self.pool.begin().await?;

        let unit = sqlx::query_as::<_, InventoryUnit>(
            r#"
            SELECT id, pool_id, code, card_number, status, claimed_by_recipient_id,
                   claimed_by_condition_id, claimed_at, delivered_at, created_at
            FROM inventory_units
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(FulfillmentError::UnitNotFound(unit_id))?;

        match action {
            RollbackAction::Release => {
                if !unit.is_releasable() {
                    return Err(FulfillmentError::UnitNotReleasable {
                        unit_id,
                        reason: format!("仅 claimed 状态可释放，当前 {:?}", unit.status),
                    });
                }
                // 卡密已经发给收件人就不能放回池子再发给别人
                let (sent,): (bool,) = sqlx::query_as(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM deliveries
                        WHERE unit_id = $1 AND status IN ('sent', 'delivered')
                    )
                    "#,
                )
                .bind(unit_id)
                .fetch_one(&mut *tx)
                .await?;
                if sent {
                    return Err(FulfillmentError::UnitNotReleasable {
                        unit_id,
                        reason: "卡密已发出，不可释放".to_string(),
                    });
                }
            }
            RollbackAction::MarkFailed => {
                if !unit.status.can_transition_to(UnitStatus::Failed) {
                    return Err(FulfillmentError::UnitNotReleasable {
                        unit_id,
                        reason: format!("状态 {:?} 不允许标记失败", unit.status),
                    });
                }
            }
        }

        // 未执行的投递任务一并取消，回滚后的卡密不应再发出
        let canceled_deliveries = sqlx::query(
            "DELETE FROM deliveries WHERE unit_id = $1 AND status IN ('pending', 'failed')",
        )
        .bind(unit_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // 解除分配占用；(recipient, condition) 唯一约束随之释放
        sqlx::query("DELETE FROM assignments WHERE unit_id = $1")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;

        // 引用该卡的完成记录退回 claiming，等待重新认领
        sqlx::query(
            r#"
            UPDATE condition_completions
            SET unit_id = NULL, state = 'claiming', completed_at = NULL, updated_at = NOW()
            WHERE unit_id = $1
            "#,
        )
        .bind(unit_id)
        .execute(&mut *tx)
        .await?;

        let updated = match action {
            RollbackAction::Release => {
                sqlx::query_as::<_, InventoryUnit>(
                    r#"
                    UPDATE inventory_units
                    SET status = 'available', claimed_by_recipient_id = NULL,
                        claimed_by_condition_id = NULL, claimed_at = NULL
                    WHERE id = $1
                    RETURNING id, pool_id, code, card_number, status, claimed_by_recipient_id,
                              claimed_by_condition_id, claimed_at, delivered_at, created_at
                    "#,
                )
                .bind(unit_id)
                .fetch_one(&mut *tx)
                .await?
            }
            RollbackAction::MarkFailed => {
                // 保留领取痕迹，便于事后追查坏卡流向
                sqlx::query_as::<_, InventoryUnit>(
                    r#"
                    UPDATE inventory_units
                    SET status = 'failed'
                    WHERE id = $1
                    RETURNING id, pool_id, code, card_number, status, claimed_by_recipient_id,
                              claimed_by_condition_id, claimed_at, delivered_at, created_at
                    "#,
                )
                .bind(unit_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let available = Self::recompute_counters(&mut tx, unit.pool_id).await?;

        let mut event = AuditEvent::new(
            AuditEventType::UnitRolledBack,
            serde_json::json!({
                "action": action,
                "reason": reason,
                "previousStatus": unit.status,
                "recipientId": unit.claimed_by_recipient_id,
                "canceledDeliveries": canceled_deliveries,
            }),
        )
        .with_unit(unit_id)
        .with_pool(unit.pool_id);
        if let Some(condition_id) = unit.claimed_by_condition_id {
            event = event.with_condition(condition_id);
        }
        AuditRepository::record_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        metrics::set_pool_available(unit.pool_id, available as f64);
        info!(unit_id, ?action, "库存卡片已回滚");
        Ok(updated)
    }

    // ==================== 计数 ====================

    /// 在事务内重算卡池计数，返回最新的可用数量
    ///
    /// 先锁池子行再统计：并发事务的统计语句会在锁释放后以新快照执行，
    /// 保证计数按提交顺序收敛到真实值，不做增量加减。
    /// 返回值供调用方在提交后上报库存水位指标。
    pub(crate) async fn recompute_counters(
        tx: &mut Transaction<'_, Postgres>,
        pool_id: i64,
    ) -> Result<i64> {
        sqlx::query("SELECT id FROM card_pools WHERE id = $1 FOR UPDATE")
            .bind(pool_id)
            .execute(&mut **tx)
            .await?;

        let available: i64 = sqlx::query_scalar(
            r#"
            UPDATE card_pools SET
                total_count = s.total,
                available_count = s.available,
                claimed_count = s.claimed,
                delivered_count = s.delivered,
                failed_count = s.failed,
                updated_at = NOW()
            FROM (
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'available') AS available,
                    COUNT(*) FILTER (WHERE status = 'claimed') AS claimed,
                    COUNT(*) FILTER (WHERE status = 'delivered') AS delivered,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed
                FROM inventory_units
                WHERE pool_id = $1
            ) AS s
            WHERE card_pools.id = $1
            RETURNING card_pools.available_count
            "#,
        )
        .bind(pool_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(available)
    }
}

/// PostgreSQL 唯一约束冲突（23505）映射为领域错误
pub(crate) fn map_unique_violation(
    err: sqlx::Error,
    to_domain: impl FnOnce() -> FulfillmentError,
) -> FulfillmentError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => to_domain(),
        _ => FulfillmentError::Database(err),
    }
}

// ==================== Trait 实现 ====================

#[async_trait]
impl PoolRepositoryTrait for PoolRepository {
    async fn get_pool_by_id(&self, id: i64) -> Result<Option<CardPool>> {
        self.get_pool_by_id(id).await
    }

    async fn get_pool(
        &self,
        brand_code: &str,
        denomination_cents: i64,
        client_id: &str,
    ) -> Result<Option<CardPool>> {
        self.get_pool(brand_code, denomination_cents, client_id).await
    }

    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<CardPool>> {
        self.list_pools(filter).await
    }

    async fn create_pool(&self, request: &NewCardPool) -> Result<CardPool> {
        self.create_pool(request).await
    }

    async fn get_unit(&self, id: i64) -> Result<Option<InventoryUnit>> {
        self.get_unit(id).await
    }

    async fn upload_units(&self, pool_id: i64, units: &[NewInventoryUnit]) -> Result<i64> {
        self.upload_units(pool_id, units).await
    }

    async fn rollback_unit(
        &self,
        unit_id: i64,
        action: RollbackAction,
        reason: Option<String>,
    ) -> Result<InventoryUnit> {
        self.rollback_unit(unit_id, action, reason).await
    }
}
