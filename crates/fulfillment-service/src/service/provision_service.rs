//! 外部发卡服务
//!
//! 品牌+面额类奖励在本地库存耗尽时回退到外部供应商实时发卡。
//! 调用前先落 pending 采购记录，调用与落库之间崩溃时留有对账线索；
//! 重试携带同一 reference，命中供应商幂等缓存，不会重复扣费。

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use reward_shared::events::{AuditEvent, AuditEventType};
use reward_shared::observability::metrics;
use reward_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{FulfillmentError, Result};
use crate::models::{Assignment, CardPool, ExternalPurchase, InventoryUnit};
use crate::provider::{CardProvider, IssueCardRequest, IssuedCard};
use crate::repository::{AuditRepository, PoolRepository, PurchaseRepository};

use super::claim_service::{ClaimOutcome, ClaimUnitRequest};

/// 外部发卡服务
pub struct ProvisionService {
    pool: PgPool,
    purchase_repo: Arc<PurchaseRepository>,
    provider: Arc<dyn CardProvider>,
    retry_policy: RetryPolicy,
}

impl ProvisionService {
    pub fn new(
        pool: PgPool,
        purchase_repo: Arc<PurchaseRepository>,
        provider: Arc<dyn CardProvider>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            purchase_repo,
            provider,
            retry_policy,
        }
    }

    /// 供应商名称（外部发卡的结果标注用）
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 向供应商实时购卡并绑定给收件人
    ///
    /// 流程：
    /// 1. 落 pending 采购记录，拿到幂等 reference
    /// 2. 带退避重试调用供应商（仅瞬态错误重试）
    /// 3. 成功后单事务写入：卡片（直接 claimed）+ 分配 + 采购完成
    /// 4. 分配唯一约束冲突时把买到的卡转入库存备用，复读胜者结果
    #[instrument(skip(self, card_pool, request), fields(
        pool_id = card_pool.id,
        brand = %card_pool.brand_code,
        recipient_id = %request.recipient_id,
        condition_id = request.condition_id,
    ))]
    pub async fn provision(
        &self,
        card_pool: &CardPool,
        request: &ClaimUnitRequest,
    ) -> Result<ClaimOutcome> {
        let start = Instant::now();

        // 1. 先落意图再调用，崩溃后 pending 行就是对账线索
        let purchase = self
            .purchase_repo
            .create_pending(
                card_pool.id,
                self.provider.name(),
                &card_pool.brand_code,
                card_pool.denomination_cents,
                &card_pool.currency,
            )
            .await?;

        let issue_request = IssueCardRequest {
            brand_code: card_pool.brand_code.clone(),
            denomination_cents: card_pool.denomination_cents,
            currency: card_pool.currency.clone(),
            reference: purchase.reference(),
        };

        // 2. 同一 reference 重试，供应商侧幂等
        let issued = match retry_with_policy(
            &self.retry_policy,
            "provider_issue_card",
            |e: &FulfillmentError| e.is_retryable(),
            || self.provider.issue_card(&issue_request),
        )
        .await
        {
            Ok(card) => card,
            Err(e) => {
                self.purchase_repo
                    .mark_failed(purchase.id, &e.to_string())
                    .await?;
                metrics::record_claim(
                    "external_api",
                    "provider_failed",
                    start.elapsed().as_secs_f64(),
                );
                warn!(purchase_id = purchase.id, error = %e, "外部发卡失败");
                return Err(e);
            }
        };

        // 3. 卡片、分配、采购完成在同一事务内落库
        let mut tx = self.pool.begin().await?;

        let unit = sqlx::query_as::<_, InventoryUnit>(
            r#"
            INSERT INTO inventory_units
                (pool_id, code, card_number, status, claimed_by_recipient_id,
                 claimed_by_condition_id, claimed_at)
            VALUES ($1, $2, $3, 'claimed', $4, $5, NOW())
            RETURNING id, pool_id, code, card_number, status, claimed_by_recipient_id,
                      claimed_by_condition_id, claimed_at, delivered_at, created_at
            "#,
        )
        .bind(card_pool.id)
        .bind(&issued.code)
        .bind(&issued.card_number)
        .bind(&request.recipient_id)
        .bind(request.condition_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // 采购记录保持 pending，由对账处理
            crate::repository::map_unique_violation(e, || {
                FulfillmentError::Internal(format!(
                    "供应商返回重复卡密: reference={}",
                    purchase.reference()
                ))
            })
        })?;

        let available = PoolRepository::recompute_counters(&mut tx, card_pool.id).await?;

        let insert_result = sqlx::query_as::<_, Assignment>(
            r#"
            INSERT INTO assignments (recipient_id, condition_id, unit_id, source, call_session_id, agent_id)
            VALUES ($1, $2, $3, 'external_api', $4, $5)
            RETURNING id, recipient_id, condition_id, unit_id, source, call_session_id, agent_id, created_at
            "#,
        )
        .bind(&request.recipient_id)
        .bind(request.condition_id)
        .bind(unit.id)
        .bind(&request.call_session_id)
        .bind(&request.agent_id)
        .fetch_one(&mut *tx)
        .await;

        let assignment = match insert_result {
            Ok(assignment) => assignment,
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                // 并发竞争落败。卡已买到，不能丢：转入库存备用
                tx.rollback().await?;
                let banked_unit_id = self.bank_purchased_card(card_pool, &purchase, &issued).await?;
                warn!(
                    purchase_id = purchase.id,
                    banked_unit_id, "外部发卡遇到并发领取，卡密已转入库存"
                );
                let outcome = self.find_existing_claim(request).await?.ok_or_else(|| {
                    FulfillmentError::Internal("分配冲突后未找到胜者记录".to_string())
                })?;
                metrics::record_claim("external_api", "replayed", start.elapsed().as_secs_f64());
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        Self::complete_purchase(&mut tx, purchase.id, &issued, unit.id).await?;

        let mut event = AuditEvent::new(
            AuditEventType::GiftCardClaimed,
            serde_json::json!({
                "source": assignment.source,
                "poolId": card_pool.id,
                "provider": self.provider.name(),
                "transactionId": issued.transaction_id,
                "costCents": issued.cost_cents,
            }),
        )
        .with_recipient(&request.recipient_id)
        .with_condition(request.condition_id)
        .with_unit(unit.id)
        .with_pool(card_pool.id);
        if let Some(session) = &request.call_session_id {
            event = event.with_call_session(session);
        }
        AuditRepository::record_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        metrics::set_pool_available(card_pool.id, available as f64);
        metrics::record_claim("external_api", "claimed", start.elapsed().as_secs_f64());
        info!(
            unit_id = unit.id,
            purchase_id = purchase.id,
            transaction_id = %issued.transaction_id,
            cost_cents = issued.cost_cents,
            "外部发卡成功"
        );

        Ok(ClaimOutcome::fresh(unit, assignment))
    }

    /// 把买到的卡作为可用库存入库（分配竞争落败时）
    async fn bank_purchased_card(
        &self,
        card_pool: &CardPool,
        purchase: &ExternalPurchase,
        issued: &IssuedCard,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let unit_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory_units (pool_id, code, card_number, status)
            VALUES ($1, $2, $3, 'available')
            RETURNING id
            "#,
        )
        .bind(card_pool.id)
        .bind(&issued.code)
        .bind(&issued.card_number)
        .fetch_one(&mut *tx)
        .await?;

        let available = PoolRepository::recompute_counters(&mut tx, card_pool.id).await?;

        Self::complete_purchase(&mut tx, purchase.id, issued, unit_id).await?;

        let event = AuditEvent::new(
            AuditEventType::InventoryLoaded,
            serde_json::json!({ "count": 1, "reason": "provision_race" }),
        )
        .with_unit(unit_id)
        .with_pool(card_pool.id);
        AuditRepository::record_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        metrics::set_pool_available(card_pool.id, available as f64);
        Ok(unit_id)
    }

    /// 事务内把采购记录推进到 completed
    async fn complete_purchase(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        purchase_id: i64,
        issued: &IssuedCard,
        unit_id: i64,
    ) -> Result<()> {
        let raw_response = serde_json::to_value(issued)?;
        sqlx::query(
            r#"
            UPDATE external_purchases
            SET status = 'completed',
                transaction_id = $2,
                cost_cents = $3,
                raw_response = $4,
                unit_id = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(purchase_id)
        .bind(&issued.transaction_id)
        .bind(issued.cost_cents)
        .bind(raw_response)
        .bind(unit_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// 查找 (recipient, condition) 的已有分配及其卡片
    async fn find_existing_claim(
        &self,
        request: &ClaimUnitRequest,
    ) -> Result<Option<ClaimOutcome>> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT id, recipient_id, condition_id, unit_id, source, call_session_id, agent_id, created_at
            FROM assignments
            WHERE recipient_id = $1 AND condition_id = $2
            "#,
        )
        .bind(&request.recipient_id)
        .bind(request.condition_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(assignment) = assignment else {
            return Ok(None);
        };

        let unit = sqlx::query_as::<_, InventoryUnit>(
            r#"
            SELECT id, pool_id, code, card_number, status, claimed_by_recipient_id,
                   claimed_by_condition_id, claimed_at, delivered_at, created_at
            FROM inventory_units
            WHERE id = $1
            "#,
        )
        .bind(assignment.unit_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(FulfillmentError::UnitNotFound(assignment.unit_id))?;

        Ok(Some(ClaimOutcome::replayed(unit, assignment)))
    }
}
