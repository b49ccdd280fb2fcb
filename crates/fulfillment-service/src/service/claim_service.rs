//! 竞争性领卡服务
//!
//! 多个坐席可能同时为不同收件人领取同一池的卡片，库存可能不足。
//! 本服务保证：
//! 1. 一张卡绝不会分给两个收件人（行锁 + unit_id 唯一约束）
//! 2. 同一 (收件人, 条件) 绝不会拿到两张卡（唯一约束 + 冲突恢复）
//! 3. 先到先得，无卡时明确报错并回滚
//!
//! 领取路径竞争激烈，事务由本服务直接控制而不经过仓储层。

use std::time::Instant;

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use reward_shared::events::{AuditEvent, AuditEventType};
use reward_shared::observability::metrics;

use crate::error::{FulfillmentError, Result};
use crate::models::{Assignment, AssignmentSource, InventoryUnit};
use crate::repository::{AuditRepository, PoolRepository};

/// 领卡请求
#[derive(Debug, Clone)]
pub struct ClaimUnitRequest {
    pub pool_id: i64,
    pub recipient_id: String,
    pub condition_id: i64,
    /// 触发领取的会话（审计串联用）
    pub call_session_id: Option<String>,
    /// 经办坐席
    pub agent_id: Option<String>,
}

impl ClaimUnitRequest {
    pub fn new(pool_id: i64, recipient_id: impl Into<String>, condition_id: i64) -> Self {
        Self {
            pool_id,
            recipient_id: recipient_id.into(),
            condition_id,
            call_session_id: None,
            agent_id: None,
        }
    }

    pub fn with_call_session(mut self, call_session_id: impl Into<String>) -> Self {
        self.call_session_id = Some(call_session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// 领卡结果
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub unit: InventoryUnit,
    pub assignment: Assignment,
    pub source: AssignmentSource,
    /// 命中已有分配（重放或并发竞争落败后复读胜者结果）
    pub already_assigned: bool,
}

impl ClaimOutcome {
    pub(crate) fn fresh(unit: InventoryUnit, assignment: Assignment) -> Self {
        let source = assignment.source;
        Self {
            unit,
            assignment,
            source,
            already_assigned: false,
        }
    }

    pub(crate) fn replayed(unit: InventoryUnit, assignment: Assignment) -> Self {
        let source = assignment.source;
        Self {
            unit,
            assignment,
            source,
            already_assigned: true,
        }
    }
}

/// 竞争性领卡服务
pub struct ClaimService {
    pool: PgPool,
}

impl ClaimService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 从卡池领取一张卡
    ///
    /// 事务步骤：
    /// 1. 幂等检查：(recipient, condition) 已有分配则直接返回原结果
    /// 2. `FOR UPDATE SKIP LOCKED` 锁定一张可用卡，无卡则回滚报错
    /// 3. 卡片置为 claimed 并重算池子计数
    /// 4. 写入分配记录，唯一约束冲突则认输并复读胜者结果
    #[instrument(skip(self, request), fields(
        pool_id = request.pool_id,
        recipient_id = %request.recipient_id,
        condition_id = request.condition_id,
    ))]
    pub async fn claim(&self, request: &ClaimUnitRequest) -> Result<ClaimOutcome> {
        let start = Instant::now();

        // 1. 幂等快路径：无锁读，竞态漏网由第 4 步的唯一约束兜底
        if let Some(outcome) = self.find_existing_claim(request).await? {
            info!(
                unit_id = outcome.unit.id,
                "领卡请求命中已有分配，幂等返回"
            );
            metrics::record_claim("inventory", "replayed", start.elapsed().as_secs_f64());
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        // 2. 锁定一张可用卡。SKIP LOCKED 让并发请求各拿各的卡
        //    而不是在同一行上排队。
        let candidate = sqlx::query_as::<_, InventoryUnit>(
            r#"
            SELECT id, pool_id, code, card_number, status, claimed_by_recipient_id,
                   claimed_by_condition_id, claimed_at, delivered_at, created_at
            FROM inventory_units
            WHERE pool_id = $1 AND status = 'available'
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(request.pool_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.rollback().await?;
            warn!("卡池无可用库存");
            metrics::record_claim("inventory", "no_stock", start.elapsed().as_secs_f64());
            return Err(FulfillmentError::NoCardsAvailable {
                pool_id: request.pool_id,
            });
        };

        // 3. 领取卡片并重算计数
        let unit = sqlx::query_as::<_, InventoryUnit>(
            r#"
            UPDATE inventory_units
            SET status = 'claimed',
                claimed_by_recipient_id = $2,
                claimed_by_condition_id = $3,
                claimed_at = NOW()
            WHERE id = $1
            RETURNING id, pool_id, code, card_number, status, claimed_by_recipient_id,
                      claimed_by_condition_id, claimed_at, delivered_at, created_at
            "#,
        )
        .bind(candidate.id)
        .bind(&request.recipient_id)
        .bind(request.condition_id)
        .fetch_one(&mut *tx)
        .await?;

        let available = PoolRepository::recompute_counters(&mut tx, request.pool_id).await?;

        // 4. 落库分配记录。(recipient_id, condition_id) 唯一约束是
        //    exactly-once 的根基：并发重复领取在这里决出唯一胜者。
        let insert_result = sqlx::query_as::<_, Assignment>(
            r#"
            INSERT INTO assignments (recipient_id, condition_id, unit_id, source, call_session_id, agent_id)
            VALUES ($1, $2, $3, 'inventory', $4, $5)
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
                // 并发竞争落败：另一请求已为该 (recipient, condition) 建立分配。
                // 放弃本次锁定的卡（回滚后自动回到 available），复读胜者结果。
                tx.rollback().await?;
                let outcome = self.find_existing_claim(request).await?.ok_or_else(|| {
                    FulfillmentError::Internal("分配冲突后未找到胜者记录".to_string())
                })?;
                info!(
                    unit_id = outcome.unit.id,
                    "并发领卡冲突，返回已有分配"
                );
                metrics::record_claim("inventory", "replayed", start.elapsed().as_secs_f64());
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        let mut event = AuditEvent::new(
            AuditEventType::GiftCardClaimed,
            serde_json::json!({
                "source": AssignmentSource::Inventory,
                "poolId": request.pool_id,
            }),
        )
        .with_recipient(&request.recipient_id)
        .with_condition(request.condition_id)
        .with_unit(unit.id)
        .with_pool(request.pool_id);
        if let Some(session) = &request.call_session_id {
            event = event.with_call_session(session);
        }
        AuditRepository::record_in_tx(&mut tx, &event).await?;

        tx.commit().await?;

        metrics::set_pool_available(request.pool_id, available as f64);
        metrics::record_claim("inventory", "claimed", start.elapsed().as_secs_f64());
        info!(
            unit_id = unit.id,
            available_left = available,
            "库存领卡成功"
        );

        Ok(ClaimOutcome::fresh(unit, assignment))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitStatus;
    use chrono::Utc;

    fn create_test_unit() -> InventoryUnit {
        InventoryUnit {
            id: 7,
            pool_id: 1,
            code: "GC-TEST-007".to_string(),
            card_number: None,
            status: UnitStatus::Claimed,
            claimed_by_recipient_id: Some("rcpt-001".to_string()),
            claimed_by_condition_id: Some(42),
            claimed_at: Some(Utc::now()),
            delivered_at: None,
            created_at: Utc::now(),
        }
    }

    fn create_test_assignment(source: AssignmentSource) -> Assignment {
        Assignment {
            id: 1,
            recipient_id: "rcpt-001".to_string(),
            condition_id: 42,
            unit_id: 7,
            source,
            call_session_id: Some("sess-abc".to_string()),
            agent_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_claim_request_builder() {
        let request = ClaimUnitRequest::new(1, "rcpt-001", 42)
            .with_call_session("sess-abc")
            .with_agent("agent-9");

        assert_eq!(request.pool_id, 1);
        assert_eq!(request.recipient_id, "rcpt-001");
        assert_eq!(request.condition_id, 42);
        assert_eq!(request.call_session_id.as_deref(), Some("sess-abc"));
        assert_eq!(request.agent_id.as_deref(), Some("agent-9"));
    }

    #[test]
    fn test_claim_request_minimal() {
        let request = ClaimUnitRequest::new(1, "rcpt-001", 42);
        assert!(request.call_session_id.is_none());
        assert!(request.agent_id.is_none());
    }

    #[test]
    fn test_claim_outcome_fresh() {
        let outcome = ClaimOutcome::fresh(
            create_test_unit(),
            create_test_assignment(AssignmentSource::Inventory),
        );
        assert!(!outcome.already_assigned);
        assert_eq!(outcome.source, AssignmentSource::Inventory);
        assert_eq!(outcome.unit.id, 7);
    }

    #[test]
    fn test_claim_outcome_replayed_keeps_source() {
        let outcome = ClaimOutcome::replayed(
            create_test_unit(),
            create_test_assignment(AssignmentSource::ExternalApi),
        );
        assert!(outcome.already_assigned);
        assert_eq!(outcome.source, AssignmentSource::ExternalApi);
    }
}
