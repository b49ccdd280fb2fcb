//! 审计事件仓储
//!
//! 审计流只追加。带事务的状态变更必须用 [`AuditRepository::record_in_tx`]
//! 在同一事务内落事件，保证事件流与表状态一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use reward_shared::events::{AuditEvent, AuditEventType};

use super::traits::AuditRepositoryTrait;
use crate::error::{FulfillmentError, Result};

/// 审计事件行（event_type 以字符串存储）
#[derive(Debug, sqlx::FromRow)]
struct AuditEventRow {
    event_id: Uuid,
    event_type: String,
    call_session_id: Option<String>,
    recipient_id: Option<String>,
    condition_id: Option<i64>,
    unit_id: Option<i64>,
    pool_id: Option<i64>,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditEventRow> for AuditEvent {
    type Error = FulfillmentError;

    fn try_from(row: AuditEventRow) -> Result<Self> {
        let event_type: AuditEventType = row
            .event_type
            .parse()
            .map_err(FulfillmentError::Internal)?;

        Ok(AuditEvent {
            event_id: row.event_id,
            event_type,
            call_session_id: row.call_session_id,
            recipient_id: row.recipient_id,
            condition_id: row.condition_id,
            unit_id: row.unit_id,
            pool_id: row.pool_id,
            data: row.data,
            created_at: row.created_at,
        })
    }
}

/// 审计事件仓储
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 记录单条事件（无外层事务的场景）
    pub async fn record(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(INSERT_EVENT_SQL)
            .bind(event.event_id)
            .bind(event.event_type.as_str())
            .bind(&event.call_session_id)
            .bind(&event.recipient_id)
            .bind(event.condition_id)
            .bind(event.unit_id)
            .bind(event.pool_id)
            .bind(&event.data)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 在调用方事务内记录事件
    ///
    /// 事件与其描述的状态变更同生共死：事务回滚则事件一并消失
    pub async fn record_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: &AuditEvent,
    ) -> Result<()> {
        sqlx::query(INSERT_EVENT_SQL)
            .bind(event.event_id)
            .bind(event.event_type.as_str())
            .bind(&event.call_session_id)
            .bind(&event.recipient_id)
            .bind(event.condition_id)
            .bind(event.unit_id)
            .bind(event.pool_id)
            .bind(&event.data)
            .bind(event.created_at)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// 按调用会话回放事件时间线
    pub async fn list_by_call_session(&self, call_session_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT event_id, event_type, call_session_id, recipient_id,
                   condition_id, unit_id, pool_id, data, created_at
            FROM audit_events
            WHERE call_session_id = $1
            ORDER BY event_id ASC
            "#,
        )
        .bind(call_session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }
}

const INSERT_EVENT_SQL: &str = r#"
    INSERT INTO audit_events
        (event_id, event_type, call_session_id, recipient_id,
         condition_id, unit_id, pool_id, data, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

// ==================== Trait 实现 ====================

#[async_trait]
impl AuditRepositoryTrait for AuditRepository {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.record(event).await
    }

    async fn list_by_call_session(&self, call_session_id: &str) -> Result<Vec<AuditEvent>> {
        self.list_by_call_session(call_session_id).await
    }
}
