//! 分配台账仓储
//!
//! 台账写入只发生在认领事务内（服务层 SQL），这里提供读路径。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::AssignmentRepositoryTrait;
use crate::error::Result;
use crate::models::Assignment;

/// 分配台账仓储
pub struct AssignmentRepository {
    pool: PgPool,
}

impl AssignmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按卡片查分配记录
    pub async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Assignment>> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT id, recipient_id, condition_id, unit_id, source,
                   call_session_id, agent_id, created_at
            FROM assignments
            WHERE unit_id = $1
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }

    /// 按 (收件人, 条件) 查分配记录
    pub async fn find_by_recipient_condition(
        &self,
        recipient_id: &str,
        condition_id: i64,
    ) -> Result<Option<Assignment>> {
        let assignment = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT id, recipient_id, condition_id, unit_id, source,
                   call_session_id, agent_id, created_at
            FROM assignments
            WHERE recipient_id = $1 AND condition_id = $2
            "#,
        )
        .bind(recipient_id)
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(assignment)
    }
}

// ==================== Trait 实现 ====================

#[async_trait]
impl AssignmentRepositoryTrait for AssignmentRepository {
    async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Assignment>> {
        self.find_by_unit(unit_id).await
    }

    async fn find_by_recipient_condition(
        &self,
        recipient_id: &str,
        condition_id: i64,
    ) -> Result<Option<Assignment>> {
        self.find_by_recipient_condition(recipient_id, condition_id).await
    }
}
