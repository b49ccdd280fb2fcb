//! 活动条件与完成记录仓储
//!
//! campaign_conditions 对本服务只读；condition_completions 是
//! (call_session, condition_number) 维度的状态机持久化与防重挡板。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ConditionRepositoryTrait;
use crate::error::{FulfillmentError, Result};
use crate::models::{CampaignCondition, CompletionState, ConditionCompletion};

const COMPLETION_COLUMNS: &str = r#"id, call_session_id, condition_id, condition_number,
    recipient_id, state, unit_id, completed_at, created_at, updated_at"#;

/// 活动条件与完成记录仓储
pub struct ConditionRepository {
    pool: PgPool,
}

impl ConditionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 条件配置 ====================

    /// 查找启用中的条件定义
    pub async fn find_active_condition(
        &self,
        campaign_id: i64,
        condition_number: i32,
    ) -> Result<Option<CampaignCondition>> {
        let condition = sqlx::query_as::<_, CampaignCondition>(
            r#"
            SELECT id, campaign_id, condition_number, client_id, name,
                   reward_config, active, created_at, updated_at
            FROM campaign_conditions
            WHERE campaign_id = $1 AND condition_number = $2 AND active = TRUE
            "#,
        )
        .bind(campaign_id)
        .bind(condition_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(condition)
    }

    // ==================== 完成记录 ====================

    /// 查找完成记录
    pub async fn find_completion(
        &self,
        call_session_id: &str,
        condition_number: i32,
    ) -> Result<Option<ConditionCompletion>> {
        let completion = sqlx::query_as::<_, ConditionCompletion>(&format!(
            r#"
            SELECT {COMPLETION_COLUMNS}
            FROM condition_completions
            WHERE call_session_id = $1 AND condition_number = $2
            "#
        ))
        .bind(call_session_id)
        .bind(condition_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(completion)
    }

    /// 创建或刷新 claiming 状态的完成记录
    ///
    /// 只有 not_started / claiming 的行会被刷新；已经推进到更后阶段
    /// 的行保持原状返回，防止重试请求把状态机拉回去。
    pub async fn upsert_claiming(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<ConditionCompletion> {
        let updated = sqlx::query_as::<_, ConditionCompletion>(&format!(
            r#"
            INSERT INTO condition_completions
                (call_session_id, condition_id, condition_number, recipient_id, state)
            VALUES ($1, $2, $3, $4, 'claiming')
            ON CONFLICT (call_session_id, condition_number) DO UPDATE
            SET state = 'claiming', updated_at = NOW()
            WHERE condition_completions.state IN ('not_started', 'claiming')
            RETURNING {COMPLETION_COLUMNS}
            "#
        ))
        .bind(call_session_id)
        .bind(condition_id)
        .bind(condition_number)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(completion) => Ok(completion),
            None => self
                .find_completion(call_session_id, condition_number)
                .await?
                .ok_or_else(|| {
                    FulfillmentError::Internal(format!(
                        "完成记录 upsert 后消失: session={}, condition={}",
                        call_session_id, condition_number
                    ))
                }),
        }
    }

    /// 无奖励条件的完成守卫插入
    ///
    /// 直接以 completed 终态落行。返回 true 表示本次插入生效，
    /// false 表示该 (session, condition) 已有记录（重复请求）。
    pub async fn insert_completed_guard(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO condition_completions
                (call_session_id, condition_id, condition_number, recipient_id,
                 state, completed_at)
            VALUES ($1, $2, $3, $4, 'completed', NOW())
            ON CONFLICT (call_session_id, condition_number) DO NOTHING
            "#,
        )
        .bind(call_session_id)
        .bind(condition_id)
        .bind(condition_number)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    /// 认领成功后挂接卡片并推进到 claimed
    ///
    /// 状态守卫：只在尚未越过 claimed 的行上生效。重放请求到达时
    /// Worker 可能已把行推到 delivering/delivered，不能拉回去。
    pub async fn set_claimed(&self, completion_id: i64, unit_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE condition_completions
            SET unit_id = $2, state = 'claimed', updated_at = NOW()
            WHERE id = $1 AND state IN ('not_started', 'claiming', 'claimed')
            "#,
        )
        .bind(completion_id)
        .bind(unit_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 推进状态机；进入终态时同步记录完成时间
    ///
    /// 终态行不再改动，并发重放只会空转而不会回退状态。
    pub async fn advance_state(&self, completion_id: i64, state: CompletionState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE condition_completions
            SET state = $2,
                completed_at = CASE
                    WHEN $2 IN ('delivered', 'delivery_failed', 'completed') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1
              AND state NOT IN ('delivered', 'delivery_failed', 'completed')
            "#,
        )
        .bind(completion_id)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ==================== Trait 实现 ====================

#[async_trait]
impl ConditionRepositoryTrait for ConditionRepository {
    async fn find_active_condition(
        &self,
        campaign_id: i64,
        condition_number: i32,
    ) -> Result<Option<CampaignCondition>> {
        self.find_active_condition(campaign_id, condition_number).await
    }

    async fn find_completion(
        &self,
        call_session_id: &str,
        condition_number: i32,
    ) -> Result<Option<ConditionCompletion>> {
        self.find_completion(call_session_id, condition_number).await
    }

    async fn upsert_claiming(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<ConditionCompletion> {
        self.upsert_claiming(call_session_id, condition_id, condition_number, recipient_id)
            .await
    }

    async fn insert_completed_guard(
        &self,
        call_session_id: &str,
        condition_id: i64,
        condition_number: i32,
        recipient_id: &str,
    ) -> Result<bool> {
        self.insert_completed_guard(call_session_id, condition_id, condition_number, recipient_id)
            .await
    }

    async fn set_claimed(&self, completion_id: i64, unit_id: i64) -> Result<()> {
        self.set_claimed(completion_id, unit_id).await
    }

    async fn advance_state(&self, completion_id: i64, state: CompletionState) -> Result<()> {
        self.advance_state(completion_id, state).await
    }
}
