//! 外部采购仓储
//!
//! pending 记录必须在调用供应商 API 之前写入：进程在调用后崩溃时，
//! 残留的 pending 行就是对账回收的线索。成功终态由发卡事务写入。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::PurchaseRepositoryTrait;
use crate::error::Result;
use crate::models::ExternalPurchase;

const PURCHASE_COLUMNS: &str = r#"id, pool_id, provider, brand_code, denomination_cents,
    currency, cost_cents, status, transaction_id, raw_response, error_message,
    unit_id, created_at, updated_at"#;

/// 外部采购仓储
pub struct PurchaseRepository {
    pool: PgPool,
}

impl PurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 写入 pending 采购记录（供应商调用前）
    pub async fn create_pending(
        &self,
        pool_id: i64,
        provider: &str,
        brand_code: &str,
        denomination_cents: i64,
        currency: &str,
    ) -> Result<ExternalPurchase> {
        let sql = format!(
            r#"
            INSERT INTO external_purchases
                (pool_id, provider, brand_code, denomination_cents, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PURCHASE_COLUMNS}
            "#
        );
        let purchase = sqlx::query_as::<_, ExternalPurchase>(&sql)
            .bind(pool_id)
            .bind(provider)
            .bind(brand_code)
            .bind(denomination_cents)
            .bind(currency)
            .fetch_one(&self.pool)
            .await?;

        Ok(purchase)
    }

    /// 标记采购失败（重试耗尽或被供应商拒绝后）
    pub async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE external_purchases
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 获取单条采购记录
    pub async fn get(&self, id: i64) -> Result<Option<ExternalPurchase>> {
        let sql = format!(
            r#"
            SELECT {PURCHASE_COLUMNS}
            FROM external_purchases
            WHERE id = $1
            "#
        );
        let purchase = sqlx::query_as::<_, ExternalPurchase>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(purchase)
    }
}

// ==================== Trait 实现 ====================

#[async_trait]
impl PurchaseRepositoryTrait for PurchaseRepository {
    async fn create_pending(
        &self,
        pool_id: i64,
        provider: &str,
        brand_code: &str,
        denomination_cents: i64,
        currency: &str,
    ) -> Result<ExternalPurchase> {
        self.create_pending(pool_id, provider, brand_code, denomination_cents, currency)
            .await
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        self.mark_failed(id, error_message).await
    }

    async fn get(&self, id: i64) -> Result<Option<ExternalPurchase>> {
        self.get(id).await
    }
}
