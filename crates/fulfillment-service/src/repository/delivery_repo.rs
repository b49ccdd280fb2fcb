//! 投递任务仓储
//!
//! deliveries 表同时是持久化投递队列。这里只提供入队和查询；
//! worker 的到期认领与终态落库在 worker 事务内完成。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::traits::DeliveryRepositoryTrait;
use crate::error::Result;
use crate::models::{Delivery, DeliveryMethod};

const DELIVERY_COLUMNS: &str = r#"id, unit_id, recipient_id, method, address, message,
    status, retry_count, error_message, provider_message_id, sent_at, created_at, updated_at"#;

/// 待入队的投递任务
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub unit_id: i64,
    pub recipient_id: String,
    pub method: DeliveryMethod,
    pub address: String,
    pub message: String,
}

/// 投递任务仓储
pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 投递任务入队（pending 状态，等待 worker 认领）
    pub async fn enqueue(&self, delivery: &NewDelivery) -> Result<Delivery> {
        let sql = format!(
            r#"
            INSERT INTO deliveries (unit_id, recipient_id, method, address, message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {DELIVERY_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, Delivery>(&sql)
            .bind(delivery.unit_id)
            .bind(&delivery.recipient_id)
            .bind(delivery.method)
            .bind(&delivery.address)
            .bind(&delivery.message)
            .fetch_one(&self.pool)
            .await?;

        info!(
            delivery_id = created.id,
            unit_id = delivery.unit_id,
            method = delivery.method.as_str(),
            "投递任务已入队"
        );
        Ok(created)
    }

    /// 获取单条投递任务
    pub async fn get(&self, id: i64) -> Result<Option<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE id = $1
            "#
        );
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }

    /// 按卡片查最近一条投递任务
    pub async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE unit_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#
        );
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }

    /// 卡片是否已有投递任务（幂等重放时避免重复入队）
    pub async fn exists_for_unit(&self, unit_id: i64) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM deliveries WHERE unit_id = $1)")
                .bind(unit_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}

// ==================== Trait 实现 ====================

#[async_trait]
impl DeliveryRepositoryTrait for DeliveryRepository {
    async fn enqueue(&self, delivery: &NewDelivery) -> Result<Delivery> {
        self.enqueue(delivery).await
    }

    async fn get(&self, id: i64) -> Result<Option<Delivery>> {
        self.get(id).await
    }

    async fn find_by_unit(&self, unit_id: i64) -> Result<Option<Delivery>> {
        self.find_by_unit(unit_id).await
    }

    async fn exists_for_unit(&self, unit_id: i64) -> Result<bool> {
        self.exists_for_unit(unit_id).await
    }
}
