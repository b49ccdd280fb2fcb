//! 投递 Worker
//!
//! 轮询 deliveries 表中到期的 pending/failed 行，调用对应通道发送卡密，
//! 并推进卡片与完成记录的状态。逐行事务处理：行锁期间完成发送与落库，
//! 仅在提交失败的罕见场景下才可能重发（at-least-once）。
//!
//! 使用 `FOR UPDATE SKIP LOCKED` 保证多实例部署时不会重复处理

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tracing::{error, info, warn};

use reward_shared::config::DeliveryConfig;
use reward_shared::events::{AuditEvent, AuditEventType};
use reward_shared::observability::metrics;

use crate::delivery::{DeliveryTransport, SendOutcome};
use crate::error::Result;
use crate::models::{Delivery, DeliveryMethod, MAX_AUTO_RETRIES};
use crate::repository::{AuditRepository, PoolRepository};

/// 投递 Worker
pub struct DeliveryWorker {
    pool: PgPool,
    transports: Vec<Arc<dyn DeliveryTransport>>,
    poll_interval: Duration,
    batch_size: i64,
    send_timeout: Duration,
    /// 失败行再次到期的退避基数（秒）
    retry_base_secs: i64,
}

impl DeliveryWorker {
    pub fn new(
        pool: PgPool,
        transports: Vec<Arc<dyn DeliveryTransport>>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            pool,
            transports,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            retry_base_secs: config.retry_base_secs as i64,
        }
    }

    /// 使用默认配置创建 DeliveryWorker
    pub fn with_defaults(pool: PgPool, transports: Vec<Arc<dyn DeliveryTransport>>) -> Self {
        Self::new(pool, transports, &DeliveryConfig::default())
    }

    /// 主循环：持续处理投递任务直到收到 shutdown 信号
    ///
    /// 信号到达时当前批次已处理完（逐行事务不会被打断），直接退出
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            transports = self.transports.len(),
            "DeliveryWorker 已启动"
        );

        loop {
            match self.process_due_deliveries().await {
                Ok(0) => {}
                Ok(count) => info!(count, "本轮投递处理完成"),
                Err(e) => error!(error = %e, "投递轮询出错"),
            }

            metrics::set_worker_last_run("delivery_worker");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("DeliveryWorker 收到停机信号，停止轮询");
                    return;
                }
            }
        }
    }

    /// 处理一批到期投递，返回处理数量
    ///
    /// 逐行独立事务：单行失败不影响同批其他行
    pub async fn process_due_deliveries(&self) -> Result<usize> {
        let mut processed = 0;
        for _ in 0..self.batch_size {
            match self.process_next().await? {
                Some(_) => processed += 1,
                None => break,
            }
        }
        Ok(processed)
    }

    /// 认领并处理一条到期投递
    ///
    /// pending 行立即到期；failed 行按 retry_base * 2^retry_count 退避，
    /// 超过自动重试上限的行不再认领。
    async fn process_next(&self) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT id, unit_id, recipient_id, method, address, message, status, retry_count,
                   error_message, provider_message_id, sent_at, created_at, updated_at
            FROM deliveries
            WHERE status = 'pending'
               OR (status = 'failed'
                   AND retry_count <= $1
                   AND updated_at + make_interval(secs => $2::double precision * power(2, retry_count)) <= NOW())
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(MAX_AUTO_RETRIES)
        .bind(self.retry_base_secs as f64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(delivery) = delivery else {
            tx.rollback().await?;
            return Ok(None);
        };

        // 行锁在手，发送期间其他实例会跳过这一行
        let outcome = self.dispatch(&delivery).await;

        let pool_gauge = if outcome.success {
            self.apply_success(&mut tx, &delivery, &outcome).await?
        } else {
            self.apply_failure(&mut tx, &delivery, &outcome).await?;
            None
        };

        tx.commit().await?;

        if let Some((pool_id, available)) = pool_gauge {
            metrics::set_pool_available(pool_id, available as f64);
        }
        metrics::record_delivery_attempt(
            delivery.method.as_str(),
            if outcome.success { "sent" } else { "failed" },
        );

        Ok(Some(delivery.id))
    }

    /// 按投递方式路由到通道并发送（带超时）
    async fn dispatch(&self, delivery: &Delivery) -> SendOutcome {
        let Some(transport) = self.transport_for(delivery.method) else {
            return SendOutcome::failed(
                format!("未配置 {} 投递通道", delivery.method.as_str()),
                0,
            );
        };

        match tokio::time::timeout(self.send_timeout, transport.send(delivery)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SendOutcome::failed(
                format!("通道内部错误: {}", e),
                self.send_timeout.as_millis() as u64,
            ),
            Err(_) => SendOutcome::failed("发送超时", self.send_timeout.as_millis() as u64),
        }
    }

    fn transport_for(&self, method: DeliveryMethod) -> Option<&Arc<dyn DeliveryTransport>> {
        self.transports.iter().find(|t| t.method() == method)
    }

    /// 发送成功：投递置 sent，卡片置 delivered，完成记录置 delivered
    ///
    /// 返回 (pool_id, 可用数) 供提交后上报库存指标
    async fn apply_success(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
        outcome: &SendOutcome,
    ) -> Result<Option<(i64, i64)>> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'sent',
                provider_message_id = $2,
                sent_at = NOW(),
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(&outcome.provider_message_id)
        .execute(&mut **tx)
        .await?;

        // 重发场景下卡片可能已是 delivered，此时不重复推进
        let pool_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory_units
            SET status = 'delivered', delivered_at = NOW()
            WHERE id = $1 AND status = 'claimed'
            RETURNING pool_id
            "#,
        )
        .bind(delivery.unit_id)
        .fetch_optional(&mut **tx)
        .await?;

        let pool_gauge = match pool_id {
            Some(pool_id) => {
                let available = PoolRepository::recompute_counters(tx, pool_id).await?;
                Some((pool_id, available))
            }
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE condition_completions
            SET state = 'delivered', completed_at = NOW(), updated_at = NOW()
            WHERE unit_id = $1
              AND state NOT IN ('delivered', 'delivery_failed', 'completed')
            "#,
        )
        .bind(delivery.unit_id)
        .execute(&mut **tx)
        .await?;

        let mut event = AuditEvent::new(
            AuditEventType::DeliverySent,
            serde_json::json!({
                "method": delivery.method,
                "providerMessageId": outcome.provider_message_id,
                "durationMs": outcome.duration_ms,
            }),
        )
        .with_recipient(&delivery.recipient_id)
        .with_unit(delivery.unit_id);
        if let Some((pool_id, _)) = pool_gauge {
            event = event.with_pool(pool_id);
        }
        AuditRepository::record_in_tx(tx, &event).await?;

        info!(
            delivery_id = delivery.id,
            unit_id = delivery.unit_id,
            method = delivery.method.as_str(),
            "卡密投递成功"
        );
        Ok(pool_gauge)
    }

    /// 发送失败：累加重试计数，耗尽后完成记录置 delivery_failed
    ///
    /// 卡片保持 claimed，不回收不换码，人工介入后可恢复投递
    async fn apply_failure(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
        outcome: &SendOutcome,
    ) -> Result<()> {
        let new_retry_count = delivery.retry_count + 1;

        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = 'failed',
                retry_count = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(new_retry_count)
        .bind(&outcome.error)
        .execute(&mut **tx)
        .await?;

        if new_retry_count > MAX_AUTO_RETRIES {
            sqlx::query(
                r#"
                UPDATE condition_completions
                SET state = 'delivery_failed', completed_at = NOW(), updated_at = NOW()
                WHERE unit_id = $1
                  AND state NOT IN ('delivered', 'delivery_failed', 'completed')
                "#,
            )
            .bind(delivery.unit_id)
            .execute(&mut **tx)
            .await?;

            let event = AuditEvent::new(
                AuditEventType::DeliveryFailed,
                serde_json::json!({
                    "method": delivery.method,
                    "error": outcome.error,
                    "retryCount": new_retry_count,
                }),
            )
            .with_recipient(&delivery.recipient_id)
            .with_unit(delivery.unit_id);
            AuditRepository::record_in_tx(tx, &event).await?;

            warn!(
                delivery_id = delivery.id,
                unit_id = delivery.unit_id,
                retry_count = new_retry_count,
                error = ?outcome.error,
                "投递重试耗尽，等待人工处理"
            );
        } else {
            warn!(
                delivery_id = delivery.id,
                retry_count = new_retry_count,
                error = ?outcome.error,
                "投递失败，退避后自动重试"
            );
        }

        Ok(())
    }
}
