//! 投递 Worker 集成测试
//!
//! 覆盖 FOR UPDATE SKIP LOCKED 认领、指数退避、自动重试上限与
//! 终态封存。Worker 轮询认领的是全库到期任务，并行用例会互相
//! 抢走对方的投递行，因此全部阶段串在一个顺序化用例里。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test delivery_worker_test -- --ignored
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use reward_fulfillment::delivery::{
    DeliveryTransport, EmailTransport, SmsTransport, TransportConfig,
};
use reward_fulfillment::provider::HttpCardProvider;
use reward_fulfillment::repository::{NewCardPool, NewInventoryUnit, PoolRepository};
use reward_fulfillment::worker::DeliveryWorker;
use reward_fulfillment::{
    AppState, CompleteConditionCommand, CompletionState, DeliveryStatus, RewardConfig,
};
use reward_shared::config::ProviderConfig;
use reward_shared::retry::RetryPolicy;

// ==================== 辅助函数 ====================

/// 从环境变量读取数据库 URL，未设置则 panic
fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

async fn connect() -> PgPool {
    PgPool::connect(&database_url()).await.unwrap()
}

/// 装配应用状态。奖励直指卡池，供应商不会被调用，
/// 指向一个不可达地址即可。
fn build_state(pool: &PgPool) -> AppState {
    let provider = Arc::new(
        HttpCardProvider::new(ProviderConfig {
            name: "cardmint".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            signing_secret: "unused".to_string(),
            timeout_ms: 500,
            max_retries: 0,
        })
        .expect("构建供应商客户端失败"),
    );
    AppState::build(pool.clone(), provider, RetryPolicy::for_provider(1))
}

/// 只配邮件通道的 worker：处理短信投递时稳定走失败分支
fn email_only_worker(pool: &PgPool) -> DeliveryWorker {
    let transports: Vec<Arc<dyn DeliveryTransport>> = vec![Arc::new(EmailTransport::new(
        TransportConfig::new("rewards@example.com"),
    ))];
    DeliveryWorker::with_defaults(pool.clone(), transports)
}

/// 全通道 worker
fn full_worker(pool: &PgPool) -> DeliveryWorker {
    let transports: Vec<Arc<dyn DeliveryTransport>> = vec![
        Arc::new(SmsTransport::new(TransportConfig::new("REWARDS"))),
        Arc::new(EmailTransport::new(TransportConfig::new(
            "rewards@example.com",
        ))),
    ];
    DeliveryWorker::with_defaults(pool.clone(), transports)
}

async fn seed_condition(pool: &PgPool, campaign_id: i64, client_id: &str, pool_id: i64) -> i64 {
    let reward = serde_json::to_value(RewardConfig::Pool { pool_id }).unwrap();
    sqlx::query_scalar(
        r#"
        INSERT INTO campaign_conditions
            (campaign_id, condition_number, client_id, name, reward_config, active)
        VALUES ($1, 1, $2, 'IntegTest Condition', $3, TRUE)
        ON CONFLICT (campaign_id, condition_number) DO UPDATE
        SET client_id = EXCLUDED.client_id,
            reward_config = EXCLUDED.reward_config,
            active = TRUE
        RETURNING id
        "#,
    )
    .bind(campaign_id)
    .bind(client_id)
    .bind(reward)
    .fetch_one(pool)
    .await
    .expect("插入测试条件失败")
}

async fn seed_recipient(pool: &PgPool, id: &str, phone: &str) {
    sqlx::query(
        r#"
        INSERT INTO recipients (id, phone, email, display_name)
        VALUES ($1, $2, NULL, 'IntegTest Recipient')
        ON CONFLICT (id) DO UPDATE SET phone = EXCLUDED.phone, email = NULL
        "#,
    )
    .bind(id)
    .bind(phone)
    .execute(pool)
    .await
    .expect("插入测试收件人失败");
}

async fn seed_pool_with_units(pool: &PgPool, client_id: &str, unit_count: usize) -> i64 {
    let repo = PoolRepository::new(pool.clone());
    let card_pool = repo
        .create_pool(&NewCardPool {
            brand_code: "STARBUCKS".to_string(),
            denomination_cents: 2500,
            currency: "USD".to_string(),
            client_id: client_id.to_string(),
            name: None,
        })
        .await
        .expect("创建测试卡池失败");

    let units: Vec<NewInventoryUnit> = (0..unit_count)
        .map(|i| NewInventoryUnit {
            code: format!("GC-{}-{:04}", client_id, i),
            card_number: None,
        })
        .collect();
    repo.upload_units(card_pool.id, &units)
        .await
        .expect("入库测试卡片失败");

    card_pool.id
}

async fn cleanup_worker_data(
    pool: &PgPool,
    campaign_id: i64,
    client_id: &str,
    recipient_ids: &[&str],
) {
    for rid in recipient_ids {
        sqlx::query("DELETE FROM deliveries WHERE recipient_id = $1")
            .bind(rid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM condition_completions WHERE recipient_id = $1")
            .bind(rid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM assignments WHERE recipient_id = $1")
            .bind(rid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM audit_events WHERE recipient_id = $1")
            .bind(rid)
            .execute(pool)
            .await
            .ok();
    }

    let pool_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM card_pools WHERE client_id = $1")
        .bind(client_id)
        .fetch_all(pool)
        .await
        .unwrap_or_default();
    for pid in &pool_ids {
        sqlx::query("DELETE FROM external_purchases WHERE pool_id = $1")
            .bind(pid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM audit_events WHERE pool_id = $1")
            .bind(pid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM inventory_units WHERE pool_id = $1")
            .bind(pid)
            .execute(pool)
            .await
            .ok();
        sqlx::query("DELETE FROM card_pools WHERE id = $1")
            .bind(pid)
            .execute(pool)
            .await
            .ok();
    }

    sqlx::query("DELETE FROM campaign_conditions WHERE campaign_id = $1")
        .bind(campaign_id)
        .execute(pool)
        .await
        .ok();
    for rid in recipient_ids {
        sqlx::query("DELETE FROM recipients WHERE id = $1")
            .bind(rid)
            .execute(pool)
            .await
            .ok();
    }
}

/// 把指定卡片的投递行回拨到 10 分钟前，模拟退避窗口已过
async fn rewind_delivery(pool: &PgPool, unit_id: i64) {
    sqlx::query("UPDATE deliveries SET updated_at = NOW() - INTERVAL '10 minutes' WHERE unit_id = $1")
        .bind(unit_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn fetch_delivery(
    pool: &PgPool,
    unit_id: i64,
) -> (String, i32, Option<String>, Option<String>, Option<DateTime<Utc>>) {
    sqlx::query_as(
        "SELECT status, retry_count, error_message, provider_message_id, sent_at FROM deliveries WHERE unit_id = $1",
    )
    .bind(unit_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn fetch_unit_status(pool: &PgPool, unit_id: i64) -> String {
    sqlx::query_scalar("SELECT status FROM inventory_units WHERE id = $1")
        .bind(unit_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn fetch_completion(pool: &PgPool, session: &str) -> (String, Option<DateTime<Utc>>) {
    sqlx::query_as(
        "SELECT state, completed_at FROM condition_completions WHERE call_session_id = $1 AND condition_number = 1",
    )
    .bind(session)
    .fetch_one(pool)
    .await
    .unwrap()
}

// ==================== 测试用例 ====================

/// 投递生命周期全链路：
///
/// 阶段一（收件人 A）：失败重试后成功
///   入队 -> 缺通道失败(retry=1) -> 退避期内不认领 -> 退避过后重发成功
///   -> 卡片 delivered、完成记录 delivered、终态重放走快路径
///
/// 阶段二（收件人 B）：重试耗尽
///   入队 -> 失败(retry=1) -> 退避过后再失败(retry=2 超上限)
///   -> 完成记录 delivery_failed、卡片保持 claimed、此后任何 worker 不再认领
#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_delivery_lifecycle_retry_and_exhaustion() {
    let pool = connect().await;
    let campaign_id = 971_101;
    let client_id = "integ_worker_001";
    let recipient_a = "worker_rcpt_a";
    let recipient_b = "worker_rcpt_b";

    cleanup_worker_data(&pool, campaign_id, client_id, &[recipient_a, recipient_b]).await;
    let pool_id = seed_pool_with_units(&pool, client_id, 2).await;
    seed_condition(&pool, campaign_id, client_id, pool_id).await;
    seed_recipient(&pool, recipient_a, "+15557200001").await;
    seed_recipient(&pool, recipient_b, "+15557200002").await;

    let state = build_state(&pool);
    let broken_worker = email_only_worker(&pool);
    let healthy_worker = full_worker(&pool);

    // ---------- 阶段一：失败一次后重试成功 ----------

    let command_a = CompleteConditionCommand::new("sess-worker-001", campaign_id, recipient_a, 1);
    let outcome_a = state.fulfillment.complete_condition(&command_a).await.unwrap();
    assert_eq!(outcome_a.state, CompletionState::Delivering);
    let card_a = outcome_a.gift_card.unwrap();

    // 缺少短信通道：第一次投递失败，进入退避
    let processed = broken_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 1);

    let (status, retry_count, error_message, _, sent_at) = fetch_delivery(&pool, card_a.unit_id).await;
    assert_eq!(status, "failed");
    assert_eq!(retry_count, 1);
    assert!(error_message.unwrap().contains("未配置"), "应记录缺通道原因");
    assert!(sent_at.is_none());

    let (comp_state, _) = fetch_completion(&pool, "sess-worker-001").await;
    assert_eq!(comp_state, "delivering", "重试未耗尽前完成记录不动");

    // 退避窗口内不认领
    let processed = healthy_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 0, "退避期内的失败行不应被认领");

    // 退避过后重新认领，这次有短信通道，发送成功
    rewind_delivery(&pool, card_a.unit_id).await;
    let processed = healthy_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 1);

    let (status, retry_count, error_message, message_id, sent_at) =
        fetch_delivery(&pool, card_a.unit_id).await;
    assert_eq!(status, "sent");
    assert_eq!(retry_count, 1, "成功不清零历史重试计数");
    assert!(error_message.is_none(), "成功后清除错误信息");
    assert!(message_id.unwrap().starts_with("sms_"));
    assert!(sent_at.is_some());

    assert_eq!(fetch_unit_status(&pool, card_a.unit_id).await, "delivered");
    let (comp_state, completed_at) = fetch_completion(&pool, "sess-worker-001").await;
    assert_eq!(comp_state, "delivered");
    assert!(completed_at.is_some());

    let (sent_events,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM audit_events WHERE event_type = 'delivery_sent' AND unit_id = $1",
    )
    .bind(card_a.unit_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(sent_events, 1);

    // 终态重放走快路径：同一张卡原样返回
    let replay = state.fulfillment.complete_condition(&command_a).await.unwrap();
    assert!(replay.already_assigned);
    assert_eq!(replay.state, CompletionState::Delivered);
    assert_eq!(replay.delivery_status, Some(DeliveryStatus::Sent));
    assert_eq!(replay.gift_card.unwrap().code, card_a.code);

    // ---------- 阶段二：重试耗尽进入终态 ----------

    let command_b = CompleteConditionCommand::new("sess-worker-002", campaign_id, recipient_b, 1);
    let outcome_b = state.fulfillment.complete_condition(&command_b).await.unwrap();
    let card_b = outcome_b.gift_card.unwrap();

    let processed = broken_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 1);
    let (status, retry_count, _, _, _) = fetch_delivery(&pool, card_b.unit_id).await;
    assert_eq!(status, "failed");
    assert_eq!(retry_count, 1);

    // 第二次失败超过自动重试上限
    rewind_delivery(&pool, card_b.unit_id).await;
    let processed = broken_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 1);

    let (status, retry_count, error_message, _, _) = fetch_delivery(&pool, card_b.unit_id).await;
    assert_eq!(status, "failed");
    assert_eq!(retry_count, 2);
    assert!(error_message.is_some());

    let (comp_state, completed_at) = fetch_completion(&pool, "sess-worker-002").await;
    assert_eq!(comp_state, "delivery_failed");
    assert!(completed_at.is_some());
    assert_eq!(
        fetch_unit_status(&pool, card_b.unit_id).await,
        "claimed",
        "投递失败不回收卡片，等待人工补投"
    );

    let failure_data: serde_json::Value = sqlx::query_scalar(
        "SELECT data FROM audit_events WHERE event_type = 'delivery_failed' AND unit_id = $1",
    )
    .bind(card_b.unit_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(failure_data["retryCount"], 2);

    // 耗尽的失败行与已发送的行都不再被任何 worker 认领
    rewind_delivery(&pool, card_a.unit_id).await;
    rewind_delivery(&pool, card_b.unit_id).await;
    let processed = healthy_worker.process_due_deliveries().await.unwrap();
    assert_eq!(processed, 0, "终态投递行不应再被认领");

    let (status, retry_count, _, _, _) = fetch_delivery(&pool, card_b.unit_id).await;
    assert_eq!(status, "failed");
    assert_eq!(retry_count, 2, "耗尽后的行保持原样");
    let (status, _, _, _, _) = fetch_delivery(&pool, card_a.unit_id).await;
    assert_eq!(status, "sent", "已发送的行保持原样");

    // 池子计数终局：1 张 delivered（A）+ 1 张 claimed（B）
    let card_pool = PoolRepository::new(pool.clone())
        .get_pool_by_id(pool_id)
        .await
        .unwrap()
        .unwrap();
    assert!(card_pool.counts_consistent());
    assert_eq!(card_pool.total_count, 2);
    assert_eq!(card_pool.available_count, 0);
    assert_eq!(card_pool.claimed_count, 1);
    assert_eq!(card_pool.delivered_count, 1);

    cleanup_worker_data(&pool, campaign_id, client_id, &[recipient_a, recipient_b]).await;
}
