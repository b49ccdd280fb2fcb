//! 履约编排服务
//!
//! 坐席标记"条件完成"后的完整流水线：定位条件 → 幂等检查 →
//! 领卡（库存优先，可回退外部发卡）→ 入队投递。
//! 领取是正确性边界：投递失败不回退领取，同一 (会话, 条件序号)
//! 重复请求永远返回同一结果。

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use reward_shared::events::{AuditEvent, AuditEventType};
use reward_shared::observability::metrics;

use crate::delivery::render_gift_card_message;
use crate::error::{FulfillmentError, Result};
use crate::models::{
    CardPool, CompletionState, ConditionCompletion, Delivery, DeliveryMethod, DeliveryStatus,
    InventoryUnit, RewardConfig,
};
use crate::repository::{
    AssignmentRepositoryTrait, AuditRepositoryTrait, ConditionRepositoryTrait,
    DeliveryRepositoryTrait, NewCardPool, NewDelivery, PoolRepositoryTrait, RecipientDirectory,
};

use super::claim_service::{ClaimOutcome, ClaimService, ClaimUnitRequest};
use super::dto::{CompleteConditionCommand, CompletionOutcome, GiftCardPayload};
use super::provision_service::ProvisionService;

/// 履约编排服务
///
/// 只做编排与非竞争读写；竞争性事务在 [`ClaimService`] 与
/// [`ProvisionService`] 内部完成。
pub struct FulfillmentService<CR, PR, AR, DR, AUR, RD>
where
    CR: ConditionRepositoryTrait,
    PR: PoolRepositoryTrait,
    AR: AssignmentRepositoryTrait,
    DR: DeliveryRepositoryTrait,
    AUR: AuditRepositoryTrait,
    RD: RecipientDirectory,
{
    condition_repo: Arc<CR>,
    pool_repo: Arc<PR>,
    assignment_repo: Arc<AR>,
    delivery_repo: Arc<DR>,
    audit_repo: Arc<AUR>,
    recipients: Arc<RD>,
    claim_service: Arc<ClaimService>,
    provision_service: Arc<ProvisionService>,
}

impl<CR, PR, AR, DR, AUR, RD> FulfillmentService<CR, PR, AR, DR, AUR, RD>
where
    CR: ConditionRepositoryTrait,
    PR: PoolRepositoryTrait,
    AR: AssignmentRepositoryTrait,
    DR: DeliveryRepositoryTrait,
    AUR: AuditRepositoryTrait,
    RD: RecipientDirectory,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        condition_repo: Arc<CR>,
        pool_repo: Arc<PR>,
        assignment_repo: Arc<AR>,
        delivery_repo: Arc<DR>,
        audit_repo: Arc<AUR>,
        recipients: Arc<RD>,
        claim_service: Arc<ClaimService>,
        provision_service: Arc<ProvisionService>,
    ) -> Self {
        Self {
            condition_repo,
            pool_repo,
            assignment_repo,
            delivery_repo,
            audit_repo,
            recipients,
            claim_service,
            provision_service,
        }
    }

    /// 处理条件完成
    ///
    /// 步骤：
    /// 1. 定位活跃条件，校验会话归属
    /// 2. 幂等检查：同 (会话, 条件序号) 的终态记录原样返回
    /// 3. 无奖励条件短路为 completed
    /// 4. 解析目标卡池（直指池 / 品牌+面额自动建池）
    /// 5. 领卡，库存耗尽且允许时回退外部发卡
    /// 6. 挂接卡片、入队投递、推进状态机
    #[instrument(skip(self, command), fields(
        call_session_id = %command.call_session_id,
        campaign_id = command.campaign_id,
        recipient_id = %command.recipient_id,
        condition_number = command.condition_number,
    ))]
    pub async fn complete_condition(
        &self,
        command: &CompleteConditionCommand,
    ) -> Result<CompletionOutcome> {
        let start = Instant::now();
        Self::validate_command(command)?;

        // 1. 定位活跃条件
        let condition = self
            .condition_repo
            .find_active_condition(command.campaign_id, command.condition_number)
            .await?
            .ok_or(FulfillmentError::ConditionNotFound {
                campaign_id: command.campaign_id,
                condition_number: command.condition_number,
            })?;

        // 2. 幂等与归属检查
        let existing = self
            .condition_repo
            .find_completion(&command.call_session_id, command.condition_number)
            .await?;

        if let Some(completion) = &existing {
            if completion.recipient_id != command.recipient_id {
                metrics::record_fulfillment_request("conflict", start.elapsed().as_secs_f64());
                return Err(FulfillmentError::ConditionAlreadyCompleted {
                    call_session_id: command.call_session_id.clone(),
                    condition_number: command.condition_number,
                });
            }
            if completion.state.is_terminal() {
                info!(
                    completion_id = completion.id,
                    state = ?completion.state,
                    "命中终态完成记录，幂等返回"
                );
                let outcome = self.outcome_from_completion(completion, true).await?;
                metrics::record_fulfillment_request("replayed", start.elapsed().as_secs_f64());
                return Ok(outcome);
            }
            // 非终态且收件人一致：续跑中断的流程
        }

        // 3. 解析奖励配置
        let reward = condition.parse_reward_config().map_err(|e| {
            FulfillmentError::Internal(format!("条件 {} 的奖励配置无效: {}", condition.id, e))
        })?;

        let Some(reward) = reward else {
            return self
                .complete_without_reward(command, condition.id, existing.is_some(), start)
                .await;
        };

        // 4. 进入领取流程；首次处理时记录条件完成事件
        let completion = self
            .condition_repo
            .upsert_claiming(
                &command.call_session_id,
                condition.id,
                command.condition_number,
                &command.recipient_id,
            )
            .await?;

        if existing.is_none() {
            let event = AuditEvent::new(
                AuditEventType::ConditionCompleted,
                Self::completion_audit_payload(command, true),
            )
            .with_call_session(&command.call_session_id)
            .with_recipient(&command.recipient_id)
            .with_condition(condition.id);
            self.audit_repo.record(&event).await?;
        }

        // 5. 解析目标卡池
        let fallback_allowed = reward.supports_fallback();
        let pool = match &reward {
            RewardConfig::Pool { pool_id } => self
                .pool_repo
                .get_pool_by_id(*pool_id)
                .await?
                .ok_or(FulfillmentError::PoolNotFound(*pool_id))?,
            RewardConfig::BrandDenomination {
                brand_code,
                denomination_cents,
                currency,
            } => {
                // 品牌+面额定位的池不存在时自动建池
                self.pool_repo
                    .create_pool(&NewCardPool {
                        brand_code: brand_code.clone(),
                        denomination_cents: *denomination_cents,
                        currency: currency.clone(),
                        client_id: condition.client_id.clone(),
                        name: None,
                    })
                    .await?
            }
        };

        // 6. 领卡
        let mut claim_request =
            ClaimUnitRequest::new(pool.id, &command.recipient_id, condition.id)
                .with_call_session(&command.call_session_id);
        if let Some(agent) = &command.agent_id {
            claim_request = claim_request.with_agent(agent);
        }

        let claim = match self.claim_service.claim(&claim_request).await {
            Ok(outcome) => outcome,
            Err(FulfillmentError::NoCardsAvailable { .. }) if fallback_allowed => {
                info!(pool_id = pool.id, "库存耗尽，回退外部发卡");
                match self.provision_service.provision(&pool, &claim_request).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // 完成记录停在 claiming，重试同一请求可继续
                        metrics::record_fulfillment_request(
                            "provider_failed",
                            start.elapsed().as_secs_f64(),
                        );
                        return Err(e);
                    }
                }
            }
            Err(e @ FulfillmentError::NoCardsAvailable { .. }) => {
                metrics::record_fulfillment_request("no_stock", start.elapsed().as_secs_f64());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // 7. 挂接卡片并安排投递
        self.condition_repo
            .set_claimed(completion.id, claim.unit.id)
            .await?;

        // 重放返回的卡可能来自别的池（条件配置变更过），载荷按实际池展示
        let payload_pool = if claim.unit.pool_id == pool.id {
            pool
        } else {
            self.pool_repo
                .get_pool_by_id(claim.unit.pool_id)
                .await?
                .ok_or(FulfillmentError::PoolNotFound(claim.unit.pool_id))?
        };

        let (state, delivery_status) = self
            .arrange_delivery(command, condition.id, &completion, &claim, &payload_pool)
            .await?;

        let outcome = CompletionOutcome {
            call_session_id: command.call_session_id.clone(),
            condition_number: command.condition_number,
            recipient_id: command.recipient_id.clone(),
            state,
            already_assigned: claim.already_assigned,
            gift_card: Some(self.build_payload(&claim.unit, &payload_pool, &claim)),
            delivery_status,
        };

        metrics::record_fulfillment_request("fulfilled", start.elapsed().as_secs_f64());
        info!(
            unit_id = claim.unit.id,
            state = ?state,
            already_assigned = claim.already_assigned,
            "条件完成处理结束"
        );
        Ok(outcome)
    }

    /// 查询完成记录（GET 接口）
    pub async fn get_completion(
        &self,
        call_session_id: &str,
        condition_number: i32,
    ) -> Result<Option<CompletionOutcome>> {
        let Some(completion) = self
            .condition_repo
            .find_completion(call_session_id, condition_number)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.outcome_from_completion(&completion, false).await?))
    }

    // ==================== 内部步骤 ====================

    /// 无奖励条件：记完成即返回
    async fn complete_without_reward(
        &self,
        command: &CompleteConditionCommand,
        condition_id: i64,
        seen_before: bool,
        start: Instant,
    ) -> Result<CompletionOutcome> {
        let inserted = self
            .condition_repo
            .insert_completed_guard(
                &command.call_session_id,
                condition_id,
                command.condition_number,
                &command.recipient_id,
            )
            .await?;

        if inserted {
            let event = AuditEvent::new(
                AuditEventType::ConditionCompleted,
                Self::completion_audit_payload(command, false),
            )
            .with_call_session(&command.call_session_id)
            .with_recipient(&command.recipient_id)
            .with_condition(condition_id);
            self.audit_repo.record(&event).await?;
        }

        metrics::record_fulfillment_request("no_reward", start.elapsed().as_secs_f64());
        Ok(CompletionOutcome {
            call_session_id: command.call_session_id.clone(),
            condition_number: command.condition_number,
            recipient_id: command.recipient_id.clone(),
            state: CompletionState::Completed,
            already_assigned: !inserted && seen_before,
            gift_card: None,
            delivery_status: None,
        })
    }

    /// 入队投递或记录无法投递
    ///
    /// 返回 (完成状态, 投递状态)。卡已领取，这里的任何结果都不回退领取。
    async fn arrange_delivery(
        &self,
        command: &CompleteConditionCommand,
        condition_id: i64,
        completion: &ConditionCompletion,
        claim: &ClaimOutcome,
        pool: &CardPool,
    ) -> Result<(CompletionState, Option<DeliveryStatus>)> {
        // 重放：该卡已有投递记录，按现状返回
        if let Some(delivery) = self.delivery_repo.find_by_unit(claim.unit.id).await? {
            return Ok((Self::state_for_delivery(&delivery), Some(delivery.status)));
        }

        match self.lookup_contact(&command.recipient_id).await? {
            Some((method, address)) => {
                let message = render_gift_card_message(
                    pool.display_name(),
                    &claim.unit.code,
                    pool.denomination_cents,
                    &pool.currency,
                );
                let delivery = self
                    .delivery_repo
                    .enqueue(&NewDelivery {
                        unit_id: claim.unit.id,
                        recipient_id: command.recipient_id.clone(),
                        method,
                        address,
                        message,
                    })
                    .await?;
                self.condition_repo
                    .advance_state(completion.id, CompletionState::Delivering)
                    .await?;
                Ok((CompletionState::Delivering, Some(delivery.status)))
            }
            None => {
                // 无可用联系方式：领取有效，投递直接记失败
                warn!("收件人无可用联系方式，卡已领取但无法投递");
                self.condition_repo
                    .advance_state(completion.id, CompletionState::DeliveryFailed)
                    .await?;
                let event = AuditEvent::new(
                    AuditEventType::DeliveryFailed,
                    serde_json::json!({ "reason": "no_usable_contact" }),
                )
                .with_call_session(&command.call_session_id)
                .with_recipient(&command.recipient_id)
                .with_condition(condition_id)
                .with_unit(claim.unit.id)
                .with_pool(claim.unit.pool_id);
                self.audit_repo.record(&event).await?;
                Ok((CompletionState::DeliveryFailed, None))
            }
        }
    }

    /// 从完成记录重建输出（GET 与幂等重放共用）
    async fn outcome_from_completion(
        &self,
        completion: &ConditionCompletion,
        already_assigned: bool,
    ) -> Result<CompletionOutcome> {
        let mut gift_card = None;
        let mut delivery_status = None;

        if let Some(unit_id) = completion.unit_id {
            let unit = self
                .pool_repo
                .get_unit(unit_id)
                .await?
                .ok_or(FulfillmentError::UnitNotFound(unit_id))?;
            let pool = self
                .pool_repo
                .get_pool_by_id(unit.pool_id)
                .await?
                .ok_or(FulfillmentError::PoolNotFound(unit.pool_id))?;
            let source = self
                .assignment_repo
                .find_by_unit(unit_id)
                .await?
                .map(|a| a.source)
                .unwrap_or_default();
            delivery_status = self
                .delivery_repo
                .find_by_unit(unit_id)
                .await?
                .map(|d| d.status);

            let provider = match source {
                crate::models::AssignmentSource::ExternalApi => {
                    Some(self.provision_service.provider_name().to_string())
                }
                crate::models::AssignmentSource::Inventory => None,
            };
            gift_card = Some(GiftCardPayload {
                unit_id: unit.id,
                code: unit.code.clone(),
                card_number: unit.card_number.clone(),
                brand_code: pool.brand_code.clone(),
                value_cents: pool.denomination_cents,
                currency: pool.currency.clone(),
                source,
                provider,
            });
        }

        Ok(CompletionOutcome {
            call_session_id: completion.call_session_id.clone(),
            condition_number: completion.condition_number,
            recipient_id: completion.recipient_id.clone(),
            state: completion.state,
            already_assigned,
            gift_card,
            delivery_status,
        })
    }

    fn build_payload(
        &self,
        unit: &InventoryUnit,
        pool: &CardPool,
        claim: &ClaimOutcome,
    ) -> GiftCardPayload {
        let provider = match claim.source {
            crate::models::AssignmentSource::ExternalApi => {
                Some(self.provision_service.provider_name().to_string())
            }
            crate::models::AssignmentSource::Inventory => None,
        };
        GiftCardPayload {
            unit_id: unit.id,
            code: unit.code.clone(),
            card_number: unit.card_number.clone(),
            brand_code: pool.brand_code.clone(),
            value_cents: pool.denomination_cents,
            currency: pool.currency.clone(),
            source: claim.source,
            provider,
        }
    }

    /// 查收件人的首选联系方式（手机优先，其次邮箱）
    async fn lookup_contact(
        &self,
        recipient_id: &str,
    ) -> Result<Option<(DeliveryMethod, String)>> {
        let Some(recipient) = self.recipients.find(recipient_id).await? else {
            return Ok(None);
        };
        Ok(recipient
            .preferred_contact()
            .map(|(method, address)| (method, address.to_string())))
    }

    /// 投递记录对应的完成状态
    fn state_for_delivery(delivery: &Delivery) -> CompletionState {
        match delivery.status {
            DeliveryStatus::Pending => CompletionState::Delivering,
            DeliveryStatus::Sent | DeliveryStatus::Delivered => CompletionState::Delivered,
            DeliveryStatus::Failed => {
                if delivery.is_claimable_by_worker() {
                    CompletionState::Delivering
                } else {
                    CompletionState::DeliveryFailed
                }
            }
        }
    }

    fn validate_command(command: &CompleteConditionCommand) -> Result<()> {
        if command.call_session_id.trim().is_empty() {
            return Err(FulfillmentError::Validation(
                "会话标识不能为空".to_string(),
            ));
        }
        if command.recipient_id.trim().is_empty() {
            return Err(FulfillmentError::Validation(
                "收件人标识不能为空".to_string(),
            ));
        }
        if command.campaign_id <= 0 {
            return Err(FulfillmentError::Validation(
                "活动标识必须为正数".to_string(),
            ));
        }
        if command.condition_number <= 0 {
            return Err(FulfillmentError::Validation(
                "条件序号必须为正数".to_string(),
            ));
        }
        Ok(())
    }

    /// 条件完成审计事件的载荷，坐席备注有值时一并留档
    fn completion_audit_payload(
        command: &CompleteConditionCommand,
        has_reward: bool,
    ) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "campaignId": command.campaign_id,
            "conditionNumber": command.condition_number,
            "hasReward": has_reward,
        });
        if let Some(agent_id) = &command.agent_id {
            payload["agentId"] = serde_json::Value::String(agent_id.clone());
        }
        if let Some(notes) = &command.notes {
            payload["notes"] = serde_json::Value::String(notes.clone());
        }
        payload
    }
}
