//! 邮件投递通道

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reward_shared::signing::mask_email;

use super::{DeliveryTransport, SendOutcome, TransportConfig};
use crate::error::Result;
use crate::models::{Delivery, DeliveryMethod};

/// 邮件主题
const SUBJECT: &str = "您的礼品卡已到账";

/// 邮件通道
///
/// 当前为模拟实现。邮件不截断正文，卡密完整送达。
pub struct EmailTransport {
    config: TransportConfig,
}

impl EmailTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// 简单的邮箱格式校验
    fn is_valid_email(address: &str) -> bool {
        match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && domain.contains('.')
            }
            None => false,
        }
    }

    /// 模拟调用邮件网关
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        // 模拟网络延迟，邮件比短信稍慢
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        // 测试钩子：特定邮箱模拟网关故障
        #[cfg(test)]
        {
            if to.starts_with("bounce") {
                return Err(crate::error::FulfillmentError::Internal(
                    "邮件网关暂时不可用".to_string(),
                ));
            }
        }

        let message_id = format!("email_{}", Uuid::new_v4().simple());
        debug!(
            message_id = %message_id,
            from = %self.config.sender,
            subject = %subject,
            body_len = body.len(),
            "邮件网关调用成功"
        );
        Ok(message_id)
    }
}

#[async_trait]
impl DeliveryTransport for EmailTransport {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Email
    }

    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, delivery: &Delivery) -> Result<SendOutcome> {
        let start = Instant::now();

        if !self.config.enabled {
            return Ok(SendOutcome::failed("邮件通道未启用", 0));
        }
        if !Self::is_valid_email(&delivery.address) {
            return Ok(SendOutcome::failed("邮箱地址无效", 0));
        }

        match self
            .send_email(&delivery.address, SUBJECT, &delivery.message)
            .await
        {
            Ok(message_id) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    delivery_id = delivery.id,
                    email = %mask_email(&delivery.address),
                    message_id = %message_id,
                    duration_ms,
                    "邮件发送成功"
                );
                Ok(SendOutcome::succeeded(message_id, duration_ms))
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(
                    delivery_id = delivery.id,
                    email = %mask_email(&delivery.address),
                    error = %e,
                    "邮件发送失败"
                );
                Ok(SendOutcome::failed(e.to_string(), duration_ms))
            }
        }
    }
}
