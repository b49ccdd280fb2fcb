//! 短信投递通道

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reward_shared::signing::mask_phone;

use super::{DeliveryTransport, SendOutcome, TransportConfig};
use crate::error::Result;
use crate::models::{Delivery, DeliveryMethod};

/// 短信通道
///
/// 当前为模拟实现，参照真实短信网关的行为：固定延迟、
/// 返回消息 ID、超长内容截断。
pub struct SmsTransport {
    config: TransportConfig,
    /// 短信内容最大长度（字符数）
    max_content_length: usize,
}

impl SmsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            max_content_length: 140,
        }
    }

    /// 截断过长的短信内容
    fn truncate_content(&self, content: &str) -> String {
        if content.chars().count() <= self.max_content_length {
            content.to_string()
        } else {
            let truncated: String = content.chars().take(self.max_content_length - 3).collect();
            format!("{}...", truncated)
        }
    }

    /// 模拟调用短信网关
    async fn send_sms(&self, phone: &str, content: &str) -> Result<String> {
        // 模拟网络延迟
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // 测试钩子：特定手机号模拟网关故障
        #[cfg(test)]
        {
            if phone.contains("0000") {
                return Err(crate::error::FulfillmentError::Internal(
                    "短信网关暂时不可用".to_string(),
                ));
            }
        }

        let message_id = format!("sms_{}", Uuid::new_v4().simple());
        debug!(
            message_id = %message_id,
            content_len = content.chars().count(),
            "短信网关调用成功"
        );
        Ok(message_id)
    }
}

#[async_trait]
impl DeliveryTransport for SmsTransport {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Sms
    }

    fn name(&self) -> &str {
        "sms"
    }

    async fn send(&self, delivery: &Delivery) -> Result<SendOutcome> {
        let start = Instant::now();

        if !self.config.enabled {
            return Ok(SendOutcome::failed("短信通道未启用", 0));
        }
        if delivery.address.is_empty() {
            return Ok(SendOutcome::failed("缺少手机号", 0));
        }

        let content = self.truncate_content(&delivery.message);

        match self.send_sms(&delivery.address, &content).await {
            Ok(message_id) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    delivery_id = delivery.id,
                    phone = %mask_phone(&delivery.address),
                    message_id = %message_id,
                    duration_ms,
                    "短信发送成功"
                );
                Ok(SendOutcome::succeeded(message_id, duration_ms))
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(
                    delivery_id = delivery.id,
                    phone = %mask_phone(&delivery.address),
                    error = %e,
                    "短信发送失败"
                );
                Ok(SendOutcome::failed(e.to_string(), duration_ms))
            }
        }
    }
}
