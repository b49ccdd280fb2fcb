//! 投递通道实现
//!
//! 定义投递通道 trait 并提供各通道的具体实现。
//!
//! ## 支持的通道
//!
//! - **SMS**: 短信投递卡密
//! - **Email**: 邮件投递卡密

mod email;
mod message;
mod sms;

pub use email::EmailTransport;
pub use message::{format_amount, render_gift_card_message};
pub use sms::SmsTransport;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Delivery, DeliveryMethod};

/// 投递通道 trait
///
/// 所有投递通道都需要实现此 trait，提供统一的发送接口。
/// 通道实现应当是无状态的，便于 worker 并发调用。
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// 通道对应的投递方式
    fn method(&self) -> DeliveryMethod;

    /// 通道名称（用于日志）
    fn name(&self) -> &str;

    /// 发送卡密
    ///
    /// 发送失败应返回 `SendOutcome::failed` 而非 Err，
    /// 由 worker 按重试策略处理；Err 保留给通道内部故障。
    async fn send(&self, delivery: &Delivery) -> Result<SendOutcome>;
}

/// 单次发送结果
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    /// 通道侧消息 ID（成功时）
    pub provider_message_id: Option<String>,
    /// 失败原因（失败时）
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SendOutcome {
    pub fn succeeded(provider_message_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id.into()),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// 通道配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// 是否启用
    pub enabled: bool,
    /// 发送方标识（短信签名或邮件 From 地址）
    pub sender: String,
    /// 单次发送超时（毫秒）
    pub timeout_ms: u64,
}

impl TransportConfig {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            enabled: true,
            sender: sender.into(),
            timeout_ms: 5000,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
