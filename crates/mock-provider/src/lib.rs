//! Mock 发卡供应商
//!
//! 模拟外部礼品卡供应商，供开发环境和集成测试使用。
//! 契约与真实供应商一致：HMAC 请求签名、reference 幂等、
//! 402/429/5xx 错误语义；`/admin/*` 端点用于注入失败和注册品牌。

pub mod card_service;

pub use card_service::{
    Brand, CardServiceState, FailureInjection, IssueCardRequest, IssuedCardResponse,
    provider_routes,
};
