//! 外部发卡供应商接入
//!
//! 库存耗尽时按需向供应商采购单张礼品卡。请求携带 HMAC 签名，
//! `reference` 字段是跨重试的幂等键，供应商按它去重。

pub mod client;

pub use client::HttpCardProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 发卡请求
///
/// 供应商线缆格式为 snake_case
#[derive(Debug, Clone, Serialize)]
pub struct IssueCardRequest {
    pub brand_code: String,
    pub denomination_cents: i64,
    pub currency: String,
    /// 幂等引用（"purchase-{采购记录 id}"），重试时原样携带
    pub reference: String,
}

/// 发卡结果
///
/// Serialize 用于把原始响应留档到采购记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCard {
    pub transaction_id: String,
    pub code: String,
    #[serde(default)]
    pub card_number: Option<String>,
    pub cost_cents: i64,
    pub currency: String,
    pub status: String,
}

/// 品牌信息
#[derive(Debug, Clone, Deserialize)]
pub struct BrandInfo {
    pub code: String,
    pub name: String,
    pub currency: String,
    pub denominations_cents: Vec<i64>,
}

/// 发卡供应商接口
///
/// 重试不在实现内做：调用方用退避策略包裹 `issue_card`，
/// 实现只负责单次调用与错误分类（瞬态/拒绝/限流/欠费）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CardProvider: Send + Sync {
    /// 供应商标识，写入采购记录
    fn name(&self) -> &str;

    /// 采购单张礼品卡
    async fn issue_card(&self, request: &IssueCardRequest) -> Result<IssuedCard>;

    /// 查询品牌目录项
    async fn get_brand(&self, brand_code: &str) -> Result<BrandInfo>;
}
