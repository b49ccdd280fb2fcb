//! 服务层
//!
//! 实现履约业务逻辑，协调仓储层、供应商客户端与投递队列。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `claim_service`: 竞争性领卡（库存路径）
//! - `provision_service`: 外部供应商实时发卡（回退路径）
//! - `inventory_service`: 卡池与库存管理
//! - `fulfillment_service`: 条件完成编排

pub mod claim_service;
pub mod dto;
pub mod fulfillment_service;
pub mod inventory_service;
pub mod provision_service;

pub use claim_service::{ClaimOutcome, ClaimService, ClaimUnitRequest};
pub use dto::{CompleteConditionCommand, CompletionOutcome, GiftCardPayload};
pub use fulfillment_service::FulfillmentService;
pub use inventory_service::{InventoryService, MAX_UPLOAD_BATCH};
pub use provision_service::ProvisionService;
