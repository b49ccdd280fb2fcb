//! 履约服务领域模型
//!
//! 包含礼品卡发放系统的所有核心实体定义

pub mod assignment;
pub mod condition;
pub mod delivery;
pub mod enums;
pub mod pool;

// 重新导出常用类型
pub use assignment::{Assignment, ExternalPurchase};
pub use condition::{CampaignCondition, ConditionCompletion, Recipient, RewardConfig};
pub use delivery::{Delivery, MAX_AUTO_RETRIES};
pub use enums::{
    AssignmentSource, CompletionState, DeliveryMethod, DeliveryStatus, PurchaseStatus, UnitStatus,
};
pub use pool::{CardPool, InventoryUnit};
