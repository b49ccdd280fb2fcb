//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 竞争性事务（认领、发卡、投递终态）由服务层与 worker 自行控制，
//!   仓储提供非竞争路径与管理端操作
//! - 定义 trait 接口以支持 mock 测试

mod assignment_repo;
mod audit_repo;
mod condition_repo;
mod delivery_repo;
mod pool_repo;
mod purchase_repo;
mod recipient_repo;
mod traits;

pub use assignment_repo::AssignmentRepository;
pub use audit_repo::AuditRepository;
pub use condition_repo::ConditionRepository;
pub use delivery_repo::{DeliveryRepository, NewDelivery};
pub use pool_repo::{
    NewCardPool, NewInventoryUnit, PoolFilter, PoolRepository, RollbackAction,
};
pub use purchase_repo::PurchaseRepository;
pub use recipient_repo::PgRecipientDirectory;
pub use traits::*;

pub(crate) use pool_repo::map_unique_violation;
