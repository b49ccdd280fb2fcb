//! 礼品卡履约服务
//!
//! 呼叫中心活动的礼品卡领取与发放：坐席上报活动条件完成后，
//! 服务从卡池领取一张库存卡（或回退到外部供应商实时购卡），
//! 绑定给收件人并通过短信/邮件投递卡密。
//!
//! ## 核心功能
//!
//! - **条件完成**：幂等的领卡入口，同一 (会话, 条件) 重放返回同一张卡
//! - **库存领取**：`FOR UPDATE SKIP LOCKED` 下的无超卖并发领卡
//! - **外部发卡**：库存耗尽时调用供应商 API 实时购卡，先落采购意图再调用
//! - **投递队列**：deliveries 表充当持久化队列，轮询 Worker 重试退避
//! - **库存管理**：建池、批量上传卡密、回滚（释放/作废）
//! - **审计日志**：全链路 append-only 事件留档
//!
//! ## 模块结构
//!
//! - `dto`: REST API 请求和响应的数据传输对象
//! - `models`: 领域实体模型
//! - `error`: 错误类型定义
//! - `repository`: 数据访问层
//! - `service`: 业务编排层
//! - `provider`: 外部发卡供应商客户端
//! - `delivery`: 短信/邮件投递通道
//! - `worker`: 投递后台 Worker
//! - `handlers`: HTTP 请求处理器
//! - `routes`: 路由配置
//! - `state`: 应用状态
//!
//! ## 技术栈
//!
//! - Web 框架：Axum
//! - 数据库：SQLx + PostgreSQL
//! - 数据验证：validator
//! - 序列化：serde (camelCase)

pub mod delivery;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;
pub mod worker;

// 重新导出核心类型
pub use dto::{
    ApiResponse, CompleteConditionRequest, CompletionQuery, CreatePoolRequest, PoolDto,
    PoolListQuery, RollbackUnitRequest, UnitDto, UploadUnitsRequest,
};
pub use error::{FulfillmentError, Result};
pub use models::{
    Assignment, AssignmentSource, CampaignCondition, CardPool, CompletionState,
    ConditionCompletion, Delivery, DeliveryMethod, DeliveryStatus, ExternalPurchase,
    InventoryUnit, RewardConfig, UnitStatus,
};
pub use service::{
    ClaimOutcome, ClaimService, CompleteConditionCommand, CompletionOutcome, FulfillmentService,
    GiftCardPayload, InventoryService, ProvisionService,
};
pub use state::{AppFulfillmentService, AppState};
