//! 后台 Worker
//!
//! deliveries 表充当持久化队列，投递 Worker 轮询到期行并调用
//! 投递通道发送卡密。多实例部署安全（FOR UPDATE SKIP LOCKED）。

pub mod delivery_worker;

pub use delivery_worker::DeliveryWorker;
