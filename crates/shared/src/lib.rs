//! 共享库
//!
//! 包含履约服务与 mock 供应商共用的配置、错误处理、数据库连接、
//! 重试策略、请求签名、审计事件和可观测性基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod observability;
pub mod retry;
pub mod signing;
pub mod test_utils;
