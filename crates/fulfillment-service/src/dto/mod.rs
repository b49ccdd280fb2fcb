//! REST API DTO 模块
//!
//! 包含所有请求和响应的数据传输对象

pub mod request;
pub mod response;

pub use request::{
    CompleteConditionRequest, CompletionQuery, CreatePoolRequest, PoolListQuery,
    RollbackUnitRequest, UploadUnitItem, UploadUnitsRequest,
};
pub use response::{ApiResponse, PoolDto, UnitDto, UploadUnitsResponse};
