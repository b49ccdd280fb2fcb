//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射

use axum::{
    Router,
    routing::{get, post},
};

use crate::{handlers, state::AppState};

/// 构建条件完成路由（坐席端）
pub fn completion_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conditions/complete",
            post(handlers::completion::complete_condition),
        )
        .route("/completions", get(handlers::completion::get_completion))
}

/// 构建卡池与库存管理路由（运营端）
pub fn pool_routes() -> Router<AppState> {
    Router::new()
        .route("/pools", post(handlers::pool::create_pool))
        .route("/pools", get(handlers::pool::list_pools))
        .route("/pools/{id}", get(handlers::pool::get_pool))
        .route("/pools/{id}/units", post(handlers::pool::upload_units))
        .route("/units/{id}/rollback", post(handlers::pool::rollback_unit))
}

/// 构建完整的 API 路由
///
/// 返回所有业务 API 路由（不含前缀，由调用方在 main.rs 中挂载到 /api/v1）
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(completion_routes()).merge(pool_routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construction() {
        let _completion = completion_routes();
        let _pool = pool_routes();
        let _api = api_routes();
    }
}
