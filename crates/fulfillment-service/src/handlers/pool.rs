//! 卡池与库存管理 API 处理器
//!
//! 运营端操作：建池、查池、批量上传卡密、回滚卡片。
//! 管理端视图中的卡密一律脱敏（见 [`crate::dto::UnitDto`]）。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use validator::Validate;

use crate::dto::{
    ApiResponse, CreatePoolRequest, PoolDto, PoolListQuery, RollbackUnitRequest, UnitDto,
    UploadUnitsRequest, UploadUnitsResponse,
};
use crate::error::FulfillmentError;
use crate::state::AppState;

/// 创建卡池
///
/// POST /api/v1/pools
///
/// (brand, denomination, client) 组合已存在时返回已有的池，
/// 与品牌+面额条件的自动建池走同一个 upsert
pub async fn create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreatePoolRequest>,
) -> Result<Json<ApiResponse<PoolDto>>, FulfillmentError> {
    req.validate()?;
    let pool = state.inventory.create_pool(&req.into_new_pool()).await?;
    Ok(Json(ApiResponse::success(pool.into())))
}

/// 查询单个卡池
///
/// GET /api/v1/pools/{id}
pub async fn get_pool(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<PoolDto>>, FulfillmentError> {
    let pool = state.inventory.get_pool(id).await?;
    Ok(Json(ApiResponse::success(pool.into())))
}

/// 按品牌/面额/客户过滤卡池列表
///
/// GET /api/v1/pools?brandCode=...&denominationCents=...&clientId=...
pub async fn list_pools(
    State(state): State<AppState>,
    Query(query): Query<PoolListQuery>,
) -> Result<Json<ApiResponse<Vec<PoolDto>>>, FulfillmentError> {
    let pools = state.inventory.list_pools(&query.into_filter()).await?;
    let items = pools.into_iter().map(PoolDto::from).collect();
    Ok(Json(ApiResponse::success(items)))
}

/// 批量上传卡密
///
/// POST /api/v1/pools/{id}/units
///
/// 批内或与已有库存重复的卡密整批拒绝，不做部分入库
pub async fn upload_units(
    State(state): State<AppState>,
    Path(pool_id): Path<i64>,
    Json(req): Json<UploadUnitsRequest>,
) -> Result<Json<ApiResponse<UploadUnitsResponse>>, FulfillmentError> {
    req.validate()?;
    let units = req.into_new_units();
    let loaded_count = state.inventory.upload_units(pool_id, &units).await?;

    info!(pool_id, loaded_count, "卡密批量上传完成");

    Ok(Json(ApiResponse::success(UploadUnitsResponse {
        pool_id,
        loaded_count,
    })))
}

/// 回滚库存卡
///
/// POST /api/v1/units/{id}/rollback
///
/// release 放回可用库存供重新领取；mark_failed 作废卡密
pub async fn rollback_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<i64>,
    Json(req): Json<RollbackUnitRequest>,
) -> Result<Json<ApiResponse<UnitDto>>, FulfillmentError> {
    req.validate()?;
    let unit = state
        .inventory
        .rollback_unit(unit_id, req.action, req.reason)
        .await?;

    info!(unit_id, status = ?unit.status, "库存卡已回滚");

    Ok(Json(ApiResponse::success(unit.into())))
}
