//! 条件完成 API 处理器
//!
//! 领卡入口与完成记录查询。POST 接口可安全重放：同一
//! (callSessionId, conditionNumber, recipientId) 的重复请求
//! 返回 `alreadyAssigned=true` 和同一张卡。

use axum::{
    Json,
    extract::{Query, State},
};
use validator::Validate;

use crate::dto::{ApiResponse, CompleteConditionRequest, CompletionQuery};
use crate::error::FulfillmentError;
use crate::service::CompletionOutcome;
use crate::state::AppState;

/// 上报条件完成并领取礼品卡
///
/// POST /api/v1/conditions/complete
pub async fn complete_condition(
    State(state): State<AppState>,
    Json(req): Json<CompleteConditionRequest>,
) -> Result<Json<ApiResponse<CompletionOutcome>>, FulfillmentError> {
    req.validate()?;
    let command = req.into_command();
    let outcome = state.fulfillment.complete_condition(&command).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// 查询完成记录
///
/// GET /api/v1/completions?callSessionId=...&conditionNumber=...
pub async fn get_completion(
    State(state): State<AppState>,
    Query(query): Query<CompletionQuery>,
) -> Result<Json<ApiResponse<CompletionOutcome>>, FulfillmentError> {
    let outcome = state
        .fulfillment
        .get_completion(&query.call_session_id, query.condition_number)
        .await?
        .ok_or_else(|| {
            FulfillmentError::NotFound(format!(
                "完成记录: session={}, condition={}",
                query.call_session_id, query.condition_number
            ))
        })?;
    Ok(Json(ApiResponse::success(outcome)))
}
