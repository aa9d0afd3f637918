//! `POST /rewards/redeem`: redeem a one-time reward token.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::{card_id, parse_body, TokenExpiry};
use crate::api::error::{ApiError, RequestProblem};
use crate::api::types::{ApiContext, DeviceContext, RequestMeta};
use crate::tokens::RedemptionContext;

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub jti: String,
    pub reward_id: String,
    pub expires_at: TokenExpiry,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub card_id: String,
    pub reward_id: String,
    pub seq: i64,
}

pub async fn redeem(
    State(ctx): State<ApiContext>,
    Extension(meta): Extension<RequestMeta>,
    Extension(device): Extension<DeviceContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RedeemResponse>, RequestProblem> {
    redeem_inner(&ctx, &meta, &device, &headers, &body).map_err(|e| e.at(&meta))
}

fn redeem_inner(
    ctx: &ApiContext,
    meta: &RequestMeta,
    device: &DeviceContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<RedeemResponse>, ApiError> {
    let request: RedeemRequest = parse_body(body)?;
    if request.reward_id.trim().is_empty() {
        return Err(ApiError::BadRequest("reward_id is required".into()));
    }
    let card_id = card_id(headers);
    let expires_at = request.expires_at.to_datetime()?;

    let redemption = ctx.tokens.redeem(
        &device.tenant_id,
        &request.jti,
        expires_at,
        RedemptionContext {
            device_id: Some(&device.device_id),
            card_id: Some(&card_id),
            correlation_id: Some(&meta.correlation_id),
        },
    )?;
    tracing::info!(
        tenant_id = %device.tenant_id,
        card_id = %card_id,
        reward_id = %request.reward_id,
        "Reward redeemed"
    );

    Ok(Json(RedeemResponse {
        card_id,
        reward_id: request.reward_id,
        seq: redemption.seq,
    }))
}
