use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;

use super::models::{ActionKind, QuotaDecision};
use super::service::{UsageReport, UsageService};

#[derive(Debug, Deserialize)]
pub struct UsageCheckRequest {
    pub action: ActionKind,
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// key: usage-api -> read-only evaluation endpoint
pub async fn check_usage(
    Extension(usage): Extension<Arc<UsageService>>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<UsageCheckRequest>,
) -> AppResult<Json<QuotaDecision>> {
    let decision = usage
        .check_usage(account_id, payload.action, payload.quantity)
        .await?;
    Ok(Json(decision))
}

pub async fn current_usage(
    Extension(usage): Extension<Arc<UsageService>>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<UsageReport>> {
    let report = usage.current_usage(account_id).await?;
    Ok(Json(report))
}
