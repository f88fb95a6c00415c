use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require_or_forbidden;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/me/stats", get(my_stats))
}

/// The caller's commissions, newest first.
pub async fn list_commissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "commissions.read")?;

    let commissions = services
        .settlement
        .commissions_for_seller(principal.user_id())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(serde_json::json!({
        "items": commissions.iter().map(dto::commission_to_json).collect::<Vec<_>>(),
    }))
    .into_response())
}

pub async fn list_payouts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "payouts.read")?;

    let payouts = services
        .batcher
        .payouts_for_seller(principal.user_id())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(serde_json::json!({
        "items": payouts.iter().map(dto::payout_to_json).collect::<Vec<_>>(),
    }))
    .into_response())
}

/// Eventually consistent: fed by the event bus worker.
pub async fn my_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "stats.read")?;

    let stats = services.seller_stats.get(principal.user_id());
    Ok(Json(dto::seller_stats_to_json(&stats)).into_response())
}
