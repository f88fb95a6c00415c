use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require_or_forbidden;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/me", put(subscribe).get(my_subscription))
}

/// Start a subscription or change the caller's tier.
pub async fn subscribe(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SubscribeRequest>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "subscriptions.manage")?;

    let now = Utc::now();
    let subscription = services
        .catalog
        .subscribe(principal.user_id(), body.tier, body.period_end, now)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::subscription_to_json(&subscription, now)).into_response())
}

pub async fn my_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "subscriptions.manage")?;

    match services
        .catalog
        .subscription_of(principal.user_id())
        .await
        .map_err(errors::service_error_to_response)?
    {
        Some(subscription) => Ok(Json(dto::subscription_to_json(&subscription, Utc::now())).into_response()),
        None => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no subscription; the free tier applies",
        )),
    }
}
