use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require_or_forbidden;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/payouts/run", post(run_payouts))
}

/// Run the payout batcher now instead of waiting for the scheduler.
pub async fn run_payouts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "payouts.run")?;

    let report = services
        .batcher
        .run(Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    tracing::info!(
        user_id = %principal.user_id(),
        created = report.created,
        succeeded = report.succeeded,
        failed = report.failed,
        "manual payout run finished"
    );
    Ok(Json(dto::run_report_to_json(&report)).into_response())
}
