use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
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
    Router::new()
        .route("/:transaction_id/confirm", post(confirm_payment))
        .route("/:transaction_id/refund", post(refund_payment))
}

/// Verify the charge with the provider and settle the payment's orders.
pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(transaction_id): Path<String>,
    Json(body): Json<dto::ConfirmPaymentRequest>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "payments.confirm")?;

    let payment = services
        .settlement
        .payment_by_transaction(&transaction_id)
        .await
        .map_err(errors::service_error_to_response)?;
    if !principal.principal().is_admin() && payment.user_id() != Some(principal.user_id()) {
        return Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "unauthorized",
            "payment belongs to another user",
        ));
    }

    let settlement = services
        .settlement
        .confirm_payment(&transaction_id, &body.provider_reference, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::settlement_to_json(&settlement)).into_response())
}

pub async fn refund_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(transaction_id): Path<String>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "payments.refund")?;

    let refund = services
        .settlement
        .refund_payment(&transaction_id, principal.actor(), Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::refund_to_json(&refund)).into_response())
}
