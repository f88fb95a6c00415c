use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use bazaar_core::{ListingId, Money, OrderId};
use bazaar_infra::services::CheckoutRequest;
use bazaar_orders::{OrderStatus, RequestedLine};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::{require, require_or_forbidden};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order).delete(delete_order))
        .route("/:id/status", post(change_status))
        .route("/:id/cancel", post(cancel_order))
}

/// Customers cancel their purchases; sellers cancel what they would fulfil.
fn require_cancel(principal: &PrincipalContext) -> Result<(), Response> {
    require(principal, "orders.cancel")
        .or_else(|_| require(principal, "orders.fulfil"))
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}

/// Checkout: reserves stock, opens one payment and one order per seller.
///
/// With `charge_reference` the payment is settled before answering.
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "orders.create")?;

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        let listing_id: ListingId = errors::parse_id(&line.listing_id, "listing")?;
        lines.push(RequestedLine {
            listing_id,
            quantity: line.quantity,
        });
    }

    let request = CheckoutRequest {
        customer_id: principal.user_id(),
        lines,
        payment_method: body.payment_method,
        delivery_fee: Money(body.delivery_fee),
        shipping_address: body.shipping_address,
        transaction_id: body.transaction_id,
        charge_reference: body.charge_reference,
    };

    let checkout = services
        .orders
        .create_order(request, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;

    Ok((StatusCode::CREATED, Json(dto::checkout_to_json(&checkout))).into_response())
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::OrdersQuery>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "orders.read")?;

    let orders = match query.view.as_deref() {
        None | Some("customer") => services.orders.orders_for_customer(principal.user_id()).await,
        Some("seller") => services.orders.orders_for_seller(principal.user_id()).await,
        Some(other) => {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_view",
                format!("view must be customer or seller, got '{other}'"),
            ));
        }
    }
    .map_err(errors::service_error_to_response)?;

    Ok(Json(serde_json::json!({
        "items": orders.iter().map(dto::order_to_json).collect::<Vec<_>>(),
    }))
    .into_response())
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "orders.read")?;
    let order_id: OrderId = errors::parse_id(&id, "order")?;

    let order = services
        .orders
        .get_order(order_id, principal.actor())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::order_to_json(&order)).into_response())
}

pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeStatusRequest>,
) -> Result<Response, Response> {
    let status = body.target().map_err(errors::domain_error_to_response)?;
    if status == OrderStatus::Cancelled {
        require_cancel(&principal)?;
    } else {
        require_or_forbidden(&principal, "orders.fulfil")?;
    }
    let order_id: OrderId = errors::parse_id(&id, "order")?;

    let order = services
        .orders
        .transition(order_id, status, principal.actor(), Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::order_to_json(&order)).into_response())
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_cancel(&principal)?;
    let order_id: OrderId = errors::parse_id(&id, "order")?;

    let order = services
        .orders
        .cancel_order(order_id, principal.actor(), Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::order_to_json(&order)).into_response())
}

/// Soft delete; only delivered orders qualify.
pub async fn delete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "orders.delete")?;
    let order_id: OrderId = errors::parse_id(&id, "order")?;

    services
        .orders
        .delete_order(order_id, principal.actor(), Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
