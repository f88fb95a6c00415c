use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use bazaar_core::{ListingId, Money};
use bazaar_infra::services::ListingDraft;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require_or_forbidden;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_listing))
        .route("/:id", get(get_listing))
        .route("/:id/restock", post(restock_listing))
        .route("/:id/deactivate", post(deactivate_listing))
        .route("/:id/activate", post(activate_listing))
}

pub async fn create_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateListingRequest>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "listings.manage")?;

    let draft = ListingDraft {
        kind: body.kind,
        title: body.title,
        unit_price: Money(body.unit_price),
        currency: body.currency,
        available: body.available,
    };

    let listing = services
        .catalog
        .create_listing(principal.user_id(), draft, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;

    Ok((StatusCode::CREATED, Json(dto::listing_to_json(&listing))).into_response())
}

pub async fn get_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let listing_id: ListingId = errors::parse_id(&id, "listing")?;
    let listing = services
        .catalog
        .get_listing(listing_id)
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::listing_to_json(&listing)).into_response())
}

pub async fn restock_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RestockRequest>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "listings.manage")?;
    let listing_id: ListingId = errors::parse_id(&id, "listing")?;

    let listing = services
        .catalog
        .restock(principal.actor(), listing_id, body.quantity, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::listing_to_json(&listing)).into_response())
}

pub async fn deactivate_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "listings.manage")?;
    let listing_id: ListingId = errors::parse_id(&id, "listing")?;

    let listing = services
        .catalog
        .deactivate(principal.actor(), listing_id, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::listing_to_json(&listing)).into_response())
}

pub async fn activate_listing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_or_forbidden(&principal, "listings.manage")?;
    let listing_id: ListingId = errors::parse_id(&id, "listing")?;

    let listing = services
        .catalog
        .activate(principal.actor(), listing_id, Utc::now())
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(dto::listing_to_json(&listing)).into_response())
}
