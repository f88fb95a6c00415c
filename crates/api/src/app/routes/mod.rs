use axum::{routing::get, Router};

pub mod admin;
pub mod listings;
pub mod orders;
pub mod payments;
pub mod sellers;
pub mod subscriptions;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/commissions", get(sellers::list_commissions))
        .route("/payouts", get(sellers::list_payouts))
        .nest("/listings", listings::router())
        .nest("/subscriptions", subscriptions::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
        .nest("/sellers", sellers::router())
        .nest("/admin", admin::router())
}
