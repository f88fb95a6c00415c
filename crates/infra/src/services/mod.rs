//! Ledger services: catalog, checkout and order lifecycle, settlement.

mod catalog;
mod orders;
mod settlement;

pub use catalog::{CatalogService, ListingDraft};
pub use orders::{Checkout, CheckoutRequest, OrderService};
pub use settlement::{Refund, Settlement, SettlementService};
