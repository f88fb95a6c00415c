//! Catalog domain: listings (stock and capacity) and seller subscriptions.

pub mod listing;
pub mod subscription;

pub use listing::{
    ActivateListing, CreateListing, DeactivateListing, Listing, ListingCommand, ListingEvent,
    ListingKind, ListingStatus, ReleaseStock, ReserveStock, Restock,
};
pub use subscription::{
    ChangeTier, StartSubscription, Subscription, SubscriptionCommand, SubscriptionEvent,
    SubscriptionTier, ensure_within_product_limit, product_limit_for,
};
