use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use bazaar_catalog::{
    ActivateListing, ChangeTier, CreateListing, DeactivateListing, Listing, ListingCommand,
    ListingKind, ListingStatus, Restock, StartSubscription, Subscription, SubscriptionCommand,
    SubscriptionTier, ensure_within_product_limit, product_limit_for,
};
use bazaar_core::{DomainError, ListingId, Money, SubscriptionId, UserId};
use bazaar_orders::Actor;

use crate::dispatcher::load;
use crate::errors::ServiceResult;
use crate::ledger::Ledger;
use crate::store::subscription_key;

/// Seller input for a new listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDraft {
    pub kind: ListingKind,
    pub title: String,
    pub unit_price: Money,
    /// Defaults to the marketplace currency.
    pub currency: Option<String>,
    /// Stock for products, seats for tickets, slots for services.
    pub available: u32,
}

#[derive(Clone)]
pub struct CatalogService {
    ledger: Arc<Ledger>,
}

impl CatalogService {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Product listings count against the seller's subscription ceiling.
    pub async fn create_listing(
        &self,
        seller_id: UserId,
        draft: ListingDraft,
        now: DateTime<Utc>,
    ) -> ServiceResult<Listing> {
        let stores = &self.ledger.stores;

        if draft.kind == ListingKind::Product {
            let subscription = self.subscription_of(seller_id).await?;
            let limit = product_limit_for(subscription.as_ref(), now);
            let current = stores
                .listings
                .find(&move |l: &Listing| {
                    l.is_owned_by(seller_id)
                        && l.kind() == ListingKind::Product
                        && l.status() != ListingStatus::Inactive
                })
                .await?
                .len();
            ensure_within_product_limit(current, limit)?;
        }

        let listing_id = ListingId::generate();
        let command = ListingCommand::CreateListing(CreateListing {
            listing_id,
            seller_id,
            kind: draft.kind,
            title: draft.title,
            unit_price: draft.unit_price,
            currency: draft
                .currency
                .unwrap_or_else(|| self.ledger.config.currency.clone()),
            available: draft.available,
            occurred_at: now,
        });

        let listing = self
            .ledger
            .dispatcher
            .create(&*stores.listings, Listing::empty(listing_id), &command)
            .await?;

        info!(listing_id = %listing_id, seller_id = %seller_id, kind = ?listing.kind(), "listing created");
        Ok(listing)
    }

    pub async fn get_listing(&self, listing_id: ListingId) -> ServiceResult<Listing> {
        load(&*self.ledger.stores.listings, listing_id.0).await
    }

    pub async fn listings_of(&self, seller_id: UserId) -> ServiceResult<Vec<Listing>> {
        let mut listings = self
            .ledger
            .stores
            .listings
            .find(&move |l: &Listing| l.is_owned_by(seller_id))
            .await?;
        listings.sort_by_key(|l| l.created_at());
        Ok(listings)
    }

    pub async fn restock(
        &self,
        actor: Actor,
        listing_id: ListingId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> ServiceResult<Listing> {
        self.ensure_owner(actor, listing_id).await?;
        let command = ListingCommand::Restock(Restock {
            listing_id,
            quantity,
            occurred_at: now,
        });
        self.dispatch_stock(listing_id, &command).await
    }

    pub async fn deactivate(
        &self,
        actor: Actor,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Listing> {
        self.ensure_owner(actor, listing_id).await?;
        let command = ListingCommand::DeactivateListing(DeactivateListing {
            listing_id,
            occurred_at: now,
        });
        self.dispatch_stock(listing_id, &command).await
    }

    pub async fn activate(
        &self,
        actor: Actor,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Listing> {
        self.ensure_owner(actor, listing_id).await?;
        let command = ListingCommand::ActivateListing(ActivateListing {
            listing_id,
            occurred_at: now,
        });
        self.dispatch_stock(listing_id, &command).await
    }

    /// Start a subscription, or change the tier of the existing one.
    pub async fn subscribe(
        &self,
        user_id: UserId,
        tier: SubscriptionTier,
        period_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Subscription> {
        let ledger = &self.ledger;
        let store = &*ledger.stores.subscriptions;

        let subscription = match self.subscription_of(user_id).await? {
            Some(existing) => {
                let command = SubscriptionCommand::ChangeTier(ChangeTier {
                    subscription_id: existing.id_typed(),
                    tier,
                    period_end,
                    occurred_at: now,
                });
                ledger.dispatcher.dispatch_on(store, existing, &command).await?
            }
            None => {
                let subscription_id = SubscriptionId::generate();
                let command = SubscriptionCommand::StartSubscription(StartSubscription {
                    subscription_id,
                    user_id,
                    tier,
                    period_end,
                    occurred_at: now,
                });
                ledger
                    .dispatcher
                    .create(store, Subscription::empty(subscription_id), &command)
                    .await?
            }
        };

        info!(user_id = %user_id, tier = ?subscription.tier(), "subscription updated");
        Ok(subscription)
    }

    pub async fn subscription_of(&self, user_id: UserId) -> ServiceResult<Option<Subscription>> {
        Ok(self
            .ledger
            .stores
            .subscriptions
            .find_by_unique_key(&subscription_key(user_id))
            .await?)
    }

    async fn ensure_owner(&self, actor: Actor, listing_id: ListingId) -> ServiceResult<()> {
        let listing = self.get_listing(listing_id).await?;
        match actor {
            Actor::System | Actor::Admin(_) => Ok(()),
            Actor::User(user) if listing.is_owned_by(user) => Ok(()),
            Actor::User(_) => Err(DomainError::unauthorized("only the seller may manage this listing").into()),
        }
    }

    async fn dispatch_stock(&self, listing_id: ListingId, command: &ListingCommand) -> ServiceResult<Listing> {
        let listing = self
            .ledger
            .dispatcher
            .dispatch_with_retry(
                &*self.ledger.stores.listings,
                listing_id.0,
                command,
                self.ledger.config.reservation_attempts,
            )
            .await?;
        info!(listing_id = %listing_id, available = listing.available(), status = %listing.status(), "listing updated");
        Ok(listing)
    }
}
