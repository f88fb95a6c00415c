use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{Aggregate, AggregateRoot, DomainError, ListingId, Money, UserId};
use bazaar_events::Event;

/// What a listing sells. The kind decides what `available` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Physical product; `available` is stock on hand.
    Product,
    /// Event ticket; `available` is remaining capacity.
    Ticket,
    /// Bookable service; `available` is remaining slots.
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    OutOfStock,
    Inactive,
}

impl core::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ListingStatus::Active => "active",
            ListingStatus::OutOfStock => "out_of_stock",
            ListingStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Aggregate root: Listing.
///
/// Invariant: `available == 0` while not `inactive` implies `out_of_stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    id: ListingId,
    seller_id: Option<UserId>,
    kind: ListingKind,
    title: String,
    unit_price: Money,
    currency: String,
    available: u32,
    status: ListingStatus,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ListingId) -> Self {
        Self {
            id,
            seller_id: None,
            kind: ListingKind::Product,
            title: String::new(),
            unit_price: Money::ZERO,
            currency: String::new(),
            available: 0,
            status: ListingStatus::Inactive,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> ListingId {
        self.id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn kind(&self) -> ListingKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.seller_id == Some(user)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn settle_status(&mut self) {
        if self.status == ListingStatus::Inactive {
            return;
        }
        self.status = if self.available == 0 {
            ListingStatus::OutOfStock
        } else {
            ListingStatus::Active
        };
    }
}

impl AggregateRoot for Listing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListing {
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub kind: ListingKind,
    pub title: String,
    pub unit_price: Money,
    pub currency: String,
    pub available: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (checkout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub listing_id: ListingId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (cancellation or checkout compensation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub listing_id: ListingId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restock {
    pub listing_id: ListingId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateListing {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateListing {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingCommand {
    CreateListing(CreateListing),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    Restock(Restock),
    DeactivateListing(DeactivateListing),
    ActivateListing(ActivateListing),
}

impl ListingCommand {
    pub fn listing_id(&self) -> ListingId {
        match self {
            ListingCommand::CreateListing(c) => c.listing_id,
            ListingCommand::ReserveStock(c) => c.listing_id,
            ListingCommand::ReleaseStock(c) => c.listing_id,
            ListingCommand::Restock(c) => c.listing_id,
            ListingCommand::DeactivateListing(c) => c.listing_id,
            ListingCommand::ActivateListing(c) => c.listing_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCreated {
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub kind: ListingKind,
    pub title: String,
    pub unit_price: Money,
    pub currency: String,
    pub available: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Availability moved by `quantity` units; `remaining` is the count afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChanged {
    pub listing_id: ListingId,
    pub quantity: u32,
    pub remaining: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingStatusChanged {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingEvent {
    ListingCreated(ListingCreated),
    StockReserved(AvailabilityChanged),
    StockReleased(AvailabilityChanged),
    Restocked(AvailabilityChanged),
    ListingDeactivated(ListingStatusChanged),
    ListingActivated(ListingStatusChanged),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::ListingCreated(_) => "catalog.listing.created",
            ListingEvent::StockReserved(_) => "catalog.listing.stock_reserved",
            ListingEvent::StockReleased(_) => "catalog.listing.stock_released",
            ListingEvent::Restocked(_) => "catalog.listing.restocked",
            ListingEvent::ListingDeactivated(_) => "catalog.listing.deactivated",
            ListingEvent::ListingActivated(_) => "catalog.listing.activated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::ListingCreated(e) => e.occurred_at,
            ListingEvent::StockReserved(e)
            | ListingEvent::StockReleased(e)
            | ListingEvent::Restocked(e) => e.occurred_at,
            ListingEvent::ListingDeactivated(e) | ListingEvent::ListingActivated(e) => {
                e.occurred_at
            }
        }
    }
}

impl Aggregate for Listing {
    type Command = ListingCommand;
    type Event = ListingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ListingEvent::ListingCreated(e) => {
                self.id = e.listing_id;
                self.seller_id = Some(e.seller_id);
                self.kind = e.kind;
                self.title = e.title.clone();
                self.unit_price = e.unit_price;
                self.currency = e.currency.clone();
                self.available = e.available;
                self.status = ListingStatus::Active;
                self.created = true;
                self.created_at = Some(e.occurred_at);
                self.settle_status();
            }
            ListingEvent::StockReserved(e)
            | ListingEvent::StockReleased(e)
            | ListingEvent::Restocked(e) => {
                self.available = e.remaining;
                self.settle_status();
            }
            ListingEvent::ListingDeactivated(_) => {
                self.status = ListingStatus::Inactive;
            }
            ListingEvent::ListingActivated(_) => {
                self.status = ListingStatus::Active;
                self.settle_status();
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ListingCommand::CreateListing(cmd) => self.handle_create(cmd),
            ListingCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ListingCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            ListingCommand::Restock(cmd) => self.handle_restock(cmd),
            ListingCommand::DeactivateListing(cmd) => self.handle_deactivate(cmd),
            ListingCommand::ActivateListing(cmd) => self.handle_activate(cmd),
        }
    }
}

impl Listing {
    fn ensure_created(&self, listing_id: ListingId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("listing {listing_id}")));
        }
        if self.id != listing_id {
            return Err(DomainError::invariant("listing_id mismatch"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateListing) -> Result<Vec<ListingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("listing already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if cmd.unit_price.is_zero() {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        if cmd.currency.trim().is_empty() {
            return Err(DomainError::validation("currency cannot be empty"));
        }

        Ok(vec![ListingEvent::ListingCreated(ListingCreated {
            listing_id: cmd.listing_id,
            seller_id: cmd.seller_id,
            kind: cmd.kind,
            title: cmd.title.trim().to_string(),
            unit_price: cmd.unit_price,
            currency: cmd.currency.trim().to_uppercase(),
            available: cmd.available,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_created(cmd.listing_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if self.status == ListingStatus::Inactive {
            return Err(DomainError::validation(format!(
                "listing {} is not active",
                self.id
            )));
        }
        if self.available < cmd.quantity {
            return Err(DomainError::conflict(format!(
                "insufficient availability for listing {} (available: {}, requested: {})",
                self.id, self.available, cmd.quantity
            )));
        }

        Ok(vec![ListingEvent::StockReserved(AvailabilityChanged {
            listing_id: self.id,
            quantity: cmd.quantity,
            remaining: self.available - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_created(cmd.listing_id)?;
        Self::ensure_positive(cmd.quantity)?;

        let remaining = self
            .available
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::invariant("availability overflow"))?;

        Ok(vec![ListingEvent::StockReleased(AvailabilityChanged {
            listing_id: self.id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &Restock) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_created(cmd.listing_id)?;
        Self::ensure_positive(cmd.quantity)?;

        let remaining = self
            .available
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::invariant("availability overflow"))?;

        Ok(vec![ListingEvent::Restocked(AvailabilityChanged {
            listing_id: self.id,
            quantity: cmd.quantity,
            remaining,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateListing,
    ) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_created(cmd.listing_id)?;
        if self.status == ListingStatus::Inactive {
            return Err(DomainError::conflict("listing is already inactive"));
        }

        Ok(vec![ListingEvent::ListingDeactivated(ListingStatusChanged {
            listing_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateListing) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_created(cmd.listing_id)?;
        if self.status != ListingStatus::Inactive {
            return Err(DomainError::conflict("listing is already active"));
        }

        Ok(vec![ListingEvent::ListingActivated(ListingStatusChanged {
            listing_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_events::execute;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_listing(available: u32) -> Listing {
        let id = ListingId::generate();
        let mut listing = Listing::empty(id);
        execute(
            &mut listing,
            &ListingCommand::CreateListing(CreateListing {
                listing_id: id,
                seller_id: UserId::new(),
                kind: ListingKind::Product,
                title: "Hand-woven basket".to_string(),
                unit_price: Money(10_000),
                currency: "ngn".to_string(),
                available,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        listing
    }

    fn reserve(listing: &Listing, quantity: u32) -> ListingCommand {
        ListingCommand::ReserveStock(ReserveStock {
            listing_id: listing.id_typed(),
            quantity,
            occurred_at: test_time(),
        })
    }

    fn release(listing: &Listing, quantity: u32) -> ListingCommand {
        ListingCommand::ReleaseStock(ReleaseStock {
            listing_id: listing.id_typed(),
            quantity,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_normalizes_currency_and_starts_active() {
        let listing = test_listing(3);
        assert_eq!(listing.currency(), "NGN");
        assert_eq!(listing.status(), ListingStatus::Active);
        assert_eq!(listing.version(), 1);
    }

    #[test]
    fn listing_created_with_zero_stock_is_out_of_stock() {
        let listing = test_listing(0);
        assert_eq!(listing.status(), ListingStatus::OutOfStock);
    }

    #[test]
    fn reserving_last_unit_marks_out_of_stock_and_release_reactivates() {
        let mut listing = test_listing(1);

        ({ let cmd = reserve(&listing, 1); execute(&mut listing, &cmd) }).unwrap();
        assert_eq!(listing.available(), 0);
        assert_eq!(listing.status(), ListingStatus::OutOfStock);

        ({ let cmd = release(&listing, 1); execute(&mut listing, &cmd) }).unwrap();
        assert_eq!(listing.available(), 1);
        assert_eq!(listing.status(), ListingStatus::Active);
    }

    #[test]
    fn insufficient_stock_is_a_conflict() {
        let listing = test_listing(1);
        let err = listing.handle(&reserve(&listing, 2)).unwrap_err();
        match err {
            DomainError::Conflict(msg) => assert!(msg.contains("insufficient")),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn inactive_listing_cannot_be_reserved() {
        let mut listing = test_listing(5);
        let listing_id = listing.id_typed();
        execute(
            &mut listing,
            &ListingCommand::DeactivateListing(DeactivateListing {
                listing_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = listing.handle(&reserve(&listing, 1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Releasing into an inactive listing keeps it inactive.
        ({ let cmd = release(&listing, 2); execute(&mut listing, &cmd) }).unwrap();
        assert_eq!(listing.status(), ListingStatus::Inactive);
        assert_eq!(listing.available(), 7);
    }

    #[test]
    fn commands_against_missing_listing_are_not_found() {
        let listing = Listing::empty(ListingId::generate());
        let err = listing.handle(&reserve(&listing, 1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn handle_does_not_mutate() {
        let listing = test_listing(4);
        let before = listing.clone();
        let _ = listing.handle(&reserve(&listing, 2)).unwrap();
        assert_eq!(listing, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Reserving then releasing the same quantities restores the original count.
        #[test]
        fn reserve_then_release_conserves_stock(
            initial in 0u32..500,
            requests in prop::collection::vec(1u32..20, 0..20),
        ) {
            let mut listing = test_listing(initial);
            let mut reserved = Vec::new();

            for q in requests {
                if ({ let cmd = reserve(&listing, q); execute(&mut listing, &cmd) }).is_ok() {
                    reserved.push(q);
                }
            }
            let held: u32 = reserved.iter().sum();
            prop_assert_eq!(listing.available() + held, initial);

            for q in reserved {
                ({ let cmd = release(&listing, q); execute(&mut listing, &cmd) }).unwrap();
            }
            prop_assert_eq!(listing.available(), initial);
            prop_assert_eq!(listing.status() == ListingStatus::OutOfStock, initial == 0);
        }
    }
}
