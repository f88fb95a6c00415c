//! Seller subscriptions: how many product listings a seller may publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{Aggregate, AggregateRoot, DomainError, SubscriptionId, UserId};
use bazaar_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl SubscriptionTier {
    pub const FREE_PRODUCT_LIMIT: u32 = 10;
    pub const PREMIUM_PRODUCT_LIMIT: u32 = 500;

    pub fn product_limit(self) -> u32 {
        match self {
            SubscriptionTier::Free => Self::FREE_PRODUCT_LIMIT,
            SubscriptionTier::Premium => Self::PREMIUM_PRODUCT_LIMIT,
        }
    }
}

/// Aggregate root: Subscription (one per user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    user_id: Option<UserId>,
    tier: SubscriptionTier,
    product_limit: u32,
    current_period_end: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn empty(id: SubscriptionId) -> Self {
        Self {
            id,
            user_id: None,
            tier: SubscriptionTier::Free,
            product_limit: SubscriptionTier::Free.product_limit(),
            current_period_end: None,
            version: 0,
            created: false,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn id_typed(&self) -> SubscriptionId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.tier
    }

    pub fn product_limit(&self) -> u32 {
        self.product_limit
    }

    pub fn current_period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Limit in force at `now`. A lapsed paid period falls back to the free tier.
    pub fn effective_limit(&self, now: DateTime<Utc>) -> u32 {
        match self.current_period_end {
            Some(end) if end <= now => SubscriptionTier::Free.product_limit(),
            _ => self.product_limit,
        }
    }
}

/// Product limit for a seller that may have no subscription at all.
pub fn product_limit_for(subscription: Option<&Subscription>, now: DateTime<Utc>) -> u32 {
    subscription
        .filter(|s| s.created)
        .map(|s| s.effective_limit(now))
        .unwrap_or(SubscriptionTier::Free.product_limit())
}

/// Fails with `Conflict` when one more product would exceed `limit`.
pub fn ensure_within_product_limit(current_products: usize, limit: u32) -> Result<(), DomainError> {
    if current_products >= limit as usize {
        return Err(DomainError::conflict(format!(
            "product limit reached ({limit}); upgrade the subscription to list more products"
        )));
    }
    Ok(())
}

impl AggregateRoot for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: StartSubscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSubscription {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub tier: SubscriptionTier,
    pub period_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeTier (upgrade, downgrade or renewal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTier {
    pub subscription_id: SubscriptionId,
    pub tier: SubscriptionTier,
    pub period_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionCommand {
    StartSubscription(StartSubscription),
    ChangeTier(ChangeTier),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStarted {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub tier: SubscriptionTier,
    pub period_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierChanged {
    pub subscription_id: SubscriptionId,
    pub from: SubscriptionTier,
    pub to: SubscriptionTier,
    pub period_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    SubscriptionStarted(SubscriptionStarted),
    TierChanged(TierChanged),
}

impl Event for SubscriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEvent::SubscriptionStarted(_) => "catalog.subscription.started",
            SubscriptionEvent::TierChanged(_) => "catalog.subscription.tier_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SubscriptionEvent::SubscriptionStarted(e) => e.occurred_at,
            SubscriptionEvent::TierChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Subscription {
    type Command = SubscriptionCommand;
    type Event = SubscriptionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SubscriptionEvent::SubscriptionStarted(e) => {
                self.id = e.subscription_id;
                self.user_id = Some(e.user_id);
                self.tier = e.tier;
                self.product_limit = e.tier.product_limit();
                self.current_period_end = e.period_end;
                self.created = true;
                self.created_at = Some(e.occurred_at);
            }
            SubscriptionEvent::TierChanged(e) => {
                self.tier = e.to;
                self.product_limit = e.to.product_limit();
                self.current_period_end = e.period_end;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SubscriptionCommand::StartSubscription(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("subscription already exists"));
                }
                Self::ensure_period(cmd.tier, cmd.period_end, cmd.occurred_at)?;

                Ok(vec![SubscriptionEvent::SubscriptionStarted(SubscriptionStarted {
                    subscription_id: cmd.subscription_id,
                    user_id: cmd.user_id,
                    tier: cmd.tier,
                    period_end: cmd.period_end,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SubscriptionCommand::ChangeTier(cmd) => {
                if !self.created {
                    return Err(DomainError::not_found(format!("subscription {}", self.id)));
                }
                if cmd.subscription_id != self.id {
                    return Err(DomainError::invariant("subscription_id mismatch"));
                }
                Self::ensure_period(cmd.tier, cmd.period_end, cmd.occurred_at)?;

                Ok(vec![SubscriptionEvent::TierChanged(TierChanged {
                    subscription_id: self.id,
                    from: self.tier,
                    to: cmd.tier,
                    period_end: cmd.period_end,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Subscription {
    fn ensure_period(
        tier: SubscriptionTier,
        period_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        match (tier, period_end) {
            (SubscriptionTier::Premium, None) => Err(DomainError::validation(
                "premium subscriptions require a period end",
            )),
            (_, Some(end)) if end <= now => {
                Err(DomainError::validation("period end must be in the future"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_events::execute;
    use chrono::Duration;

    fn start(tier: SubscriptionTier, period_end: Option<DateTime<Utc>>) -> Subscription {
        let id = SubscriptionId::generate();
        let mut sub = Subscription::empty(id);
        execute(
            &mut sub,
            &SubscriptionCommand::StartSubscription(StartSubscription {
                subscription_id: id,
                user_id: UserId::new(),
                tier,
                period_end,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        sub
    }

    #[test]
    fn no_subscription_means_free_limit() {
        assert_eq!(product_limit_for(None, Utc::now()), 10);
    }

    #[test]
    fn premium_limit_lapses_to_free_after_period_end() {
        let end = Utc::now() + Duration::days(30);
        let sub = start(SubscriptionTier::Premium, Some(end));

        assert_eq!(product_limit_for(Some(&sub), Utc::now()), 500);
        assert_eq!(product_limit_for(Some(&sub), end), 10);
    }

    #[test]
    fn premium_requires_period_end() {
        let sub = Subscription::empty(SubscriptionId::generate());
        let err = sub
            .handle(&SubscriptionCommand::StartSubscription(StartSubscription {
                subscription_id: *sub.id(),
                user_id: UserId::new(),
                tier: SubscriptionTier::Premium,
                period_end: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn upgrade_raises_limit() {
        let mut sub = start(SubscriptionTier::Free, None);
        let subscription_id = sub.id_typed();
        execute(
            &mut sub,
            &SubscriptionCommand::ChangeTier(ChangeTier {
                subscription_id,
                tier: SubscriptionTier::Premium,
                period_end: Some(Utc::now() + Duration::days(30)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(sub.tier(), SubscriptionTier::Premium);
        assert_eq!(sub.product_limit(), 500);
        assert_eq!(sub.version(), 2);
    }

    #[test]
    fn limit_check_is_a_conflict_at_the_ceiling() {
        assert!(ensure_within_product_limit(9, 10).is_ok());
        let err = ensure_within_product_limit(10, 10).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
