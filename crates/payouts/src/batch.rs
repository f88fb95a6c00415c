//! Payout eligibility and per-seller grouping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use bazaar_core::{DomainError, Money, UserId};
use bazaar_payments::{Commission, CommissionStatus, EscrowStatus};

use crate::payout::ScheduledCommission;

/// `collected`, escrow `held`, and past its release date.
pub fn is_eligible(commission: &Commission, now: DateTime<Utc>) -> bool {
    commission.status() == CommissionStatus::Collected
        && commission.escrow_status() == EscrowStatus::Held
        && commission
            .escrow_release_date()
            .is_some_and(|release| release <= now)
}

/// Eligible commissions of one seller in one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerBatch {
    pub seller_id: UserId,
    pub currency: String,
    pub commissions: Vec<Commission>,
    pub total: Money,
}

impl SellerBatch {
    pub fn meets_threshold(&self, minimum: Money) -> bool {
        self.total >= minimum
    }

    pub fn scheduled(&self) -> Vec<ScheduledCommission> {
        self.commissions
            .iter()
            .map(|c| ScheduledCommission {
                commission_id: c.id_typed(),
                seller_amount: c.seller_amount(),
            })
            .collect()
    }
}

/// A `(seller, currency)` group left out of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedGroup {
    pub seller_id: UserId,
    pub currency: String,
    pub commissions: usize,
    pub error: DomainError,
}

/// Result of [`group_eligible`]. One bad group never hides the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub batches: Vec<SellerBatch>,
    pub rejected: Vec<RejectedGroup>,
}

/// Filter to eligible commissions and group them by `(seller, currency)`.
///
/// Batches come back ordered by seller then currency. A group whose total
/// overflows lands in `rejected`.
pub fn group_eligible<I>(commissions: I, now: DateTime<Utc>) -> Grouping
where
    I: IntoIterator<Item = Commission>,
{
    let mut groups: BTreeMap<(UserId, String), Vec<Commission>> = BTreeMap::new();
    for commission in commissions {
        if !is_eligible(&commission, now) {
            continue;
        }
        let Some(seller_id) = commission.seller_id() else {
            continue;
        };
        groups
            .entry((seller_id, commission.currency().to_string()))
            .or_default()
            .push(commission);
    }

    let mut grouping = Grouping::default();
    for ((seller_id, currency), commissions) in groups {
        match Money::sum(commissions.iter().map(Commission::seller_amount)) {
            Ok(total) => grouping.batches.push(SellerBatch {
                seller_id,
                currency,
                commissions,
                total,
            }),
            Err(error) => grouping.rejected.push(RejectedGroup {
                seller_id,
                currency,
                commissions: commissions.len(),
                error,
            }),
        }
    }
    grouping
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{CommissionId, CommissionRate, OrderId, PaymentId};
    use bazaar_events::execute;
    use bazaar_payments::{CalculateCommission, CollectCommission, CommissionCommand};
    use chrono::Duration;
    use proptest::prelude::*;

    fn collected(seller_id: UserId, total: u64, currency: &str, release: DateTime<Utc>) -> Commission {
        let id = CommissionId::generate();
        let mut c = Commission::empty(id);
        execute(
            &mut c,
            &CommissionCommand::Calculate(CalculateCommission {
                commission_id: id,
                payment_id: PaymentId::generate(),
                order_id: OrderId::generate(),
                seller_id,
                currency: currency.to_string(),
                total_amount: Money(total),
                rate: CommissionRate::default(),
                occurred_at: release - Duration::days(7),
            }),
        )
        .unwrap();
        execute(
            &mut c,
            &CommissionCommand::Collect(CollectCommission {
                commission_id: id,
                escrow_release_date: release,
                occurred_at: release - Duration::days(7),
            }),
        )
        .unwrap();
        c
    }

    #[test]
    fn escrow_date_gates_eligibility() {
        let now = Utc::now();
        let seller = UserId::new();

        assert!(is_eligible(&collected(seller, 100, "NGN", now), now));
        assert!(!is_eligible(
            &collected(seller, 100, "NGN", now + Duration::seconds(1)),
            now
        ));
    }

    #[test]
    fn calculated_commission_is_not_eligible() {
        let now = Utc::now();
        let id = CommissionId::generate();
        let mut c = Commission::empty(id);
        execute(
            &mut c,
            &CommissionCommand::Calculate(CalculateCommission {
                commission_id: id,
                payment_id: PaymentId::generate(),
                order_id: OrderId::generate(),
                seller_id: UserId::new(),
                currency: "NGN".to_string(),
                total_amount: Money(100),
                rate: CommissionRate::default(),
                occurred_at: now,
            }),
        )
        .unwrap();
        assert!(!is_eligible(&c, now + Duration::days(365)));
    }

    #[test]
    fn groups_by_seller_and_currency() {
        let now = Utc::now();
        let past = now - Duration::days(1);
        let a = UserId::new();
        let b = UserId::new();

        let batches = group_eligible(
            vec![
                collected(a, 10_000, "NGN", past),
                collected(a, 5_000, "NGN", past),
                collected(a, 2_000, "USD", past),
                collected(b, 1_000, "NGN", past),
                collected(b, 1_000, "NGN", now + Duration::days(1)),
            ],
            now,
        )
        .batches;

        assert_eq!(batches.len(), 3);
        let a_ngn = batches
            .iter()
            .find(|x| x.seller_id == a && x.currency == "NGN")
            .unwrap();
        assert_eq!(a_ngn.total, Money(9_000 + 4_500));
        assert_eq!(a_ngn.scheduled().len(), 2);

        let b_ngn = batches.iter().find(|x| x.seller_id == b).unwrap();
        assert_eq!(b_ngn.commissions.len(), 1);
        assert!(!b_ngn.meets_threshold(Money(1_000)));
        assert!(b_ngn.meets_threshold(Money(900)));
    }

    #[test]
    fn overflowing_group_is_rejected_alone() {
        let now = Utc::now();
        let past = now - Duration::days(1);
        let whale = UserId::new();
        let regular = UserId::new();

        let grouping = group_eligible(
            vec![
                collected(whale, u64::MAX, "NGN", past),
                collected(whale, u64::MAX, "NGN", past),
                collected(regular, 10_000, "NGN", past),
            ],
            now,
        );

        assert_eq!(grouping.batches.len(), 1);
        assert_eq!(grouping.batches[0].seller_id, regular);
        assert_eq!(grouping.batches[0].total, Money(9_000));

        assert_eq!(grouping.rejected.len(), 1);
        assert_eq!(grouping.rejected[0].seller_id, whale);
        assert_eq!(grouping.rejected[0].commissions, 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Each batch total equals the sum of its members' seller amounts.
        #[test]
        fn batch_total_is_sum_of_seller_amounts(totals in prop::collection::vec(1u64..1_000_000, 1..30)) {
            let now = Utc::now();
            let sellers = [UserId::new(), UserId::new(), UserId::new()];
            let commissions: Vec<Commission> = totals
                .iter()
                .enumerate()
                .map(|(i, t)| collected(sellers[i % 3], *t, "NGN", now))
                .collect();
            let grand: u64 = commissions.iter().map(|c| c.seller_amount().as_minor()).sum();

            let batches = group_eligible(commissions, now).batches;
            let mut seen = 0u64;
            for batch in &batches {
                let sum: u64 = batch.commissions.iter().map(|c| c.seller_amount().as_minor()).sum();
                prop_assert_eq!(batch.total.as_minor(), sum);
                seen += sum;
            }
            prop_assert_eq!(seen, grand);
        }
    }
}
