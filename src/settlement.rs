use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;

use crate::balance::{balance_total, Balances, ZERO_SUM_TOLERANCE};
use crate::money::{round_to_2_decimals, serialize_amount};
use crate::schemas::MemberKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("settlement threshold must not be negative (got {0})")]
    NegativeThreshold(Decimal),
}

/// Rounded balances smaller than this count as settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Threshold(Decimal);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(dec!(0.01));

    pub fn new(value: Decimal) -> Result<Self, SettlementError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(SettlementError::NegativeThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub from: MemberKey,
    pub to: MemberKey,
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Decimal,
}

const CENT: Decimal = dec!(0.01);

struct Party<'a> {
    id: &'a MemberKey,
    // magnitude still owed / still due, always >= 0
    outstanding: Decimal,
}

/// Rounds every balance to cents and repairs the total back to exactly zero.
///
/// Leftover cents are taken from the members that rounding favoured most
/// (or given to those it shortchanged most), lowest key first on ties, so no
/// member ends up more than a cent away from its exact balance. `None` when
/// the input is too far from zero-sum to repair or the arithmetic overflows.
fn quantize_balances(balances: &Balances) -> Option<Vec<(&MemberKey, Decimal)>> {
    let mut quantized: Vec<(&MemberKey, Decimal)> = balances
        .iter()
        .map(|(id, balance)| (id, round_to_2_decimals(*balance)))
        .collect();
    let excess = quantized
        .iter()
        .try_fold(Decimal::ZERO, |total, (_, cents)| total.checked_add(*cents))?;
    let steps = excess.checked_div(CENT)?.abs().to_usize()?;
    if steps == 0 {
        return Some(quantized);
    }
    if steps > quantized.len() {
        return None;
    }

    let drift: Vec<Decimal> = quantized
        .iter()
        .zip(balances.values())
        .map(|((_, cents), balance)| cents.checked_sub(*balance))
        .collect::<Option<_>>()?;
    let mut ranked: Vec<usize> = (0..quantized.len()).collect();
    let step = if excess.is_sign_positive() {
        ranked.sort_by(|a, b| drift[*b].cmp(&drift[*a]).then(a.cmp(b)));
        -CENT
    } else {
        ranked.sort_by(|a, b| drift[*a].cmp(&drift[*b]).then(a.cmp(b)));
        CENT
    };
    for idx in ranked.into_iter().take(steps) {
        let (_, cents) = &mut quantized[idx];
        *cents = cents.checked_add(step)?;
    }
    Some(quantized)
}

/// Greedy pairwise settlement over cent-quantized balances.
///
/// Balances are first rounded to cents without breaking the zero sum, so the
/// cents each creditor receives add up to its rounded balance. Members whose
/// rounded balance is smaller than `threshold` are left out. Debtors and
/// creditors are then each walked in ascending key order; every step pays off
/// at least one side completely, so the result never holds more than
/// `balances.len() - 1` transfers.
pub fn settle_up(balances: &Balances, threshold: Threshold) -> Vec<Transfer> {
    let limit = threshold.value();

    let quantized = match balance_total(balances) {
        Some(total) if total.abs() <= ZERO_SUM_TOLERANCE => quantize_balances(balances),
        Some(total) => {
            tracing::warn!(%total, "settling balances that do not sum to zero");
            None
        }
        None => {
            tracing::warn!("balance total is out of range, settling best effort");
            None
        }
    };
    let quantized = quantized.unwrap_or_else(|| {
        balances
            .iter()
            .map(|(id, balance)| (id, round_to_2_decimals(*balance)))
            .collect()
    });

    let mut debtors: Vec<Party> = quantized
        .iter()
        .filter(|(_, cents)| *cents < Decimal::ZERO && -*cents >= limit)
        .map(|(id, cents)| Party {
            id: *id,
            outstanding: -*cents,
        })
        .collect();
    let mut creditors: Vec<Party> = quantized
        .iter()
        .filter(|(_, cents)| *cents > Decimal::ZERO && *cents >= limit)
        .map(|(id, cents)| Party {
            id: *id,
            outstanding: *cents,
        })
        .collect();

    let mut transfers = Vec::new();
    let (mut d, mut c) = (0, 0);
    while d < debtors.len() && c < creditors.len() {
        let debtor = &mut debtors[d];
        let creditor = &mut creditors[c];
        let amount = debtor.outstanding.min(creditor.outstanding);

        transfers.push(Transfer {
            from: debtor.id.clone(),
            to: creditor.id.clone(),
            amount,
        });
        debtor.outstanding -= amount;
        creditor.outstanding -= amount;

        if debtor.outstanding.is_zero() || debtor.outstanding < limit {
            d += 1;
        }
        if creditor.outstanding.is_zero() || creditor.outstanding < limit {
            c += 1;
        }
    }

    let unsettled = debtors
        .iter()
        .chain(&creditors)
        .filter(|party| !party.outstanding.is_zero())
        .count();
    if unsettled > 0 {
        tracing::warn!(unsettled, "settlement left members with open balances");
    }

    transfers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::compute_balances;
    use crate::schemas::{Amount, Receipt};
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn balances<const N: usize>(entries: [(&str, Decimal); N]) -> Balances {
        entries
            .into_iter()
            .map(|(member, balance)| (member.to_owned(), balance))
            .collect()
    }

    fn transfer(from: &str, to: &str, amount: Decimal) -> Transfer {
        Transfer {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    #[rstest]
    #[case::single_pair(
        balances([("A", dec!(50)), ("B", dec!(-50))]),
        vec![transfer("B", "A", dec!(50.00))]
    )]
    #[case::one_creditor_two_debtors(
        balances([("A", dec!(60)), ("B", dec!(-15)), ("C", dec!(-45))]),
        vec![transfer("B", "A", dec!(15)), transfer("C", "A", dec!(45))]
    )]
    #[case::two_creditors_one_debtor(
        balances([("A", dec!(30)), ("B", dec!(70)), ("C", dec!(-100))]),
        vec![transfer("C", "A", dec!(30)), transfer("C", "B", dec!(70))]
    )]
    #[case::chained(
        balances([("A", dec!(40)), ("B", dec!(-10)), ("C", dec!(10)), ("D", dec!(-40))]),
        vec![
            transfer("B", "A", dec!(10)),
            transfer("D", "A", dec!(30)),
            transfer("D", "C", dec!(10)),
        ]
    )]
    #[case::all_settled(
        balances([("A", dec!(0)), ("B", dec!(0))]),
        vec![]
    )]
    #[case::dust_ignored(
        balances([("A", dec!(0.004)), ("B", dec!(-0.004))]),
        vec![]
    )]
    #[case::thirds_round_to_cents(
        balances([
            ("A", dec!(66.666666666666666666666666667)),
            ("B", dec!(-33.333333333333333333333333333)),
            ("C", dec!(-33.333333333333333333333333334)),
        ]),
        vec![transfer("B", "A", dec!(33.33)), transfer("C", "A", dec!(33.34))]
    )]
    #[case::one_cent_is_still_paid(
        balances([("A", dec!(0.01)), ("B", dec!(-0.01))]),
        vec![transfer("B", "A", dec!(0.01))]
    )]
    #[case::empty(Balances::new(), vec![])]
    fn settles_with_default_threshold(#[case] input: Balances, #[case] expected: Vec<Transfer>) {
        assert_eq!(settle_up(&input, Threshold::default()), expected);
    }

    #[test]
    fn seven_way_split_pays_the_rounded_balance() {
        let members: BTreeSet<MemberKey> = ["A", "B", "C", "D", "E", "F", "G"]
            .into_iter()
            .map(String::from)
            .collect();
        let receipt = Receipt {
            amount: Some(Amount::from(dec!(1.00))),
            paid_by: Some("A".into()),
            split_with: Some(members.iter().cloned().collect()),
            ..Default::default()
        };
        let balances = compute_balances(&members, &[receipt]).balances;

        let transfers = settle_up(&balances, Threshold::default());

        assert_eq!(transfers.len(), 6);
        assert!(transfers.iter().all(|transfer| transfer.to == "A"));
        let received: Decimal = transfers.iter().map(|transfer| transfer.amount).sum();
        assert_eq!(received, dec!(0.86));
        for transfer in &transfers {
            let owed = -balances[&transfer.from];
            assert!((owed - transfer.amount).abs() <= dec!(0.01));
        }
    }

    #[rstest]
    #[case::rounds_up_too_far(balances([
        ("A", dec!(66.666666666666666666666666667)),
        ("B", dec!(-33.333333333333333333333333333)),
        ("C", dec!(-33.333333333333333333333333334)),
    ]))]
    #[case::rounds_down_too_far(balances([
        ("A", dec!(-66.666666666666666666666666667)),
        ("B", dec!(33.333333333333333333333333333)),
        ("C", dec!(33.333333333333333333333333334)),
    ]))]
    #[case::already_cents(balances([("A", dec!(12.5)), ("B", dec!(-12.5))]))]
    fn quantized_balances_stay_zero_sum(#[case] input: Balances) {
        let quantized = quantize_balances(&input).unwrap();

        let total: Decimal = quantized.iter().map(|(_, cents)| *cents).sum();
        assert_eq!(total, Decimal::ZERO);
        for ((_, cents), exact) in quantized.iter().zip(input.values()) {
            assert_eq!(cents.round_dp(2), *cents);
            assert!((*cents - *exact).abs() <= CENT);
        }
    }

    #[test]
    fn quantization_breaks_ties_by_key() {
        let input = balances([("A", dec!(0.004)), ("B", dec!(0.004)), ("C", dec!(-0.008))]);
        let quantized: Vec<(MemberKey, Decimal)> = quantize_balances(&input)
            .unwrap()
            .into_iter()
            .map(|(id, cents)| (id.clone(), cents))
            .collect();
        assert_eq!(
            quantized,
            vec![
                ("A".to_owned(), dec!(0.01)),
                ("B".to_owned(), dec!(0.00)),
                ("C".to_owned(), dec!(-0.01)),
            ]
        );
    }

    #[test]
    fn single_pair_pays_the_smaller_side() {
        let transfers = settle_up(
            &balances([("A", dec!(80)), ("B", dec!(-20)), ("C", dec!(-60))]),
            Threshold::default(),
        );
        assert_eq!(transfers[0], transfer("B", "A", dec!(20)));
    }

    #[test]
    fn zero_threshold_settles_exactly() {
        let threshold = Threshold::new(Decimal::ZERO).unwrap();
        let transfers = settle_up(&balances([("A", dec!(0.01)), ("B", dec!(-0.01))]), threshold);
        assert_eq!(transfers, vec![transfer("B", "A", dec!(0.01))]);
    }

    #[test]
    fn wide_threshold_skips_small_debts() {
        let threshold = Threshold::new(dec!(5)).unwrap();
        let transfers = settle_up(
            &balances([("A", dec!(20)), ("B", dec!(-3)), ("C", dec!(-17))]),
            threshold,
        );
        assert_eq!(transfers, vec![transfer("C", "A", dec!(17))]);
    }

    #[test]
    fn imbalanced_input_is_settled_best_effort() {
        let transfers = settle_up(
            &balances([("A", dec!(50)), ("B", dec!(-30))]),
            Threshold::default(),
        );
        assert_eq!(transfers, vec![transfer("B", "A", dec!(30))]);
    }

    #[test]
    fn negative_threshold_is_rejected() {
        assert_eq!(
            Threshold::new(dec!(-0.01)),
            Err(SettlementError::NegativeThreshold(dec!(-0.01)))
        );
    }

    #[test]
    fn repeated_runs_agree() {
        let input = balances([
            ("dee", dec!(12.5)),
            ("ann", dec!(-7.25)),
            ("cal", dec!(3)),
            ("bob", dec!(-8.25)),
        ]);
        assert_eq!(
            settle_up(&input, Threshold::default()),
            settle_up(&input, Threshold::default())
        );
    }
}
