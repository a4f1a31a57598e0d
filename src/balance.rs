use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::money::serialize_amounts;
use crate::schemas::{Group, MemberKey, Receipt};

pub type Balances = BTreeMap<MemberKey, Decimal>;

/// Largest balance sum still considered zero.
pub const ZERO_SUM_TOLERANCE: Decimal = dec!(0.000001);

/// A receipt that was left out of the balances, or an anomaly in the result.
///
/// `index` is the receipt's position in the input slice, so receipts without
/// an id can still be pointed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceWarning {
    InvalidAmount {
        index: usize,
        receipt_id: Option<String>,
        amount: Option<String>,
    },
    MissingPayer {
        index: usize,
        receipt_id: Option<String>,
    },
    EmptySplit {
        index: usize,
        receipt_id: Option<String>,
    },
    UnknownMember {
        index: usize,
        receipt_id: Option<String>,
        members: Vec<MemberKey>,
    },
    /// Applying the receipt would push a balance out of `Decimal` range.
    Overflow {
        index: usize,
        receipt_id: Option<String>,
    },
    ImbalancedTotal {
        total: Decimal,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BalanceReport {
    #[serde(serialize_with = "serialize_amounts")]
    pub balances: Balances,
    pub warnings: Vec<BalanceWarning>,
}

struct Split<'a> {
    amount: Decimal,
    payer: &'a MemberKey,
    participants: BTreeSet<&'a MemberKey>,
}

fn validate<'a>(
    index: usize,
    receipt: &'a Receipt,
    members: &BTreeSet<MemberKey>,
) -> Result<Split<'a>, BalanceWarning> {
    let receipt_id = receipt.id.clone();
    let amount = match receipt.amount.as_ref().map(|raw| (raw, raw.to_decimal())) {
        Some((_, Some(amount))) if !amount.is_sign_negative() || amount.is_zero() => amount,
        Some((raw, _)) => {
            return Err(BalanceWarning::InvalidAmount {
                index,
                receipt_id,
                amount: Some(raw.to_string()),
            })
        }
        None => {
            return Err(BalanceWarning::InvalidAmount {
                index,
                receipt_id,
                amount: None,
            })
        }
    };
    let Some(payer) = receipt.paid_by.as_ref() else {
        return Err(BalanceWarning::MissingPayer { index, receipt_id });
    };
    let participants: BTreeSet<&MemberKey> = receipt.split_with.iter().flatten().collect();
    if participants.is_empty() {
        return Err(BalanceWarning::EmptySplit { index, receipt_id });
    }

    let mut unknown: Vec<MemberKey> = std::iter::once(payer)
        .chain(participants.iter().copied())
        .filter(|member| !members.contains(*member))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        unknown.dedup();
        return Err(BalanceWarning::UnknownMember {
            index,
            receipt_id,
            members: unknown,
        });
    }

    Ok(Split {
        amount,
        payer,
        participants,
    })
}

/// New balances for every member the split touches, or `None` if any of them
/// would leave `Decimal` range. Nothing is written until the whole split fits.
fn apply_split(balances: &Balances, split: &Split<'_>) -> Option<Vec<(MemberKey, Decimal)>> {
    let share = split.amount / Decimal::from(split.participants.len());
    let mut payer_balance = *balances.get(split.payer)?;
    let mut updates = Vec::with_capacity(split.participants.len());
    for participant in &split.participants {
        if *participant == split.payer {
            continue;
        }
        let balance = balances.get(*participant)?;
        updates.push(((*participant).clone(), balance.checked_sub(share)?));
        payer_balance = payer_balance.checked_add(share)?;
    }
    updates.push((split.payer.clone(), payer_balance));
    Some(updates)
}

/// Sum of all balances, `None` when it does not fit in a `Decimal`.
pub fn balance_total(balances: &Balances) -> Option<Decimal> {
    balances
        .values()
        .try_fold(Decimal::ZERO, |total, balance| total.checked_add(*balance))
}

/// Folds receipts into per-member net balances.
///
/// Every key in `members` gets an entry, even when no receipt mentions it.
/// Receipts that cannot be applied are skipped and reported in
/// [`BalanceReport::warnings`]; they never affect the other receipts.
pub fn compute_balances(members: &BTreeSet<MemberKey>, receipts: &[Receipt]) -> BalanceReport {
    fold_receipts(members, receipts.iter().enumerate())
}

fn fold_receipts<'a>(
    members: &BTreeSet<MemberKey>,
    receipts: impl Iterator<Item = (usize, &'a Receipt)>,
) -> BalanceReport {
    let mut balances: Balances = members
        .iter()
        .map(|member| (member.clone(), Decimal::ZERO))
        .collect();
    let mut warnings = Vec::new();
    let mut receipt_count = 0usize;

    for (index, receipt) in receipts {
        receipt_count += 1;
        let split = match validate(index, receipt, members) {
            Ok(split) => split,
            Err(warning) => {
                tracing::debug!(?warning, "receipt excluded from balances");
                warnings.push(warning);
                continue;
            }
        };

        match apply_split(&balances, &split) {
            Some(updates) => balances.extend(updates),
            None => {
                let warning = BalanceWarning::Overflow {
                    index,
                    receipt_id: receipt.id.clone(),
                };
                tracing::warn!(?warning, "receipt would overflow a balance");
                warnings.push(warning);
            }
        }
    }

    match balance_total(&balances) {
        Some(total) if total.abs() > ZERO_SUM_TOLERANCE => {
            tracing::warn!(
                %total,
                member_count = balances.len(),
                receipt_count,
                "balances do not sum to zero"
            );
            warnings.push(BalanceWarning::ImbalancedTotal { total });
        }
        Some(_) => {}
        None => tracing::warn!(
            member_count = balances.len(),
            "balance total is out of range, skipping the zero-sum check"
        ),
    }

    BalanceReport { balances, warnings }
}

/// Balances for one group; receipts filed under other groups are ignored.
/// Warning indices still refer to positions in `receipts`.
pub fn compute_balance_from_group(group: &Group, receipts: &[Receipt]) -> BalanceReport {
    let in_scope = receipts
        .iter()
        .filter(|receipt| receipt.belongs_to(&group.id))
        .count();
    if in_scope != receipts.len() {
        tracing::debug!(
            group_id = %group.id,
            skipped = receipts.len() - in_scope,
            "ignoring receipts outside the group"
        );
    }
    fold_receipts(
        &group.member_keys(),
        receipts
            .iter()
            .enumerate()
            .filter(|(_, receipt)| receipt.belongs_to(&group.id)),
    )
}
