use serde::Serialize;

use crate::balance::{compute_balance_from_group, BalanceWarning, Balances};
use crate::money::serialize_amounts;
use crate::schemas::{Group, Receipt};
use crate::settlement::{settle_up, Threshold, Transfer};

/// Everything the "Settle Up" view needs for one group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_id: String,
    #[serde(serialize_with = "serialize_amounts")]
    pub balances: Balances,
    pub transfers: Vec<Transfer>,
    pub warnings: Vec<BalanceWarning>,
}

pub fn summarize_group(group: &Group, receipts: &[Receipt], threshold: Threshold) -> GroupSummary {
    let report = compute_balance_from_group(group, receipts);
    let transfers = settle_up(&report.balances, threshold);
    GroupSummary {
        group_id: group.id.clone(),
        balances: report.balances,
        transfers,
        warnings: report.warnings,
    }
}
