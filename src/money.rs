use std::{collections::BTreeMap, str::FromStr};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serializer;

/// Display and transfer precision (cents).
pub const DISPLAY_SCALE: u32 = 2;

pub fn round_to_2_decimals(amount: Decimal) -> Decimal {
    let rounded =
        amount.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    // avoid rendering "-0.00"
    if rounded.is_zero() {
        Decimal::ZERO
    } else {
        rounded
    }
}

pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = round_to_2_decimals(amount);
    rounded.rescale(DISPLAY_SCALE);
    rounded.to_string()
}

pub fn parse_amount(text: &str) -> Option<Decimal> {
    Decimal::from_str(text.trim()).ok()
}

pub fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_amount(*amount))
}

pub fn serialize_amounts<S: Serializer>(
    amounts: &BTreeMap<String, Decimal>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        amounts
            .iter()
            .map(|(key, amount)| (key, format_amount(*amount))),
    )
}
