use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::{Deserialize, Serialize};

use crate::money::parse_amount;

pub type MemberKey = String;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

/// Group members are stored either as bare emails or as `{email, role}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GroupMember {
    Detailed {
        email: MemberKey,
        #[serde(default)]
        role: Role,
    },
    Plain(MemberKey),
}

impl GroupMember {
    pub fn email(&self) -> &str {
        match self {
            GroupMember::Detailed { email, .. } => email,
            GroupMember::Plain(email) => email,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            GroupMember::Detailed { role, .. } => *role,
            GroupMember::Plain(_) => Role::Member,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    pub created_by: MemberKey,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn member_keys(&self) -> BTreeSet<MemberKey> {
        self.members
            .iter()
            .map(|member| member.email().to_owned())
            .collect()
    }

    pub fn has_member(&self, email: &str) -> bool {
        self.members.iter().any(|member| member.email() == email)
    }

    /// The creator is always an admin, whatever the stored role says.
    pub fn is_admin(&self, email: &str) -> bool {
        self.created_by == email
            || self
                .members
                .iter()
                .any(|member| member.email() == email && member.role() == Role::Admin)
    }
}

/// A receipt total as it sits in the store: older records carry numbers,
/// newer ones carry fixed-point strings.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    /// `None` for anything that is not a finite decimal.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Amount::Number(value) if value.is_finite() => Decimal::from_f64(*value),
            Amount::Number(_) => None,
            Amount::Text(text) => parse_amount(text),
        }
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::Text(value.to_string())
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Amount::Number(value) => write!(f, "{value}"),
            Amount::Text(text) => write!(f, "{text}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default, alias = "total")]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_by: Option<MemberKey>,
    #[serde(default)]
    pub split_with: Option<Vec<MemberKey>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uploaded_by: Option<MemberKey>,
}

impl Receipt {
    pub fn belongs_to(&self, group_id: &str) -> bool {
        self.group_id.as_deref() == Some(group_id)
    }
}
