use std::env;

use chrono::Duration;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::parse_amount;
use crate::settlement::Threshold;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("You need to add the {0} to the env")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store.
    pub mongodb_uri: Option<String>,
    pub database: String,
    pub bind_addr: String,
    pub port: u16,
    pub auth_secret: String,
    pub service_token: Option<String>,
    pub threshold: Threshold,
    pub invite_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let auth_secret = get("AUTH_SECRET").ok_or(ConfigError::Missing("AUTH_SECRET"))?;
        let port = match get("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value,
            })?,
            None => 8080,
        };
        let threshold = match get("SETTLE_THRESHOLD") {
            Some(value) => parse_amount(&value)
                .and_then(|threshold: Decimal| Threshold::new(threshold).ok())
                .ok_or(ConfigError::Invalid {
                    key: "SETTLE_THRESHOLD",
                    value,
                })?,
            None => Threshold::default(),
        };
        let invite_ttl = match get("INVITE_TTL_HOURS") {
            Some(value) => value
                .parse::<i64>()
                .ok()
                .filter(|hours| *hours > 0)
                .and_then(Duration::try_hours)
                .ok_or(ConfigError::Invalid {
                    key: "INVITE_TTL_HOURS",
                    value,
                })?,
            None => Duration::hours(72),
        };

        Ok(Config {
            mongodb_uri: get("MONGODB_URI"),
            database: get("DATABASE_NAME").unwrap_or_else(|| "splitledger".to_owned()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            auth_secret,
            service_token: get("SERVICE_TOKEN"),
            threshold,
            invite_ttl,
        })
    }
}
