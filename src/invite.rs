use chrono::{DateTime, Duration, Utc};
use hmac::Mac;
use thiserror::Error;

use crate::auth::{from_hex, keyed_hmac, to_hex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("invite token is malformed")]
    Malformed,
    #[error("invite token belongs to another group")]
    WrongGroup,
    #[error("invite token expired")]
    Expired,
    #[error("invite token signature mismatch")]
    BadSignature,
    #[error("invite lifetime reaches past the supported date range")]
    ExpiryOutOfRange,
}

fn signed_content(group_id: &str, expires_at: i64) -> String {
    format!("invite\n{group_id}\n{expires_at}")
}

/// Issues `"{group_id}.{expires_at}.{signature}"`.
pub fn issue_invite(
    group_id: &str,
    secret: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, InviteError> {
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or(InviteError::ExpiryOutOfRange)?
        .timestamp();
    let mut signer = keyed_hmac(secret);
    signer.update(signed_content(group_id, expires_at).as_bytes());
    let signature = to_hex(&signer.finalize().into_bytes());
    Ok(format!("{group_id}.{expires_at}.{signature}"))
}

pub fn verify_invite(
    token: &str,
    group_id: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), InviteError> {
    // group ids may contain dots, so split from the right
    let mut parts = token.rsplitn(3, '.');
    let (Some(signature), Some(expires_at), Some(token_group)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(InviteError::Malformed);
    };
    let expires_at: i64 = expires_at.parse().map_err(|_| InviteError::Malformed)?;
    let signature = from_hex(signature).map_err(|_| InviteError::Malformed)?;

    if token_group != group_id {
        return Err(InviteError::WrongGroup);
    }
    let mut verifier = keyed_hmac(secret);
    verifier.update(signed_content(token_group, expires_at).as_bytes());
    verifier
        .verify_slice(&signature)
        .map_err(|_| InviteError::BadSignature)?;
    if now.timestamp() > expires_at {
        return Err(InviteError::Expired);
    }
    Ok(())
}
