use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Derive a visitor token for clients that did not send one.
///
/// Formula: sha256(salt_epoch + ip + user_agent)[0..8] encoded as 16 hex chars.
///
/// salt_epoch = floor(unix_utc_timestamp / 86400), so the token is stable for
/// the lifetime of a daily unique-visitor set and cannot be joined across days.
pub fn derive_visitor_token(ip: &str, user_agent: &str, at: DateTime<Utc>) -> String {
    let salt_epoch = at.timestamp().div_euclid(86400);
    let input = format!("{}{}{}", salt_epoch, ip, user_agent);
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}

/// Use the client token when present, otherwise derive one.
pub fn visitor_token_or_derive(
    token: Option<&str>,
    ip: &str,
    user_agent: &str,
    at: DateTime<Utc>,
) -> String {
    match token.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => derive_visitor_token(ip, user_agent, at),
    }
}
