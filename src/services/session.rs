//! Session tokens — the identity collaborator for the socket gateway.
//!
//! DESIGN
//! ======
//! Credential handling lives outside this system; the gateway only needs
//! `validate_token` to turn a bearer token into an identity at connect
//! time. Validation failure is non-fatal by policy: the connection
//! proceeds anonymously instead of being rejected.

use std::fmt::Write;

use rand::Rng;
use sqlx::{PgPool, Row};

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Create a session for the given identity, returning the token.
pub async fn create_session(pool: &PgPool, identity: &str) -> Result<String, sqlx::Error> {
    let token = generate_token();
    sqlx::query("INSERT INTO sessions (token, identity) VALUES ($1, $2)")
        .bind(&token)
        .bind(identity)
        .execute(pool)
        .await?;
    Ok(token)
}

/// Validate a session token and return the associated identity, or `None`
/// for unknown/expired tokens.
pub async fn validate_token(pool: &PgPool, token: &str) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT identity FROM sessions WHERE token = $1 AND expires_at > now()")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("identity")))
}

/// Delete a session by token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}
