use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub kind: TokenKind,
    pub exp: usize,
    pub iat: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

fn generate(user_id: i64, kind: TokenKind, secret: &str, expire_minutes: u64) -> Result<String> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        kind,
        exp: now + (expire_minutes as usize * 60),
        iat: now,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn generate_access(user_id: i64, secret: &str, expire_minutes: u64) -> Result<String> {
    generate(user_id, TokenKind::Access, secret, expire_minutes)
}

pub fn generate_refresh(user_id: i64, secret: &str, expire_minutes: u64) -> Result<String> {
    generate(user_id, TokenKind::Refresh, secret, expire_minutes)
}

/// Decodes and checks signature, expiry and token kind.
pub fn verify(token: &str, secret: &str, expected: TokenKind) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    if data.claims.kind != expected {
        anyhow::bail!("expected {:?} token, got {:?}", expected, data.claims.kind);
    }
    Ok(data.claims)
}
