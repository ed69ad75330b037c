use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_secs()
}

/// Issues a signed bearer token for a local user id. `sub` is the user id,
/// `exp` is `now + expire_minutes`. The config default is on the order of
/// days; these sessions are meant to outlive a demo.
pub fn issue_access_token(
    user_id: u64,
    expire_minutes: u64,
    secret: &str,
) -> Result<String, ServiceError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: unix_now() + expire_minutes * 60,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::TokenIssue(e.to_string()))
}

/// Decodes and validates a bearer token (signature + expiry).
pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::TokenInvalid(e.to_string()))
}
