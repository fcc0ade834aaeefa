//! JWT issuing and verification for the API surface

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub username: String,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
}

impl JwtUtil {
    /// `expires_in` accepts "24h", "30m", "7d" or a plain number of seconds.
    pub fn new(secret: &str, expires_in: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_in: parse_expiry(expires_in),
        }
    }

    pub fn generate_token(&self, user_id: &str, username: &str) -> ApiResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: (now + self.expires_in).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token: {}", e)))
    }
}

fn parse_expiry(input: &str) -> Duration {
    let trimmed = input.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Duration::seconds(secs);
    }

    if trimmed.is_empty() || !trimmed.is_ascii() {
        tracing::warn!("Invalid JWT expiry '{}', defaulting to 24h", input);
        return Duration::hours(24);
    }

    let (num, unit) = trimmed.split_at(trimmed.len() - 1);
    match (num.parse::<i64>(), unit) {
        (Ok(n), "s") => Duration::seconds(n),
        (Ok(n), "m") => Duration::minutes(n),
        (Ok(n), "h") => Duration::hours(n),
        (Ok(n), "d") => Duration::days(n),
        _ => {
            tracing::warn!("Invalid JWT expiry '{}', defaulting to 24h", input);
            Duration::hours(24)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let jwt = JwtUtil::new("test-secret", "24h");
        let token = jwt.generate_token("42", "analyst").unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.username, "analyst");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn rejects_wrong_secret() {
        let jwt = JwtUtil::new("secret-a", "1h");
        let other = JwtUtil::new("secret-b", "1h");
        let token = jwt.generate_token("1", "user").unwrap();
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn expiry_parsing() {
        assert_eq!(parse_expiry("90"), Duration::seconds(90));
        assert_eq!(parse_expiry("30m"), Duration::minutes(30));
        assert_eq!(parse_expiry("7d"), Duration::days(7));
        assert_eq!(parse_expiry("junk"), Duration::hours(24));
    }
}
