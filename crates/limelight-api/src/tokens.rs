use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};

use limelight_types::api::{Claims, TOKEN_AUDIENCE, TOKEN_ISSUER};

/// Dashboard tokens live for 12 hours; after that the manager asks the bot
/// for a fresh one.
const TOKEN_TTL_HOURS: i64 = 12;

/// Mint a dashboard token for a manager. Authorization is scoped at use
/// time: every route resolves the one active game the subject manages.
pub fn mint_manager_token(jwt_secret: &str, user_id: &str) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iss: TOKEN_ISSUER.to_string(),
        aud: TOKEN_AUDIENCE.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

    #[test]
    fn minted_tokens_round_trip_with_pinned_issuer_and_audience() {
        let token = mint_manager_token("test-secret", "U42").unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &validation,
        )
        .unwrap();

        assert_eq!(data.claims.sub, "U42");
        assert!(data.claims.exp > data.claims.iat);
    }

    #[test]
    fn wrong_audience_fails_validation() {
        let token = mint_manager_token("test-secret", "U42").unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&["other-app"]);
        let result = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &validation,
        );
        assert!(result.is_err());
    }
}
