use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;

use crate::errors::ApiError;
use crate::models::JWTClaim;
use crate::{JWT_SECRET, TOKEN_TTL_SECONDS};

pub fn hash_password(raw: &str) -> String {
    format!("{:x}", md5::compute(raw))
}

pub fn issue_token(user_id: &ObjectId) -> Result<String, ApiError> {
    let now = Utc::now();
    let claim = JWTClaim {
        aud: "public".to_string(),
        exp: (now + Duration::seconds(TOKEN_TTL_SECONDS)).timestamp() as usize,
        iat: now.timestamp() as usize,
        iss: "souq".to_string(),
        nbf: now.timestamp() as usize,
        sub: user_id.to_hex(),
    };
    encode(
        &Header::default(),
        &claim,
        &EncodingKey::from_secret(JWT_SECRET.as_ref()),
    )
    .map_err(|_| ApiError::Internal("could not encode jwt token".to_string()))
}

pub fn decode_token(token: &str) -> Result<JWTClaim, ApiError> {
    decode::<JWTClaim>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_ref()),
        &{
            let mut validation = Validation::default();
            validation.validate_exp = true;
            validation
        },
    )
    .map(|data| data.claims)
    .map_err(|e| ApiError::Unauthorized(e.to_string()))
}

/// Keeps only the tokens that still decode, which drops expired and
/// otherwise invalid entries. Runs on every login.
pub fn prune_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|token| decode_token(token).is_ok())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired_token(user_id: &ObjectId) -> String {
        let past = (Utc::now() - Duration::hours(2)).timestamp() as usize;
        let claim = JWTClaim {
            aud: "public".to_string(),
            exp: past,
            iat: past,
            iss: "souq".to_string(),
            nbf: past,
            sub: user_id.to_hex(),
        };
        encode(
            &Header::default(),
            &claim,
            &EncodingKey::from_secret(JWT_SECRET.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn issued_tokens_decode_back_to_the_user() {
        let user_id = ObjectId::new();
        let token = issue_token(&user_id).unwrap();
        let claim = decode_token(&token).unwrap();
        assert_eq!(claim.sub, user_id.to_hex());
        assert_eq!(claim.iss, "souq");
    }

    #[test]
    fn expired_and_garbage_tokens_fail_to_decode() {
        let user_id = ObjectId::new();
        assert!(decode_token(&expired_token(&user_id)).is_err());
        assert!(decode_token("not-a-token").is_err());
    }

    #[test]
    fn pruning_keeps_live_tokens_and_drops_dead_ones() {
        let user_id = ObjectId::new();
        let live = issue_token(&user_id).unwrap();
        let tokens = vec![
            expired_token(&user_id),
            live.clone(),
            "garbage".to_string(),
        ];
        assert_eq!(prune_tokens(&tokens), vec![live]);
    }

    #[test]
    fn password_hashing_is_stable_md5() {
        assert_eq!(hash_password("secret"), hash_password("secret"));
        assert_eq!(hash_password("secret").len(), 32);
        assert_ne!(hash_password("secret"), hash_password("other"));
    }
}
