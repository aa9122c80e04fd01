//! Bearer token verification (HS256)

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Principal, UserId};
use crate::services::{TokenError, TokenVerifier};

/// JWT claims issued by the auth service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub user_id: UserId,
    pub exp: usize,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(Principal::new(data.claims.user_id)),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                _ => Err(TokenError::Invalid(e.to_string())),
            },
        }
    }
}
