use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::authz::IdentityVerifier;
use crate::errors::AppError;

pub const ACCESS_TOKEN: &str = "access";

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Ok(Self::new(secret.into_bytes(), exp_hours))
    }

    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
        }
    }

    pub fn encode(&self, user_id: Uuid, role_id: Uuid, tenant_id: Uuid) -> Result<String, AppError> {
        self.encode_typed(user_id, role_id, tenant_id, ACCESS_TOKEN)
    }

    pub fn encode_typed(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        tenant_id: Uuid,
        token_type: &str,
    ) -> Result<String, AppError> {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: user_id,
            role_id,
            tenant_id,
            token_type: token_type.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

impl IdentityVerifier for JwtConfig {
    fn verify_identity(&self, credential: &str) -> Result<Claims, AppError> {
        self.decode(credential)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub token_type: String,
    pub exp: usize,
    pub iat: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_claims() {
        let jwt = JwtConfig::new("unit-secret", 1);
        let (user, role, tenant) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let token = jwt.encode(user, role, tenant).unwrap();
        let claims = jwt.decode(&token).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.role_id, role);
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.token_type, ACCESS_TOKEN);
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = JwtConfig::new("one", 1).encode(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let err = JwtConfig::new("two", 1).decode(&token).unwrap_err();
        assert!(matches!(err, AppError::Token(_)));
    }

    #[test]
    fn rejects_expired_tokens() {
        // jsonwebtoken allows 60s of leeway by default
        let jwt = JwtConfig::new("unit-secret", -2);
        let token = jwt.encode(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert!(jwt.decode(&token).is_err());
    }
}
