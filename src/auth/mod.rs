//! Caller identity
//!
//! First start writes a recovery key to `${dataDir}/.recovery_key` (mode
//! 0400) and stores its digest; the key redeems the bootstrap admin token.
//! Everything else is stateless JWT verification.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{SessionRecord, User, UserRole};
use crate::store::{AuthConfig, Database};

/// Token lifetime
const TOKEN_TTL_HOURS: i64 = 24;

/// Bootstrap admin account name
const ADMIN_USERNAME: &str = "admin";

pub const RECOVERY_KEY_FILE: &str = ".recovery_key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub username: String,
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct AuthService {
    db: Arc<Database>,
    secret: String,
}

impl AuthService {
    /// Load existing auth material, or mint it on first start.
    pub async fn bootstrap(db: Arc<Database>, data_dir: &Path) -> Result<Self> {
        if let Some(config) = db.get_auth_config().await? {
            return Ok(Self {
                db,
                secret: config.jwt_secret,
            });
        }

        let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let recovery_key = format!(
            "dp-{}-{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );

        let key_path = data_dir.join(RECOVERY_KEY_FILE);
        std::fs::write(&key_path, &recovery_key)
            .map_err(|e| Error::Internal(format!("failed to write recovery key: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o400))
                .map_err(|e| Error::Internal(format!("failed to chmod recovery key: {}", e)))?;
        }

        let admin = User {
            id: Uuid::new_v4(),
            username: ADMIN_USERNAME.into(),
            role: UserRole::Admin,
            created_at: Utc::now(),
        };
        db.create_user(&admin).await?;

        db.init_auth_config(&AuthConfig {
            jwt_secret: secret.clone(),
            recovery_key_digest: digest(&recovery_key),
        })
        .await?;

        info!("Auth bootstrap complete; recovery key written to {:?}", key_path);
        Ok(Self { db, secret })
    }

    /// Mint a bearer token for a user and record the session.
    pub async fn issue_token(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(TOKEN_TTL_HOURS);

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role.to_string(),
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("token encoding failed: {}", e)))?;

        self.db
            .create_session(&SessionRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                token_digest: digest(&token),
                expires_at,
                created_at: now,
            })
            .await?;

        Ok(token)
    }

    /// Verify a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| Error::Precondition("invalid or expired token".into()))
    }

    /// Redeem the recovery key for an admin token.
    pub async fn login_with_recovery_key(&self, key: &str) -> Result<(String, User)> {
        let config = self
            .db
            .get_auth_config()
            .await?
            .ok_or_else(|| Error::Internal("auth config missing".into()))?;

        if digest(key.trim()) != config.recovery_key_digest {
            return Err(Error::Precondition("recovery key does not match".into()));
        }

        let admin = self
            .db
            .get_user_by_username(ADMIN_USERNAME)
            .await?
            .ok_or_else(|| Error::Internal("bootstrap admin user missing".into()))?;

        let token = self.issue_token(&admin).await?;
        Ok((token, admin))
    }
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
