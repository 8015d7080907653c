//! Identity persistence: users, sessions, auth bootstrap config

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::model::{SessionRecord, User, UserRole};

use super::{from_millis, to_millis, Database, StoreError, StoreResult};

/// Auth bootstrap material; written once on first start.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub recovery_key_digest: String,
}

impl Database {
    pub async fn get_auth_config(&self) -> StoreResult<Option<AuthConfig>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare("SELECT jwt_secret, recovery_key_digest FROM auth_config WHERE id = 1")?;

        match stmt.query_row([], |row| {
            Ok(AuthConfig {
                jwt_secret: row.get(0)?,
                recovery_key_digest: row.get(1)?,
            })
        }) {
            Ok(config) => Ok(Some(config)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn init_auth_config(&self, config: &AuthConfig) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO auth_config (id, jwt_secret, recovery_key_digest, created_at) \
             VALUES (1, ?1, ?2, ?3)",
            params![
                config.jwt_secret,
                config.recovery_key_digest,
                to_millis(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub async fn create_user(&self, user: &User) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.username,
                user.role.to_string(),
                to_millis(&user.created_at)
            ],
        )?;
        Ok(())
    }

    pub async fn get_user(&self, id: &Uuid) -> StoreResult<Option<User>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare("SELECT id, username, role, created_at FROM users WHERE id = ?1")?;

        match stmt.query_row([id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        }) {
            Ok((id, username, role, created_at)) => Ok(Some(User {
                id: Uuid::parse_str(&id)
                    .map_err(|_| StoreError::Corrupt(format!("user id {}", id)))?,
                username,
                role: UserRole::from_str(&role)
                    .ok_or_else(|| StoreError::Corrupt(format!("user role {}", role)))?,
                created_at: from_millis(created_at),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let id: Option<String> = {
            let conn = self.conn().await;
            let mut stmt =
                conn.prepare("SELECT id FROM users WHERE username = ?1")?;

            match stmt.query_row([username], |row| row.get(0)) {
                Ok(id) => Some(id),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(StoreError::from(e)),
            }
        };

        match id {
            Some(id) => {
                let id = Uuid::parse_str(&id)
                    .map_err(|_| StoreError::Corrupt(format!("user id {}", id)))?;
                self.get_user(&id).await
            }
            None => Ok(None),
        }
    }

    pub async fn create_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO sessions (id, user_id, token_digest, expires_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.token_digest,
                to_millis(&session.expires_at),
                to_millis(&session.created_at),
            ],
        )?;
        Ok(())
    }

    pub async fn delete_expired_sessions(&self) -> StoreResult<usize> {
        let conn = self.conn().await;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            [to_millis(&Utc::now())],
        )?;
        Ok(deleted)
    }
}
