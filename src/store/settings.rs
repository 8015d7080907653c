//! Server settings persistence
//!
//! The property bag behind effective-config rendering. Rows are keyed
//! `(server_id, key)`; the nil server id holds the global defaults applied
//! to every new server.

use std::collections::HashMap;

use rusqlite::params;
use uuid::Uuid;

use crate::model::GLOBAL_SETTINGS_ID;

use super::{Database, StoreResult};

/// One settings row
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SettingRow {
    pub category: String,
    pub key: String,
    pub value: String,
}

impl Database {
    /// All settings rows for one owner.
    pub async fn get_settings(&self, server_id: &Uuid) -> StoreResult<Vec<SettingRow>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT category, key, value FROM server_settings WHERE server_id = ?1 ORDER BY category, key",
        )?;

        let rows = stmt
            .query_map([server_id.to_string()], |row| {
                Ok(SettingRow {
                    category: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Global defaults; `is_new` is true on first access, before any row was
    /// ever written, so the caller can seed schema defaults.
    pub async fn get_global_settings(&self) -> StoreResult<(Vec<SettingRow>, bool)> {
        let rows = self.get_settings(&GLOBAL_SETTINGS_ID).await?;
        let is_new = rows.is_empty();
        Ok((rows, is_new))
    }

    /// Upsert a batch of settings rows in one transaction.
    pub async fn put_settings(&self, server_id: &Uuid, rows: &[SettingRow]) -> StoreResult<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let owner = server_id.to_string();

        for row in rows {
            tx.execute(
                r#"
                INSERT INTO server_settings (server_id, category, key, value)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (server_id, key)
                DO UPDATE SET category = excluded.category, value = excluded.value
                "#,
                params![owner, row.category, row.key, row.value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove a single key from an owner's bag.
    pub async fn delete_setting(&self, server_id: &Uuid, key: &str) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "DELETE FROM server_settings WHERE server_id = ?1 AND key = ?2",
            params![server_id.to_string(), key],
        )?;
        Ok(())
    }

    /// Global defaults overlaid with the server's own rows, as `key -> value`.
    pub async fn effective_settings(&self, server_id: &Uuid) -> StoreResult<HashMap<String, String>> {
        let mut effective = HashMap::new();
        for row in self.get_settings(&GLOBAL_SETTINGS_ID).await? {
            effective.insert(row.key, row.value);
        }
        for row in self.get_settings(server_id).await? {
            effective.insert(row.key, row.value);
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(category: &str, key: &str, value: &str) -> SettingRow {
        SettingRow {
            category: category.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_global_settings_is_new_once() {
        let db = Database::open_in_memory().unwrap();

        let (rows, is_new) = db.get_global_settings().await.unwrap();
        assert!(rows.is_empty());
        assert!(is_new);

        db.put_settings(&GLOBAL_SETTINGS_ID, &[row("game", "difficulty", "normal")])
            .await
            .unwrap();

        let (rows, is_new) = db.get_global_settings().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!is_new);
    }

    #[tokio::test]
    async fn test_effective_overlay() {
        let db = Database::open_in_memory().unwrap();
        let server_id = Uuid::new_v4();

        db.put_settings(
            &GLOBAL_SETTINGS_ID,
            &[
                row("game", "difficulty", "normal"),
                row("game", "motd", "welcome"),
            ],
        )
        .await
        .unwrap();

        db.put_settings(&server_id, &[row("game", "difficulty", "hard")])
            .await
            .unwrap();

        let effective = db.effective_settings(&server_id).await.unwrap();
        assert_eq!(effective.get("difficulty").map(String::as_str), Some("hard"));
        assert_eq!(effective.get("motd").map(String::as_str), Some("welcome"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        let server_id = Uuid::new_v4();

        db.put_settings(&server_id, &[row("game", "motd", "one")])
            .await
            .unwrap();
        db.put_settings(&server_id, &[row("game", "motd", "two")])
            .await
            .unwrap();

        let rows = db.get_settings(&server_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "two");
    }
}
