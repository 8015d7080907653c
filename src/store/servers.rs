//! Server persistence

use rusqlite::{params, Row};
use uuid::Uuid;

use crate::model::{ModLoader, Server, ServerStatus};

use super::{from_millis, opt_from_millis, opt_to_millis, to_millis, Database, StoreError, StoreResult};

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerRow> {
    Ok(ServerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        mod_loader: row.get(3)?,
        game_version: row.get(4)?,
        container_id: row.get(5)?,
        status: row.get(6)?,
        port: row.get(7)?,
        rcon_port: row.get(8)?,
        memory_mb: row.get(9)?,
        auto_start: row.get::<_, i64>(10)? != 0,
        detached: row.get::<_, i64>(11)? != 0,
        proxy_hostname: row.get(12)?,
        data_path: row.get(13)?,
        last_started: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Raw row before enum/uuid decoding
struct ServerRow {
    id: String,
    name: String,
    description: String,
    mod_loader: String,
    game_version: String,
    container_id: Option<String>,
    status: String,
    port: u16,
    rcon_port: u16,
    memory_mb: u32,
    auto_start: bool,
    detached: bool,
    proxy_hostname: Option<String>,
    data_path: String,
    last_started: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl ServerRow {
    fn decode(self) -> StoreResult<Server> {
        Ok(Server {
            id: Uuid::parse_str(&self.id)
                .map_err(|_| StoreError::Corrupt(format!("server id {}", self.id)))?,
            name: self.name,
            description: self.description,
            mod_loader: ModLoader::from_str(&self.mod_loader)
                .ok_or_else(|| StoreError::Corrupt(format!("mod loader {}", self.mod_loader)))?,
            game_version: self.game_version,
            container_id: self.container_id.filter(|c| !c.is_empty()),
            status: ServerStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Corrupt(format!("server status {}", self.status)))?,
            port: self.port,
            rcon_port: self.rcon_port,
            memory_mb: self.memory_mb,
            auto_start: self.auto_start,
            detached: self.detached,
            proxy_hostname: self.proxy_hostname.filter(|h| !h.is_empty()),
            data_path: self.data_path,
            last_started: opt_from_millis(self.last_started),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

const SERVER_COLUMNS: &str = "id, name, description, mod_loader, game_version, container_id, \
     status, port, rcon_port, memory_mb, auto_start, detached, proxy_hostname, data_path, \
     last_started, created_at, updated_at";

impl Database {
    pub async fn create_server(&self, server: &Server) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            r#"
            INSERT INTO servers
                (id, name, description, mod_loader, game_version, container_id, status,
                 port, rcon_port, memory_mb, auto_start, detached, proxy_hostname,
                 data_path, last_started, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                server.id.to_string(),
                server.name,
                server.description,
                server.mod_loader.to_string(),
                server.game_version,
                server.container_id,
                server.status.to_string(),
                server.port,
                server.rcon_port,
                server.memory_mb,
                server.auto_start as i64,
                server.detached as i64,
                server.proxy_hostname,
                server.data_path,
                opt_to_millis(&server.last_started),
                to_millis(&server.created_at),
                to_millis(&server.updated_at),
            ],
        )?;
        Ok(())
    }

    pub async fn get_server(&self, id: &Uuid) -> StoreResult<Option<Server>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM servers WHERE id = ?1",
            SERVER_COLUMNS
        ))?;

        let result = stmt.query_row([id.to_string()], server_from_row);
        match result {
            Ok(row) => Ok(Some(row.decode()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn list_servers(&self) -> StoreResult<Vec<Server>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM servers ORDER BY created_at",
            SERVER_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], server_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ServerRow::decode).collect()
    }

    /// Update all mutable fields of a server record.
    pub async fn update_server(&self, server: &Server) -> StoreResult<()> {
        let conn = self.conn().await;
        let updated = conn.execute(
            r#"
            UPDATE servers SET
                name = ?2, description = ?3, mod_loader = ?4, game_version = ?5,
                container_id = ?6, status = ?7, port = ?8, rcon_port = ?9,
                memory_mb = ?10, auto_start = ?11, detached = ?12,
                proxy_hostname = ?13, data_path = ?14, last_started = ?15,
                updated_at = ?16
            WHERE id = ?1
            "#,
            params![
                server.id.to_string(),
                server.name,
                server.description,
                server.mod_loader.to_string(),
                server.game_version,
                server.container_id,
                server.status.to_string(),
                server.port,
                server.rcon_port,
                server.memory_mb,
                server.auto_start as i64,
                server.detached as i64,
                server.proxy_hostname,
                server.data_path,
                opt_to_millis(&server.last_started),
                to_millis(&chrono::Utc::now()),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("server {}", server.id)));
        }
        Ok(())
    }

    /// Lightweight status write used by the drift loop.
    pub async fn update_server_status(&self, id: &Uuid, status: ServerStatus) -> StoreResult<()> {
        let conn = self.conn().await;
        let updated = conn.execute(
            "UPDATE servers SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                status.to_string(),
                to_millis(&chrono::Utc::now())
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("server {}", id)));
        }
        Ok(())
    }

    /// Delete a server and everything it owns.
    pub async fn delete_server_cascade(&self, id: &Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let id = id.to_string();

        tx.execute("DELETE FROM server_settings WHERE server_id = ?1", [&id])?;
        tx.execute("DELETE FROM task_executions WHERE server_id = ?1", [&id])?;
        tx.execute("DELETE FROM scheduled_tasks WHERE server_id = ?1", [&id])?;
        tx.execute("DELETE FROM proxy_routes WHERE server_id = ?1", [&id])?;
        let deleted = tx.execute("DELETE FROM servers WHERE id = ?1", [&id])?;

        tx.commit()?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("server {}", id)));
        }
        Ok(())
    }

    /// Host ports already claimed by any server (player and RCON).
    pub async fn allocated_ports(&self) -> StoreResult<Vec<u16>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare("SELECT port, rcon_port FROM servers")?;

        let mut ports = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u16>(0)?, row.get::<_, u16>(1)?))
        })?;
        for row in rows {
            let (port, rcon_port) = row?;
            ports.push(port);
            ports.push(rcon_port);
        }
        Ok(ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn sample_server(name: &str) -> Server {
        Server {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            mod_loader: ModLoader::Vanilla,
            game_version: "1.21.1".into(),
            container_id: None,
            status: ServerStatus::Stopped,
            port: 25600,
            rcon_port: 25601,
            memory_mb: 2048,
            auto_start: false,
            detached: false,
            proxy_hostname: None,
            data_path: "/tmp/srv".into(),
            last_started: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_server_crud() {
        let db = Database::open_in_memory().unwrap();
        let mut server = sample_server("smp");

        db.create_server(&server).await.unwrap();

        let loaded = db.get_server(&server.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "smp");
        assert_eq!(loaded.status, ServerStatus::Stopped);
        assert!(loaded.container_id.is_none());

        server.container_id = Some("abc123".into());
        server.status = ServerStatus::Running;
        db.update_server(&server).await.unwrap();

        let loaded = db.get_server(&server.id).await.unwrap().unwrap();
        assert_eq!(loaded.container_id.as_deref(), Some("abc123"));
        assert_eq!(loaded.status, ServerStatus::Running);

        db.delete_server_cascade(&server.id).await.unwrap();
        assert!(db.get_server(&server.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_server_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_server(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_allocated_ports() {
        let db = Database::open_in_memory().unwrap();
        let mut a = sample_server("a");
        a.port = 25600;
        a.rcon_port = 25601;
        let mut b = sample_server("b");
        b.port = 25602;
        b.rcon_port = 25603;
        db.create_server(&a).await.unwrap();
        db.create_server(&b).await.unwrap();

        let mut ports = db.allocated_ports().await.unwrap();
        ports.sort_unstable();
        assert_eq!(ports, vec![25600, 25601, 25602, 25603]);
    }
}
