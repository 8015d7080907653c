//! Proxy route persistence

use rusqlite::{params, Row};
use uuid::Uuid;

use crate::model::ProxyRoute;

use super::{Database, StoreError, StoreResult};

fn route_from_row(row: &Row<'_>) -> rusqlite::Result<RouteRow> {
    Ok(RouteRow {
        server_id: row.get(0)?,
        hostname: row.get(1)?,
        backend_address: row.get(2)?,
        listener_ports: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
    })
}

struct RouteRow {
    server_id: String,
    hostname: String,
    backend_address: String,
    listener_ports: String,
    enabled: bool,
}

impl RouteRow {
    fn decode(self) -> StoreResult<ProxyRoute> {
        Ok(ProxyRoute {
            server_id: Uuid::parse_str(&self.server_id)
                .map_err(|_| StoreError::Corrupt(format!("route server id {}", self.server_id)))?,
            hostname: self.hostname,
            backend_address: self.backend_address,
            listener_ports: decode_ports(&self.listener_ports),
            enabled: self.enabled,
        })
    }
}

fn encode_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_ports(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

impl Database {
    /// Upsert a server's route. One route per server.
    pub async fn put_route(&self, route: &ProxyRoute) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            r#"
            INSERT INTO proxy_routes (server_id, hostname, backend_address, listener_ports, enabled)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (server_id) DO UPDATE SET
                hostname = excluded.hostname,
                backend_address = excluded.backend_address,
                listener_ports = excluded.listener_ports,
                enabled = excluded.enabled
            "#,
            params![
                route.server_id.to_string(),
                route.hostname,
                route.backend_address,
                encode_ports(&route.listener_ports),
                route.enabled as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn get_route(&self, server_id: &Uuid) -> StoreResult<Option<ProxyRoute>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT server_id, hostname, backend_address, listener_ports, enabled \
             FROM proxy_routes WHERE server_id = ?1",
        )?;

        match stmt.query_row([server_id.to_string()], route_from_row) {
            Ok(row) => Ok(Some(row.decode()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn list_routes(&self) -> StoreResult<Vec<ProxyRoute>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare(
            "SELECT server_id, hostname, backend_address, listener_ports, enabled \
             FROM proxy_routes ORDER BY hostname",
        )?;

        let rows = stmt
            .query_map([], route_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RouteRow::decode).collect()
    }

    pub async fn delete_route(&self, server_id: &Uuid) -> StoreResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "DELETE FROM proxy_routes WHERE server_id = ?1",
            [server_id.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_route_upsert() {
        let db = Database::open_in_memory().unwrap();
        let server_id = Uuid::new_v4();

        let mut route = ProxyRoute::new(server_id, "Play.Example.com", "127.0.0.1:25600".into());
        route.listener_ports = vec![25565, 25566];
        db.put_route(&route).await.unwrap();

        let loaded = db.get_route(&server_id).await.unwrap().unwrap();
        assert_eq!(loaded.hostname, "play.example.com");
        assert_eq!(loaded.listener_ports, vec![25565, 25566]);
        assert!(loaded.enabled);

        route.enabled = false;
        db.put_route(&route).await.unwrap();
        let loaded = db.get_route(&server_id).await.unwrap().unwrap();
        assert!(!loaded.enabled);

        db.delete_route(&server_id).await.unwrap();
        assert!(db.get_route(&server_id).await.unwrap().is_none());
    }
}
