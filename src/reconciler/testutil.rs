//! Shared harness for reconciler tests

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{DockerConfiguration, MinecraftConfiguration, StorageConfiguration};
use crate::engine::mock::MockEngine;
use crate::engine::EngineStatus;
use crate::logstream::LogRegistry;
use crate::model::{ModLoader, Server, ServerStatus};
use crate::proxy::ProxyState;
use crate::store::Database;

use super::Reconciler;

static NEXT_PORT: AtomicU16 = AtomicU16::new(26000);

pub(crate) struct Harness {
    pub db: Arc<Database>,
    pub engine: Arc<MockEngine>,
    pub logs: Arc<LogRegistry>,
    pub proxy: Arc<ProxyState>,
    pub reconciler: Arc<Reconciler>,
    _tmp: tempfile::TempDir,
}

pub(crate) fn harness() -> Harness {
    harness_with_minecraft(MinecraftConfiguration::default())
}

pub(crate) fn harness_with_minecraft(minecraft: MinecraftConfiguration) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::open_in_memory().expect("db"));
    let engine = Arc::new(MockEngine::new());
    let logs = Arc::new(LogRegistry::new(engine.clone(), 1000, &[]));
    let proxy = Arc::new(ProxyState::new(vec![25565]));

    let storage = StorageConfiguration {
        data_dir: tmp.path().join("data"),
        temp_dir: tmp.path().join("tmp"),
        backup_dir: tmp.path().join("backups"),
    };
    std::fs::create_dir_all(&storage.data_dir).expect("data dir");

    let reconciler = Arc::new(
        Reconciler::new(
            db.clone(),
            engine.clone(),
            logs.clone(),
            proxy.clone(),
            storage,
            DockerConfiguration::default(),
            minecraft,
        )
        .with_settle(Duration::from_millis(10)),
    );

    Harness {
        db,
        engine,
        logs,
        proxy,
        reconciler,
        _tmp: tmp,
    }
}

impl Harness {
    /// Insert a server record directly, optionally backed by a mock
    /// container in the matching engine state.
    pub async fn seed_server(&self, status: ServerStatus, with_container: bool) -> Server {
        let port = NEXT_PORT.fetch_add(2, Ordering::SeqCst);
        let id = Uuid::new_v4();

        let container_id = if with_container {
            let engine_status = match status {
                ServerStatus::Running | ServerStatus::Starting => EngineStatus::Running,
                ServerStatus::Unhealthy => EngineStatus::Unhealthy,
                _ => EngineStatus::Stopped,
            };
            Some(self.engine.add_container(engine_status))
        } else {
            None
        };

        let now = Utc::now();
        let server = Server {
            id,
            name: format!("server-{}", port),
            description: String::new(),
            mod_loader: ModLoader::Vanilla,
            game_version: "1.21.1".into(),
            container_id,
            status,
            port,
            rcon_port: port + 1,
            memory_mb: 2048,
            auto_start: false,
            detached: false,
            proxy_hostname: None,
            data_path: format!("/tmp/discopanel-test/{}", id),
            last_started: None,
            created_at: now,
            updated_at: now,
        };
        self.db.create_server(&server).await.expect("seed server");
        server
    }
}
