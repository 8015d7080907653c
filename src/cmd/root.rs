//! Main daemon command - wires the subsystems and serves the API

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use discopanel::auth::AuthService;
use discopanel::config::Configuration;
use discopanel::engine::{ContainerEngine, DockerEngine};
use discopanel::logstream::LogRegistry;
use discopanel::minecraft;
use discopanel::proxy::{ProxyServer, ProxyState};
use discopanel::reconciler::Reconciler;
use discopanel::router::{self, AppState};
use discopanel::scheduler::TaskScheduler;
use discopanel::store::Database;
use discopanel::upload::UploadManager;

/// Run the daemon
pub async fn run(config_path: &str, debug: bool) -> Result<()> {
    let config = Configuration::load(config_path)?;
    let config = Arc::new(config);

    init_tracing(&config, debug);

    info!("Starting DiscoPanel daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("  API: {}:{}", config.server.host, config.server.port);
    info!("  Data directory: {}", config.storage.data_dir.display());
    info!("  Database: {}", config.database.path.display());

    // Persistence
    let db = Arc::new(Database::open(&config.database.path).context("failed to open database")?);
    if minecraft::seed_global_defaults(&db)
        .await
        .context("failed to seed global settings")?
    {
        info!("Seeded global settings defaults");
    }

    // Container engine
    let engine: Arc<dyn ContainerEngine> = match &config.docker.socket {
        Some(socket) => Arc::new(
            DockerEngine::with_socket(socket, &config.docker.network)
                .context("failed to connect to docker socket")?,
        ),
        None => Arc::new(
            DockerEngine::new(&config.docker.network).context("failed to connect to docker")?,
        ),
    };

    // Log streaming
    let logs = Arc::new(LogRegistry::new(
        engine.clone(),
        config.logging.console_buffer_capacity,
        &config.minecraft.noise_patterns,
    ));

    // Uploads
    let uploads = Arc::new(UploadManager::new(
        config.storage.temp_dir.clone(),
        config.upload.max_upload_size,
        config.upload.session_ttl_secs,
    ));
    match uploads.sweep_temp_dir().await {
        Ok(0) => {}
        Ok(removed) => info!("Swept {} stale upload scratch files", removed),
        Err(e) => warn!("Upload scratch sweep failed: {}", e),
    }
    uploads.clone().start();

    // Proxy
    let proxy_state = Arc::new(ProxyState::new(config.proxy.listeners.clone()));
    match db.list_routes().await {
        Ok(routes) => {
            if let Err(e) = proxy_state.load_routes(routes) {
                warn!("Persisted routes are inconsistent: {}", e);
            }
        }
        Err(e) => warn!("Failed to load proxy routes: {}", e),
    }
    let proxy_server = Arc::new(ProxyServer::new(proxy_state.clone(), &config.proxy));
    if config.proxy.enabled {
        proxy_server
            .start()
            .await
            .context("failed to start proxy listeners")?;
    }

    // Reconciler: startup passes complete before the drift loop starts
    let reconciler = Arc::new(Reconciler::new(
        db.clone(),
        engine.clone(),
        logs.clone(),
        proxy_state.clone(),
        config.storage.clone(),
        config.docker.clone(),
        config.minecraft.clone(),
    ));
    reconciler
        .run_startup(Duration::from_secs(config.minecraft.autostart_delay_secs))
        .await;

    let drift_token = CancellationToken::new();
    let drift_handle = reconciler.clone().spawn_drift_loop(
        Duration::from_secs(config.docker.drift_interval_secs),
        drift_token.clone(),
    );

    // Scheduler
    let scheduler = Arc::new(TaskScheduler::new(
        db.clone(),
        reconciler.clone(),
        engine.clone(),
        Duration::from_secs(config.server.task_check_interval_secs),
    ));
    scheduler.clone().start();

    // Auth
    let auth = Arc::new(
        AuthService::bootstrap(db.clone(), &config.storage.data_dir)
            .await
            .context("auth bootstrap failed")?,
    );

    // HTTP API
    let state = AppState {
        db: db.clone(),
        reconciler: reconciler.clone(),
        scheduler: scheduler.clone(),
        logs: logs.clone(),
        uploads: uploads.clone(),
        proxy_state: proxy_state.clone(),
        proxy_server: proxy_server.clone(),
        auth,
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid bind address")?;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to install CTRL+C handler");
            return;
        }
        warn!("Received shutdown signal");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Starting HTTP server on {}", bind_addr);
    axum_server::bind(bind_addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    // Teardown in reverse wiring order
    info!("HTTP server stopped; shutting down subsystems");
    scheduler.shutdown().await;
    drift_token.cancel();
    let _ = drift_handle.await;
    proxy_server.shutdown().await;
    uploads.shutdown().await;
    logs.shutdown().await;

    info!("Daemon stopped");
    Ok(())
}

fn init_tracing(config: &Configuration, debug: bool) {
    let level = if debug { "debug" } else { &config.logging.level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("discopanel={}", level).into());

    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
