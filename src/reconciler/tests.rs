//! Reconciler behavior tests

use std::collections::HashSet;
use std::time::Duration;

use crate::engine::{ContainerEngine, EngineStatus, ExecOutput};
use crate::error::Error;
use crate::logstream::LogType;
use crate::model::{ModLoader, ServerStatus};

use super::testutil::{harness, harness_with_minecraft};
use super::{allocate_port_pair, CreateServerRequest};

fn create_request(name: &str) -> CreateServerRequest {
    CreateServerRequest {
        name: name.into(),
        description: String::new(),
        mod_loader: ModLoader::Vanilla,
        game_version: "1.21.1".into(),
        memory_mb: 2048,
        auto_start: false,
        detached: false,
        proxy_hostname: None,
    }
}

#[test]
fn test_allocate_port_pair_skips_taken() {
    let taken: HashSet<u16> = [25600, 25602].into_iter().collect();
    assert_eq!(allocate_port_pair(25600, 25699, &taken), Some((25601, 25603)));

    let full: HashSet<u16> = (25600..=25699).collect();
    assert_eq!(allocate_port_pair(25600, 25699, &full), None);
}

#[tokio::test]
async fn test_create_persists_and_binds_container() {
    let h = harness();
    let server = h.reconciler.create(create_request("smp")).await.unwrap();

    assert_eq!(server.status, ServerStatus::Stopped);
    assert!(server.has_container());
    assert_ne!(server.port, server.rcon_port);

    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Stopped);
    assert_eq!(loaded.container_id, server.container_id);

    // The engine knows the container
    let status = h
        .engine
        .status(server.container_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(status, EngineStatus::Stopped);
}

#[tokio::test]
async fn test_create_rejects_bad_arguments() {
    let h = harness();

    let mut req = create_request("  ");
    assert!(matches!(
        h.reconciler.create(req).await,
        Err(Error::InvalidArgument(_))
    ));

    req = create_request("ok");
    req.memory_mb = 64;
    assert!(matches!(
        h.reconciler.create(req).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_create_port_exhaustion_is_conflict() {
    let mut minecraft = crate::config::MinecraftConfiguration::default();
    minecraft.port_range_min = 25600;
    minecraft.port_range_max = 25601;
    let h = harness_with_minecraft(minecraft);

    h.reconciler.create(create_request("first")).await.unwrap();
    let err = h.reconciler.create(create_request("second")).await;
    assert!(matches!(err, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_create_engine_failure_marks_error() {
    let h = harness();
    h.engine.set_unavailable(true);

    let err = h.reconciler.create(create_request("doomed")).await;
    assert!(matches!(err, Err(Error::EngineUnavailable(_))));

    h.engine.set_unavailable(false);
    let servers = h.db.list_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].status, ServerStatus::Error);
}

#[tokio::test]
async fn test_start_transitions_to_starting() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Stopped, true).await;

    let started = h.reconciler.start(&server.id).await.unwrap();
    assert_eq!(started.status, ServerStatus::Starting);
    assert!(started.last_started.is_some());
    assert_eq!(h.engine.started.lock().len(), 1);
}

#[tokio::test]
async fn test_start_requires_stopped_or_error() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;

    assert!(matches!(
        h.reconciler.start(&server.id).await,
        Err(Error::Precondition(_))
    ));

    // Error state is recoverable
    let errored = h.seed_server(ServerStatus::Error, true).await;
    assert!(h.reconciler.start(&errored.id).await.is_ok());
}

#[tokio::test]
async fn test_start_without_container_fails() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Stopped, false).await;

    assert!(matches!(
        h.reconciler.start(&server.id).await,
        Err(Error::Precondition(_))
    ));
}

#[tokio::test]
async fn test_stop_self_heals_missing_container() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;

    // Engine loses the container behind our back
    h.engine.forget(server.container_id.as_deref().unwrap());

    let stopped = h.reconciler.stop(&server.id).await.unwrap();
    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert!(stopped.container_id.is_none());
}

#[tokio::test]
async fn test_stop_requires_stoppable_state() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Stopped, true).await;

    assert!(matches!(
        h.reconciler.stop(&server.id).await,
        Err(Error::Precondition(_))
    ));

    let unhealthy = h.seed_server(ServerStatus::Unhealthy, true).await;
    assert!(h.reconciler.stop(&unhealthy.id).await.is_ok());
}

#[tokio::test]
async fn test_restart_round_trip() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let container_id = server.container_id.clone().unwrap();

    let restarted = h.reconciler.restart(&server.id).await.unwrap();

    // Stop half then start half, in order
    assert_eq!(h.engine.stopped.lock().as_slice(), &[container_id.clone()]);
    assert_eq!(h.engine.started.lock().as_slice(), &[container_id.clone()]);
    assert_eq!(restarted.status, ServerStatus::Starting);
    assert!(restarted.last_started.is_some());

    // The drift loop observes the engine running and adopts it
    h.reconciler.reconcile_once().await;
    let final_state = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(final_state.status, ServerStatus::Running);
}

#[tokio::test]
async fn test_recreate_replaces_container() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Stopped, true).await;
    let old_container = server.container_id.clone().unwrap();

    let recreated = h.reconciler.recreate(&server.id).await.unwrap();

    assert_eq!(recreated.status, ServerStatus::Stopped);
    assert!(recreated.has_container());
    assert_ne!(recreated.container_id.as_deref(), Some(old_container.as_str()));
    assert!(h.engine.removed.lock().contains(&old_container));
    // Same record, same ports
    assert_eq!(recreated.id, server.id);
    assert_eq!(recreated.port, server.port);
}

#[tokio::test]
async fn test_delete_cascades() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let container_id = server.container_id.clone().unwrap();

    h.reconciler.delete(&server.id).await.unwrap();

    assert!(h.db.get_server(&server.id).await.unwrap().is_none());
    assert!(h.engine.removed.lock().contains(&container_id));
    assert_eq!(
        h.engine.status(&container_id).await.unwrap(),
        EngineStatus::NotFound
    );

    // Repeated delete is a clean not-found
    assert!(matches!(
        h.reconciler.delete(&server.id).await,
        Err(Error::NotFound(..))
    ));
}

#[tokio::test]
async fn test_detached_server_rejects_lifecycle() {
    let h = harness();
    let mut server = h.seed_server(ServerStatus::Stopped, true).await;
    server.detached = true;
    h.db.update_server(&server).await.unwrap();

    assert!(matches!(
        h.reconciler.start(&server.id).await,
        Err(Error::Precondition(_))
    ));
}

#[tokio::test]
async fn test_exec_command_requires_running_and_splices() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let container_id = server.container_id.clone().unwrap();

    h.engine.set_exec_result(ExecOutput {
        stdout: "Seed: [12345]".into(),
        stderr: String::new(),
        exit_code: 0,
    });

    let (output, success) = h.reconciler.exec_command(&server.id, "seed").await.unwrap();
    assert!(success);
    assert_eq!(output, "Seed: [12345]");

    // RCON CLI invocation went through engine exec
    let calls = h.engine.exec_calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec!["rcon-cli".to_string(), "seed".to_string()]);

    // Command and reply spliced into the stream
    let entries = h.logs.read(&container_id, 10);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].entry_type, LogType::Command);
    assert_eq!(entries[1].entry_type, LogType::CommandOutput);
    assert_eq!(entries[0].timestamp, entries[1].timestamp);

    // Not running -> precondition
    let stopped = h.seed_server(ServerStatus::Stopped, true).await;
    assert!(matches!(
        h.reconciler.exec_command(&stopped.id, "seed").await,
        Err(Error::Precondition(_))
    ));

    // Empty command -> invalid argument
    assert!(matches!(
        h.reconciler.exec_command(&server.id, "  ").await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_drift_adopts_engine_truth() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let container_id = server.container_id.clone().unwrap();

    // Probe failure observed by the engine
    h.engine.set_status(&container_id, EngineStatus::Unhealthy);
    h.reconciler.reconcile_once().await;
    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Unhealthy);

    // Probe passes again
    h.engine.set_status(&container_id, EngineStatus::Running);
    h.reconciler.reconcile_once().await;
    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Running);
}

#[tokio::test]
async fn test_drift_clears_binding_when_container_gone() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let container_id = server.container_id.clone().unwrap();

    h.engine.forget(&container_id);
    h.reconciler.reconcile_once().await;

    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Stopped);
    assert!(loaded.container_id.is_none());
}

#[tokio::test]
async fn test_drift_skips_transient_engine_errors() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;

    h.engine.set_unavailable(true);
    h.reconciler.reconcile_once().await;

    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Running);
}

#[tokio::test]
async fn test_drift_skips_locked_server() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Starting, true).await;
    let container_id = server.container_id.clone().unwrap();
    h.engine.set_status(&container_id, EngineStatus::Stopped);

    // A lifecycle operation holds the lock
    let guard = h.reconciler.locks.acquire(&server.id).await.unwrap();
    h.reconciler.reconcile_once().await;
    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Starting);

    drop(guard);
    h.reconciler.reconcile_once().await;
    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_orphan_sweep_converges() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Running, true).await;
    let tracked = server.container_id.clone().unwrap();

    // Engine reports two extra managed containers
    h.engine.add_container(EngineStatus::Running);
    h.engine.add_container(EngineStatus::Stopped);

    let removed = h.reconciler.cleanup_orphans().await.unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(h.engine.list_managed().await.unwrap(), vec![tracked]);
}

#[tokio::test]
async fn test_autostart_starts_stopped_servers() {
    let h = harness();

    let mut auto = h.seed_server(ServerStatus::Stopped, true).await;
    auto.auto_start = true;
    h.db.update_server(&auto).await.unwrap();

    let mut detached = h.seed_server(ServerStatus::Stopped, true).await;
    detached.auto_start = true;
    detached.detached = true;
    h.db.update_server(&detached).await.unwrap();

    let manual = h.seed_server(ServerStatus::Stopped, true).await;

    h.reconciler.autostart_pass().await;

    let auto_loaded = h.db.get_server(&auto.id).await.unwrap().unwrap();
    assert_eq!(auto_loaded.status, ServerStatus::Starting);

    let detached_loaded = h.db.get_server(&detached.id).await.unwrap().unwrap();
    assert_eq!(detached_loaded.status, ServerStatus::Stopped);

    let manual_loaded = h.db.get_server(&manual.id).await.unwrap().unwrap();
    assert_eq!(manual_loaded.status, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_autostart_heals_stale_running_status() {
    let h = harness();

    // Host restarted: record says Running, engine says Stopped
    let mut server = h.seed_server(ServerStatus::Running, true).await;
    server.auto_start = true;
    h.db.update_server(&server).await.unwrap();
    h.engine
        .set_status(server.container_id.as_deref().unwrap(), EngineStatus::Stopped);

    h.reconciler.autostart_pass().await;

    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Starting);
    assert_eq!(h.engine.started.lock().len(), 1);
}

#[tokio::test]
async fn test_route_published_with_hostname() {
    let h = harness();
    let mut req = create_request("routed");
    req.proxy_hostname = Some("Play.Example.com".into());

    let server = h.reconciler.create(req).await.unwrap();

    let route = h.db.get_route(&server.id).await.unwrap().unwrap();
    assert_eq!(route.hostname, "play.example.com");
    assert_eq!(route.backend_address, format!("127.0.0.1:{}", server.port));

    let table = h.proxy.snapshot();
    assert_eq!(
        table.lookup("play.example.com", 25565),
        Some(format!("127.0.0.1:{}", server.port).as_str())
    );
}

#[tokio::test]
async fn test_concurrent_lifecycle_calls_serialize() {
    let h = harness();
    let server = h.seed_server(ServerStatus::Stopped, true).await;

    // Two concurrent starts: one wins, the other sees Starting
    let r1 = h.reconciler.clone();
    let r2 = h.reconciler.clone();
    let id = server.id;

    let (a, b) = tokio::join!(r1.start(&id), r2.start(&id));
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

    // The loser failed the FSM guard, not with a lock error
    let failed = if outcomes[0] { b } else { a };
    assert!(matches!(failed, Err(Error::Precondition(_))));

    let loaded = h.db.get_server(&id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Starting);
    assert_eq!(h.engine.started.lock().len(), 1);
}

#[tokio::test]
async fn test_startup_order_autostart_before_drift() {
    let h = harness();

    let mut server = h.seed_server(ServerStatus::Running, true).await;
    server.auto_start = true;
    h.db.update_server(&server).await.unwrap();
    h.engine
        .set_status(server.container_id.as_deref().unwrap(), EngineStatus::Stopped);

    // Startup runs to completion (orphans, autostart) before any drift tick
    h.reconciler.run_startup(Duration::from_millis(1)).await;

    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Starting);

    // First drift tick then observes the engine truth
    h.reconciler.reconcile_once().await;
    let loaded = h.db.get_server(&server.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ServerStatus::Running);
}
