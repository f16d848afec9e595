//! End-to-end integration tests for the session pipeline.
//!
//! These tests wire the real components together the way the embedding
//! application does: registry → relay → coordinator → consumer events,
//! with the flow controller on the consumer side issuing pause/resume
//! commands back through the command channel.

use std::sync::Arc;
use std::time::Duration;

use client::FlowController;
use host::lifecycle::LifecycleCoordinator;
use host::proctree::platform_process_tree;
use host::session::{native_factory, start_relay, SessionRegistry};
use protocol::messages::{SessionSpawn, SessionWrite};
use protocol::{Message, SessionRole};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Pipeline {
    coordinator: Arc<LifecycleCoordinator>,
    commands: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<Message>,
}

/// Wires registry → relay → coordinator exactly as the host process does.
fn pipeline() -> Pipeline {
    let (registry, raw_events) = SessionRegistry::new(native_factory(), 32);

    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    start_relay(raw_events, relay_tx, CancellationToken::new());

    let (events_tx, events) = mpsc::unbounded_channel();
    let coordinator =
        LifecycleCoordinator::new(registry, platform_process_tree(), String::new(), events_tx);

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    coordinator.start(relay_rx, commands_rx);

    Pipeline {
        coordinator,
        commands: commands_tx,
        events,
    }
}

fn spawn(id: &str, command: &str, args: &[&str], role: SessionRole) -> SessionSpawn {
    SessionSpawn {
        session_id: id.to_string(),
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: None,
        cols: 80,
        rows: 24,
        role,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// =============================================================================
// Order and exit semantics
// =============================================================================

#[tokio::test]
async fn output_arrives_in_production_order_before_exit() {
    let mut p = pipeline();

    p.coordinator
        .spawn_session(spawn(
            "order",
            "/bin/sh",
            &["-c", "printf one; printf two; printf three; exit 5"],
            SessionRole::Shell,
        ))
        .await
        .unwrap();

    let mut output = Vec::new();
    let mut exit_code = None;
    loop {
        match next_event(&mut p.events).await {
            Message::SessionSpawned(_) => {}
            Message::SessionOutput(ev) => {
                assert!(exit_code.is_none(), "output observed after exit");
                output.extend_from_slice(&ev.data);
            }
            Message::SessionExited(ev) => {
                exit_code = Some(ev.exit.code);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(exit_code, Some(Some(5)));
    assert!(
        String::from_utf8_lossy(&output).contains("onetwothree"),
        "output reordered or lost: {:?}",
        String::from_utf8_lossy(&output)
    );

    p.coordinator.shutdown().await;
}

#[tokio::test]
async fn interactive_write_round_trips() {
    let mut p = pipeline();

    p.coordinator
        .spawn_session(spawn("io", "/bin/sh", &[], SessionRole::Shell))
        .await
        .unwrap();

    p.commands
        .send(Message::SessionWrite(SessionWrite {
            session_id: "io".to_string(),
            data: "echo pipeline_marker\n".to_string(),
        }))
        .unwrap();

    let mut combined = Vec::new();
    let mut found = false;
    for _ in 0..100 {
        match timeout(Duration::from_millis(100), p.events.recv()).await {
            Ok(Some(Message::SessionOutput(ev))) => {
                combined.extend_from_slice(&ev.data);
                if String::from_utf8_lossy(&combined).contains("pipeline_marker") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "write output never reached the consumer");

    p.coordinator.shutdown().await;
}

// =============================================================================
// Respawn scenario
// =============================================================================

#[tokio::test]
async fn exited_agent_hands_slot_back_to_a_shell() {
    let mut p = pipeline();

    p.coordinator
        .spawn_session(spawn(
            "s1",
            "/bin/sh",
            &["-c", "exit 2"],
            SessionRole::Agent,
        ))
        .await
        .unwrap();

    // Consumer sees: spawned, (output?), exit with code 2, respawned shell.
    let mut saw_exit = false;
    loop {
        match next_event(&mut p.events).await {
            Message::SessionSpawned(_) | Message::SessionOutput(_) => {}
            Message::SessionExited(ev) => {
                assert_eq!(ev.session_id, "s1");
                assert_eq!(ev.exit.code, Some(2));
                saw_exit = true;
            }
            Message::SessionRespawned(ev) => {
                assert!(saw_exit, "respawn observed before exit");
                assert_eq!(ev.session_id, "s1");
                assert!(ev.pid > 0);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // The respawned shell in the same slot is interactive.
    assert_eq!(p.coordinator.role("s1"), Some(SessionRole::Shell));
    p.commands
        .send(Message::SessionWrite(SessionWrite {
            session_id: "s1".to_string(),
            data: "echo respawned_shell_alive\n".to_string(),
        }))
        .unwrap();

    let mut combined = Vec::new();
    let mut found = false;
    for _ in 0..100 {
        match timeout(Duration::from_millis(100), p.events.recv()).await {
            Ok(Some(Message::SessionOutput(ev))) => {
                combined.extend_from_slice(&ev.data);
                if String::from_utf8_lossy(&combined).contains("respawned_shell_alive") {
                    found = true;
                    break;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {}
        }
    }
    assert!(found, "respawned shell did not answer");

    p.coordinator.shutdown().await;
}

// =============================================================================
// Backpressure across the boundary
// =============================================================================

#[tokio::test]
async fn stalled_consumer_pauses_the_pty() {
    let mut p = pipeline();

    // A producer that floods output far past the high watermark.
    p.coordinator
        .spawn_session(spawn(
            "flood",
            "/bin/sh",
            &["-c", "while :; do printf '%01024d' 7; done"],
            SessionRole::Agent,
        ))
        .await
        .unwrap();

    // The consumer feeds events through the flow controller but never
    // confirms completion, emulating a stalled render path.
    let mut flow = FlowController::new(p.commands.clone());
    let mut paused = false;
    for _ in 0..2000 {
        match timeout(Duration::from_secs(2), p.events.recv()).await {
            Ok(Some(event)) => {
                flow.accept(event);
                if flow.is_paused("flood") {
                    paused = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    assert!(paused, "watermark never reached the high mark");
    assert!(flow.watermark("flood") >= client::HIGH_WATERMARK);

    // The pause command travels back through the coordinator; once it
    // lands, the pump stops reading and frames stop arriving.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while p.events.try_recv().is_ok() {}

    let quiet = timeout(Duration::from_millis(400), p.events.recv()).await;
    assert!(quiet.is_err(), "output kept flowing after pause: {quiet:?}");

    // Confirming everything drains the watermark and resumes the flow.
    let backlog = flow.watermark("flood");
    flow.confirm("flood", backlog);
    assert!(!flow.is_paused("flood"));

    let resumed = timeout(Duration::from_secs(2), p.events.recv()).await;
    assert!(resumed.is_ok(), "output did not resume after resume command");

    p.coordinator.shutdown().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn shutdown_closes_every_session() {
    let p = pipeline();

    // Session ids are opaque caller-supplied strings.
    let ids: Vec<String> = (0..3).map(|_| Uuid::new_v4().to_string()).collect();
    for id in &ids {
        p.coordinator
            .spawn_session(spawn(id, "/bin/sh", &[], SessionRole::Shell))
            .await
            .unwrap();
    }

    p.coordinator.shutdown().await;

    // Closing again is idempotent.
    p.coordinator.close_session(&ids[0]).await;
    p.coordinator.close_session("ghost").await;
}

#[tokio::test]
async fn duplicate_ids_are_rejected_end_to_end() {
    let p = pipeline();

    p.coordinator
        .spawn_session(spawn("dup", "/bin/sh", &[], SessionRole::Shell))
        .await
        .unwrap();

    let second = p
        .coordinator
        .spawn_session(spawn("dup", "/bin/sh", &[], SessionRole::Shell))
        .await;
    assert!(second.is_err(), "duplicate spawn must be rejected");

    p.coordinator.shutdown().await;
}
