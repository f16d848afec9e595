//! # Paneflow Host Library
//!
//! This crate provides the host-process session core for Paneflow: it
//! spawns shell and agent processes attached to pseudo-terminals,
//! multiplexes many concurrent sessions, and delivers their output to the
//! display consumer in coalesced frames under backpressure.
//!
//! ## Overview
//!
//! The host is the only subsystem that owns OS resources. It provides:
//!
//! - **Session Registry**: One PTY-backed child process per session id,
//!   with spawn/write/resize/pause/resume/close operations
//! - **Output Batching Relay**: Coalesces rapid output into 16 ms frames
//!   and guarantees exit is never observed before preceding output
//! - **Lifecycle Coordination**: Respawns an interactive shell in place
//!   when an agent process exits, keeping the pane slot alive
//! - **Descendant Termination**: Platform-specific process-tree kill for
//!   commands that fork subprocesses
//! - **Environment Probe**: Cached login environment so spawned commands
//!   resolve user-installed tools
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Lifecycle Coordinator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐ │
//! │  │   Session    │──▶│   Output     │──▶│  events to consumer  │ │
//! │  │   Registry   │   │   Relay      │   └──────────────────────┘ │
//! │  └──────┬───────┘   └──────────────┘                            │
//! │         │                                                        │
//! │  ┌──────▼───────┐   ┌──────────────┐   ┌──────────────────────┐ │
//! │  │ PTY children │   │ Environment  │   │ Descendant           │ │
//! │  │ (one/session)│   │ Probe        │   │ Terminator           │ │
//! │  └──────────────┘   └──────────────┘   └──────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use host::lifecycle::LifecycleCoordinator;
//! use host::proctree::platform_process_tree;
//! use host::session::{native_factory, start_relay, SessionRegistry};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (registry, raw_events) = SessionRegistry::new(native_factory(), 64);
//!
//!     let (relay_tx, relay_rx) = mpsc::unbounded_channel();
//!     start_relay(raw_events, relay_tx, CancellationToken::new());
//!
//!     let (events_tx, mut events) = mpsc::unbounded_channel();
//!     let config = host::Config::load_default()?;
//!     let coordinator = LifecycleCoordinator::new(
//!         registry,
//!         platform_process_tree(),
//!         config.session.default_shell,
//!         events_tx,
//!     );
//!
//!     let (commands_tx, commands_rx) = mpsc::unbounded_channel();
//!     coordinator.start(relay_rx, commands_rx);
//!
//!     // Hand `events` and `commands_tx` to the boundary transport...
//!     # let _ = (&mut events, commands_tx);
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`environment`]: Login environment probe and shell resolution
//! - [`lifecycle`]: Spawn/exit/respawn coordination
//! - [`proctree`]: Process-tree enumeration and descendant termination
//! - [`session`]: PTY session registry and output relay

pub mod config;
pub mod environment;
pub mod lifecycle;
pub mod proctree;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    native_factory, PtyEvent, PtyFactory, RelayEvent, SessionError, SessionInfo, SessionRegistry,
    SessionStatus, SpawnOptions, SpawnedSession,
};

// Re-export lifecycle types for convenience
pub use lifecycle::LifecycleCoordinator;

// Re-export proctree types for convenience
pub use proctree::{platform_process_tree, ProcessTree};

/// Initializes the tracing subscriber for the embedding application.
///
/// `RUST_LOG` takes precedence over the supplied default level. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
