//! Session management module.
//!
//! This module provides PTY spawning, the session registry, and the
//! output batching relay. Sessions can be spawned, written to, resized,
//! paused, resumed, and closed; their output flows out through the relay
//! in coalesced frames.

pub mod pty;
pub mod registry;
pub mod relay;

pub use pty::{
    native_factory, NativePtyFactory, PtyEvent, PtyFactory, PtySession, SessionError,
    SessionStatus, SpawnSpec,
};
pub use registry::{SessionInfo, SessionRegistry, SpawnOptions, SpawnedSession};
pub use relay::{start_relay, RelayEvent, FRAME_INTERVAL};
