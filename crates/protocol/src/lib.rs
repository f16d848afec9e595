//! # Paneflow Protocol Library
//!
//! This crate provides the boundary message definitions shared by the
//! Paneflow host core and the display consumer.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of Paneflow's session transport,
//! providing:
//!
//! - **Message Definitions**: Session commands (spawn, write, resize,
//!   pause, resume, close) and events (spawned, output, exited, respawned)
//! - **Envelope**: Versioned, sequenced wrapper for ordered delivery over
//!   the embedding application's transport
//! - **Error Types**: Protocol-level failure taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Display Consumer (UI)           │
//! ├─────────────────────────────────────────┤
//! │   Flow-Control Client  (crates/client)  │
//! ├──────────── process boundary ───────────┤
//! │   Session Core         (crates/host)    │
//! ├─────────────────────────────────────────┤
//! │   PTY child processes                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Commands flow downward (consumer → host), events flow upward
//! (host → consumer). This crate owns only the message shapes; the
//! embedding application owns the transport.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Message};
//! use protocol::messages::{SessionSpawn, SessionRole};
//!
//! let message = Message::SessionSpawn(SessionSpawn {
//!     session_id: "pane-1".to_string(),
//!     command: "/bin/zsh".to_string(),
//!     args: vec![],
//!     cwd: None,
//!     cols: 120,
//!     rows: 32,
//!     role: SessionRole::Shell,
//! });
//! let envelope = Envelope::new(1, message);
//! let bytes = envelope.to_json().unwrap();
//! let back = Envelope::from_json(&bytes).unwrap();
//! assert_eq!(back, envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Boundary message definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    Envelope, ExitInfo, Message, SessionId, SessionRole, PROTOCOL_VERSION,
};
