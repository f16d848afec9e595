//! Boundary message definitions for Paneflow.
//!
//! This module defines all message types that cross the boundary between
//! the host-side session core and the display consumer. Commands flow from
//! the consumer to the host; events flow from the host to the consumer.
//! The embedding application owns the transport; this crate owns only the
//! shapes.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Unique identifier for a session. Opaque, caller-supplied.
pub type SessionId = String;

/// Envelope wrapper for all boundary messages.
///
/// The envelope provides versioning and sequence numbers so the embedding
/// transport can detect reordering and check compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number for message ordering.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize the envelope to JSON for the embedding transport.
    pub fn to_json(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an envelope from JSON.
    pub fn from_json(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Top-level message enum containing all boundary message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Commands (consumer -> host)
    /// Request to spawn a new session.
    SessionSpawn(SessionSpawn),
    /// Input to forward to a session's process.
    SessionWrite(SessionWrite),
    /// Terminal resize notification.
    SessionResize(SessionResize),
    /// Suspend output delivery from a session.
    SessionPause(SessionPause),
    /// Continue output delivery from a session.
    SessionResume(SessionResume),
    /// Request to close a session.
    SessionClose(SessionClose),

    // Events (host -> consumer)
    /// A session's process was spawned.
    SessionSpawned(SessionSpawned),
    /// Batched output from a session.
    SessionOutput(SessionOutput),
    /// A session's process exited.
    SessionExited(SessionExited),
    /// An exited session was replaced by a fresh shell under the same id.
    SessionRespawned(SessionRespawned),
    /// Error notification.
    Error(ErrorMessage),
}

/// Role of the process occupying a session. Determines exit handling:
/// a shell exiting retires the session id, while an agent exiting hands
/// the id back to a fresh interactive shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionRole {
    /// An interactive shell.
    Shell,
    /// An agent or tool process.
    Agent,
}

impl SessionRole {
    /// Returns true for the shell role.
    pub fn is_shell(self) -> bool {
        matches!(self, SessionRole::Shell)
    }
}

/// How a session's process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the backend exposes one.
    pub signal: Option<i32>,
}

// ============================================================================
// Commands
// ============================================================================

/// Request to spawn a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpawn {
    /// Caller-supplied unique session identifier.
    pub session_id: SessionId,
    /// Executable to launch.
    pub command: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Requested working directory (host substitutes home if invalid).
    pub cwd: Option<String>,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
    /// Role of the spawned process.
    pub role: SessionRole,
}

/// Input to forward verbatim to a session's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWrite {
    /// Target session.
    pub session_id: SessionId,
    /// Opaque input text.
    pub data: String,
}

/// Terminal resize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResize {
    /// Target session.
    pub session_id: SessionId,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

/// Suspend output delivery from a session without killing the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPause {
    /// Target session.
    pub session_id: SessionId,
}

/// Continue output delivery from a paused session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResume {
    /// Target session.
    pub session_id: SessionId,
}

/// Request to close a session and terminate its process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClose {
    /// Target session.
    pub session_id: SessionId,
}

// ============================================================================
// Events
// ============================================================================

/// Notification that a session's process was spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpawned {
    /// Session identifier.
    pub session_id: SessionId,
    /// Process id of the spawned process.
    pub pid: u32,
    /// Resolved working directory.
    pub cwd: String,
    /// Role of the spawned process.
    pub role: SessionRole,
}

/// Batched output from a session, in production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutput {
    /// Originating session.
    pub session_id: SessionId,
    /// Opaque output bytes.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Notification that a session's process exited.
///
/// For shell sessions this is terminal; for agent sessions the host
/// follows up with [`SessionRespawned`] (or an [`ErrorMessage`] if the
/// respawn failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExited {
    /// Session identifier.
    pub session_id: SessionId,
    /// How the process terminated.
    pub exit: ExitInfo,
}

/// Notification that an exited agent session was replaced by a fresh
/// interactive shell under the same session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRespawned {
    /// Session identifier (unchanged).
    pub session_id: SessionId,
    /// Process id of the replacement shell.
    pub pid: u32,
    /// Shell executable that was spawned, for the consumer's title update.
    pub shell: String,
    /// Working directory of the replacement shell.
    pub cwd: String,
}

/// Error notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Session this error relates to, if any.
    pub session_id: Option<SessionId>,
    /// Human-readable error description.
    pub message: String,
    /// Whether the session (if any) is still usable.
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_current_version() {
        let envelope = Envelope::new(
            7,
            Message::SessionClose(SessionClose {
                session_id: "pane-1".to_string(),
            }),
        );
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.sequence, 7);
    }

    #[test]
    fn message_tagging_is_stable() {
        // The consumer dispatches on the `type` tag; it must not drift.
        let envelope = Envelope::new(
            1,
            Message::SessionPause(SessionPause {
                session_id: "pane-1".to_string(),
            }),
        );
        let json = String::from_utf8(envelope.to_json().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"SessionPause\""), "got: {json}");

        let back = Envelope::from_json(json.as_bytes()).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn output_payload_survives_binary_data() {
        let data: Vec<u8> = (0u8..=255).collect();
        let envelope = Envelope::new(
            2,
            Message::SessionOutput(SessionOutput {
                session_id: "pane-2".to_string(),
                data: data.clone(),
            }),
        );
        let bytes = envelope.to_json().unwrap();
        let back = Envelope::from_json(&bytes).unwrap();
        match back.payload {
            Message::SessionOutput(out) => assert_eq!(out.data, data),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn role_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&SessionRole::Agent).unwrap(),
            "\"agent\""
        );
        assert!(SessionRole::Shell.is_shell());
        assert!(!SessionRole::Agent.is_shell());
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let err = Envelope::from_json(b"{\"version\":1}").unwrap_err();
        assert!(err.to_string().contains("deserialization failed"));
    }
}
