//! Watermark-based output flow control.
//!
//! The display consumer processes output at a finite rate; sustained
//! production (a `cat` of a huge file) would otherwise grow the queue of
//! undelivered bytes without bound. The controller tracks a per-session
//! watermark of bytes handed to the consumer but not yet confirmed
//! rendered, and issues pause/resume commands back to the host registry.
//!
//! The two thresholds form a classic hysteresis band: pause fires once
//! when the watermark reaches the high mark, resume fires once when it
//! drains below the low mark, and nothing oscillates in between. The
//! commands are advisory and idempotent on the registry side, so
//! duplicate or late delivery cannot corrupt state.

use std::collections::HashMap;

use protocol::messages::{SessionPause, SessionResume};
use protocol::{Message, SessionId};
use tokio::sync::mpsc;

/// Watermark at which output delivery is paused.
pub const HIGH_WATERMARK: usize = 500_000;

/// Watermark below which output delivery is resumed.
pub const LOW_WATERMARK: usize = 50_000;

/// Per-session flow state.
#[derive(Debug, Default)]
struct SessionFlow {
    /// Bytes delivered to the consumer but not yet confirmed.
    watermark: usize,
    /// Whether a pause command is outstanding.
    paused: bool,
}

/// Consumer-side flow controller.
///
/// Feed every host event through [`accept`](Self::accept) before handing
/// it to the display layer, and call [`confirm`](Self::confirm) once the
/// consumer has fully processed a chunk. Pause/resume commands are sent
/// on the boundary command channel passed at construction.
pub struct FlowController {
    sessions: HashMap<SessionId, SessionFlow>,
    commands: mpsc::UnboundedSender<Message>,
}

impl FlowController {
    /// Creates a controller that emits commands on the given channel.
    pub fn new(commands: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            sessions: HashMap::new(),
            commands,
        }
    }

    /// Feeds one host event through the controller.
    ///
    /// Output events raise the session's watermark and may trigger a
    /// pause; exit events drop the session's flow state. The event is
    /// returned unchanged for the display layer.
    pub fn accept(&mut self, event: Message) -> Message {
        match &event {
            Message::SessionOutput(output) => {
                self.on_output(&output.session_id, output.data.len());
            }
            Message::SessionExited(exited) => {
                // Backpressure state must not survive the session; a
                // respawn under the same id starts from a clean slate.
                self.forget(&exited.session_id);
            }
            _ => {}
        }
        event
    }

    /// Confirms that the consumer fully processed `len` bytes for a
    /// session. May trigger a resume. Unknown sessions are ignored.
    pub fn confirm(&mut self, session_id: &str, len: usize) {
        let Some(flow) = self.sessions.get_mut(session_id) else {
            return;
        };

        flow.watermark = flow.watermark.saturating_sub(len);

        if flow.paused && flow.watermark < LOW_WATERMARK {
            flow.paused = false;
            tracing::debug!(
                session_id,
                watermark = flow.watermark,
                "watermark drained, resuming output"
            );
            self.send(Message::SessionResume(SessionResume {
                session_id: session_id.to_string(),
            }));
        }
    }

    /// Drops all flow state for a session.
    pub fn forget(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Current watermark for a session (0 if untracked).
    pub fn watermark(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|flow| flow.watermark)
            .unwrap_or(0)
    }

    /// Whether a pause command is outstanding for a session.
    pub fn is_paused(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|flow| flow.paused)
            .unwrap_or(false)
    }

    fn on_output(&mut self, session_id: &str, len: usize) {
        let flow = self.sessions.entry(session_id.to_string()).or_default();
        flow.watermark += len;

        if !flow.paused && flow.watermark >= HIGH_WATERMARK {
            flow.paused = true;
            tracing::debug!(
                session_id,
                watermark = flow.watermark,
                "watermark exceeded, pausing output"
            );
            self.send(Message::SessionPause(SessionPause {
                session_id: session_id.to_string(),
            }));
        }
    }

    fn send(&self, command: Message) {
        if self.commands.send(command).is_err() {
            tracing::debug!("boundary command channel closed");
        }
    }
}
