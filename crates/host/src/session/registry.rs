//! Session registry for managing multiple PTY sessions.
//!
//! The registry owns one PTY-backed child process per session id. It is
//! the sole owner of the underlying handles: spawning, writing, resizing,
//! pausing, and terminating all go through it, and raw output/exit events
//! flow out on a single multiplexed channel consumed by the output relay.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::SessionId;
use tokio::sync::mpsc;

use super::pty::{
    PtyEvent, PtyFactory, PtySession, SessionError, SessionStatus, SpawnSpec,
};
use crate::environment::{self, EnvironmentProbe};

/// Dimensions applied when a spawn request omits or zeroes them.
const DEFAULT_DIMENSIONS: (u16, u16) = (80, 24);

/// Parameters for spawning a new session.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Caller-supplied unique session identifier.
    pub id: SessionId,
    /// Executable to launch.
    pub command: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Requested working directory; home is substituted when invalid.
    pub cwd: Option<PathBuf>,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
}

impl SpawnOptions {
    /// Spawn options with default dimensions and no explicit cwd.
    pub fn new(id: impl Into<SessionId>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            cols: DEFAULT_DIMENSIONS.0,
            rows: DEFAULT_DIMENSIONS.1,
        }
    }
}

/// Result of a successful spawn.
#[derive(Debug, Clone)]
pub struct SpawnedSession {
    /// Session identifier.
    pub id: SessionId,
    /// Working directory the session actually runs in.
    pub resolved_cwd: PathBuf,
    /// Process id of the spawned process.
    pub pid: u32,
}

/// Snapshot of a tracked session's metadata.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Process id, if known.
    pub pid: Option<u32>,
    /// Current terminal columns.
    pub cols: u16,
    /// Current terminal rows.
    pub rows: u16,
    /// Current status.
    pub status: SessionStatus,
}

/// Thread-safe registry of PTY sessions.
///
/// Safe for concurrent spawns of distinct ids; operations against the
/// same id serialize on the session's internal locks, and removal from
/// the map is atomic so a second concurrent `close` observes "already
/// gone" and no-ops.
pub struct SessionRegistry {
    /// Map of session id to session.
    sessions: DashMap<SessionId, Arc<PtySession>>,
    /// Factory for opening PTY pairs.
    factory: Arc<dyn PtyFactory>,
    /// Cached login-environment probe.
    environment: EnvironmentProbe,
    /// Multiplexed raw event channel toward the relay.
    events: mpsc::UnboundedSender<PtyEvent>,
    /// Maximum number of concurrently tracked sessions.
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates a registry and returns the receiving end of its raw event
    /// channel.
    pub fn new(
        factory: Arc<dyn PtyFactory>,
        max_sessions: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PtyEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            factory,
            environment: EnvironmentProbe::new(),
            events,
            max_sessions,
        });
        (registry, events_rx)
    }

    /// Spawns a new session.
    ///
    /// Rejects an id that is already live, substitutes the home directory
    /// for an invalid cwd, and merges the cached login environment with
    /// per-session overrides before launching.
    pub async fn spawn(&self, options: SpawnOptions) -> Result<SpawnedSession, SessionError> {
        if self.sessions.contains_key(&options.id) {
            return Err(SessionError::AlreadyExists(options.id));
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(SessionError::LimitReached(self.max_sessions));
        }

        let (cols, rows) = if options.cols == 0 || options.rows == 0 {
            DEFAULT_DIMENSIONS
        } else {
            (options.cols, options.rows)
        };

        let cwd = environment::resolve_cwd(options.cwd.as_deref());
        let env = self.environment.session_environment(&cwd).await;

        let spec = SpawnSpec {
            id: options.id.clone(),
            command: options.command,
            args: options.args,
            cwd: cwd.clone(),
            env,
            cols,
            rows,
        };
        let session = PtySession::spawn(&*self.factory, spec)?;
        let pid = session.pid().unwrap_or(0);

        // A concurrent spawn may have registered the id while the process
        // was being created; the first registration wins.
        let registered = match self.sessions.entry(options.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                session.start_pump(self.events.clone());
                slot.insert(Arc::clone(&session));
                true
            }
        };
        if !registered {
            let _ = session.kill().await;
            return Err(SessionError::AlreadyExists(options.id));
        }

        tracing::info!(
            session_id = %options.id,
            pid,
            cols,
            rows,
            cwd = %cwd.display(),
            "spawned session"
        );

        Ok(SpawnedSession {
            id: options.id,
            resolved_cwd: cwd,
            pid,
        })
    }

    /// Forwards raw input text to a session's process.
    ///
    /// Returns [`SessionError::NotFound`] for unknown ids; callers treat
    /// this as non-fatal since the session has likely already exited.
    pub async fn write(&self, id: &str, data: &str) -> Result<(), SessionError> {
        let session = self
            .get_session(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.write(data).await
    }

    /// Resizes a session's terminal.
    ///
    /// No-op for unknown ids and for zero dimensions.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            tracing::debug!(session_id = %id, cols, rows, "ignoring resize with zero dimension");
            return Ok(());
        }
        let Some(session) = self.get_session(id) else {
            tracing::debug!(session_id = %id, "resize for unknown session");
            return Ok(());
        };
        session.resize(cols, rows).await
    }

    /// Suspends output delivery for a session. No-op on unknown id;
    /// idempotent.
    pub fn pause(&self, id: &str) {
        match self.get_session(id) {
            Some(session) => session.pause(),
            None => tracing::debug!(session_id = %id, "pause for unknown session"),
        }
    }

    /// Resumes output delivery for a session. No-op on unknown id;
    /// idempotent.
    pub fn resume(&self, id: &str) {
        match self.get_session(id) {
            Some(session) => session.resume(),
            None => tracing::debug!(session_id = %id, "resume for unknown session"),
        }
    }

    /// Terminates a session's process and removes it from tracking.
    ///
    /// Idempotent: returns `false` if the session was already gone.
    /// Termination failures are logged and swallowed so teardown always
    /// completes.
    pub async fn close(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            tracing::debug!(session_id = %id, "close for unknown session");
            return false;
        };

        match session.kill().await {
            Ok(()) => tracing::info!(session_id = %id, "closed session"),
            Err(SessionError::AlreadyTerminated(_)) => {
                tracing::debug!(session_id = %id, "session already terminated")
            }
            Err(e) => tracing::warn!(session_id = %id, error = %e, "failed to terminate session"),
        }
        true
    }

    /// Best-effort termination of every tracked session.
    ///
    /// Iterates a snapshot so concurrent registration during shutdown
    /// cannot invalidate the iteration; per-session failures are
    /// swallowed so one stuck session cannot block cleanup of the rest.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tracing::info!(count = ids.len(), "closing all sessions");
        for id in ids {
            self.close(&id).await;
        }
    }

    /// Drops the registry entry for a session whose process has already
    /// exited. Called by the lifecycle coordinator when it observes the
    /// exit record; the id becomes reusable afterwards.
    pub fn remove_exited(&self, id: &str) {
        let removed = self
            .sessions
            .remove_if(id, |_, session| !session.is_running());
        if removed.is_some() {
            tracing::debug!(session_id = %id, "released exited session");
        }
    }

    /// Removes all sessions whose processes have exited.
    pub fn cleanup(&self) {
        self.sessions.retain(|id, session| {
            let keep = session.is_running();
            if !keep {
                tracing::debug!(session_id = %id, "cleaned up exited session");
            }
            keep
        });
    }

    /// Gets a metadata snapshot for one session.
    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.get_session(id).map(|session| {
            let (cols, rows) = session.size();
            SessionInfo {
                id: id.to_string(),
                pid: session.pid(),
                cols,
                rows,
                status: session.status(),
            }
        })
    }

    /// Lists metadata snapshots for all tracked sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                let (cols, rows) = session.size();
                SessionInfo {
                    id: entry.key().clone(),
                    pid: session.pid(),
                    cols,
                    rows,
                    status: session.status(),
                }
            })
            .collect()
    }

    /// Returns whether a session id is currently tracked.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of tracked sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn get_session(&self, id: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }
}
