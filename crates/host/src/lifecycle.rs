//! Session lifecycle coordination.
//!
//! The coordinator ties spawn, exit, and the respawn policy together.
//! From the consumer's perspective a terminal is a durable slot: when an
//! agent process finishes, control is handed back to an interactive shell
//! in the same slot, while an actual shell exiting is a genuine
//! end-of-life signal that retires the slot.
//!
//! It also routes consumer commands to the registry, degrading "session
//! not found" to a logged no-op — the consumer races commands against
//! asynchronous exit notifications, and "already gone" is benign.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::messages::{
    ErrorMessage, SessionExited, SessionOutput, SessionRespawned, SessionSpawn, SessionSpawned,
};
use protocol::{Message, SessionId, SessionRole};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::environment;
use crate::proctree::{self, ProcessTree};
use crate::session::registry::{SessionRegistry, SpawnOptions, SpawnedSession};
use crate::session::relay::RelayEvent;
use crate::session::SessionError;

/// Lifecycle bookkeeping for one session.
#[derive(Debug, Clone)]
struct SessionMeta {
    role: SessionRole,
    cwd: PathBuf,
    cols: u16,
    rows: u16,
}

/// Coordinates session lifecycles between the registry and the consumer.
pub struct LifecycleCoordinator {
    /// The session registry.
    registry: Arc<SessionRegistry>,
    /// Platform process-tree capability, for descendant-aware close.
    proctree: Arc<dyn ProcessTree>,
    /// Per-session role and respawn context.
    metas: DashMap<SessionId, SessionMeta>,
    /// Configured shell preference; empty means resolve at respawn time.
    default_shell: String,
    /// Event channel toward the consumer.
    events_out: mpsc::UnboundedSender<Message>,
    /// Shutdown signal for the coordinator task.
    shutdown: CancellationToken,
}

impl LifecycleCoordinator {
    /// Creates a coordinator wired to the given registry.
    ///
    /// `default_shell` is the configured shell preference
    /// (`session.default_shell`); pass an empty string to resolve the
    /// user's shell from the environment at respawn time.
    pub fn new(
        registry: Arc<SessionRegistry>,
        proctree: Arc<dyn ProcessTree>,
        default_shell: String,
        events_out: mpsc::UnboundedSender<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            proctree,
            metas: DashMap::new(),
            default_shell,
            events_out,
            shutdown: CancellationToken::new(),
        })
    }

    /// Starts the coordinator task.
    ///
    /// Consumes batched relay events and consumer commands until shut
    /// down or until the relay side closes.
    pub fn start(
        self: &Arc<Self>,
        mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
        mut commands: mpsc::UnboundedReceiver<Message>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let mut commands_open = true;
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => break,

                    event = relay_events.recv() => match event {
                        Some(event) => coordinator.handle_relay_event(event).await,
                        None => break,
                    },

                    command = commands.recv(), if commands_open => match command {
                        Some(command) => coordinator.handle_command(command).await,
                        None => commands_open = false,
                    },
                }
            }
            tracing::debug!("lifecycle coordinator stopped");
        })
    }

    /// Spawns a session and registers its lifecycle metadata.
    ///
    /// Spawn failure is reported synchronously and registers nothing.
    pub async fn spawn_session(&self, spawn: SessionSpawn) -> Result<SpawnedSession, SessionError> {
        let options = SpawnOptions {
            id: spawn.session_id.clone(),
            command: spawn.command,
            args: spawn.args,
            cwd: spawn.cwd.map(PathBuf::from),
            cols: spawn.cols,
            rows: spawn.rows,
        };

        let spawned = self.registry.spawn(options).await?;

        self.metas.insert(
            spawned.id.clone(),
            SessionMeta {
                role: spawn.role,
                cwd: spawned.resolved_cwd.clone(),
                cols: spawn.cols,
                rows: spawn.rows,
            },
        );

        self.emit(Message::SessionSpawned(SessionSpawned {
            session_id: spawned.id.clone(),
            pid: spawned.pid,
            cwd: spawned.resolved_cwd.to_string_lossy().into_owned(),
            role: spawn.role,
        }));

        Ok(spawned)
    }

    /// Closes a session, terminating known-forking descendants first.
    ///
    /// Agent commands routinely fork subprocesses that would outlive the
    /// root if only the root were signaled; shells are closed directly.
    pub async fn close_session(&self, id: &str) {
        let role = self.metas.get(id).map(|meta| meta.role);

        if role == Some(SessionRole::Agent) {
            if let Some(info) = self.registry.get(id) {
                if let Some(pid) = info.pid {
                    proctree::terminate_descendants(&*self.proctree, pid);
                }
            }
        }

        self.registry.close(id).await;
        self.metas.remove(id);
    }

    /// Returns the tracked role for a session, if it is still live.
    pub fn role(&self, id: &str) -> Option<SessionRole> {
        self.metas.get(id).map(|meta| meta.role)
    }

    /// Shuts down the coordinator and closes every session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all().await;
        self.metas.clear();
    }

    async fn handle_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Output { session_id, data } => {
                self.emit(Message::SessionOutput(SessionOutput {
                    session_id,
                    data: data.to_vec(),
                }));
            }
            RelayEvent::Exited { session_id, exit } => {
                // The process is gone; release the registry slot so the id
                // becomes reusable, then apply the role policy.
                self.registry.remove_exited(&session_id);

                self.emit(Message::SessionExited(SessionExited {
                    session_id: session_id.clone(),
                    exit,
                }));

                match self.metas.remove(&session_id) {
                    Some((_, meta)) if meta.role == SessionRole::Agent => {
                        self.respawn_shell(session_id, meta).await;
                    }
                    Some(_) => {
                        tracing::info!(session_id = %session_id, "shell exited, retiring session");
                    }
                    None => {
                        tracing::debug!(session_id = %session_id, "exit for untracked session");
                    }
                }
            }
        }
    }

    /// The recovery transition: an agent exited, so hand its slot back to
    /// an interactive shell in the same working directory.
    async fn respawn_shell(&self, session_id: SessionId, meta: SessionMeta) {
        let shell = if self.default_shell.is_empty() {
            environment::default_shell()
        } else {
            self.default_shell.clone()
        };
        tracing::info!(
            session_id = %session_id,
            shell = %shell,
            "agent exited, respawning shell in place"
        );

        let options = SpawnOptions {
            id: session_id.clone(),
            command: shell.clone(),
            args: Vec::new(),
            cwd: Some(meta.cwd),
            cols: meta.cols,
            rows: meta.rows,
        };

        match self.registry.spawn(options).await {
            Ok(spawned) => {
                self.metas.insert(
                    session_id.clone(),
                    SessionMeta {
                        role: SessionRole::Shell,
                        cwd: spawned.resolved_cwd.clone(),
                        cols: meta.cols,
                        rows: meta.rows,
                    },
                );
                self.emit(Message::SessionRespawned(SessionRespawned {
                    session_id,
                    pid: spawned.pid,
                    shell,
                    cwd: spawned.resolved_cwd.to_string_lossy().into_owned(),
                }));
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "shell respawn failed");
                self.emit(Message::Error(ErrorMessage {
                    session_id: Some(session_id),
                    message: format!("failed to respawn shell: {e}"),
                    recoverable: false,
                }));
            }
        }
    }

    async fn handle_command(&self, command: Message) {
        match command {
            Message::SessionSpawn(spawn) => {
                let session_id = spawn.session_id.clone();
                if let Err(e) = self.spawn_session(spawn).await {
                    tracing::warn!(session_id = %session_id, error = %e, "spawn failed");
                    self.emit(Message::Error(ErrorMessage {
                        session_id: Some(session_id),
                        message: e.to_string(),
                        recoverable: false,
                    }));
                }
            }
            Message::SessionWrite(write) => {
                // Non-fatal: the session has likely already exited.
                if let Err(e) = self.registry.write(&write.session_id, &write.data).await {
                    tracing::debug!(session_id = %write.session_id, error = %e, "write dropped");
                }
            }
            Message::SessionResize(resize) => {
                if let Some(mut meta) = self.metas.get_mut(&resize.session_id) {
                    if resize.cols > 0 && resize.rows > 0 {
                        meta.cols = resize.cols;
                        meta.rows = resize.rows;
                    }
                }
                if let Err(e) = self
                    .registry
                    .resize(&resize.session_id, resize.cols, resize.rows)
                    .await
                {
                    tracing::debug!(session_id = %resize.session_id, error = %e, "resize dropped");
                }
            }
            Message::SessionPause(pause) => self.registry.pause(&pause.session_id),
            Message::SessionResume(resume) => self.registry.resume(&resume.session_id),
            Message::SessionClose(close) => self.close_session(&close.session_id).await,
            other => {
                tracing::debug!(message = ?other, "ignoring non-command message");
            }
        }
    }

    fn emit(&self, message: Message) {
        if self.events_out.send(message).is_err() {
            tracing::debug!("consumer event channel closed");
        }
    }
}
