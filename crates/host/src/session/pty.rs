//! PTY session primitives.
//!
//! This module provides the core PTY spawning and I/O functionality.
//! A [`PtySession`] owns one pseudo-terminal pair and one child process;
//! its output pump emits tagged [`PtyEvent`]s onto the registry's
//! multiplexed event channel.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};
use protocol::{ExitInfo, SessionId};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// A live session with this id already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// The registry is at its configured capacity.
    #[error("session limit reached: {0} sessions")]
    LimitReached(usize),

    /// The session has already been terminated.
    #[error("session already terminated: {0}")]
    AlreadyTerminated(SessionId),

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the session.
    #[error("failed to kill session: {0}")]
    KillFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session is running and output is flowing.
    Running,
    /// Session is running but output delivery is suspended.
    Paused,
    /// Session's process has terminated.
    Exited,
}

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// A raw session event, tagged with the originating session id.
///
/// The exit record for a session is emitted exactly once, after all of
/// that session's output records.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    /// A chunk of output in production order.
    Output {
        /// Originating session.
        session_id: SessionId,
        /// Opaque output bytes.
        data: Bytes,
    },
    /// The session's process terminated.
    Exit {
        /// Originating session.
        session_id: SessionId,
        /// How the process terminated.
        exit: ExitInfo,
    },
}

/// Factory for opening pseudo-terminal pairs.
///
/// The native implementation is constructed lazily and injected into the
/// registry, keeping call sites free of a hard dependency on a specific
/// OS binding.
pub trait PtyFactory: Send + Sync {
    /// Opens a new PTY pair with the given window size.
    fn open(&self, size: PtySize) -> Result<PtyPair, SessionError>;
}

/// [`PtyFactory`] backed by the platform's native PTY system.
pub struct NativePtyFactory;

impl PtyFactory for NativePtyFactory {
    fn open(&self, size: PtySize) -> Result<PtyPair, SessionError> {
        native_pty_system()
            .openpty(size)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))
    }
}

/// Returns the process-wide native PTY factory, constructed on first use.
pub fn native_factory() -> Arc<dyn PtyFactory> {
    static FACTORY: OnceLock<Arc<NativePtyFactory>> = OnceLock::new();
    let factory = FACTORY.get_or_init(|| Arc::new(NativePtyFactory)).clone();
    factory
}

/// Launch specification for a single session, with the working directory
/// and environment already resolved.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Caller-supplied unique session identifier.
    pub id: SessionId,
    /// Executable to launch.
    pub command: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Resolved working directory.
    pub cwd: PathBuf,
    /// Environment variables to set on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

/// A PTY-backed session with a child process.
///
/// The session owns the pseudo-terminal and the child; the registry is
/// the sole holder and the only code path permitted to terminate it.
pub struct PtySession {
    /// Unique session identifier.
    id: SessionId,

    /// The PTY master handle.
    master: Mutex<Box<dyn MasterPty + Send>>,

    /// The writer for the PTY.
    writer: Mutex<Box<dyn Write + Send>>,

    /// The child process.
    child: Mutex<Box<dyn Child + Send + Sync>>,

    /// Flag indicating if the session is still running.
    running: AtomicBool,

    /// Pause gate for the output pump.
    paused: watch::Sender<bool>,

    /// Current terminal size.
    cols: AtomicU16,
    rows: AtomicU16,

    /// Process ID of the spawned child.
    pid: Option<u32>,
}

impl PtySession {
    /// Spawns a new PTY session from a resolved launch spec.
    pub fn spawn(factory: &dyn PtyFactory, spec: SpawnSpec) -> Result<Arc<Self>, SessionError> {
        let pair = factory.open(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (paused, _) = watch::channel(false);

        Ok(Arc::new(PtySession {
            id: spec.id,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            running: AtomicBool::new(true),
            paused,
            cols: AtomicU16::new(spec.cols),
            rows: AtomicU16::new(spec.rows),
            pid,
        }))
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the child, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current terminal size.
    pub fn size(&self) -> (u16, u16) {
        (
            self.cols.load(Ordering::Relaxed),
            self.rows.load(Ordering::Relaxed),
        )
    }

    /// Returns whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns whether output delivery is currently suspended.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns the session's current status.
    pub fn status(&self) -> SessionStatus {
        if !self.is_running() {
            SessionStatus::Exited
        } else if self.is_paused() {
            SessionStatus::Paused
        } else {
            SessionStatus::Running
        }
    }

    /// Writes data to the PTY (stdin of the child process).
    pub async fn write(&self, data: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::AlreadyTerminated(self.id.clone()));
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(data.as_bytes())
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Resizes the PTY to the given dimensions.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::AlreadyTerminated(self.id.clone()));
        }

        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);

        tracing::debug!(session_id = %self.id, cols, rows, "resized PTY");

        Ok(())
    }

    /// Suspends output delivery without killing the process.
    ///
    /// The pump stops issuing reads, so the kernel PTY buffer fills and
    /// the child eventually blocks on write. Idempotent.
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            tracing::debug!(session_id = %self.id, "paused output");
        }
    }

    /// Resumes output delivery after a pause. Idempotent.
    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            tracing::debug!(session_id = %self.id, "resumed output");
        }
    }

    /// Terminates the child process.
    ///
    /// The output pump observes the resulting EOF, reaps the child, and
    /// emits the session's exit record after all preceding output.
    pub async fn kill(&self) -> Result<(), SessionError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SessionError::AlreadyTerminated(self.id.clone()));
        }

        // Release a paused pump so it can observe shutdown and reap.
        self.paused.send_replace(false);

        let mut child = self.child.lock().await;
        child
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }

    /// Starts the output pump for this session.
    ///
    /// The pump reads from the PTY in a blocking task, emits each chunk as
    /// a tagged [`PtyEvent::Output`], and on EOF reaps the child and emits
    /// exactly one [`PtyEvent::Exit`]. While the pause gate is set, no
    /// further reads are issued.
    pub fn start_pump(self: &Arc<Self>, events: mpsc::UnboundedSender<PtyEvent>) {
        let session = Arc::clone(self);

        tokio::spawn(async move {
            let session_id = session.id.clone();

            let reader = {
                let master = session.master.lock().await;
                master.try_clone_reader()
            };
            let reader = match reader {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "failed to get PTY reader");
                    session.running.store(false, Ordering::SeqCst);
                    let exit = session.reap().await;
                    let _ = events.send(PtyEvent::Exit { session_id, exit });
                    return;
                }
            };

            // Wrap the blocking reader for use from spawn_blocking.
            let reader = Arc::new(std::sync::Mutex::new(reader));
            let mut paused = session.paused.subscribe();

            loop {
                // Honor the pause gate before issuing the next read.
                let gate_closed = *paused.borrow();
                if gate_closed && paused.wait_for(|p| !*p).await.is_err() {
                    break;
                }

                if !session.is_running() {
                    tracing::debug!(session_id = %session_id, "pump stopping: session not running");
                    break;
                }

                let reader_clone = Arc::clone(&reader);
                let result = tokio::task::spawn_blocking(move || {
                    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                    let mut reader = reader_clone.lock().unwrap();
                    match reader.read(&mut buffer) {
                        Ok(0) => Ok(None), // EOF
                        Ok(n) => {
                            buffer.truncate(n);
                            Ok(Some(buffer))
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

                match result {
                    Ok(Ok(Some(data))) => {
                        let event = PtyEvent::Output {
                            session_id: session_id.clone(),
                            data: Bytes::from(data),
                        };
                        if events.send(event).is_err() {
                            tracing::debug!(session_id = %session_id, "event channel closed");
                            break;
                        }
                    }
                    Ok(Ok(None)) => {
                        tracing::debug!(session_id = %session_id, "PTY EOF");
                        break;
                    }
                    Ok(Err(e)) => {
                        // On most platforms the PTY read fails with EIO once
                        // the child side is closed; treat it as EOF.
                        if session.is_running() {
                            tracing::debug!(session_id = %session_id, error = %e, "PTY read ended");
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "read task panicked");
                        break;
                    }
                }
            }

            session.running.store(false, Ordering::SeqCst);

            // Reap the child and emit the exit record after all output.
            let exit = session.reap().await;
            tracing::info!(session_id = %session_id, code = ?exit.code, "session exited");
            let _ = events.send(PtyEvent::Exit { session_id, exit });
        });
    }

    /// Waits for the child and converts its status into an [`ExitInfo`].
    ///
    /// The pump is the only caller, so the child is reaped exactly once.
    /// The pump only gets here once the session is over, but the child
    /// may still be live if the pump stopped early (event channel gone),
    /// so kill first; it is harmless against an already-exited process
    /// and guarantees the wait below cannot block.
    async fn reap(&self) -> ExitInfo {
        let mut child = self.child.lock().await;
        let _ = child.kill();
        match child.wait() {
            Ok(status) => ExitInfo {
                code: Some(status.exit_code() as i32),
                signal: None,
            },
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "failed to reap child");
                ExitInfo {
                    code: None,
                    signal: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn spec(id: &str, command: &str, args: &[&str]) -> SpawnSpec {
        SpawnSpec {
            id: id.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: std::env::temp_dir(),
            env: vec![],
            cols: 80,
            rows: 24,
        }
    }

    async fn collect_output(
        rx: &mut mpsc::UnboundedReceiver<PtyEvent>,
        marker: &str,
    ) -> bool {
        let mut combined = Vec::new();
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(PtyEvent::Output { data, .. })) => {
                    combined.extend_from_slice(&data);
                    if String::from_utf8_lossy(&combined).contains(marker) {
                        return true;
                    }
                }
                Ok(Some(PtyEvent::Exit { .. })) => break,
                Ok(None) => break,
                Err(_) => {}
            }
        }
        String::from_utf8_lossy(&combined).contains(marker)
    }

    #[tokio::test]
    async fn spawn_reports_size_and_pid() {
        let session = PtySession::spawn(&NativePtyFactory, spec("t-spawn", "/bin/sh", &[]))
            .expect("failed to spawn");

        assert!(session.is_running());
        assert_eq!(session.size(), (80, 24));
        assert!(session.pid().is_some());
        assert_eq!(session.status(), SessionStatus::Running);

        let _ = session.kill().await;
    }

    #[tokio::test]
    async fn write_round_trips_through_pty() {
        let session = PtySession::spawn(&NativePtyFactory, spec("t-write", "/bin/sh", &[]))
            .expect("failed to spawn");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start_pump(tx);

        session.write("echo write_marker_xyz\n").await.unwrap();
        assert!(collect_output(&mut rx, "write_marker_xyz").await);

        let _ = session.kill().await;
    }

    #[tokio::test]
    async fn resize_updates_dimensions() {
        let session = PtySession::spawn(&NativePtyFactory, spec("t-resize", "/bin/sh", &[]))
            .expect("failed to spawn");

        session.resize(120, 40).await.unwrap();
        assert_eq!(session.size(), (120, 40));

        let _ = session.kill().await;
    }

    #[tokio::test]
    async fn exit_event_carries_code_and_follows_output() {
        let session = PtySession::spawn(
            &NativePtyFactory,
            spec("t-exit", "/bin/sh", &["-c", "echo before_exit; exit 7"]),
        )
        .expect("failed to spawn");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start_pump(tx);

        let mut combined = Vec::new();
        let mut exit = None;
        for _ in 0..100 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(PtyEvent::Output { data, .. })) => combined.extend_from_slice(&data),
                Ok(Some(PtyEvent::Exit { exit: info, .. })) => {
                    exit = Some(info);
                    break;
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }

        let exit = exit.expect("no exit event");
        assert_eq!(exit.code, Some(7));
        assert!(String::from_utf8_lossy(&combined).contains("before_exit"));
        // Exit is the final event; the channel must be closed afterwards.
        assert!(timeout(Duration::from_millis(500), rx.recv())
            .await
            .map(|ev| ev.is_none())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn pause_stops_the_pump() {
        let session = PtySession::spawn(
            &NativePtyFactory,
            spec("t-pause", "/bin/sh", &["-c", "while :; do echo y; done"]),
        )
        .expect("failed to spawn");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start_pump(tx);

        // Output must be flowing first.
        assert!(collect_output(&mut rx, "y").await);

        session.pause();
        assert_eq!(session.status(), SessionStatus::Paused);

        // Let an in-flight read land, then drain everything delivered.
        tokio::time::sleep(Duration::from_millis(200)).await;
        while rx.try_recv().is_ok() {}

        // While paused, no further reads are issued.
        let quiet = timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(quiet.is_err(), "received output while paused");

        session.resume();
        assert!(collect_output(&mut rx, "y").await);

        let _ = session.kill().await;
    }

    #[tokio::test]
    async fn kill_is_rejected_once_terminated() {
        let session = PtySession::spawn(&NativePtyFactory, spec("t-kill", "/bin/sh", &[]))
            .expect("failed to spawn");

        session.kill().await.unwrap();
        assert!(!session.is_running());

        let result = session.kill().await;
        assert!(matches!(result, Err(SessionError::AlreadyTerminated(_))));
    }

    #[tokio::test]
    async fn write_after_kill_fails() {
        let session = PtySession::spawn(&NativePtyFactory, spec("t-dead", "/bin/sh", &[]))
            .expect("failed to spawn");

        let _ = session.kill().await;

        let result = session.write("hello\n").await;
        assert!(matches!(result, Err(SessionError::AlreadyTerminated(_))));
    }

    #[tokio::test]
    async fn kill_while_paused_still_reaps() {
        let session = PtySession::spawn(
            &NativePtyFactory,
            spec("t-pk", "/bin/sh", &["-c", "while :; do echo y; done"]),
        )
        .expect("failed to spawn");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start_pump(tx);

        assert!(collect_output(&mut rx, "y").await);
        session.pause();
        session.kill().await.unwrap();

        // The pump must still deliver the exit record.
        let mut saw_exit = false;
        for _ in 0..100 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(PtyEvent::Exit { .. })) => {
                    saw_exit = true;
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {}
            }
        }
        assert!(saw_exit, "no exit event after kill while paused");
    }

    #[tokio::test]
    async fn spawn_failure_reports_synchronously() {
        let result = PtySession::spawn(
            &NativePtyFactory,
            spec("t-missing", "/nonexistent/definitely-not-a-binary", &[]),
        );
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }
}
