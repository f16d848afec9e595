//! Output batching relay.
//!
//! Raw PTY output can arrive as thousands of small chunks per second.
//! Delivering each one across the boundary individually would saturate
//! the message channel and the consumer's render loop, so the relay
//! coalesces each session's chunks into fixed-interval frames: the first
//! chunk after an idle period schedules a flush one frame later, and the
//! flush delivers everything buffered so far as a single event.
//!
//! Exit records flush any buffered output first, so the consumer never
//! observes an exit before all preceding output.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use protocol::{ExitInfo, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pty::PtyEvent;

/// Coalescing interval: one frame at 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// A batched session event on the consumer side of the relay.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// One frame of coalesced output, in production order.
    Output {
        /// Originating session.
        session_id: SessionId,
        /// Concatenated output bytes.
        data: Bytes,
    },
    /// The session's process terminated. Always delivered after every
    /// preceding byte of that session's output.
    Exited {
        /// Originating session.
        session_id: SessionId,
        /// How the process terminated.
        exit: ExitInfo,
    },
}

/// Per-session batching state.
#[derive(Default)]
struct Batch {
    /// Chunks accumulated since the last flush, in arrival order.
    chunks: Vec<Bytes>,
    /// Timer task for the pending flush, if one is scheduled.
    pending: Option<JoinHandle<()>>,
}

impl Batch {
    fn concat(&mut self) -> Bytes {
        let total: usize = self.chunks.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            data.extend_from_slice(&chunk);
        }
        data.freeze()
    }
}

/// Spawns the relay task.
///
/// Consumes raw [`PtyEvent`]s from the registry, emits batched
/// [`RelayEvent`]s toward the lifecycle coordinator. Each session's
/// batching state is independent; there is no cross-session ordering.
pub fn start_relay(
    mut events: mpsc::UnboundedReceiver<PtyEvent>,
    out: mpsc::UnboundedSender<RelayEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut batches: HashMap<SessionId, Batch> = HashMap::new();
        let (ticks_tx, mut ticks_rx) = mpsc::unbounded_channel::<SessionId>();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                event = events.recv() => match event {
                    Some(PtyEvent::Output { session_id, data }) => {
                        let batch = batches.entry(session_id.clone()).or_default();
                        batch.chunks.push(data);
                        if batch.pending.is_none() {
                            // First chunk after an idle period: schedule a
                            // flush one frame from now.
                            let ticks = ticks_tx.clone();
                            batch.pending = Some(tokio::spawn(async move {
                                tokio::time::sleep(FRAME_INTERVAL).await;
                                let _ = ticks.send(session_id);
                            }));
                        }
                    }
                    Some(PtyEvent::Exit { session_id, exit }) => {
                        // Cancel the pending timer and flush whatever is
                        // buffered before forwarding the exit.
                        if let Some(mut batch) = batches.remove(&session_id) {
                            if let Some(timer) = batch.pending.take() {
                                timer.abort();
                            }
                            if !batch.chunks.is_empty() {
                                let _ = out.send(RelayEvent::Output {
                                    session_id: session_id.clone(),
                                    data: batch.concat(),
                                });
                            }
                        }
                        tracing::debug!(session_id = %session_id, "forwarding exit");
                        if out.send(RelayEvent::Exited { session_id, exit }).is_err() {
                            break;
                        }
                    }
                    None => break,
                },

                Some(session_id) = ticks_rx.recv() => {
                    // A tick may arrive for a session that exited in the
                    // meantime; its batch is gone and there is nothing to do.
                    if let Some(batch) = batches.get_mut(&session_id) {
                        batch.pending = None;
                        if !batch.chunks.is_empty() {
                            let data = batch.concat();
                            if out.send(RelayEvent::Output { session_id, data }).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Flush everything still buffered so no produced output is lost.
        for (session_id, mut batch) in batches.drain() {
            if let Some(timer) = batch.pending.take() {
                timer.abort();
            }
            if !batch.chunks.is_empty() {
                let _ = out.send(RelayEvent::Output {
                    session_id,
                    data: batch.concat(),
                });
            }
        }

        tracing::debug!("output relay stopped");
    })
}
