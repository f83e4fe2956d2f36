//! Peer session management.
//!
//! A [`Session`] is the explicit object owning everything one peer
//! relationship needs: the transport handle, a [`ReassemblyTracker`] for
//! inbound transfers, a sequential outbound queue, and a small state
//! machine driven by discrete events (connect, peer joined, peer left,
//! queue drain). There are no process-wide singletons; run several
//! sessions side by side if you talk to several rooms.
//!
//! Observers consume [`SessionEvent`]s from the channel returned by
//! [`Session::new`]. Inbound transport traffic is fed in through
//! [`Session::handle_binary`] and [`Session::handle_control`]; both run to
//! completion without suspending, so each inbound message is processed
//! atomically with respect to the session's state.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{ControlMessage, TransferId};
use crate::transfer::reassembly::{ReassemblyTracker, ReceivedFile};
use crate::transfer::{ChunkedSender, TransferConfig, TransferProgress};
use crate::transport::Transport;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No peer relationship
    Idle,
    /// Signaling started, waiting for the peer
    Connecting,
    /// Peer present, no active send
    Connected,
    /// Draining the outbound queue
    Transferring,
}

/// Events emitted by a session to its observer.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session state changed
    StateChanged(SessionState),
    /// A peer joined the session
    PeerJoined,
    /// The peer left; pending transfers were discarded
    PeerLeft,
    /// Progress update for a transfer in either direction
    Progress {
        /// Transfer id
        id: TransferId,
        /// Progress snapshot
        progress: TransferProgress,
    },
    /// An inbound transfer finished reassembly
    FileReceived(ReceivedFile),
    /// The peer acknowledged receiving a file we sent (informational)
    Downloaded(TransferId),
}

/// One peer session: state machine, reassembly, and outbound queue.
pub struct Session<T: Transport> {
    transport: Arc<T>,
    config: TransferConfig,
    state: SessionState,
    tracker: ReassemblyTracker,
    outbound: VecDeque<PathBuf>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("queued", &self.outbound.len())
            .field("pending_receives", &self.tracker.pending())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> Session<T> {
    /// Create a session over the given transport.
    ///
    /// Returns the session and the event stream observers read from.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        transport: Arc<T>,
        config: TransferConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let tracker = {
            let progress_events = events.clone();
            let complete_events = events.clone();
            let ack_transport = Arc::clone(&transport);
            ReassemblyTracker::new(
                Box::new(move |id: &TransferId, progress: &TransferProgress| {
                    let _ = progress_events.send(SessionEvent::Progress {
                        id: id.clone(),
                        progress: progress.clone(),
                    });
                }),
                Box::new(move |file: ReceivedFile| {
                    // Informational ack; reassembly already completed, so a
                    // send failure here is not a transfer failure.
                    if let Err(e) = ack_transport.send_control(&ControlMessage::Downloaded {
                        id: file.id.clone(),
                    }) {
                        debug!(id = %file.id, error = %e, "could not send download ack");
                    }
                    let _ = complete_events.send(SessionEvent::FileReceived(file));
                }),
            )
        };

        Ok((
            Self {
                transport,
                config,
                state: SessionState::Idle,
                tracker,
                outbound: VecDeque::new(),
                events,
            },
            events_rx,
        ))
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of files waiting in the outbound queue.
    #[must_use]
    pub fn queued_files(&self) -> usize {
        self.outbound.len()
    }

    /// Number of inbound transfers pending reassembly.
    #[must_use]
    pub fn pending_receives(&self) -> usize {
        self.tracker.pending()
    }

    /// Signaling has started; the session is waiting for a peer.
    pub fn connect(&mut self) {
        self.set_state(SessionState::Connecting);
    }

    /// The transport reports a peer joined.
    pub fn peer_joined(&mut self) {
        let _ = self.events.send(SessionEvent::PeerJoined);
        self.set_state(SessionState::Connected);
    }

    /// The transport reports the peer left.
    ///
    /// All pending reassembly state and the unsent queue are discarded; a
    /// transfer interrupted here is abandoned, never assembled, and a retry
    /// after reconnect starts from scratch with a fresh id.
    pub fn peer_left(&mut self) {
        self.tracker.clear();
        if !self.outbound.is_empty() {
            debug!(queued = self.outbound.len(), "dropping unsent queue on peer loss");
            self.outbound.clear();
        }
        let _ = self.events.send(SessionEvent::PeerLeft);
        self.set_state(SessionState::Idle);
    }

    /// Add a file to the outbound queue.
    pub fn queue_file(&mut self, path: impl Into<PathBuf>) {
        self.outbound.push_back(path.into());
    }

    /// Send every queued file, one at a time.
    ///
    /// Each file is awaited to completion before the next starts, which
    /// bounds backpressure interaction to a single active transfer. On
    /// failure the remaining queue is preserved; the failed file is not
    /// retried automatically.
    ///
    /// # Errors
    ///
    /// Returns an error if no peer is connected or a send fails.
    pub async fn send_queued(&mut self) -> Result<()> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        if !matches!(self.state, SessionState::Connected) {
            return Err(Error::NotConnected);
        }

        self.set_state(SessionState::Transferring);
        let result = self.drain_queue().await;
        self.set_state(SessionState::Connected);
        result
    }

    async fn drain_queue(&mut self) -> Result<()> {
        while let Some(path) = self.outbound.pop_front() {
            let id = TransferId::generate();
            let progress_events = self.events.clone();
            let mut sender = ChunkedSender::new(
                Arc::clone(&self.transport),
                self.config.clone(),
                Box::new(move |id: &TransferId, progress: &TransferProgress| {
                    let _ = progress_events.send(SessionEvent::Progress {
                        id: id.clone(),
                        progress: progress.clone(),
                    });
                }),
            )?;

            if let Err(e) = sender.send_file(&path, id).await {
                warn!(path = %path.display(), error = %e, "send failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Feed one inbound binary message from the transport.
    pub fn handle_binary(&mut self, frame: &[u8]) {
        self.tracker.on_chunk(frame);
    }

    /// Feed one inbound control message from the transport.
    pub fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Meta(meta) => self.tracker.on_meta(meta),
            ControlMessage::Done { id } => self.tracker.on_done(&id),
            ControlMessage::Downloaded { id } => {
                debug!(%id, "peer downloaded transfer");
                let _ = self.events.send(SessionEvent::Downloaded(id));
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "session state change");
            self.state = state;
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }
}
