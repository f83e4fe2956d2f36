//! Transport seam for Peerdrop sessions.
//!
//! A transport is whatever carries messages between the two peers — in
//! production a WebRTC-style data channel owned by the signaling layer.
//! This module defines the narrow contract the transfer engine needs:
//! fire-and-forget binary and control sends, an optional buffered-amount
//! gauge, and an awaitable buffered-low event for backpressure.
//!
//! [`ChannelTransport`] is the in-process implementation: a pair of
//! endpoints wired back-to-back over tokio channels, with a shared
//! buffered-byte gauge that models the data-channel
//! `bufferedAmount`/`bufferedamountlow` contract. The integration tests and
//! the CLI loopback command run real transfers through it.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::protocol::ControlMessage;

/// One peer's sending half of a data-channel-like transport.
///
/// Both send primitives are fire-and-forget: no acknowledgement contract is
/// assumed, and reliability plus per-channel ordering are guaranteed by the
/// transport itself, not by callers. The binary and control streams are
/// ordered independently of each other.
pub trait Transport: Send + Sync {
    /// Send one opaque binary message (a chunk frame).
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has shut down.
    fn send_binary(&self, frame: Vec<u8>) -> Result<()>;

    /// Send one structured control message.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has shut down.
    fn send_control(&self, msg: &ControlMessage) -> Result<()>;

    /// Outbound bytes buffered but not yet handed to the peer, if the
    /// transport exposes a gauge. `None` degrades the sender to per-batch
    /// yielding only.
    fn buffered_amount(&self) -> Option<usize> {
        None
    }

    /// Resolve once the outbound buffer has drained to the low watermark.
    ///
    /// Only meaningful for transports with a gauge; the default resolves
    /// immediately.
    fn wait_buffered_low(&self) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }
}

/// Outbound buffer gauge shared between a sending endpoint and the peer
/// receiver that drains it.
#[derive(Debug)]
struct BufferGauge {
    level: AtomicUsize,
    low_water: usize,
    drained: Notify,
}

impl BufferGauge {
    fn new(low_water: usize) -> Self {
        Self {
            level: AtomicUsize::new(0),
            low_water,
            drained: Notify::new(),
        }
    }

    fn add(&self, n: usize) {
        self.level.fetch_add(n, Ordering::AcqRel);
    }

    fn drain(&self, n: usize) {
        let before = self.level.fetch_sub(n, Ordering::AcqRel);
        let after = before.saturating_sub(n);
        if before > self.low_water && after <= self.low_water {
            self.drained.notify_one();
        }
    }
}

/// A message received from the peer endpoint.
#[derive(Debug)]
pub enum ChannelMessage {
    /// Binary chunk frame
    Binary(Vec<u8>),
    /// Structured control message
    Control(ControlMessage),
}

/// In-memory transport endpoint.
///
/// Create a connected pair with [`ChannelTransport::pair`]. Binary sends
/// count toward the endpoint's buffered gauge until the peer's
/// [`ChannelReceiver`] consumes them; control messages travel outside the
/// gauge, mirroring how a data channel's `bufferedAmount` tracks payload.
#[derive(Debug)]
pub struct ChannelTransport {
    binary_tx: mpsc::UnboundedSender<Vec<u8>>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    outbound: Arc<BufferGauge>,
}

/// Receiving half of an in-memory transport endpoint.
#[derive(Debug)]
pub struct ChannelReceiver {
    binary_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    inbound: Arc<BufferGauge>,
}

impl ChannelTransport {
    /// Create a connected endpoint pair with the given low watermark.
    ///
    /// Each side gets a transport (sending half) and a receiver for the
    /// peer's traffic.
    #[must_use]
    pub fn pair(low_water: usize) -> ((Self, ChannelReceiver), (Self, ChannelReceiver)) {
        let a_gauge = Arc::new(BufferGauge::new(low_water));
        let b_gauge = Arc::new(BufferGauge::new(low_water));

        let (a_bin_tx, a_bin_rx) = mpsc::unbounded_channel();
        let (a_ctl_tx, a_ctl_rx) = mpsc::unbounded_channel();
        let (b_bin_tx, b_bin_rx) = mpsc::unbounded_channel();
        let (b_ctl_tx, b_ctl_rx) = mpsc::unbounded_channel();

        let a = Self {
            binary_tx: a_bin_tx,
            control_tx: a_ctl_tx,
            outbound: Arc::clone(&a_gauge),
        };
        let a_recv = ChannelReceiver {
            binary_rx: b_bin_rx,
            control_rx: b_ctl_rx,
            inbound: b_gauge.clone(),
        };
        let b = Self {
            binary_tx: b_bin_tx,
            control_tx: b_ctl_tx,
            outbound: b_gauge,
        };
        let b_recv = ChannelReceiver {
            binary_rx: a_bin_rx,
            control_rx: a_ctl_rx,
            inbound: a_gauge,
        };

        ((a, a_recv), (b, b_recv))
    }
}

impl Transport for ChannelTransport {
    fn send_binary(&self, frame: Vec<u8>) -> Result<()> {
        self.outbound.add(frame.len());
        let len = frame.len();
        self.binary_tx.send(frame).map_err(|_| {
            self.outbound.drain(len);
            Error::ChannelClosed
        })
    }

    fn send_control(&self, msg: &ControlMessage) -> Result<()> {
        self.control_tx
            .send(msg.clone())
            .map_err(|_| Error::ChannelClosed)
    }

    fn buffered_amount(&self) -> Option<usize> {
        Some(self.outbound.level.load(Ordering::Acquire))
    }

    fn wait_buffered_low(&self) -> impl Future<Output = ()> + Send {
        let gauge = Arc::clone(&self.outbound);
        async move {
            while gauge.level.load(Ordering::Acquire) > gauge.low_water {
                gauge.drained.notified().await;
            }
        }
    }
}

impl ChannelReceiver {
    /// Receive the next message from the peer, or `None` once the peer
    /// endpoint has been dropped and its backlog drained.
    ///
    /// Queued control messages are delivered before queued binary frames,
    /// so metadata never trails the chunks it announces. Consuming a binary
    /// message drains the peer's buffered gauge, firing its buffered-low
    /// event when the level crosses the low watermark.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        tokio::select! {
            biased;
            Some(msg) = self.control_rx.recv() => Some(ChannelMessage::Control(msg)),
            Some(frame) = self.binary_rx.recv() => {
                self.inbound.drain(frame.len());
                Some(ChannelMessage::Binary(frame))
            }
            else => None,
        }
    }

    /// Receive without waiting; `None` if nothing is queued right now.
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        if let Ok(msg) = self.control_rx.try_recv() {
            return Some(ChannelMessage::Control(msg));
        }
        if let Ok(frame) = self.binary_rx.try_recv() {
            self.inbound.drain(frame.len());
            return Some(ChannelMessage::Binary(frame));
        }
        None
    }
}
