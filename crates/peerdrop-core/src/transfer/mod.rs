//! File transfer engine for Peerdrop.
//!
//! This module handles the two halves of a transfer:
//!
//! - [`ChunkedSender`] turns one file into an ordered stream of framed
//!   chunks bracketed by metadata and a done signal, pacing itself against
//!   transport backpressure
//! - [`reassembly::ReassemblyTracker`] consumes framed chunks for any
//!   number of concurrent transfers and reconstructs each file exactly once
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 64 KiB (configurable, 256 KiB wire maximum)
//! - One metadata control message before the first chunk, one done signal
//!   after the last
//! - Sending is sequential per session; receiving is concurrent by
//!   construction (chunks carry their transfer id)

pub mod reassembly;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::file::{file_name, ChunkReader};
use crate::protocol::{
    chunk_count, encode_chunk_frame, ControlMessage, TransferId, TransferMeta,
};
use crate::transport::Transport;
use crate::{
    DEFAULT_BUFFER_HIGH, DEFAULT_BUFFER_LOW, DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL,
    MAX_CHUNK_SIZE, SEND_YIELD_BATCH,
};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Sending a file
    Send,
    /// Receiving a file
    Receive,
}

/// Progress snapshot for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Completion percentage (0-100)
    pub pct: u8,
    /// Transfer speed in bytes per second
    pub speed_bps: u64,
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes for the transfer
    pub total_bytes: u64,
    /// Estimated time remaining
    pub eta: Option<Duration>,
    /// Whether the transfer finished (delivered exactly once per transfer)
    pub done: bool,
    /// File name
    pub name: String,
    /// Transfer direction
    pub direction: TransferDirection,
}

/// Callback invoked with progress updates, keyed by transfer id.
pub type ProgressFn = Box<dyn FnMut(&TransferId, &TransferProgress) + Send>;

/// Configuration for transfers over one session.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Outbound buffer level above which sending pauses
    pub buffer_high: usize,
    /// Outbound buffer level at which paused sending resumes
    pub buffer_low: usize,
    /// Minimum interval between non-terminal progress updates on the send
    /// path (terminal updates always fire)
    pub progress_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_high: DEFAULT_BUFFER_HIGH,
            buffer_low: DEFAULT_BUFFER_LOW,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl TransferConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                field: "chunk_size",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig {
                field: "chunk_size",
                reason: format!("{} exceeds wire maximum {MAX_CHUNK_SIZE}", self.chunk_size),
            });
        }
        if self.buffer_low > self.buffer_high {
            return Err(Error::InvalidConfig {
                field: "buffer_low",
                reason: format!(
                    "low watermark {} above high watermark {}",
                    self.buffer_low, self.buffer_high
                ),
            });
        }
        Ok(())
    }
}

/// Rate limiter for non-terminal progress updates.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle with the given minimum interval between updates.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true if enough time has passed since the last accepted
    /// update, and marks an update as accepted if so.
    pub fn ready(&mut self) -> bool {
        match self.last {
            Some(t) if t.elapsed() < self.interval => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}

/// Completion percentage from unit counts, rounded to the nearest integer.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent(done_units: u64, total_units: u64) -> u8 {
    if total_units == 0 {
        0
    } else {
        ((done_units as f64 / total_units as f64) * 100.0).round() as u8
    }
}

/// Build a progress snapshot from running totals.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn progress_snapshot(
    name: &str,
    pct: u8,
    bytes_transferred: u64,
    total_bytes: u64,
    started: Instant,
    done: bool,
    direction: TransferDirection,
) -> TransferProgress {
    let elapsed = started.elapsed().as_secs_f64().max(1e-3);
    let speed_bps = (bytes_transferred as f64 / elapsed) as u64;
    let eta = if done || speed_bps == 0 {
        None
    } else {
        let remaining = total_bytes.saturating_sub(bytes_transferred);
        Some(Duration::from_secs_f64(remaining as f64 / speed_bps as f64))
    };

    TransferProgress {
        pct,
        speed_bps,
        bytes_transferred,
        total_bytes,
        eta,
        done,
        name: name.to_string(),
        direction,
    }
}

/// Splits files into framed chunks and emits them through a transport.
///
/// A transfer is a transient activation of [`ChunkedSender::send_file`]; no
/// state persists after the call returns. Both transport primitives are
/// fire-and-forget; reliability and ordering are the transport's contract.
pub struct ChunkedSender<T: Transport> {
    transport: Arc<T>,
    config: TransferConfig,
    on_progress: ProgressFn,
}

impl<T: Transport> std::fmt::Debug for ChunkedSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSender")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ChunkedSender<T> {
    /// Create a sender over the given transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(transport: Arc<T>, config: TransferConfig, on_progress: ProgressFn) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            on_progress,
        })
    }

    /// Send one file: metadata, every chunk in order, then the done signal.
    ///
    /// The file is read incrementally, one chunk at a time. Sending pauses
    /// cooperatively when the transport's buffered amount is above the high
    /// watermark, and yields to the scheduler every [`SEND_YIELD_BATCH`]
    /// chunks regardless.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the transport
    /// rejects a message. No done signal is emitted for a failed transfer;
    /// retrying means a fresh `send_file` call with a fresh id.
    pub async fn send_file(&mut self, path: &Path, id: TransferId) -> Result<()> {
        let mut reader = ChunkReader::open(path, self.config.chunk_size).await?;
        let size = reader.size();
        let name = file_name(path);
        let total_chunks = chunk_count(size, self.config.chunk_size)?;

        debug!(%id, name = %name, size, total_chunks, "starting send");

        self.transport
            .send_control(&ControlMessage::Meta(TransferMeta {
                id: id.clone(),
                name: name.clone(),
                size,
                total_chunks,
            }))?;

        let started = Instant::now();
        let mut throttle = ProgressThrottle::new(self.config.progress_interval);
        let mut sent: u64 = 0;

        throttle.ready();
        let initial =
            progress_snapshot(&name, 0, 0, size, started, false, TransferDirection::Send);
        (self.on_progress)(&id, &initial);

        for index in 0..total_chunks {
            if let Some(buffered) = self.transport.buffered_amount() {
                if buffered > self.config.buffer_high {
                    self.transport.wait_buffered_low().await;
                }
            }

            let payload = reader.next_chunk().await?.ok_or(Error::FileTruncated {
                expected: size,
                actual: sent,
            })?;

            self.transport
                .send_binary(encode_chunk_frame(index, &id, &payload))?;
            sent += payload.len() as u64;

            if throttle.ready() {
                let progress = progress_snapshot(
                    &name,
                    percent(u64::from(index) + 1, u64::from(total_chunks)),
                    sent,
                    size,
                    started,
                    false,
                    TransferDirection::Send,
                );
                (self.on_progress)(&id, &progress);
            }

            // Scheduling fairness for the host event loop; distinct from
            // backpressure, which only engages when the buffer is full.
            if (index + 1) % SEND_YIELD_BATCH == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.transport
            .send_control(&ControlMessage::Done { id: id.clone() })?;

        let progress =
            progress_snapshot(&name, 100, size, size, started, true, TransferDirection::Send);
        (self.on_progress)(&id, &progress);

        debug!(%id, "send complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::protocol::decode_chunk_frame;

    /// Transport that records everything it is asked to send.
    #[derive(Debug, Default)]
    struct RecordingTransport {
        binary: Mutex<Vec<Vec<u8>>>,
        control: Mutex<Vec<ControlMessage>>,
        buffered: Option<usize>,
        waits: AtomicUsize,
    }

    impl Transport for RecordingTransport {
        fn send_binary(&self, frame: Vec<u8>) -> Result<()> {
            self.binary.lock().unwrap().push(frame);
            Ok(())
        }

        fn send_control(&self, msg: &ControlMessage) -> Result<()> {
            self.control.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn buffered_amount(&self) -> Option<usize> {
            // Pretend the buffer drains once we have waited.
            if self.waits.load(Ordering::SeqCst) > 0 {
                self.buffered.map(|_| 0)
            } else {
                self.buffered
            }
        }

        fn wait_buffered_low(&self) -> impl std::future::Future<Output = ()> + Send {
            self.waits.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    fn write_fixture(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    fn small_config() -> TransferConfig {
        TransferConfig {
            chunk_size: 4,
            progress_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let zero = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let oversized = TransferConfig {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..Default::default()
        };
        assert!(oversized.validate().is_err());

        let inverted = TransferConfig {
            buffer_low: 10,
            buffer_high: 5,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 0);
    }

    #[test]
    fn test_throttle() {
        let mut always = ProgressThrottle::new(Duration::ZERO);
        assert!(always.ready());
        assert!(always.ready());

        let mut slow = ProgressThrottle::new(Duration::from_secs(3600));
        assert!(slow.ready());
        assert!(!slow.ready());
    }

    #[tokio::test]
    async fn test_send_file_emits_meta_chunks_done() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_fixture(&dir, "ten.bin", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let transport = Arc::new(RecordingTransport::default());
        let id = TransferId::parse("t1").expect("id");

        let done_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done_count);
        let mut sender = ChunkedSender::new(
            Arc::clone(&transport),
            small_config(),
            Box::new(move |_, p| {
                if p.done {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(p.pct, 100);
                }
            }),
        )
        .expect("sender");

        sender.send_file(&path, id.clone()).await.expect("send");

        let control = transport.control.lock().unwrap();
        assert_eq!(control.len(), 2);
        match &control[0] {
            ControlMessage::Meta(meta) => {
                assert_eq!(meta.id, id);
                assert_eq!(meta.name, "ten.bin");
                assert_eq!(meta.size, 10);
                assert_eq!(meta.total_chunks, 3);
            }
            other => panic!("expected meta first, got {other:?}"),
        }
        assert!(matches!(&control[1], ControlMessage::Done { id: done } if *done == id));

        let binary = transport.binary.lock().unwrap();
        assert_eq!(binary.len(), 3);
        let sizes: Vec<usize> = binary
            .iter()
            .map(|f| decode_chunk_frame(f).expect("frame").payload.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        for (i, frame) in binary.iter().enumerate() {
            let decoded = decode_chunk_frame(frame).expect("frame");
            assert_eq!(decoded.index as usize, i);
            assert_eq!(decoded.id, id);
        }

        assert_eq!(done_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_empty_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_fixture(&dir, "empty.bin", b"");
        let transport = Arc::new(RecordingTransport::default());

        let mut sender = ChunkedSender::new(
            Arc::clone(&transport),
            small_config(),
            Box::new(|_, _| {}),
        )
        .expect("sender");

        sender
            .send_file(&path, TransferId::parse("e0").expect("id"))
            .await
            .expect("send");

        assert!(transport.binary.lock().unwrap().is_empty());
        let control = transport.control.lock().unwrap();
        assert_eq!(control.len(), 2);
        match &control[0] {
            ControlMessage::Meta(meta) => {
                assert_eq!(meta.size, 0);
                assert_eq!(meta.total_chunks, 0);
            }
            other => panic!("expected meta, got {other:?}"),
        }
        assert!(matches!(&control[1], ControlMessage::Done { .. }));
    }

    #[tokio::test]
    async fn test_send_missing_file_emits_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let transport = Arc::new(RecordingTransport::default());

        let mut sender = ChunkedSender::new(
            Arc::clone(&transport),
            small_config(),
            Box::new(|_, _| {}),
        )
        .expect("sender");

        let result = sender
            .send_file(&dir.path().join("missing.bin"), TransferId::generate())
            .await;

        assert!(result.is_err());
        assert!(transport.control.lock().unwrap().is_empty());
        assert!(transport.binary.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_waits_on_backpressure() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_fixture(&dir, "data.bin", &[7u8; 32]);
        let transport = Arc::new(RecordingTransport {
            buffered: Some(DEFAULT_BUFFER_HIGH + 1),
            ..Default::default()
        });

        let mut sender = ChunkedSender::new(
            Arc::clone(&transport),
            small_config(),
            Box::new(|_, _| {}),
        )
        .expect("sender");

        sender
            .send_file(&path, TransferId::generate())
            .await
            .expect("send");

        // Buffer was over the high watermark before the first chunk, so the
        // sender must have suspended exactly once before the gauge drained.
        assert_eq!(transport.waits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.binary.lock().unwrap().len(), 8);
    }
}
