//! Receive-side reassembly of chunked transfers.
//!
//! The tracker consumes an unordered, possibly-duplicated, interleaved
//! stream of chunk frames plus metadata/done control messages for any
//! number of concurrent transfers, and produces exactly one assembled file
//! per transfer id.
//!
//! All operations are synchronous and run to completion, so within a
//! single event-loop turn there is no finalize race; the finalized-id set
//! closes the window across turns (a replayed done or meta for an already
//! finalized transfer is discarded).
//!
//! Stray traffic is expected, not an error: the control and binary streams
//! are only ordered within themselves, so chunks can outrun their metadata
//! and done signals can outrun the last chunk. Everything that cannot be
//! attributed to a live transfer is dropped silently.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::protocol::{decode_chunk_frame, TransferId, TransferMeta};
use crate::transfer::{percent, progress_snapshot, ProgressFn, TransferDirection};
use crate::MAX_CHUNK_SIZE;

/// A fully reassembled transfer, delivered to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Transfer id
    pub id: TransferId,
    /// Original file name
    pub name: String,
    /// Size announced in the transfer metadata
    pub size: u64,
    /// The assembled file bytes
    pub bytes: Vec<u8>,
}

/// Callback invoked once per transfer with the assembled file.
pub type CompleteFn = Box<dyn FnMut(ReceivedFile) + Send>;

/// Receive state for one in-flight transfer.
#[derive(Debug)]
struct IncomingTransfer {
    meta: TransferMeta,
    slots: Vec<Option<Vec<u8>>>,
    chunks_received: u32,
    bytes_received: u64,
    started_at: Instant,
    finalized: bool,
}

impl IncomingTransfer {
    fn new(meta: TransferMeta) -> Self {
        let slots = vec![None; meta.total_chunks as usize];
        Self {
            meta,
            slots,
            chunks_received: 0,
            bytes_received: 0,
            started_at: Instant::now(),
            finalized: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.chunks_received == self.meta.total_chunks
    }
}

/// Reassembles chunked transfers, keyed by transfer id.
///
/// Supports unbounded concurrent in-flight transfers; chunks carry their
/// transfer id, so no ordering across transfers is required. A transfer
/// whose peer disappears mid-flight stays pending until [`clear`] — the
/// tracker deliberately has no timeout policy of its own.
///
/// [`clear`]: ReassemblyTracker::clear
pub struct ReassemblyTracker {
    active: HashMap<TransferId, IncomingTransfer>,
    finalized: HashSet<TransferId>,
    on_progress: ProgressFn,
    on_complete: CompleteFn,
}

impl std::fmt::Debug for ReassemblyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblyTracker")
            .field("active", &self.active.len())
            .field("finalized", &self.finalized.len())
            .finish_non_exhaustive()
    }
}

impl ReassemblyTracker {
    /// Create a tracker with progress and completion callbacks.
    #[must_use]
    pub fn new(on_progress: ProgressFn, on_complete: CompleteFn) -> Self {
        Self {
            active: HashMap::new(),
            finalized: HashSet::new(),
            on_progress,
            on_complete,
        }
    }

    /// Number of transfers currently pending reassembly.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.active.len()
    }

    /// Whether the given transfer finalized within this session.
    #[must_use]
    pub fn has_finalized(&self, id: &TransferId) -> bool {
        self.finalized.contains(id)
    }

    /// Ingest transfer metadata, allocating reassembly state.
    ///
    /// A second meta for a live transfer is an explicit restart: the new
    /// allocation replaces the old wholesale and already-received chunks
    /// are dropped. Meta for an id that already finalized this session is
    /// discarded, which guards against replayed announcements re-creating
    /// state.
    pub fn on_meta(&mut self, meta: TransferMeta) {
        if self.finalized.contains(&meta.id) {
            warn!(id = %meta.id, "metadata for already-finalized transfer, ignoring");
            return;
        }
        if meta.size > 0
            && (meta.total_chunks == 0
                || u64::from(meta.total_chunks) * (MAX_CHUNK_SIZE as u64) < meta.size)
        {
            warn!(
                id = %meta.id,
                size = meta.size,
                total_chunks = meta.total_chunks,
                "inconsistent transfer metadata, ignoring"
            );
            return;
        }

        debug!(
            id = %meta.id,
            name = %meta.name,
            size = meta.size,
            total_chunks = meta.total_chunks,
            "incoming transfer"
        );

        let id = meta.id.clone();
        let state = IncomingTransfer::new(meta);
        let initial = progress_snapshot(
            &state.meta.name,
            0,
            0,
            state.meta.size,
            state.started_at,
            false,
            TransferDirection::Receive,
        );
        if self.active.insert(id.clone(), state).is_some() {
            warn!(%id, "duplicate metadata for live transfer, restarting it");
        }
        (self.on_progress)(&id, &initial);
    }

    /// Ingest one binary chunk frame.
    ///
    /// Frames that cannot be attributed to a live transfer (undecodable,
    /// unknown id, index out of range) are discarded without error, as are
    /// re-deliveries of an already-filled slot. Fills the slot, updates
    /// counters, emits progress, and finalizes when the last slot fills.
    pub fn on_chunk(&mut self, frame: &[u8]) {
        let frame = match decode_chunk_frame(frame) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "discarding undecodable chunk frame");
                return;
            }
        };

        let Some(state) = self.active.get_mut(&frame.id) else {
            trace!(id = %frame.id, index = frame.index, "chunk for unknown transfer, discarding");
            return;
        };

        let index = frame.index as usize;
        let Some(slot) = state.slots.get_mut(index) else {
            warn!(
                id = %frame.id,
                index = frame.index,
                total_chunks = state.meta.total_chunks,
                "chunk index out of range, discarding"
            );
            return;
        };
        if slot.is_some() {
            trace!(id = %frame.id, index = frame.index, "duplicate chunk, discarding");
            return;
        }

        state.bytes_received += frame.payload.len() as u64;
        state.chunks_received += 1;
        *slot = Some(frame.payload);

        let progress = progress_snapshot(
            &state.meta.name,
            percent(
                u64::from(state.chunks_received),
                u64::from(state.meta.total_chunks),
            ),
            state.bytes_received,
            state.meta.size,
            state.started_at,
            false,
            TransferDirection::Receive,
        );
        let complete = state.is_complete();
        (self.on_progress)(&frame.id, &progress);

        // Chunk count, not byte sum, is the completion trigger; the final
        // chunk is shorter than the rest.
        if complete {
            self.finalize(&frame.id);
        }
    }

    /// Ingest a done signal from the sender.
    ///
    /// Finalizes only when every chunk is already present (including the
    /// zero-chunk empty transfer). Arriving ahead of the last chunk it is
    /// purely advisory — the eventual last chunk finalizes instead. Unknown
    /// or already-finalized ids are discarded, so replayed signals cannot
    /// re-trigger completion.
    pub fn on_done(&mut self, id: &TransferId) {
        let Some(state) = self.active.get(id) else {
            trace!(%id, "done signal for unknown transfer, discarding");
            return;
        };

        let ready = state.is_complete() && !state.finalized;
        let (chunks_received, total_chunks) = (state.chunks_received, state.meta.total_chunks);
        if ready {
            self.finalize(id);
        } else {
            debug!(
                %id,
                chunks_received,
                total_chunks,
                "done signal ahead of final chunk"
            );
        }
    }

    /// Discard all pending reassembly state.
    ///
    /// Called by the session layer on peer loss; a half-filled transfer is
    /// abandoned, never assembled.
    pub fn clear(&mut self) {
        if !self.active.is_empty() {
            debug!(pending = self.active.len(), "dropping pending transfers");
        }
        self.active.clear();
    }

    /// Assemble and deliver a completed transfer. Runs at most once per id.
    fn finalize(&mut self, id: &TransferId) {
        let Some(mut state) = self.active.remove(id) else {
            return;
        };
        if state.finalized {
            return;
        }
        // Guard before any side effect: a callback re-entering the tracker
        // in the same turn sees the transfer as already finalized.
        state.finalized = true;
        self.finalized.insert(id.clone());

        #[allow(clippy::cast_possible_truncation)]
        let mut bytes = Vec::with_capacity(state.meta.size as usize);
        for slot in &state.slots {
            // Never-filled slots cannot occur when finalize is triggered by
            // the counters, but an empty slot degrades to a gap rather than
            // a panic.
            if let Some(chunk) = slot {
                bytes.extend_from_slice(chunk);
            }
        }

        debug!(
            %id,
            name = %state.meta.name,
            bytes = bytes.len(),
            "transfer reassembled"
        );

        let progress = progress_snapshot(
            &state.meta.name,
            100,
            state.bytes_received,
            state.meta.size,
            state.started_at,
            true,
            TransferDirection::Receive,
        );
        (self.on_progress)(id, &progress);
        (self.on_complete)(ReceivedFile {
            id: id.clone(),
            name: state.meta.name.clone(),
            size: state.meta.size,
            bytes,
        });
    }
}
