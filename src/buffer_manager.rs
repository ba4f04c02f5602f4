use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use log::{debug, warn};

use crate::{
    batch::{Batch, StreamId},
    error::BufferError,
    memory_tier::MemoryTier,
    recency::RecencyList,
    schema::Schema,
    tier::StorageTier,
    tuple::Tuple,
    types::BufferResult,
    utils::HandyRwLock,
};

/// Engine-supplied knobs; the embedding engine's configuration layer
/// decides the values.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Shared byte budget of the memory tier.
    pub memory_budget: usize,
    /// Scratch area of the disk tier.
    pub scratch_dir: PathBuf,
    /// Row count producers should aim for per batch.
    pub batch_target_rows: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            memory_budget: 64 << 20,
            scratch_dir: std::env::temp_dir().join("tuple-buffer-scratch"),
            batch_target_rows: 1024,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StreamStatus {
    /// Accepts `add_batch`.
    Active,
    /// Closed for writes; final row count is known.
    Full,
    /// Terminal; every operation fails with `StreamNotFound`.
    Removed,
}

impl StreamStatus {
    fn rank(&self) -> u8 {
        match self {
            StreamStatus::Active => 0,
            StreamStatus::Full => 1,
            StreamStatus::Removed => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Full => "FULL",
            StreamStatus::Removed => "REMOVED",
        }
    }
}

/// Usage class of a stream; a hook for per-class eviction priority.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StreamKind {
    /// Plan-internal intermediate result.
    Processor,
    /// Large-object chunk channel.
    Lob,
}

struct StreamEntry {
    schema: Arc<Schema>,
    group: String,
    kind: StreamKind,
    status: StreamStatus,
    row_count: u64,
    final_row_count: Option<u64>,
    /// Serializes appends to this stream so begin rows stay contiguous
    /// without holding the stream table lock across tier writes.
    append_lock: Arc<Mutex<()>>,
}

/// The single entry point of the storage engine: owns the stream table,
/// the tier stack and the recency/pin bookkeeping, and mediates all
/// batch placement.
///
/// New and recently read batches live in the memory tier; under budget
/// pressure the least-recently-used unpinned batch is demoted to the
/// next-colder tier, and cold batches are promoted back on read.
pub struct BufferManager {
    streams: RwLock<HashMap<StreamId, StreamEntry>>,
    memory: Arc<MemoryTier>,
    /// Tiers colder than memory, hottest first.
    colder: RwLock<Vec<Arc<dyn StorageTier>>>,
    recency: Mutex<RecencyList>,
    next_stream_id: AtomicU64,
    batch_target_rows: usize,
}

impl BufferManager {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            memory: Arc::new(MemoryTier::new(config.memory_budget)),
            colder: RwLock::new(Vec::new()),
            recency: Mutex::new(RecencyList::new()),
            next_stream_id: AtomicU64::new(0),
            batch_target_rows: config.batch_target_rows,
        }
    }

    /// Register an additional, colder tier (the disk tier at startup).
    pub fn add_storage_tier(&self, tier: Arc<dyn StorageTier>) {
        for stream_id in self.streams.rl().keys() {
            tier.add_stream(*stream_id);
        }
        self.colder.wl().push(tier);
    }

    pub fn batch_target_rows(&self) -> usize {
        self.batch_target_rows
    }

    pub fn memory_used(&self) -> usize {
        self.memory.used()
    }

    /// Whether the batch currently resides in the memory tier. Test and
    /// diagnostics hook; residency is otherwise invisible to callers
    /// except through latency.
    pub fn is_memory_resident(&self, stream_id: StreamId, begin_row: u64) -> bool {
        self.memory.resident(stream_id, begin_row)
    }

    pub fn create_stream(&self, schema: Arc<Schema>, group: &str, kind: StreamKind) -> StreamId {
        let id = StreamId::new(self.next_stream_id.fetch_add(1, Ordering::SeqCst) + 1);

        self.memory.add_stream(id);
        for tier in self.colder.rl().iter() {
            tier.add_stream(id);
        }

        let entry = StreamEntry {
            schema,
            group: group.to_string(),
            kind,
            status: StreamStatus::Active,
            row_count: 0,
            final_row_count: None,
            append_lock: Arc::new(Mutex::new(())),
        };
        self.streams.wl().insert(id, entry);

        debug!("created {} (group {:?}, kind {:?})", id, group, kind);
        id
    }

    /// Append rows to the stream as the next batch. The batch lands in
    /// the memory tier; on budget pressure the manager demotes unpinned
    /// victims first and fails with `MemoryNotAvailable` only when none
    /// exists (the caller's backpressure signal).
    ///
    /// Returns the begin row the batch was placed at.
    pub fn add_batch(&self, stream_id: StreamId, rows: Vec<Tuple>) -> Result<u64, BufferError> {
        let (schema, append_lock) = {
            let streams = self.streams.rl();
            let entry = streams
                .get(&stream_id)
                .ok_or(BufferError::StreamNotFound(stream_id))?;
            if entry.status != StreamStatus::Active {
                return Err(BufferError::StreamClosed(stream_id));
            }
            (entry.schema.clone(), entry.append_lock.clone())
        };

        let _append = append_lock.lock().unwrap();

        // Re-read under the append lock; a concurrent close or append
        // may have advanced the stream.
        let begin_row = {
            let streams = self.streams.rl();
            let entry = streams
                .get(&stream_id)
                .ok_or(BufferError::StreamNotFound(stream_id))?;
            if entry.status != StreamStatus::Active {
                return Err(BufferError::StreamClosed(stream_id));
            }
            entry.row_count + 1
        };

        // An empty batch occupies no rows; there is nothing to store
        // and the next append reuses the same begin row.
        if rows.is_empty() {
            return Ok(begin_row);
        }

        let added_rows = rows.len() as u64;
        let batch = Arc::new(Batch::new(stream_id, begin_row, rows, schema));
        self.store_hot(batch)?;

        self.recency.lock().unwrap().touch((stream_id, begin_row));

        {
            let mut streams = self.streams.wl();
            match streams.get_mut(&stream_id) {
                Some(entry) => entry.row_count += added_rows,
                // Removed while we were writing; drop what we stored.
                None => {
                    self.discard_everywhere(stream_id, begin_row);
                    return Err(BufferError::StreamNotFound(stream_id));
                }
            }
        }

        Ok(begin_row)
    }

    /// The batch covering `row`, promoting it back into memory when it
    /// comes from a colder tier. `Ok(None)` means no batch covers the
    /// row yet; whether to wait for more production is the caller's
    /// call.
    pub fn get_batch(
        &self,
        stream_id: StreamId,
        row: u64,
    ) -> Result<Option<Arc<Batch>>, BufferError> {
        let schema = self
            .stream_schema(stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;

        if let Some(batch) = self.memory.get_batch(stream_id, row, &schema)? {
            self.recency
                .lock()
                .unwrap()
                .touch((stream_id, batch.begin_row()));
            return Ok(Some(batch));
        }

        let colder: Vec<Arc<dyn StorageTier>> = self.colder.rl().clone();
        for tier in colder {
            match tier.get_batch(stream_id, row, &schema) {
                Ok(Some(batch)) => {
                    self.promote(&*tier, batch.clone())?;
                    return Ok(Some(batch));
                }
                Ok(None) => continue,
                // The tier never saw this stream; colder ones may have.
                Err(BufferError::StreamNotFound(_)) => continue,
                Err(BufferError::Io(msg)) => {
                    // Unreadable scratch data is fatal for the stream,
                    // not the engine.
                    warn!("disk tier failed reading {}: {}", stream_id, msg);
                    self.remove_stream(stream_id)?;
                    return Err(BufferError::Io(msg));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Hold the batch resident: a pinned batch is never evicted or
    /// migrated by internal housekeeping. Pins nest; every pin needs a
    /// matching unpin.
    pub fn pin_batch(&self, stream_id: StreamId, begin_row: u64) -> BufferResult {
        self.ensure_stream(stream_id)?;

        if self.recency.lock().unwrap().pin(&(stream_id, begin_row)) {
            return Ok(());
        }

        // Not memory-resident; promote it, then pin.
        match self.get_batch(stream_id, begin_row)? {
            Some(batch) if batch.begin_row() == begin_row => {
                if self.recency.lock().unwrap().pin(&(stream_id, begin_row)) {
                    Ok(())
                } else {
                    // Promotion was skipped because memory is pinned
                    // full; surface the backpressure.
                    Err(BufferError::MemoryNotAvailable)
                }
            }
            _ => Err(BufferError::unpin_mismatch(stream_id, begin_row)),
        }
    }

    /// Release one pin. Unpinning below zero is a caller bug and fails
    /// loudly rather than clamping, since it would corrupt eviction
    /// safety.
    pub fn unpin_batch(&self, stream_id: StreamId, begin_row: u64) -> BufferResult {
        self.ensure_stream(stream_id)?;

        self.recency
            .lock()
            .unwrap()
            .unpin(&(stream_id, begin_row))
            .map(|_| ())
            .map_err(|_| BufferError::unpin_mismatch(stream_id, begin_row))
    }

    pub fn get_row_count(&self, stream_id: StreamId) -> Result<u64, BufferError> {
        let streams = self.streams.rl();
        let entry = streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        Ok(entry.row_count)
    }

    pub fn get_final_row_count(&self, stream_id: StreamId) -> Result<u64, BufferError> {
        let streams = self.streams.rl();
        let entry = streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        entry
            .final_row_count
            .ok_or(BufferError::StreamNotFinalized(stream_id))
    }

    pub fn get_status(&self, stream_id: StreamId) -> Result<StreamStatus, BufferError> {
        let streams = self.streams.rl();
        let entry = streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        Ok(entry.status)
    }

    pub fn get_kind(&self, stream_id: StreamId) -> Result<StreamKind, BufferError> {
        let streams = self.streams.rl();
        let entry = streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        Ok(entry.kind)
    }

    /// Forward-only lifecycle transitions: `ACTIVE -> FULL -> REMOVED`.
    /// Going `FULL` records the final row count; `REMOVED` tears the
    /// stream down.
    pub fn set_status(&self, stream_id: StreamId, to: StreamStatus) -> BufferResult {
        {
            let mut streams = self.streams.wl();
            let entry = streams
                .get_mut(&stream_id)
                .ok_or(BufferError::StreamNotFound(stream_id))?;

            if to.rank() < entry.status.rank() {
                return Err(BufferError::InvalidStateTransition {
                    stream: stream_id,
                    from: entry.status.name(),
                    to: to.name(),
                });
            }
            if to == entry.status {
                return Ok(());
            }

            if to == StreamStatus::Full {
                entry.status = StreamStatus::Full;
                entry.final_row_count = Some(entry.row_count);
                debug!("{} closed at {} rows", stream_id, entry.row_count);
                return Ok(());
            }
        }

        // to == Removed
        self.remove_stream(stream_id)
    }

    /// Explicitly discard a consumed batch from every tier. Absent
    /// batches are a no-op; this path may discard pinned data (the
    /// caller owns that risk).
    pub fn remove_batch(&self, stream_id: StreamId, begin_row: u64) -> BufferResult {
        self.ensure_stream(stream_id)?;
        self.discard_everywhere(stream_id, begin_row);
        Ok(())
    }

    /// Remove the stream from every tier. Safe to call while batches
    /// are pinned by a concurrently cancelling caller; calling it again
    /// is a no-op.
    pub fn remove_stream(&self, stream_id: StreamId) -> BufferResult {
        if self.streams.wl().remove(&stream_id).is_none() {
            return Ok(());
        }

        self.memory.remove_stream(stream_id);
        for tier in self.colder.rl().iter() {
            tier.remove_stream(stream_id);
        }
        self.recency.lock().unwrap().remove_stream(stream_id);

        debug!("removed {}", stream_id);
        Ok(())
    }

    /// Bulk teardown of every stream belonging to the group (one query
    /// or session ending).
    pub fn remove_streams(&self, group: &str) -> BufferResult {
        let ids: Vec<StreamId> = self
            .streams
            .rl()
            .iter()
            .filter(|(_, entry)| entry.group == group)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            self.remove_stream(id)?;
        }
        Ok(())
    }

    /// Engine teardown: releases every tier's resources, including the
    /// disk tier's scratch files.
    pub fn shutdown(&self) {
        self.memory.shutdown();
        for tier in self.colder.rl().iter() {
            tier.shutdown();
        }
        self.streams.wl().clear();
        *self.recency.lock().unwrap() = RecencyList::new();
    }

    /// Write into the memory tier, demoting victims until it fits.
    fn store_hot(&self, batch: Arc<Batch>) -> BufferResult {
        loop {
            match self.memory.add_batch(batch.clone()) {
                Ok(()) => return Ok(()),
                Err(BufferError::CapacityExceeded) => self.evict_one()?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Demote the least-recently-used unpinned memory-resident batch to
    /// the next-colder tier. `MemoryNotAvailable` when there is no
    /// victim or nowhere colder to put one.
    fn evict_one(&self) -> BufferResult {
        let colder = self
            .colder
            .rl()
            .first()
            .cloned()
            .ok_or(BufferError::MemoryNotAvailable)?;

        let (victim_stream, victim_begin) = self
            .recency
            .lock()
            .unwrap()
            .take_victim()
            .ok_or(BufferError::MemoryNotAvailable)?;

        // Stale recency entries (stream removed after selection) just
        // dissolve here.
        let schema = match self.stream_schema(victim_stream) {
            Some(schema) => schema,
            None => return Ok(()),
        };
        let batch = match self.memory.get_batch(victim_stream, victim_begin, &schema) {
            Ok(Some(batch)) if batch.begin_row() == victim_begin => batch,
            _ => return Ok(()),
        };

        // Write cold first, then drop the hot copy, so a failed demotion
        // never loses the batch.
        if let Err(e) = colder.add_batch(batch.clone()) {
            self.recency
                .lock()
                .unwrap()
                .touch((victim_stream, victim_begin));
            if let BufferError::Io(msg) = &e {
                // Scratch failure kills the victim's stream, not the
                // engine; the write that triggered eviction retries.
                warn!("demotion of {} failed: {}", batch, msg);
                self.remove_stream(victim_stream)?;
                return Ok(());
            }
            return Err(e);
        }

        {
            let recency = self.recency.lock().unwrap();
            // A reader re-touched (and possibly pinned) the victim while
            // the cold copy was being written; keep the hot copy and
            // drop the cold one instead.
            if recency.contains(&(victim_stream, victim_begin)) {
                drop(recency);
                let _ = colder.remove_batch(victim_stream, victim_begin);
                return Ok(());
            }
            self.memory.remove_batch(victim_stream, victim_begin)?;
        }
        debug!("demoted {} to {}", batch, colder.name());
        Ok(())
    }

    /// Copy a cold batch back into the memory tier and drop the cold
    /// copy. When memory is pinned full the batch is served cold-only
    /// this time instead of failing the read.
    fn promote(&self, tier: &dyn StorageTier, batch: Arc<Batch>) -> BufferResult {
        let key = (batch.stream_id(), batch.begin_row());
        match self.store_hot(batch.clone()) {
            Ok(()) => {
                tier.remove_batch(batch.stream_id(), batch.begin_row())?;
                self.recency.lock().unwrap().touch(key);
                debug!("promoted {} from {}", batch, tier.name());
                Ok(())
            }
            Err(BufferError::MemoryNotAvailable) => {
                debug!("promotion of {} skipped, memory pinned full", batch);
                Ok(())
            }
            // A concurrent reader already promoted the same batch.
            Err(BufferError::DuplicateRange { .. }) => {
                self.recency.lock().unwrap().touch(key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn discard_everywhere(&self, stream_id: StreamId, begin_row: u64) {
        self.recency.lock().unwrap().remove(&(stream_id, begin_row));
        let _ = self.memory.remove_batch(stream_id, begin_row);
        for tier in self.colder.rl().iter() {
            let _ = tier.remove_batch(stream_id, begin_row);
        }
    }

    fn stream_schema(&self, stream_id: StreamId) -> Option<Arc<Schema>> {
        self.streams.rl().get(&stream_id).map(|e| e.schema.clone())
    }

    fn ensure_stream(&self, stream_id: StreamId) -> BufferResult {
        if self.streams.rl().contains_key(&stream_id) {
            Ok(())
        } else {
            Err(BufferError::StreamNotFound(stream_id))
        }
    }
}
