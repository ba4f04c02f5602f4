use std::sync::{Arc, RwLock};

use bytes::Bytes;
use log::debug;

use crate::{
    batch::StreamId,
    buffer_manager::{BufferManager, StreamKind, StreamStatus},
    error::BufferError,
    schema::{Schema, Type},
    tuple::{Cell, Tuple},
    types::{BufferResult, ConcurrentHashMap, Pod},
    utils::HandyRwLock,
};

struct LobState {
    /// Sequence number (1-based) the consumer must ask for next.
    next_read_seq: u64,
    /// A chunk tagged `is_last` was written; no more appends.
    write_closed: bool,
    /// The `is_last` chunk was read; no more reads.
    read_finished: bool,
}

/// Ordered chunk delivery for large objects, layered on the buffer
/// manager's stream substrate.
///
/// Each chunk maps to a one-row batch (`[Blob, Bool]` schema) whose
/// begin row is the chunk's sequence number. Chunks are consumed
/// strictly in order and exactly once; a consumed chunk is discarded
/// from every tier immediately, since LOBs are read once and dropped.
pub struct LobManager {
    buffer: Arc<BufferManager>,
    states: ConcurrentHashMap<StreamId, Pod<LobState>>,
}

impl LobManager {
    pub fn new(buffer: Arc<BufferManager>) -> Self {
        Self {
            buffer,
            states: ConcurrentHashMap::new(),
        }
    }

    pub fn create_channel(&self, group: &str) -> StreamId {
        let schema = Arc::new(Schema::new(vec![Type::Blob, Type::Bool]));
        let id = self.buffer.create_stream(schema, group, StreamKind::Lob);
        self.states.insert(
            id,
            Arc::new(RwLock::new(LobState {
                next_read_seq: 1,
                write_closed: false,
                read_finished: false,
            })),
        );
        id
    }

    /// Append a chunk; the chunk tagged `is_last` closes the channel
    /// for writes.
    pub fn add_chunk(&self, stream_id: StreamId, chunk: Bytes, is_last: bool) -> BufferResult {
        let state = self
            .states
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        let mut state = state.wl();

        if state.write_closed {
            return Err(BufferError::ChannelClosed(stream_id));
        }

        debug!(
            "chunk for {}: {} bytes [{}{}]{}",
            stream_id,
            chunk.len(),
            hex::encode(&chunk[..chunk.len().min(8)]),
            if chunk.len() > 8 { ".." } else { "" },
            if is_last { " (last)" } else { "" }
        );

        let row = Tuple::new(vec![Cell::Blob(chunk), Cell::Bool(is_last)]);
        self.buffer.add_batch(stream_id, vec![row])?;

        if is_last {
            state.write_closed = true;
            self.buffer.set_status(stream_id, StreamStatus::Full)?;
        }
        Ok(())
    }

    /// Read chunk `seq` (1-based). Only the next unread sequence number
    /// is valid; chunks are not independently addressable the way row
    /// batches are. `Ok(None)` means the producer has not written that
    /// far yet.
    pub fn get_chunk(
        &self,
        stream_id: StreamId,
        seq: u64,
    ) -> Result<Option<(Bytes, bool)>, BufferError> {
        let state = self
            .states
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;
        let mut state = state.wl();

        if state.read_finished {
            return Err(BufferError::ChannelClosed(stream_id));
        }
        if seq != state.next_read_seq {
            return Err(BufferError::out_of_order_read(
                stream_id,
                seq,
                state.next_read_seq,
            ));
        }

        let batch = match self.buffer.get_batch(stream_id, seq)? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let row = batch
            .rows()
            .first()
            .ok_or_else(|| BufferError::io("empty chunk batch"))?;
        let (chunk, is_last) = match (row.get_cell(0), row.get_cell(1)) {
            (Cell::Blob(bytes), Cell::Bool(is_last)) => (bytes.clone(), *is_last),
            _ => return Err(BufferError::io("malformed chunk row")),
        };

        state.next_read_seq += 1;
        if is_last {
            state.read_finished = true;
        }

        // Read-once contract: drop the consumed chunk from every tier.
        self.buffer.remove_batch(stream_id, seq)?;

        Ok(Some((chunk, is_last)))
    }

    pub fn remove_channel(&self, stream_id: StreamId) -> BufferResult {
        self.states.remove(&stream_id);
        self.buffer.remove_stream(stream_id)
    }
}
