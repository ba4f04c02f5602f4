use std::sync::Arc;

use crate::{batch::Batch, batch::StreamId, error::BufferError, schema::Schema, types::BufferResult};

/// A storage backend holding batches keyed by `(stream, begin_row)`.
///
/// Tiers are registered with the buffer manager ordered hottest to
/// coldest; eviction demotes a batch to the next-colder tier. Every
/// tier distinguishes "stream unknown here" (`Err(StreamNotFound)`)
/// from "stream known, no batch covers that row" (`Ok(None)`).
pub trait StorageTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Register a stream so that later batch operations on it resolve.
    fn add_stream(&self, stream_id: StreamId);

    /// Store a batch. Fails with `CapacityExceeded` when the tier's
    /// budget is exhausted (memory tier) or `Io` (disk tier).
    fn add_batch(&self, batch: Arc<Batch>) -> BufferResult;

    /// The batch covering `row`, if this tier holds one.
    fn get_batch(
        &self,
        stream_id: StreamId,
        row: u64,
        schema: &Arc<Schema>,
    ) -> Result<Option<Arc<Batch>>, BufferError>;

    /// Best-effort removal; absent batches are a no-op. Returns the
    /// removed batch when the tier can still produce it cheaply.
    fn remove_batch(
        &self,
        stream_id: StreamId,
        begin_row: u64,
    ) -> Result<Option<Arc<Batch>>, BufferError>;

    /// Discard all data of the stream from this tier; idempotent.
    fn remove_stream(&self, stream_id: StreamId);

    /// Release all tier resources; called once at engine teardown.
    fn shutdown(&self);
}
