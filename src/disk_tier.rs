use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::{debug, warn};

use crate::{
    batch::{Batch, StreamId},
    error::BufferError,
    io::ScratchFile,
    schema::Schema,
    tier::StorageTier,
    types::{BufferResult, ConcurrentHashMap, Pod},
    utils::HandyRwLock,
};

#[derive(Copy, Clone)]
struct BatchLocation {
    offset: u64,
    len: usize,
    end_row: u64,
}

/// One append-only scratch file per stream plus the in-memory index of
/// where each batch record lives. Space of removed batches is not
/// reclaimed; the whole file is deleted with the stream.
struct StreamFile {
    path: PathBuf,
    file: Option<ScratchFile>,
    index: BTreeMap<u64, BatchLocation>,
}

impl StreamFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            index: BTreeMap::new(),
        }
    }

    /// The scratch file is created on the first spilled batch, not at
    /// stream registration, since most streams never spill.
    fn file(&mut self) -> Result<&mut ScratchFile, BufferError> {
        if self.file.is_none() {
            self.file = Some(ScratchFile::open(&self.path)?);
        }
        Ok(self.file.as_mut().unwrap())
    }
}

/// The cold tier: serialized batches in a process-private scratch area.
/// Trades latency for capacity; the target of eviction from memory.
pub struct DiskTier {
    dir: PathBuf,
    streams: ConcurrentHashMap<StreamId, Pod<StreamFile>>,
}

impl DiskTier {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, BufferError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            streams: ConcurrentHashMap::new(),
        })
    }

    fn stream_path(&self, stream_id: StreamId) -> PathBuf {
        self.dir.join(format!("stream-{}.bin", stream_id.value()))
    }
}

impl StorageTier for DiskTier {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn add_stream(&self, stream_id: StreamId) {
        let path = self.stream_path(stream_id);
        let _ = self
            .streams
            .get_or_insert(&stream_id, |_| Ok(Arc::new(RwLock::new(StreamFile::new(path)))));
    }

    fn add_batch(&self, batch: Arc<Batch>) -> BufferResult {
        let stream_id = batch.stream_id();
        let entry = self
            .streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;

        let bytes = batch.to_bytes();
        let mut stream_file = entry.wl();
        let offset = stream_file.file()?.append(&bytes)?;
        stream_file.index.insert(
            batch.begin_row(),
            BatchLocation {
                offset,
                len: bytes.len(),
                end_row: batch.end_row(),
            },
        );

        debug!(
            "spilled {} at offset {} ({} bytes)",
            batch,
            offset,
            bytes.len()
        );
        Ok(())
    }

    fn get_batch(
        &self,
        stream_id: StreamId,
        row: u64,
        schema: &Arc<Schema>,
    ) -> Result<Option<Arc<Batch>>, BufferError> {
        let entry = self
            .streams
            .get(&stream_id)
            .ok_or(BufferError::StreamNotFound(stream_id))?;

        let mut stream_file = entry.wl();

        let (begin_row, location) = match stream_file.index.range(..=row).next_back() {
            Some((begin_row, location)) if location.end_row >= row => (*begin_row, *location),
            _ => return Ok(None),
        };

        let bytes = stream_file.file()?.read_at(location.offset, location.len)?;
        let batch = Batch::decode_from(&mut bytes.as_slice(), stream_id, begin_row, schema)?;
        Ok(Some(Arc::new(batch)))
    }

    fn remove_batch(
        &self,
        stream_id: StreamId,
        begin_row: u64,
    ) -> Result<Option<Arc<Batch>>, BufferError> {
        if let Some(entry) = self.streams.get(&stream_id) {
            entry.wl().index.remove(&begin_row);
        }
        Ok(None)
    }

    fn remove_stream(&self, stream_id: StreamId) {
        if let Some(entry) = self.streams.remove(&stream_id) {
            let stream_file = entry.wl();
            if stream_file.file.is_some() {
                if let Err(e) = fs::remove_file(&stream_file.path) {
                    warn!("failed to delete scratch file of {}: {}", stream_id, e);
                }
            }
        }
    }

    fn shutdown(&self) {
        for stream_id in self.streams.keys() {
            self.remove_stream(stream_id);
        }
        // Scratch space is process-private; leave nothing behind.
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!("failed to delete scratch dir {:?}: {}", self.dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::int_schema, tuple::Tuple};

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tuple-buffer-disk-test-{}-{}", std::process::id(), name))
    }

    fn int_batch(stream_id: StreamId, begin_row: u64, count: usize) -> Arc<Batch> {
        let schema = Arc::new(int_schema(2));
        let rows = (0..count)
            .map(|i| Tuple::new_int_tuple(begin_row as i64 + i as i64, 2))
            .collect();
        Arc::new(Batch::new(stream_id, begin_row, rows, schema))
    }

    #[test]
    fn spill_and_read_back() {
        let tier = DiskTier::new(scratch_dir("rw")).unwrap();
        let id = StreamId::new(1);
        let schema = Arc::new(int_schema(2));
        tier.add_stream(id);

        tier.add_batch(int_batch(id, 1, 100)).unwrap();
        tier.add_batch(int_batch(id, 101, 50)).unwrap();

        let batch = tier.get_batch(id, 120, &schema).unwrap().unwrap();
        assert_eq!(batch.begin_row(), 101);
        assert_eq!(batch.row_count(), 50);
        assert_eq!(
            batch.rows()[0],
            Tuple::new_int_tuple(101, 2)
        );

        assert!(tier.get_batch(id, 151, &schema).unwrap().is_none());
        tier.shutdown();
    }

    #[test]
    fn unknown_stream() {
        let tier = DiskTier::new(scratch_dir("unknown")).unwrap();
        let schema = Arc::new(int_schema(2));

        let result = tier.get_batch(StreamId::new(5), 1, &schema);
        assert!(matches!(result, Err(BufferError::StreamNotFound(_))));
        tier.shutdown();
    }

    #[test]
    fn remove_batch_then_miss() {
        let tier = DiskTier::new(scratch_dir("remove")).unwrap();
        let id = StreamId::new(2);
        let schema = Arc::new(int_schema(2));
        tier.add_stream(id);

        tier.add_batch(int_batch(id, 1, 10)).unwrap();
        tier.remove_batch(id, 1).unwrap();
        assert!(tier.get_batch(id, 1, &schema).unwrap().is_none());

        // Absent removal is a no-op.
        tier.remove_batch(id, 1).unwrap();
        tier.shutdown();
    }

    #[test]
    fn shutdown_deletes_scratch() {
        let dir = scratch_dir("cleanup");
        let tier = DiskTier::new(&dir).unwrap();
        let id = StreamId::new(3);
        tier.add_stream(id);
        tier.add_batch(int_batch(id, 1, 10)).unwrap();

        tier.shutdown();
        assert!(!dir.exists());
    }
}
