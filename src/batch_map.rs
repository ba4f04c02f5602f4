use std::{collections::BTreeMap, sync::Arc};

use crate::{batch::Batch, error::BufferError, types::BufferResult};

/// Per-stream ordered index of resident batches, keyed by begin row.
///
/// Consumption and production are sequential, so the ordering matters:
/// lookups resolve "the batch covering row N" through the tree rather
/// than a scan, and a stream may accumulate many batches.
pub struct BatchMap {
    batches: BTreeMap<u64, Arc<Batch>>,
    sealed: bool,
}

impl BatchMap {
    pub fn new() -> Self {
        Self {
            batches: BTreeMap::new(),
            sealed: false,
        }
    }

    pub fn add_batch(&mut self, batch: Arc<Batch>) -> BufferResult {
        // The stream was removed while the caller still held this map;
        // late inserts must not land.
        if self.sealed {
            return Err(BufferError::StreamNotFound(batch.stream_id()));
        }
        let begin_row = batch.begin_row();
        if self.batches.contains_key(&begin_row) {
            return Err(BufferError::duplicate_range(batch.stream_id(), begin_row));
        }
        self.batches.insert(begin_row, batch);
        Ok(())
    }

    /// The batch whose `[begin_row, end_row]` range covers `row`, if
    /// resident here.
    pub fn get_batch(&self, row: u64) -> Option<Arc<Batch>> {
        let (_, batch) = self.batches.range(..=row).next_back()?;
        if batch.contains(row) {
            Some(batch.clone())
        } else {
            None
        }
    }

    pub fn remove_batch(&mut self, begin_row: u64) -> Option<Arc<Batch>> {
        self.batches.remove(&begin_row)
    }

    /// An empty map signals the stream's residency in this tier can be
    /// reclaimed.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn begin_rows(&self) -> Vec<u64> {
        self.batches.keys().cloned().collect()
    }

    pub fn total_size(&self) -> usize {
        self.batches.values().map(|b| b.size()).sum()
    }

    /// Drop every batch and refuse further inserts, returning the bytes
    /// released.
    pub fn seal(&mut self) -> usize {
        self.sealed = true;
        let size = self.total_size();
        self.batches.clear();
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::StreamId, schema::int_schema, tuple::Tuple};

    fn int_batch(begin_row: u64, count: usize) -> Arc<Batch> {
        let schema = Arc::new(int_schema(1));
        let rows = (0..count)
            .map(|i| Tuple::new_int_tuple(begin_row as i64 + i as i64, 1))
            .collect();
        Arc::new(Batch::new(StreamId::new(9), begin_row, rows, schema))
    }

    #[test]
    fn covering_lookup() {
        let mut map = BatchMap::new();
        map.add_batch(int_batch(1, 100)).unwrap();
        map.add_batch(int_batch(101, 50)).unwrap();

        assert_eq!(map.get_batch(1).unwrap().begin_row(), 1);
        assert_eq!(map.get_batch(100).unwrap().begin_row(), 1);
        assert_eq!(map.get_batch(101).unwrap().begin_row(), 101);
        assert_eq!(map.get_batch(150).unwrap().begin_row(), 101);
        assert!(map.get_batch(151).is_none());
    }

    #[test]
    fn duplicate_range_rejected() {
        let mut map = BatchMap::new();
        map.add_batch(int_batch(1, 10)).unwrap();

        let result = map.add_batch(int_batch(1, 10));
        assert!(matches!(
            result,
            Err(BufferError::DuplicateRange { begin_row: 1, .. })
        ));
    }

    #[test]
    fn remove_batch() {
        let mut map = BatchMap::new();
        map.add_batch(int_batch(1, 10)).unwrap();

        assert!(map.remove_batch(5).is_none());
        assert_eq!(map.remove_batch(1).unwrap().row_count(), 10);
        assert!(map.is_empty());
        // Removing an absent batch is a no-op, not an error.
        assert!(map.remove_batch(1).is_none());
    }

    #[test]
    fn sealed_map_rejects_inserts() {
        let mut map = BatchMap::new();
        map.add_batch(int_batch(1, 10)).unwrap();

        let released = map.seal();
        assert!(released > 0);
        assert!(map.is_empty());

        let result = map.add_batch(int_batch(11, 10));
        assert!(matches!(result, Err(BufferError::StreamNotFound(_))));
    }

    #[test]
    fn lookup_between_batches() {
        let mut map = BatchMap::new();
        map.add_batch(int_batch(1, 10)).unwrap();
        map.add_batch(int_batch(21, 10)).unwrap();

        // Rows 11..20 are not resident here.
        assert!(map.get_batch(11).is_none());
        assert!(map.get_batch(20).is_none());
        assert_eq!(map.get_batch(21).unwrap().begin_row(), 21);
    }
}
