use std::{fmt, io::Read, sync::Arc};

use crate::{
    error::BufferError,
    io::{ByteWriter, Decodeable, Encodeable},
    schema::Schema,
    tuple::Tuple,
};

/// Process-unique identifier of a stream, minted by the buffer manager.
/// Never reused while any tier still holds data for it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StreamId(u64);

impl StreamId {
    pub fn new(id: u64) -> Self {
        StreamId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A contiguous range of rows `[begin_row, end_row]` of one stream.
/// Immutable once handed to a tier; rows are 1-based.
pub struct Batch {
    stream_id: StreamId,
    begin_row: u64,
    rows: Vec<Tuple>,
    schema: Arc<Schema>,
}

impl Batch {
    pub fn new(stream_id: StreamId, begin_row: u64, rows: Vec<Tuple>, schema: Arc<Schema>) -> Self {
        Self {
            stream_id,
            begin_row,
            rows,
            schema,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn begin_row(&self) -> u64 {
        self.begin_row
    }

    /// Last row covered; `begin_row - 1` for an empty batch.
    pub fn end_row(&self) -> u64 {
        self.begin_row + self.rows.len() as u64 - 1
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: u64) -> bool {
        row >= self.begin_row && row <= self.end_row()
    }

    pub fn rows(&self) -> &[Tuple] {
        &self.rows
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Rough in-memory footprint, the unit the memory tier budgets in.
    pub fn size(&self) -> usize {
        const ROW_OVERHEAD: usize = 16;
        self.rows
            .iter()
            .map(|t| t.size() + ROW_OVERHEAD)
            .sum::<usize>()
            + 64
    }

    /// # Format
    /// - 8 bytes: begin row (sanity-checked on read)
    /// - 4 bytes: row count
    /// - rows, each encoded per the stream schema
    pub fn encode(&self, writer: &mut ByteWriter) {
        self.begin_row.encode(writer);
        (self.rows.len() as u32).encode(writer);
        for row in &self.rows {
            row.encode(writer);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new_reserved(self.size());
        self.encode(&mut writer);
        writer.into_bytes()
    }

    pub fn decode_from<R: Read>(
        reader: &mut R,
        stream_id: StreamId,
        begin_row: u64,
        schema: &Arc<Schema>,
    ) -> Result<Batch, BufferError> {
        let stored_begin = u64::decode_from(reader)?;
        if stored_begin != begin_row {
            return Err(BufferError::io(&format!(
                "corrupt batch record for {}: expected begin row {}, found {}",
                stream_id, begin_row, stored_begin
            )));
        }

        let row_count = u32::decode_from(reader)?;
        let mut rows = Vec::with_capacity(row_count as usize);
        for _ in 0..row_count {
            rows.push(Tuple::decode_from(reader, schema)?);
        }

        Ok(Batch {
            stream_id,
            begin_row,
            rows,
            schema: schema.clone(),
        })
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "batch[{} rows {}..{}]",
            self.stream_id,
            self.begin_row,
            self.end_row()
        )
    }
}
