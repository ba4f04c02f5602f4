use std::{fmt, io::Read};

use bit_vec::BitVec;
use bytes::Bytes;
use itertools::Itertools;

use crate::{
    error::BufferError,
    io::{read_exact, ByteWriter, Decodeable, Encodeable},
    schema::{Schema, Type},
};

/// One column value of a row.
#[derive(Clone, PartialEq, Debug)]
pub enum Cell {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Blob(Bytes),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Rough in-memory footprint, used for the memory tier's byte
    /// budget accounting.
    pub fn size(&self) -> usize {
        match self {
            Cell::Null => 1,
            Cell::Bool(_) => 1,
            Cell::Int32(_) => 4,
            Cell::Int64(_) | Cell::Float64(_) => 8,
            Cell::String(v) => 4 + v.len(),
            Cell::Blob(v) => 4 + v.len(),
        }
    }

    fn encode(&self, writer: &mut ByteWriter) {
        match self {
            // Nulls are carried by the bitmap, nothing on the wire.
            Cell::Null => {}
            Cell::Bool(v) => writer.write_bytes(&[*v as u8]),
            Cell::Int32(v) => v.encode(writer),
            Cell::Int64(v) => v.encode(writer),
            Cell::Float64(v) => v.encode(writer),
            Cell::String(v) => v.encode(writer),
            Cell::Blob(v) => {
                (v.len() as u32).encode(writer);
                writer.write_bytes(v);
            }
        }
    }

    fn decode_from<R: Read>(reader: &mut R, t: Type) -> Result<Cell, BufferError> {
        let cell = match t {
            Type::Bool => Cell::Bool(u8::decode_from(reader)? == 1),
            Type::Int32 => Cell::Int32(i32::decode_from(reader)?),
            Type::Int64 => Cell::Int64(i64::decode_from(reader)?),
            Type::Float64 => Cell::Float64(f64::decode_from(reader)?),
            Type::String => Cell::String(String::decode_from(reader)?),
            Type::Blob => {
                let len = u32::decode_from(reader)?;
                let bytes = read_exact(reader, len as usize)?;
                Cell::Blob(Bytes::from(bytes))
            }
        };
        Ok(cell)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            Cell::Bool(v) => write!(f, "{}", v),
            Cell::Int32(v) => write!(f, "{}", v),
            Cell::Int64(v) => write!(f, "{}", v),
            Cell::Float64(v) => write!(f, "{}", v),
            Cell::String(v) => write!(f, "{:?}", v),
            Cell::Blob(v) => write!(f, "blob[{}]", v.len()),
        }
    }
}

/// One row of a stream, cells ordered per the stream's schema.
///
/// # Format
/// - ceil(width / 8) bytes: null bitmap (bit set = cell is null)
/// - non-null cells in schema order, scalars little-endian,
///   strings/blobs length-prefixed
#[derive(Clone, PartialEq, Debug)]
pub struct Tuple {
    cells: Vec<Cell>,
}

impl Tuple {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// An all-columns-identical int row, handy for tests.
    pub fn new_int_tuple(value: i64, width: usize) -> Self {
        Self {
            cells: vec![Cell::Int64(value); width],
        }
    }

    pub fn get_cell(&self, i: usize) -> &Cell {
        &self.cells[i]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    pub fn size(&self) -> usize {
        self.cells.iter().map(|c| c.size()).sum()
    }

    pub fn encode(&self, writer: &mut ByteWriter) {
        let mut nulls = BitVec::from_elem(self.cells.len(), false);
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.is_null() {
                nulls.set(i, true);
            }
        }
        writer.write_bytes(&nulls.to_bytes());

        for cell in &self.cells {
            cell.encode(writer);
        }
    }

    pub fn decode_from<R: Read>(reader: &mut R, schema: &Schema) -> Result<Tuple, BufferError> {
        let bitmap_len = (schema.width() + 7) / 8;
        let nulls = BitVec::from_bytes(&read_exact(reader, bitmap_len)?);

        let mut cells = Vec::with_capacity(schema.width());
        for (i, t) in schema.types().iter().enumerate() {
            if nulls.get(i).unwrap_or(false) {
                cells.push(Cell::Null);
            } else {
                cells.push(Cell::decode_from(reader, *t)?);
            }
        }
        Ok(Tuple { cells })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}", self.cells.iter().map(|c| c.to_string()).join(", "))
    }
}
