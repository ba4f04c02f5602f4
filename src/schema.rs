use std::io::Read;

use crate::{
    error::BufferError,
    io::{ByteWriter, Decodeable, Encodeable},
};

/// Logical column types carried by a stream's schema.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Type {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    Blob,
}

impl Type {
    /// Size of the encoded value in bytes, `None` for variable-length
    /// types (which are length-prefixed on the wire).
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Type::Bool => Some(1),
            Type::Int32 => Some(4),
            Type::Int64 => Some(8),
            Type::Float64 => Some(8),
            Type::String | Type::Blob => None,
        }
    }
}

impl Encodeable for Type {
    fn encode(&self, writer: &mut ByteWriter) {
        let tag: u8 = match self {
            Type::Bool => 0,
            Type::Int32 => 1,
            Type::Int64 => 2,
            Type::Float64 => 3,
            Type::String => 4,
            Type::Blob => 5,
        };
        writer.write_bytes(&[tag]);
    }
}

impl Decodeable for Type {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, BufferError> {
        let tag = u8::decode_from(reader)?;
        match tag {
            0 => Ok(Type::Bool),
            1 => Ok(Type::Int32),
            2 => Ok(Type::Int64),
            3 => Ok(Type::Float64),
            4 => Ok(Type::String),
            5 => Ok(Type::Blob),
            _ => Err(BufferError::io(&format!("invalid type tag: {}", tag))),
        }
    }
}

/// Ordered list of column types, fixed for the lifetime of a stream.
#[derive(Clone, PartialEq, Debug)]
pub struct Schema {
    types: Vec<Type>,
}

impl Schema {
    pub fn new(types: Vec<Type>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    pub fn width(&self) -> usize {
        self.types.len()
    }
}

/// Shortcut for the all-int schemas the tests use everywhere.
pub fn int_schema(width: usize) -> Schema {
    Schema::new(vec![Type::Int64; width])
}
