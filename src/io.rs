use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::error::BufferError;

/// Append-only scratch file used by the disk tier. The file is private
/// to the process; it is deleted when the owning stream is removed or
/// the tier shuts down.
pub struct ScratchFile {
    file: File,
}

impl ScratchFile {
    /// Open (creating if needed) the scratch file at the given path with
    /// read and write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BufferError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(path)?;

        Ok(Self { file })
    }

    /// Append the buffer at the end of the file, returning the offset it
    /// was written at.
    pub fn append(&mut self, buf: &[u8]) -> Result<u64, BufferError> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        Ok(offset)
    }

    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BufferError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn get_size(&self) -> Result<u64, BufferError> {
        let metadata = self.file.metadata()?;
        Ok(metadata.len())
    }
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Result<Vec<u8>, BufferError> {
    let mut buffer = vec![0u8; bytes_count];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Growable little-endian byte sink for batch serialization.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn new_reserved(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write_bytes(&mut self, obj: &[u8]) {
        self.buf.extend_from_slice(obj);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub trait Encodeable {
    fn encode(&self, writer: &mut ByteWriter);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

pub trait Decodeable: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, BufferError>;
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self, writer: &mut ByteWriter) {
                    writer.write_bytes(&self.to_le_bytes());
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> Result<Self, BufferError> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i32, i64, f64);

/// # Format
/// - 4 bytes: size of the payload
/// - n bytes: payload
impl Encodeable for Vec<u8> {
    fn encode(&self, writer: &mut ByteWriter) {
        (self.len() as u32).encode(writer);
        writer.write_bytes(self);
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, BufferError> {
        let size = u32::decode_from(reader)?;
        read_exact(reader, size as usize)
    }
}

impl Encodeable for String {
    fn encode(&self, writer: &mut ByteWriter) {
        (self.len() as u32).encode(writer);
        writer.write_bytes(self.as_bytes());
    }
}

impl Decodeable for String {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, BufferError> {
        let bytes = Vec::<u8>::decode_from(reader)?;
        String::from_utf8(bytes).or(Err(BufferError::io("invalid utf8 in string cell")))
    }
}
