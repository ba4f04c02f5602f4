use std::{error::Error, fmt};

use backtrace::Backtrace;
use log::error;

use crate::batch::StreamId;

/// Typed failures of the buffer engine.
///
/// `CapacityExceeded` is tier-internal and is absorbed by the buffer
/// manager's eviction loop; callers of the public api never see it.
/// The pin/ordering variants indicate caller bugs and are constructed
/// through the loud helpers below so that they leave a trace in the
/// log before they propagate.
#[derive(Debug)]
pub enum BufferError {
    /// The stream is unknown, already removed, or never created.
    StreamNotFound(StreamId),

    /// Write attempted after the stream was closed for writes.
    StreamClosed(StreamId),

    /// Backward lifecycle transition.
    InvalidStateTransition {
        stream: StreamId,
        from: &'static str,
        to: &'static str,
    },

    /// The tier's space budget is exhausted (tier-internal).
    CapacityExceeded,

    /// Eviction could not free space; backpressure signal.
    MemoryNotAvailable,

    /// Disk tier failure; fatal for the affected stream only.
    Io(String),

    /// The producer has not marked the stream finished yet.
    StreamNotFinalized(StreamId),

    /// Unpin without a matching pin, or pin on an absent batch.
    UnpinMismatch { stream: StreamId, begin_row: u64 },

    /// LOB chunks must be consumed strictly in order.
    OutOfOrderRead {
        stream: StreamId,
        requested: u64,
        expected: u64,
    },

    /// A batch with the same begin row is already present.
    DuplicateRange { stream: StreamId, begin_row: u64 },

    /// A chunk tagged `is_last` was already written or read.
    ChannelClosed(StreamId),
}

impl BufferError {
    pub fn io(msg: &str) -> BufferError {
        BufferError::Io(msg.to_string())
    }

    /// Pin bookkeeping misuse. Logged with a backtrace since the caller
    /// bug would otherwise corrupt eviction safety silently.
    pub fn unpin_mismatch(stream: StreamId, begin_row: u64) -> BufferError {
        error!(
            "pin/unpin mismatch on {} row {}, backtrace: {:?}",
            stream,
            begin_row,
            Backtrace::new()
        );
        BufferError::UnpinMismatch { stream, begin_row }
    }

    pub fn out_of_order_read(stream: StreamId, requested: u64, expected: u64) -> BufferError {
        error!(
            "out-of-order chunk read on {}: requested {}, expected {}, backtrace: {:?}",
            stream,
            requested,
            expected,
            Backtrace::new()
        );
        BufferError::OutOfOrderRead {
            stream,
            requested,
            expected,
        }
    }

    pub fn duplicate_range(stream: StreamId, begin_row: u64) -> BufferError {
        error!(
            "duplicate batch range on {} at row {}, backtrace: {:?}",
            stream,
            begin_row,
            Backtrace::new()
        );
        BufferError::DuplicateRange { stream, begin_row }
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BufferError::StreamNotFound(id) => {
                write!(f, "stream {} not found", id)
            }
            BufferError::StreamClosed(id) => {
                write!(f, "stream {} is closed for writes", id)
            }
            BufferError::InvalidStateTransition { stream, from, to } => {
                write!(f, "illegal transition {} -> {} on stream {}", from, to, stream)
            }
            BufferError::CapacityExceeded => {
                write!(f, "tier capacity exceeded")
            }
            BufferError::MemoryNotAvailable => {
                write!(f, "no unpinned batch available for eviction")
            }
            BufferError::Io(msg) => write!(f, "io error: {}", msg),
            BufferError::StreamNotFinalized(id) => {
                write!(f, "stream {} is not finalized yet", id)
            }
            BufferError::UnpinMismatch { stream, begin_row } => {
                write!(f, "pin/unpin mismatch on {} row {}", stream, begin_row)
            }
            BufferError::OutOfOrderRead {
                stream,
                requested,
                expected,
            } => write!(
                f,
                "out-of-order read on {}: requested chunk {}, expected {}",
                stream, requested, expected
            ),
            BufferError::DuplicateRange { stream, begin_row } => {
                write!(f, "duplicate range on {} at row {}", stream, begin_row)
            }
            BufferError::ChannelClosed(id) => {
                write!(f, "lob channel {} is closed", id)
            }
        }
    }
}

impl Error for BufferError {}

impl From<std::io::Error> for BufferError {
    fn from(e: std::io::Error) -> Self {
        BufferError::Io(e.to_string())
    }
}
