pub mod batch;
pub mod batch_map;
pub mod buffer_manager;
pub mod disk_tier;
pub mod error;
pub mod io;
pub mod lob;
pub mod memory_tier;
pub mod recency;
pub mod schema;
pub mod tier;
pub mod tuple;
pub mod types;
pub mod utils;

mod logger;

pub use batch::{Batch, StreamId};
pub use buffer_manager::{BufferConfig, BufferManager, StreamKind, StreamStatus};
pub use disk_tier::DiskTier;
pub use error::BufferError;
pub use lob::LobManager;
pub use logger::init_log;
pub use memory_tier::MemoryTier;
pub use schema::{int_schema, Schema, Type};
pub use tier::StorageTier;
pub use tuple::{Cell, Tuple};
