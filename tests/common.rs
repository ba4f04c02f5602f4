use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use once_cell::sync::Lazy;
use tuple_buffer::{init_log, BufferConfig, BufferManager, DiskTier, Tuple};

static SCRATCH_SEQ: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(0));

pub fn setup() {
    init_log();
}

/// A scratch directory unique to this test invocation.
pub fn scratch_dir() -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "tuple-buffer-test-{}-{}",
        std::process::id(),
        seq
    ))
}

/// A manager with the given memory budget and a disk tier below it.
pub fn new_manager(memory_budget: usize) -> Arc<BufferManager> {
    setup();

    let config = BufferConfig {
        memory_budget,
        scratch_dir: scratch_dir(),
        ..BufferConfig::default()
    };
    let manager = Arc::new(BufferManager::new(&config));
    manager.add_storage_tier(Arc::new(DiskTier::new(&config.scratch_dir).unwrap()));
    manager
}

/// A manager with no disk tier: nothing to demote to.
pub fn memory_only_manager(memory_budget: usize) -> Arc<BufferManager> {
    setup();

    let config = BufferConfig {
        memory_budget,
        scratch_dir: scratch_dir(),
        ..BufferConfig::default()
    };
    Arc::new(BufferManager::new(&config))
}

pub fn int_rows(begin: i64, count: usize, width: usize) -> Vec<Tuple> {
    (0..count)
        .map(|i| Tuple::new_int_tuple(begin + i as i64, width))
        .collect()
}
