//! # Engine Lifecycle Scenarios
//!
//! Deterministic two-phase startup/shutdown: storages drain back into
//! the pools, workers flush their chunks, and a clean teardown restores
//! every pool to its initial free count. Also exercises the scoped
//! uninitialize guard.

use std::sync::Arc;

use tatamidb::config::constants::PAGE_SIZE;
use tatamidb::config::EngineOptions;
use tatamidb::xct::IsolationLevel;
use tatamidb::{Engine, Initializable, UninitPolicy, UninitializeGuard};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn small_options(pool_pages: u64) -> EngineOptions {
    init_tracing();
    let mut options = EngineOptions::default();
    options.thread.group_count = 1;
    options.thread.thread_count_per_group = 2;
    options.memory.page_pool_size_per_node = pool_pages * PAGE_SIZE as u64;
    options.memory.pages_for_free_pool = 32;
    options.memory.offset_chunk_size = 64;
    options
}

#[test]
fn create_then_shutdown_restores_pool_accounting() {
    let mut engine = Engine::new(small_options(2048));
    engine.initialize().unwrap();

    let pool = Arc::clone(engine.memory().pool(0));
    let initial_free = 2048 - 32;

    let storage_manager = Arc::clone(engine.storage_manager());
    engine
        .thread_pool()
        .impersonate(move |thread| {
            let storage = storage_manager.create_array(thread, "accounted", 32, 10_000)?;
            // Touch it so the build is not trivially dead.
            thread.begin_xct(IsolationLevel::Snapshot)?;
            storage.overwrite_record(thread, 9_999, &[1u8; 32], 0, 32)?;
            thread.abort_xct()?;
            Ok(())
        })
        .unwrap();

    // Pages are now split between the tree, worker chunks, and the pool.
    assert!(pool.free_count() < initial_free);

    engine.uninitialize().unwrap();
    // Everything flowed back: tree pages into a worker chunk, chunks
    // into the pool.
    assert_eq!(pool.free_count(), initial_free);
}

#[test]
fn multi_node_engine_builds_pools_per_group() {
    let mut options = small_options(512);
    options.thread.group_count = 2;
    let mut engine = Engine::new(options);
    engine.initialize().unwrap();

    assert_eq!(engine.memory().pools().len(), 2);
    assert_eq!(engine.thread_pool().thread_count(), 4);

    // Workers of each group seeded their chunks from their own node.
    let free_node0 = engine.memory().pool(0).free_count();
    let free_node1 = engine.memory().pool(1).free_count();
    assert_eq!(free_node0, free_node1);
    assert!(free_node0 < 512 - 32);

    engine.uninitialize().unwrap();
}

#[test]
fn guard_forces_missed_uninitialize() {
    let mut engine = Engine::new(small_options(512));
    engine.initialize().unwrap();
    {
        let guard = UninitializeGuard::new(&mut engine, UninitPolicy::WarnIfNotUninitialized);
        assert!(guard.get().is_initialized());
        // Scope exit without an explicit uninitialize.
    }
    assert!(!engine.is_initialized());
}

#[test]
fn repeated_lifecycles_reuse_the_same_engine() {
    let mut engine = Engine::new(small_options(512));
    for _ in 0..3 {
        engine.initialize().unwrap();
        assert!(engine.is_initialized());
        engine.uninitialize().unwrap();
        assert!(!engine.is_initialized());
    }
}
