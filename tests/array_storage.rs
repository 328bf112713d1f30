//! # Array Storage Scenarios
//!
//! End-to-end build/lookup/read/overwrite through a running engine:
//! work is submitted to core-pinned workers, pages come from the node's
//! pool via the worker's chunk, and log entries land in the worker's
//! own buffer.

use std::sync::Arc;

use tatamidb::config::constants::PAGE_SIZE;
use tatamidb::config::EngineOptions;
use tatamidb::storage::array::log_types::calculate_log_length;
use tatamidb::xct::IsolationLevel;
use tatamidb::{Engine, Initializable};

fn engine_with_pages(pool_pages: u64) -> Engine {
    let mut options = EngineOptions::default();
    options.thread.group_count = 1;
    options.thread.thread_count_per_group = 2;
    options.memory.page_pool_size_per_node = pool_pages * PAGE_SIZE as u64;
    options.memory.pages_for_free_pool = (pool_pages / 32).max(1) as u32;
    options.memory.offset_chunk_size = 512;
    let mut engine = Engine::new(options);
    engine.initialize().unwrap();
    engine
}

#[test]
fn build_million_record_array_and_look_up_edges() {
    // payload 16 -> 126 records per leaf -> 7937 leaves, 32 interiors,
    // 1 root.
    let mut engine = engine_with_pages(12_288);
    let storage_manager = Arc::clone(engine.storage_manager());

    let storage = engine
        .thread_pool()
        .impersonate(move |thread| {
            storage_manager.create_array(thread, "big", 16, 1_000_000)
        })
        .unwrap();

    assert_eq!(storage.levels(), 3);
    assert_eq!(storage.pages_per_level(), &[7937, 32, 1]);
    assert_eq!(storage.records_per_leaf(), 126);
    assert_eq!(
        storage.offset_intervals(),
        &[126, 126 * 252, 126 * 252 * 252]
    );

    let records_per_leaf = storage.records_per_leaf();
    let probes = vec![0, 1, records_per_leaf - 1, records_per_leaf, 999_999];
    let lookup_storage = Arc::clone(&storage);
    let ranges: Vec<(u64, u64, u64)> = engine
        .thread_pool()
        .impersonate(move |thread| {
            let mut ranges = Vec::new();
            for &offset in &probes {
                let page = lookup_storage.lookup(thread, offset)?;
                // SAFETY: page belongs to a live storage of this engine.
                let page_ref = unsafe { &*page };
                assert!(page_ref.is_leaf());
                ranges.push((offset, page_ref.range().begin(), page_ref.range().end()));
            }
            Ok(ranges)
        })
        .unwrap();

    for (offset, begin, end) in ranges {
        assert!(offset >= begin && offset < end, "leaf misses offset {}", offset);
        assert!(end - begin <= records_per_leaf);
    }

    engine.uninitialize().unwrap();
}

#[test]
fn storage_is_registered_and_findable() {
    let mut engine = engine_with_pages(1024);
    let storage_manager = Arc::clone(engine.storage_manager());

    let created = {
        let storage_manager = Arc::clone(&storage_manager);
        engine
            .thread_pool()
            .impersonate(move |thread| {
                storage_manager.create_array(thread, "registry", 8, 1000)
            })
            .unwrap()
    };

    let by_id = storage_manager.get_array(created.id()).unwrap();
    assert_eq!(by_id.name(), "registry");
    let by_name = storage_manager.get_array_by_name("registry").unwrap();
    assert_eq!(by_name.id(), created.id());

    // A duplicate name is rejected.
    let storage_manager_dup = Arc::clone(&storage_manager);
    let duplicate = engine.thread_pool().impersonate(move |thread| {
        storage_manager_dup.create_array(thread, "registry", 8, 1000)
    });
    assert!(format!("{:#}", duplicate.unwrap_err()).contains("already exists"));

    engine.uninitialize().unwrap();
}

#[test]
fn overwrite_then_read_within_one_transaction() {
    let mut engine = engine_with_pages(1024);
    let storage_manager = Arc::clone(engine.storage_manager());

    engine
        .thread_pool()
        .impersonate(move |thread| {
            let storage = storage_manager.create_array(thread, "ryw", 32, 100)?;

            thread.begin_xct(IsolationLevel::Snapshot)?;
            let written: Vec<u8> = (0x11..=0x30).collect();
            assert_eq!(written.len(), 32);
            storage.overwrite_record(thread, 42, &written, 0, 32)?;

            let mut read_back = [0u8; 32];
            storage.get_record(thread, 42, &mut read_back, 0, 32)?;
            assert_eq!(&read_back[..], &written[..]);

            // The read set captured the record; the write set points at
            // a log entry of exactly the computed length.
            let xct = thread.current_xct();
            assert_eq!(xct.read_set().len(), 1);
            assert_eq!(xct.read_set()[0].storage_id, storage.id());
            assert_eq!(xct.write_set().len(), 1);
            assert_eq!(xct.write_set()[0].log_length, calculate_log_length(32));
            assert!(std::ptr::eq(
                xct.read_set()[0].record,
                xct.write_set()[0].record
            ));
            thread.abort_xct()?;
            Ok(())
        })
        .unwrap();

    engine.uninitialize().unwrap();
}

#[test]
fn reads_without_pending_writes_see_zeroed_payload() {
    let mut engine = engine_with_pages(1024);
    let storage_manager = Arc::clone(engine.storage_manager());

    engine
        .thread_pool()
        .impersonate(move |thread| {
            let storage = storage_manager.create_array(thread, "zeroes", 16, 500)?;
            thread.begin_xct(IsolationLevel::Serializable)?;
            let mut payload = [0xFFu8; 16];
            storage.get_record(thread, 123, &mut payload, 0, 16)?;
            assert_eq!(payload, [0u8; 16]);
            thread.abort_xct()?;
            Ok(())
        })
        .unwrap();

    engine.uninitialize().unwrap();
}
