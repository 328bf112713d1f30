//! # Engine Assembly
//!
//! The engine is the single long-lived object a process owns: options,
//! memory, transaction bookkeeping, storages, and the worker pool,
//! wired together with explicit references; no hidden singletons.
//!
//! ## Lifecycle Order
//!
//! ```text
//! initialize:   options.validate -> memory -> thread pool
//! uninitialize: storages (via a worker) -> thread pool -> memory
//! ```
//!
//! Teardown is the exact reverse of construction, with one refinement:
//! storages release their pages *through a worker thread* so the freed
//! offsets land in that worker's chunk, which the worker then flushes
//! back to its node's pool as it shuts down. After a clean uninitialize
//! every pool reports its initial free count.
//!
//! Teardown keeps going past failures; every error is collected and
//! summarized at the end.

use std::sync::Arc;

use eyre::WrapErr;
use tracing::info;

use crate::config::EngineOptions;
use crate::error::ErrorBatch;
use crate::lifecycle::Initializable;
use crate::memory::EngineMemory;
use crate::storage::StorageManager;
use crate::thread::ThreadPool;
use crate::xct::XctManager;

pub struct Engine {
    options: Arc<EngineOptions>,
    memory: EngineMemory,
    xct_manager: Arc<XctManager>,
    storage_manager: Arc<StorageManager>,
    thread_pool: ThreadPool,
    initialized: bool,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let options = Arc::new(options);
        Self {
            memory: EngineMemory::new(Arc::clone(&options)),
            xct_manager: Arc::new(XctManager::new()),
            storage_manager: Arc::new(StorageManager::new()),
            thread_pool: ThreadPool::new(Arc::clone(&options)),
            options,
            initialized: false,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn memory(&self) -> &EngineMemory {
        &self.memory
    }

    pub fn xct_manager(&self) -> &Arc<XctManager> {
        &self.xct_manager
    }

    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.storage_manager
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }
}

impl Initializable for Engine {
    fn initialize(&mut self) -> eyre::Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.options
            .validate()
            .wrap_err("validating engine options")?;
        info!(
            groups = self.options.thread.group_count,
            threads_per_group = self.options.thread.thread_count_per_group,
            "initializing engine"
        );
        self.memory.initialize().wrap_err("initializing memory")?;
        self.thread_pool
            .initialize_with(&self.memory, &self.xct_manager)
            .wrap_err("initializing thread pool")?;
        self.initialized = true;
        info!("engine is up");
        Ok(())
    }

    fn uninitialize(&mut self) -> eyre::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        info!("uninitializing engine");
        let mut batch = ErrorBatch::new();

        // Storages first, through worker 0, so freed pages flow into a
        // chunk that is flushed moments later.
        let storage_manager = Arc::clone(&self.storage_manager);
        batch.push_result(self.thread_pool.impersonate_on(0, move |thread| {
            storage_manager.release_all(thread);
            Ok(())
        }));

        batch.push_result(self.thread_pool.uninitialize());
        batch.push_result(self.memory.uninitialize());

        self.initialized = false;
        batch.summarize("engine teardown")
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
