//! # Engine Memory
//!
//! The repository of every engine-lifetime memory: one page pool per
//! NUMA node plus the shared MCS block table. Constructed empty, filled
//! by `initialize`, drained by `uninitialize` in reverse, with leak
//! detection in between.
//!
//! Pools are held behind `Arc` because worker threads on a node each keep
//! a handle to their node's pool for chunk refills, and storages keep
//! resolver copies derived from them.

use std::sync::Arc;

use eyre::WrapErr;
use tracing::info;

use crate::config::EngineOptions;
use crate::error::ErrorBatch;
use crate::lifecycle::Initializable;
use crate::memory::page_pool::PagePool;
use crate::memory::resolver::{GlobalVolatilePageResolver, LocalPageResolver};
use crate::memory::NumaNodeId;
use crate::sync::McsBlockStorage;

pub struct EngineMemory {
    options: Arc<EngineOptions>,
    pools: Vec<Arc<PagePool>>,
    mcs_blocks: Arc<McsBlockStorage>,
    initialized: bool,
}

impl EngineMemory {
    pub fn new(options: Arc<EngineOptions>) -> Self {
        let total_threads =
            options.thread.group_count as usize * options.thread.thread_count_per_group as usize;
        Self {
            options,
            pools: Vec::new(),
            mcs_blocks: Arc::new(McsBlockStorage::new(total_threads)),
            initialized: false,
        }
    }

    pub fn pool(&self, node: NumaNodeId) -> &Arc<PagePool> {
        &self.pools[node as usize]
    }

    pub fn pools(&self) -> &[Arc<PagePool>] {
        &self.pools
    }

    pub fn mcs_blocks(&self) -> &Arc<McsBlockStorage> {
        &self.mcs_blocks
    }

    /// A resolver spanning every node's pool. Valid only while
    /// initialized.
    pub fn global_volatile_page_resolver(&self) -> GlobalVolatilePageResolver {
        debug_assert!(self.initialized);
        let locals: Vec<LocalPageResolver> =
            self.pools.iter().map(|pool| pool.resolver()).collect();
        GlobalVolatilePageResolver::new(&locals)
    }
}

impl Initializable for EngineMemory {
    fn initialize(&mut self) -> eyre::Result<()> {
        if self.initialized {
            return Ok(());
        }
        let nodes = self.options.thread.group_count;
        info!(
            nodes,
            pool_bytes_per_node = self.options.memory.page_pool_size_per_node,
            "initializing engine memory"
        );
        for node in 0..nodes {
            let pool = PagePool::new(&self.options.memory, node as NumaNodeId)
                .wrap_err_with(|| format!("constructing page pool for node {}", node))?;
            self.pools.push(Arc::new(pool));
        }
        self.initialized = true;
        Ok(())
    }

    fn uninitialize(&mut self) -> eyre::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        info!("releasing engine memory");
        let batch = ErrorBatch::new();
        for pool in self.pools.drain(..).rev() {
            pool.warn_if_leaking();
            // The region itself unmaps when the last Arc drops; workers
            // are already gone by the time we get here.
        }
        self.initialized = false;
        batch.summarize("engine memory teardown")
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
