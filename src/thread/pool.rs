//! # Thread Pool
//!
//! Spawns one OS thread per `(group, ordinal)` pair, pins each to a core,
//! and keeps them alive for the engine's lifetime. Each worker constructs
//! its own [`Thread`] context *on its own core*, so every per-core
//! allocation (chunk seeding, log buffer) happens with the right NUMA
//! affinity, and tears it down the same way.
//!
//! ## Startup / Shutdown Gating
//!
//! Every worker owns a one-shot [`SharedRendezvous`]; `initialize_with`
//! waits for all of them before declaring the pool up, and surfaces any
//! worker's construction failure as its own. Shutdown sends a stop
//! command and joins workers in strict reverse spawn order; teardown
//! errors are aggregated, never dropped.
//!
//! ## Impersonation
//!
//! Client code runs transactional work by submitting a closure that
//! receives `&mut Thread`. The closure executes on the worker's own OS
//! thread; the submitting thread blocks on a result channel. This is the
//! only way into a `Thread`, which keeps the "mutated only by the owning
//! thread" rule trivially true.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{bail, eyre, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::EngineOptions;
use crate::error::ErrorBatch;
use crate::lifecycle::Initializable;
use crate::memory::{EngineMemory, GlobalVolatilePageResolver, PagePool};
use crate::sync::{McsBlockStorage, SharedRendezvous};
use crate::thread::thread::Thread;
use crate::thread::{to_global_ordinal, ThreadGlobalOrdinal, ThreadId};
use crate::xct::XctManager;

type ImpersonateTask = Box<dyn FnOnce(&mut Thread) + Send>;

enum WorkerCommand {
    Task(ImpersonateTask),
    Stop,
}

struct WorkerHandle {
    id: ThreadId,
    sender: Sender<WorkerCommand>,
    ready: Arc<SharedRendezvous>,
    failure: Arc<Mutex<Option<String>>>,
    join: Option<JoinHandle<()>>,
}

pub struct ThreadPool {
    options: Arc<EngineOptions>,
    workers: Vec<WorkerHandle>,
    next_worker: AtomicUsize,
    initialized: bool,
}

impl ThreadPool {
    pub fn new(options: Arc<EngineOptions>) -> Self {
        Self {
            options,
            workers: Vec::new(),
            next_worker: AtomicUsize::new(0),
            initialized: false,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Spawns and gates every worker. Idempotent.
    pub fn initialize_with(
        &mut self,
        memory: &EngineMemory,
        xct_manager: &Arc<XctManager>,
    ) -> eyre::Result<()> {
        if self.initialized {
            return Ok(());
        }
        let groups = self.options.thread.group_count;
        let per_group = self.options.thread.thread_count_per_group;
        info!(groups, per_group, "spawning worker threads");

        let resolver = memory.global_volatile_page_resolver();
        for node in 0..groups {
            for ordinal in 0..per_group {
                let id = ThreadId::new(node as u8, ordinal as u8);
                let global_ordinal = to_global_ordinal(id, per_group);
                let worker = spawn_worker(
                    Arc::clone(&self.options),
                    id,
                    global_ordinal,
                    Arc::clone(memory.pool(id.numa_node())),
                    resolver,
                    Arc::clone(memory.mcs_blocks()),
                    Arc::clone(xct_manager),
                )?;
                self.workers.push(worker);
            }
        }

        // Gate on every worker's startup rendezvous, then check for
        // construction failures.
        for worker in &self.workers {
            worker.ready.wait();
        }
        let mut failures = Vec::new();
        for worker in &self.workers {
            if let Some(message) = worker.failure.lock().take() {
                failures.push(format!("worker {:?}: {}", worker.id, message));
            }
        }
        if !failures.is_empty() {
            self.stop_all_workers();
            bail!("worker startup failed: {}", failures.join("; "));
        }

        self.initialized = true;
        Ok(())
    }

    /// Runs `task` on the next worker, round-robin.
    pub fn impersonate<R, F>(&self, task: F) -> eyre::Result<R>
    where
        F: FnOnce(&mut Thread) -> eyre::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.submit(index, task)
    }

    /// Runs `task` on the worker with the given global ordinal.
    pub fn impersonate_on<R, F>(
        &self,
        global_ordinal: ThreadGlobalOrdinal,
        task: F,
    ) -> eyre::Result<R>
    where
        F: FnOnce(&mut Thread) -> eyre::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(global_ordinal as usize, task)
    }

    fn submit<R, F>(&self, worker_index: usize, task: F) -> eyre::Result<R>
    where
        F: FnOnce(&mut Thread) -> eyre::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let worker = self
            .workers
            .get(worker_index)
            .ok_or_else(|| eyre!("no worker at index {}", worker_index))?;
        let (result_tx, result_rx) = channel();
        let boxed: ImpersonateTask = Box::new(move |thread| {
            let _ = result_tx.send(task(thread));
        });
        worker
            .sender
            .send(WorkerCommand::Task(boxed))
            .map_err(|_| eyre!("worker {:?} is gone", worker.id))?;
        result_rx
            .recv()
            .wrap_err("worker dropped the task result")?
    }

    fn stop_all_workers(&mut self) -> ErrorBatch {
        let mut batch = ErrorBatch::new();
        for worker in self.workers.iter_mut().rev() {
            // A worker that already exited has dropped its receiver;
            // that is fine here.
            let _ = worker.sender.send(WorkerCommand::Stop);
            if let Some(handle) = worker.join.take() {
                if handle.join().is_err() {
                    batch.push(eyre!("worker {:?} panicked", worker.id));
                }
            }
            if let Some(message) = worker.failure.lock().take() {
                batch.push(eyre!("worker {:?}: {}", worker.id, message));
            }
        }
        self.workers.clear();
        batch
    }

    /// Stops and joins every worker in reverse spawn order.
    pub fn uninitialize(&mut self) -> eyre::Result<()> {
        if !self.initialized && self.workers.is_empty() {
            return Ok(());
        }
        info!("stopping worker threads");
        let batch = self.stop_all_workers();
        self.initialized = false;
        batch.summarize("thread pool teardown")
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    options: Arc<EngineOptions>,
    id: ThreadId,
    global_ordinal: ThreadGlobalOrdinal,
    node_pool: Arc<PagePool>,
    resolver: GlobalVolatilePageResolver,
    mcs_storage: Arc<McsBlockStorage>,
    xct_manager: Arc<XctManager>,
) -> eyre::Result<WorkerHandle> {
    let (sender, receiver) = channel();
    let ready = Arc::new(SharedRendezvous::new());
    let failure = Arc::new(Mutex::new(None));

    let worker_ready = Arc::clone(&ready);
    let worker_failure = Arc::clone(&failure);
    let join = std::thread::Builder::new()
        .name(format!(
            "tatami-worker-{}-{}",
            id.numa_node(),
            id.local_ordinal()
        ))
        .spawn(move || {
            worker_main(
                options,
                id,
                global_ordinal,
                node_pool,
                resolver,
                mcs_storage,
                xct_manager,
                receiver,
                worker_ready,
                worker_failure,
            );
        })
        .wrap_err("spawning worker thread")?;

    Ok(WorkerHandle {
        id,
        sender,
        ready,
        failure,
        join: Some(join),
    })
}

#[allow(clippy::too_many_arguments)]
fn worker_main(
    options: Arc<EngineOptions>,
    id: ThreadId,
    global_ordinal: ThreadGlobalOrdinal,
    node_pool: Arc<PagePool>,
    resolver: GlobalVolatilePageResolver,
    mcs_storage: Arc<McsBlockStorage>,
    xct_manager: Arc<XctManager>,
    receiver: Receiver<WorkerCommand>,
    ready: Arc<SharedRendezvous>,
    failure: Arc<Mutex<Option<String>>>,
) {
    pin_to_core(global_ordinal);

    let mut thread = match Thread::new(
        &options,
        id,
        global_ordinal,
        node_pool,
        resolver,
        mcs_storage,
        xct_manager,
    ) {
        Ok(thread) => thread,
        Err(report) => {
            *failure.lock() = Some(format!("{:#}", report));
            ready.signal();
            return;
        }
    };
    if let Err(report) = thread.initialize() {
        *failure.lock() = Some(format!("{:#}", report));
        ready.signal();
        return;
    }
    ready.signal();

    while let Ok(command) = receiver.recv() {
        match command {
            WorkerCommand::Task(task) => task(&mut thread),
            WorkerCommand::Stop => break,
        }
    }

    if let Err(report) = thread.uninitialize() {
        *failure.lock() = Some(format!("{:#}", report));
    }
}

#[cfg(target_os = "linux")]
fn pin_to_core(global_ordinal: ThreadGlobalOrdinal) {
    // SAFETY: plain affinity syscalls on the current thread.
    unsafe {
        let cpus = libc::sysconf(libc::_SC_NPROCESSORS_ONLN);
        if cpus <= 0 {
            return;
        }
        let target = global_ordinal as usize % cpus as usize;
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(target, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            debug!(global_ordinal, target, "sched_setaffinity failed; running unpinned");
        } else {
            debug!(global_ordinal, target, "pinned worker to core");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(global_ordinal: ThreadGlobalOrdinal) {
    debug!(global_ordinal, "core pinning is a no-op on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::PAGE_SIZE;

    fn test_setup(groups: u16, per_group: u16) -> (Arc<EngineOptions>, EngineMemory) {
        let mut options = EngineOptions::default();
        options.thread.group_count = groups;
        options.thread.thread_count_per_group = per_group;
        options.memory.page_pool_size_per_node = 512 * PAGE_SIZE as u64;
        options.memory.pages_for_free_pool = 16;
        options.memory.offset_chunk_size = 32;
        let options = Arc::new(options);
        let mut memory = EngineMemory::new(Arc::clone(&options));
        memory.initialize().unwrap();
        (options, memory)
    }

    #[test]
    fn pool_spawns_and_stops_workers() {
        let (options, mut memory) = test_setup(1, 2);
        let xct_manager = Arc::new(XctManager::new());
        let mut pool = ThreadPool::new(options);

        pool.initialize_with(&memory, &xct_manager).unwrap();
        assert!(pool.is_initialized());
        assert_eq!(pool.thread_count(), 2);

        pool.uninitialize().unwrap();
        assert!(!pool.is_initialized());
        // Workers returned their chunks.
        assert_eq!(memory.pool(0).free_count(), 496);
        memory.uninitialize().unwrap();
    }

    #[test]
    fn impersonate_runs_on_a_worker() {
        let (options, mut memory) = test_setup(1, 2);
        let xct_manager = Arc::new(XctManager::new());
        let mut pool = ThreadPool::new(options);
        pool.initialize_with(&memory, &xct_manager).unwrap();

        let node = pool
            .impersonate(|thread| Ok(thread.thread_id().numa_node()))
            .unwrap();
        assert_eq!(node, 0);

        let ordinal = pool
            .impersonate_on(1, |thread| Ok(thread.global_ordinal()))
            .unwrap();
        assert_eq!(ordinal, 1);

        pool.uninitialize().unwrap();
        memory.uninitialize().unwrap();
    }

    #[test]
    fn impersonated_errors_propagate() {
        let (options, mut memory) = test_setup(1, 1);
        let xct_manager = Arc::new(XctManager::new());
        let mut pool = ThreadPool::new(options);
        pool.initialize_with(&memory, &xct_manager).unwrap();

        let result: eyre::Result<()> =
            pool.impersonate(|_thread| bail!("deliberate task failure"));
        assert!(result.unwrap_err().to_string().contains("deliberate"));

        pool.uninitialize().unwrap();
        memory.uninitialize().unwrap();
    }
}
