//! Worker pool executing admitted request operations.
//!
//! A fixed number of worker tasks pull [`WorkItem`]s from one FIFO queue.
//! Each operation runs in its own tokio task so a panic fails that item's
//! [`CompletionFuture`] without taking the worker down. Cancelling a
//! completion future aborts the operation it belongs to.
//!
//! [`WorkerPool::shared`] hands out a process-wide pool backed by a
//! dedicated runtime, so it outlives whichever runtime first asked for it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{ModbusError, ModbusResult};

/// Boxed request operation.
pub type Operation = Pin<Box<dyn Future<Output = ModbusResult<()>> + Send + 'static>>;

/// Callback run by the worker once an item is finished, whatever the outcome.
pub type DoneHook = Box<dyn FnOnce() + Send + 'static>;

/// Single-assignment result slot shared by everyone waiting on one operation.
///
/// The first `complete`/`cancel` wins; later calls are ignored.
#[derive(Debug, Clone)]
pub struct CompletionFuture {
    slot: Arc<watch::Sender<Option<ModbusResult<()>>>>,
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionFuture {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Resolve with `result`. Returns `false` if already resolved.
    pub fn complete(&self, result: ModbusResult<()>) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn cancel(&self, err: ModbusError) -> bool {
        self.complete(Err(err))
    }

    pub fn is_done(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The result, if resolved.
    pub fn peek(&self) -> Option<ModbusResult<()>> {
        self.slot.borrow().clone()
    }

    /// Wait until resolved and return the result.
    pub async fn await_completion(&self) -> ModbusResult<()> {
        let mut rx = self.slot.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot
                .clone()
                .unwrap_or_else(|| Err(ModbusError::internal("completion resolved without value"))),
            // The sender lives in `self`, it cannot be gone
            Err(_) => Err(ModbusError::internal("completion channel closed")),
        };
        result
    }
}

/// One queued unit of work.
pub struct WorkItem {
    operation: Operation,
    completion: CompletionFuture,
    on_done: Option<DoneHook>,
}

impl WorkItem {
    pub fn new(operation: Operation, completion: CompletionFuture, on_done: Option<DoneHook>) -> Self {
        Self {
            operation,
            completion,
            on_done,
        }
    }

    fn finish(self, result: Option<ModbusResult<()>>) {
        settle(&self.completion, self.on_done, result);
    }

    async fn run(self, worker: usize) {
        let WorkItem {
            operation,
            completion,
            on_done,
        } = self;
        if completion.is_done() {
            debug!("Worker {} skipping operation cancelled while queued", worker);
            settle(&completion, on_done, None);
            return;
        }
        let mut handle = tokio::spawn(operation);

        let result = tokio::select! {
            joined = &mut handle => Some(match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    error!("Worker {} operation panicked", worker);
                    Err(ModbusError::internal("operation panicked"))
                }
                Err(_) => Err(ModbusError::shutdown("operation aborted")),
            }),
            _ = completion.await_completion() => {
                debug!("Worker {} aborting cancelled operation", worker);
                handle.abort();
                None
            }
        };

        settle(&completion, on_done, result);
    }
}

fn settle(completion: &CompletionFuture, on_done: Option<DoneHook>, result: Option<ModbusResult<()>>) {
    if let Some(result) = result {
        completion.complete(result);
    }
    if let Some(hook) = on_done {
        hook();
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("done", &self.completion.is_done())
            .field("has_hook", &self.on_done.is_some())
            .finish()
    }
}

/// Fixed-size pool of worker tasks.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    closed: Arc<AtomicBool>,
    queued: Arc<AtomicUsize>,
    /// Only set for the shared pool, which owns its runtime
    _runtime: Option<Runtime>,
}

static SHARED_POOL: Mutex<Option<Arc<WorkerPool>>> = Mutex::new(None);

impl WorkerPool {
    /// Spawn `workers` worker tasks on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self::spawn_on(&Handle::current(), workers, None))
    }

    /// Spawn `workers` worker tasks on the given runtime.
    pub fn with_handle(handle: &Handle, workers: usize) -> Arc<Self> {
        Arc::new(Self::spawn_on(handle, workers, None))
    }

    /// Process-wide default pool sized to the available parallelism.
    pub fn shared() -> ModbusResult<Arc<Self>> {
        let mut shared = SHARED_POOL
            .lock()
            .map_err(|_| ModbusError::internal("shared worker pool lock poisoned"))?;
        if let Some(pool) = shared.as_ref() {
            return Ok(pool.clone());
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("modbus-worker")
            .enable_all()
            .build()
            .map_err(|e| ModbusError::internal(format!("failed to start worker runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        let pool = Arc::new(Self::spawn_on(&handle, workers, Some(runtime)));
        debug!("Shared worker pool started with {} workers", workers);
        *shared = Some(pool.clone());
        Ok(pool)
    }

    fn spawn_on(handle: &Handle, workers: usize, runtime: Option<Runtime>) -> Self {
        let size = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<WorkItem>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let closed = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|id| {
                let rx = rx.clone();
                let closed = closed.clone();
                let queued = queued.clone();
                handle.spawn(async move {
                    loop {
                        let item = { rx.lock().await.recv().await };
                        let Some(item) = item else { break };
                        queued.fetch_sub(1, Ordering::SeqCst);
                        if closed.load(Ordering::SeqCst) {
                            item.finish(Some(Err(ModbusError::shutdown("worker pool closed"))));
                            continue;
                        }
                        item.run(id).await;
                    }
                    debug!("Worker {} stopped", id);
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
            closed,
            queued,
            _runtime: runtime,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Items waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue an operation and return its completion future.
    pub fn submit<F>(&self, operation: F) -> CompletionFuture
    where
        F: Future<Output = ModbusResult<()>> + Send + 'static,
    {
        let completion = CompletionFuture::new();
        self.submit_item(WorkItem::new(Box::pin(operation), completion.clone(), None));
        completion
    }

    /// Queue a prepared item. On a closed pool the item fails immediately
    /// and its hook runs on the caller's thread.
    pub fn submit_item(&self, item: WorkItem) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender.filter(|_| !self.is_closed()) else {
            item.finish(Some(Err(ModbusError::shutdown("worker pool closed"))));
            return;
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(item)) = sender.send(item) {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            item.finish(Some(Err(ModbusError::shutdown("worker pool stopped"))));
        }
    }

    /// Stop accepting work. Items still queued fail with `Shutdown`; running
    /// operations finish normally.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        let workers = match self.workers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        warn!("Worker pool closed ({} workers)", workers);
    }
}
