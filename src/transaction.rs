//! # Request Transaction Manager
//!
//! Admission control for device requests. Most Modbus devices handle one
//! request at a time, some a few; the manager makes sure no more than
//! `concurrency_limit` requests are outstanding per connection and that
//! waiting requests are admitted strictly in submit order.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --submit--> Queued --admitted--> Running --+--> Completed
//!                       |                            |
//!                       +------ fail_request --------+--> Failed
//! ```
//!
//! A transaction is terminal once its completion future has resolved *and*
//! it has left the running set; [`RequestTransaction::await_completion`]
//! returns only then, so a caller that wakes up can rely on its slot being
//! free again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltage_modbus_driver::transaction::{RequestTransactionManager, TransactionManagerConfig};
//! use voltage_modbus_driver::pool::WorkerPool;
//!
//! # async fn example() -> voltage_modbus_driver::ModbusResult<()> {
//! let manager = RequestTransactionManager::with_pool(
//!     TransactionManagerConfig::default().with_concurrency_limit(2),
//!     WorkerPool::new(4),
//! );
//!
//! let transaction = manager.start_transaction();
//! transaction.submit(async {
//!     // serialize, send, await the response...
//!     Ok(())
//! })?;
//! transaction.await_completion().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, error, trace, warn};

use crate::constants::DEFAULT_CONCURRENCY_LIMIT;
use crate::error::{ModbusError, ModbusResult};
use crate::pool::{CompletionFuture, DoneHook, Operation, WorkItem, WorkerPool};

/// Process-wide transaction id counter.
static NEXT_TRANSACTION_ID: AtomicU32 = AtomicU32::new(1);

fn next_transaction_id() -> u32 {
    let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
    if id == u32::MAX {
        warn!("Transaction id counter wrapped around");
    }
    id
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Transaction manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionManagerConfig {
    /// Requests allowed in flight at once
    pub concurrency_limit: usize,
    /// Log every state transition at `trace` level
    pub trace_transactions: bool,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            trace_transactions: false,
        }
    }
}

impl TransactionManagerConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_trace_transactions(mut self, enabled: bool) -> Self {
        self.trace_transactions = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

struct TransactionInner {
    id: u32,
    state: watch::Sender<TransactionState>,
    operation: Mutex<Option<Operation>>,
    submitted: AtomicBool,
    /// Out of the work log and running set for good
    released: AtomicBool,
    completion: CompletionFuture,
    manager: Weak<ManagerInner>,
}

/// Handle to one request. Clones refer to the same transaction.
#[derive(Clone)]
pub struct RequestTransaction {
    inner: Arc<TransactionInner>,
}

impl RequestTransaction {
    fn new(manager: Weak<ManagerInner>) -> Self {
        let (state, _) = watch::channel(TransactionState::Created);
        Self {
            inner: Arc::new(TransactionInner {
                id: next_transaction_id(),
                state,
                operation: Mutex::new(None),
                submitted: AtomicBool::new(false),
                released: AtomicBool::new(false),
                completion: CompletionFuture::new(),
                manager,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.borrow()
    }

    /// Terminal: completed or failed, and out of the manager.
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    fn same(&self, other: &RequestTransaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Terminal states are final; returns `false` if the move was refused.
    fn set_state(&self, state: TransactionState) -> bool {
        let mut previous = state;
        let changed = self.inner.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            previous = *current;
            *current = state;
            true
        });
        if !changed {
            debug!(
                "Transaction {} is {}, ignoring move to {}",
                self.inner.id,
                self.state(),
                state
            );
        } else if let Some(manager) = self.inner.manager.upgrade() {
            if manager.config.trace_transactions {
                trace!("Transaction {}: {} -> {}", self.inner.id, previous, state);
            }
        }
        changed
    }

    /// Become terminal once both released and resolved.
    fn try_settle(&self) {
        if !self.inner.released.load(Ordering::SeqCst) {
            return;
        }
        let Some(result) = self.inner.completion.peek() else {
            return;
        };
        if self.state().is_terminal() {
            return;
        }
        self.set_state(if result.is_ok() {
            TransactionState::Completed
        } else {
            TransactionState::Failed
        });
    }

    /// Fail a transaction that never reached the running set.
    fn fail_detached(&self, err: ModbusError) {
        self.inner.completion.cancel(err);
        self.inner.released.store(true, Ordering::SeqCst);
        self.try_settle();
    }

    /// Queue `operation` for execution. Allowed once per transaction.
    pub fn submit<F>(&self, operation: F) -> ModbusResult<()>
    where
        F: Future<Output = ModbusResult<()>> + Send + 'static,
    {
        if self.inner.submitted.swap(true, Ordering::SeqCst) {
            error!(
                "Transaction {} submitted twice; an operation can only be set once",
                self.inner.id
            );
            return Err(ModbusError::transaction(
                self.inner.id,
                "operation already submitted",
            ));
        }

        let manager = match self.inner.manager.upgrade() {
            Some(manager) if manager.accepts_work() => manager,
            _ => {
                let err = ModbusError::shutdown("transaction manager closed");
                self.fail_detached(err.clone());
                return Err(err);
            }
        };

        {
            // fail_request resolves the completion before taking this lock
            let mut work_log = lock(&manager.work_log);
            if self.inner.completion.is_done() || self.inner.released.load(Ordering::SeqCst) {
                drop(work_log);
                let err = ModbusError::transaction(self.inner.id, "transaction already finished");
                self.fail_detached(err.clone());
                return Err(err);
            }
            *lock(&self.inner.operation) = Some(Box::pin(operation));
            self.set_state(TransactionState::Queued);
            work_log.push_back(self.clone());
        }
        manager.run_scheduler();
        Ok(())
    }

    /// Release the running slot held by this transaction.
    pub fn end_request(&self) -> ModbusResult<()> {
        let manager = self
            .inner
            .manager
            .upgrade()
            .ok_or_else(|| ModbusError::shutdown("transaction manager dropped"))?;
        if !manager.remove_running(self) {
            return Err(ModbusError::transaction(
                self.inner.id,
                "transaction is not running",
            ));
        }
        manager.after_release(self);
        Ok(())
    }

    /// Force-resolve the completion future with `err` and release the slot.
    pub fn fail_request(&self, err: ModbusError) -> ModbusResult<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(ModbusError::transaction(
                self.inner.id,
                format!("cannot fail a transaction in state {}", state),
            ));
        }
        debug!("Failing transaction {}: {}", self.inner.id, err);
        self.inner.completion.cancel(err);

        let Some(manager) = self.inner.manager.upgrade() else {
            self.inner.released.store(true, Ordering::SeqCst);
            self.try_settle();
            return Ok(());
        };

        // The state read above may be stale: the scheduler can admit the
        // transaction at any point, so look where it actually is.
        let dequeued = {
            let mut work_log = lock(&manager.work_log);
            let before = work_log.len();
            work_log.retain(|t| !t.same(self));
            work_log.len() != before
        };
        if dequeued || !self.inner.submitted.load(Ordering::SeqCst) {
            self.inner.released.store(true, Ordering::SeqCst);
            self.try_settle();
        } else if manager.remove_running(self) {
            manager.after_release(self);
        }
        // Otherwise it is between the work log and the running set; the
        // worker skips the cancelled operation and its done hook releases it.
        Ok(())
    }

    /// Shorthand for [`fail_request`](Self::fail_request) with a cancellation error.
    pub fn cancel(&self) -> ModbusResult<()> {
        self.fail_request(ModbusError::transaction(self.inner.id, "cancelled"))
    }

    /// Wait until the operation has finished and the transaction has left
    /// the manager, then return the operation's result.
    pub async fn await_completion(&self) -> ModbusResult<()> {
        let result = self.inner.completion.await_completion().await;
        let mut state = self.inner.state.subscribe();
        if state.wait_for(TransactionState::is_terminal).await.is_err() {
            return Err(ModbusError::internal("transaction state channel closed"));
        }
        result
    }
}

impl fmt::Debug for RequestTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTransaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for RequestTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestTransaction{{id={}, state={}}}", self.inner.id, self.state())
    }
}

struct ManagerInner {
    config: TransactionManagerConfig,
    concurrency_limit: AtomicUsize,
    work_log: Mutex<VecDeque<RequestTransaction>>,
    running: RwLock<Vec<RequestTransaction>>,
    /// Serializes scheduling passes; guards no data
    schedule: Mutex<()>,
    pool: Arc<WorkerPool>,
    closed: AtomicBool,
    draining: AtomicBool,
    released: Notify,
}

impl ManagerInner {
    fn accepts_work(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.draining.load(Ordering::SeqCst)
    }

    fn running_len(&self) -> usize {
        match self.running.read() {
            Ok(running) => running.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn remove_running(&self, transaction: &RequestTransaction) -> bool {
        let mut running = match self.running.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = running.len();
        running.retain(|t| !t.same(transaction));
        let removed = running.len() != before;
        if removed {
            transaction.inner.released.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Refill the freed slot before `transaction` turns terminal, so a
    /// waiter woken by it already sees its successor running.
    fn after_release(self: &Arc<Self>, transaction: &RequestTransaction) {
        self.run_scheduler();
        transaction.try_settle();
        self.released.notify_waiters();
    }

    /// Called by the worker once an operation is over.
    fn finish(self: &Arc<Self>, transaction: &RequestTransaction) {
        if self.remove_running(transaction) {
            self.after_release(transaction);
        } else {
            transaction.try_settle();
        }
    }

    /// Admit queued transactions while below the concurrency limit.
    fn run_scheduler(self: &Arc<Self>) {
        if self.draining.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let admitted = {
            let _pass = lock(&self.schedule);
            let mut admitted = Vec::new();
            loop {
                if self.running_len() >= self.concurrency_limit.load(Ordering::SeqCst) {
                    break;
                }
                let Some(next) = lock(&self.work_log).pop_front() else {
                    break;
                };
                match self.running.write() {
                    Ok(mut running) => running.push(next.clone()),
                    Err(poisoned) => poisoned.into_inner().push(next.clone()),
                }
                next.set_state(TransactionState::Running);
                admitted.push(next);
            }
            admitted
        };

        for transaction in admitted {
            self.dispatch(transaction);
        }
    }

    fn dispatch(self: &Arc<Self>, transaction: RequestTransaction) {
        let Some(operation) = lock(&transaction.inner.operation).take() else {
            error!("Transaction {} admitted without an operation", transaction.id());
            transaction
                .inner
                .completion
                .cancel(ModbusError::internal("transaction admitted without operation"));
            self.finish(&transaction);
            return;
        };

        let manager = Arc::downgrade(self);
        let hook_transaction = transaction.clone();
        let on_done: DoneHook = Box::new(move || match manager.upgrade() {
            Some(manager) => manager.finish(&hook_transaction),
            None => {
                hook_transaction.inner.released.store(true, Ordering::SeqCst);
                hook_transaction.try_settle();
            }
        });

        self.pool.submit_item(WorkItem::new(
            operation,
            transaction.inner.completion.clone(),
            Some(on_done),
        ));
    }
}

/// FIFO-fair, bounded-concurrency scheduler for device requests.
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct RequestTransactionManager {
    inner: Arc<ManagerInner>,
}

impl RequestTransactionManager {
    /// Create a manager running operations on [`WorkerPool::shared`].
    pub fn new(config: TransactionManagerConfig) -> ModbusResult<Self> {
        Ok(Self::with_pool(config, WorkerPool::shared()?))
    }

    /// Create a manager running operations on `pool`.
    pub fn with_pool(config: TransactionManagerConfig, pool: Arc<WorkerPool>) -> Self {
        let limit = config.concurrency_limit;
        if limit == 0 {
            warn!("Transaction manager created with a concurrency limit of 0; nothing will run");
        }
        Self {
            inner: Arc::new(ManagerInner {
                config,
                concurrency_limit: AtomicUsize::new(limit),
                work_log: Mutex::new(VecDeque::new()),
                running: RwLock::new(Vec::new()),
                schedule: Mutex::new(()),
                pool,
                closed: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                released: Notify::new(),
            }),
        }
    }

    /// New transaction in state `Created`. On a closed manager the
    /// transaction is already failed with `Shutdown`.
    pub fn start_transaction(&self) -> RequestTransaction {
        let transaction = RequestTransaction::new(Arc::downgrade(&self.inner));
        if !self.inner.accepts_work() {
            debug!(
                "Transaction {} started on a closed manager",
                transaction.id()
            );
            transaction.fail_detached(ModbusError::shutdown("transaction manager closed"));
        }
        transaction
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.concurrency_limit.load(Ordering::SeqCst)
    }

    /// Change the limit. Lowering it never pre-empts running work; raising
    /// it admits waiting work right away.
    pub fn set_concurrency_limit(&self, limit: usize) {
        let running = self.inner.running_len();
        if limit < running {
            warn!(
                "Concurrency limit lowered to {} with {} requests running; they will finish normally",
                limit, running
            );
        }
        self.inner.concurrency_limit.store(limit, Ordering::SeqCst);
        self.inner.run_scheduler();
    }

    /// Transactions currently running.
    pub fn active_requests(&self) -> usize {
        self.inner.running_len()
    }

    /// Transactions waiting for a slot.
    pub fn queued_requests(&self) -> usize {
        lock(&self.inner.work_log).len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    /// Refuse new work and fail everything still queued. Running requests
    /// are left to finish.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let queued: Vec<RequestTransaction> = lock(&self.inner.work_log).drain(..).collect();
        if !queued.is_empty() {
            debug!("Closing manager, failing {} queued transactions", queued.len());
        }
        for transaction in queued {
            transaction.fail_detached(ModbusError::shutdown("transaction manager closed"));
        }
    }

    /// Stop admitting, wait up to `timeout` for running requests to finish,
    /// then [`close`](Self::close). Returns a timeout error if requests were
    /// still running when the wait gave up.
    pub async fn close_graceful(&self, timeout: Duration) -> ModbusResult<()> {
        self.inner.draining.store(true, Ordering::SeqCst);
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let released = self.inner.released.notified();
                if self.inner.running_len() == 0 {
                    break;
                }
                released.await;
            }
        })
        .await;
        self.close();
        drained.map_err(|_| {
            ModbusError::timeout("graceful close of transaction manager", timeout.as_millis() as u64)
        })
    }
}

impl fmt::Debug for RequestTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTransactionManager")
            .field("concurrency_limit", &self.concurrency_limit())
            .field("running", &self.active_requests())
            .field("queued", &self.queued_requests())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for RequestTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RequestTransactionManager{{limit={}, running={}, queued={}}}",
            self.concurrency_limit(),
            self.active_requests(),
            self.queued_requests()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn manager(limit: usize) -> RequestTransactionManager {
        RequestTransactionManager::with_pool(
            TransactionManagerConfig::default()
                .with_concurrency_limit(limit)
                .with_trace_transactions(true),
            WorkerPool::new(4),
        )
    }

    /// Submit an operation that finishes when the returned sender fires.
    fn gated(transaction: &RequestTransaction) -> oneshot::Sender<ModbusResult<()>> {
        let (tx, rx) = oneshot::channel();
        transaction
            .submit(async move { rx.await.unwrap_or(Ok(())) })
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let manager = manager(1);
        let a = manager.start_transaction();
        let b = manager.start_transaction();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), TransactionState::Created);
    }

    #[tokio::test]
    async fn test_limit_and_fifo_admission() {
        let manager = manager(2);
        let txs: Vec<_> = (0..5).map(|_| manager.start_transaction()).collect();
        let mut gates: Vec<_> = txs.iter().map(gated).collect();

        assert_eq!(txs[0].state(), TransactionState::Running);
        assert_eq!(txs[1].state(), TransactionState::Running);
        assert_eq!(txs[2].state(), TransactionState::Queued);
        assert_eq!(manager.active_requests(), 2);
        assert_eq!(manager.queued_requests(), 3);

        gates.remove(0).send(Ok(())).unwrap();
        txs[0].await_completion().await.unwrap();
        assert_eq!(txs[0].state(), TransactionState::Completed);
        assert_eq!(txs[2].state(), TransactionState::Running);
        assert_eq!(txs[3].state(), TransactionState::Queued);

        for gate in gates {
            let _ = gate.send(Ok(()));
        }
        for tx in &txs {
            tx.await_completion().await.unwrap();
        }
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_double_submit_is_rejected() {
        let manager = manager(1);
        let tx = manager.start_transaction();
        tx.submit(async { Ok(()) }).unwrap();
        let err = tx.submit(async { Ok(()) }).unwrap_err();
        assert!(matches!(err, ModbusError::Transaction { .. }));
        tx.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_operation_error_marks_failed() {
        let manager = manager(1);
        let tx = manager.start_transaction();
        tx.submit(async { Err(ModbusError::io("socket reset")) }).unwrap();
        let err = tx.await_completion().await.unwrap_err();
        assert!(matches!(err, ModbusError::Io { .. }));
        assert_eq!(tx.state(), TransactionState::Failed);
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_fail_request_releases_slot() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let _gate = gated(&first);
        let second = manager.start_transaction();
        let second_gate = gated(&second);
        assert_eq!(second.state(), TransactionState::Queued);

        first
            .fail_request(ModbusError::timeout("read", 100))
            .unwrap();
        let err = first.await_completion().await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert_eq!(first.state(), TransactionState::Failed);
        assert_eq!(second.state(), TransactionState::Running);

        assert!(first.fail_request(ModbusError::internal("again")).is_err());
        second_gate.send(Ok(())).unwrap();
        second.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_queued_transaction() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let gate = gated(&first);
        let second = manager.start_transaction();
        let _second_gate = gated(&second);

        second.cancel().unwrap();
        assert!(second.await_completion().await.is_err());
        assert_eq!(manager.queued_requests(), 0);

        gate.send(Ok(())).unwrap();
        first.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_transaction_cannot_be_submitted() {
        let manager = manager(1);
        let tx = manager.start_transaction();
        tx.fail_request(ModbusError::timeout("read", 10)).unwrap();
        assert_eq!(tx.state(), TransactionState::Failed);

        let err = tx.submit(async { Ok(()) }).unwrap_err();
        assert!(matches!(err, ModbusError::Transaction { .. }));
        assert_eq!(tx.state(), TransactionState::Failed);
        assert_eq!(manager.active_requests(), 0);
        assert_eq!(manager.queued_requests(), 0);
        assert!(matches!(
            tx.await_completion().await,
            Err(ModbusError::Timeout { .. })
        ));

        let cancelled = manager.start_transaction();
        cancelled.cancel().unwrap();
        assert!(cancelled.submit(async { Ok(()) }).is_err());
        assert_eq!(manager.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let manager = manager(1);
        let tx = manager.start_transaction();
        tx.cancel().unwrap();
        assert!(!tx.set_state(TransactionState::Running));
        assert_eq!(tx.state(), TransactionState::Failed);
    }

    fn holds_slot(manager: &RequestTransactionManager, tx: &RequestTransaction) -> bool {
        match manager.inner.running.read() {
            Ok(running) => running.iter().any(|t| t.same(tx)),
            Err(poisoned) => poisoned.into_inner().iter().any(|t| t.same(tx)),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fail_during_admission_settles_after_release() {
        let manager = manager(1);
        for _ in 0..200 {
            let first = manager.start_transaction();
            first.submit(async { Ok(()) }).unwrap();
            let second = manager.start_transaction();
            second
                .submit(std::future::pending::<ModbusResult<()>>())
                .unwrap();

            let failing = second.clone();
            let failer = tokio::spawn(async move {
                failing.fail_request(ModbusError::timeout("read", 1))
            });
            first.await_completion().await.unwrap();

            let result = tokio::time::timeout(Duration::from_secs(5), second.await_completion())
                .await
                .expect("failed transaction never settled");
            assert!(matches!(result, Err(ModbusError::Timeout { .. })));
            assert_eq!(second.state(), TransactionState::Failed);
            assert!(!holds_slot(&manager, &second));
            failer.await.unwrap().unwrap();
        }
        assert_eq!(manager.active_requests(), 0);
        assert_eq!(manager.queued_requests(), 0);
    }

    #[tokio::test]
    async fn test_end_request_unknown_transaction() {
        let manager = manager(1);
        let tx = manager.start_transaction();
        let err = tx.end_request().unwrap_err();
        assert!(matches!(err, ModbusError::Transaction { .. }));
    }

    #[tokio::test]
    async fn test_raising_limit_admits_waiting_work() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let first_gate = gated(&first);
        let second = manager.start_transaction();
        let second_gate = gated(&second);
        assert_eq!(second.state(), TransactionState::Queued);

        manager.set_concurrency_limit(2);
        assert_eq!(second.state(), TransactionState::Running);

        // Lowering below the running count pre-empts nothing
        manager.set_concurrency_limit(1);
        assert_eq!(manager.active_requests(), 2);

        first_gate.send(Ok(())).unwrap();
        second_gate.send(Ok(())).unwrap();
        first.await_completion().await.unwrap();
        second.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_queued_and_new_work() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let gate = gated(&first);
        let queued = manager.start_transaction();
        let _queued_gate = gated(&queued);

        manager.close();
        let err = queued.await_completion().await.unwrap_err();
        assert!(matches!(err, ModbusError::Shutdown { .. }));

        let late = manager.start_transaction();
        assert!(matches!(
            late.await_completion().await,
            Err(ModbusError::Shutdown { .. })
        ));

        gate.send(Ok(())).unwrap();
        first.await_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_graceful_waits_for_running() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let gate = gated(&first);

        let closer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.close_graceful(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        gate.send(Ok(())).unwrap();
        closer.await.unwrap().unwrap();
        assert!(manager.is_closed());
        assert_eq!(first.state(), TransactionState::Completed);
    }

    #[tokio::test]
    async fn test_close_graceful_times_out() {
        let manager = manager(1);
        let first = manager.start_transaction();
        let _gate = gated(&first);
        let err = manager
            .close_graceful(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_display() {
        let manager = manager(3);
        assert_eq!(
            manager.to_string(),
            "RequestTransactionManager{limit=3, running=0, queued=0}"
        );
        let tx = manager.start_transaction();
        assert!(tx.to_string().contains("state=Created"));
    }
}
