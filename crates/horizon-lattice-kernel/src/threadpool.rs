//! Worker pool for background tasks.
//!
//! Built on rayon's work-stealing scheduler. Tasks never deliver signals
//! themselves; a result that must reach an object is handed back through that
//! object's posted-event queue with [`ThreadPool::spawn_with_callback`]. The
//! application waits for the global pool to drain before it finishes tearing
//! down.
//!
//! ```no_run
//! use horizon_lattice_kernel::threadpool::ThreadPool;
//!
//! let pool = ThreadPool::global().unwrap();
//! let handle = pool.spawn(|| 6 * 7);
//! assert_eq!(handle.wait(), Some(42));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::error::ThreadPoolError;
use crate::logging::targets;
use crate::metatype::Arguments;
use crate::object::{self, ObjectId};
use crate::slot::{self, Slot};

static GLOBAL_POOL: OnceLock<ThreadPool> = OnceLock::new();

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A cancellation flag shared between a task and its owner.
///
/// Tasks check [`is_cancelled`](Self::is_cancelled) and return early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Handle to a spawned task's result.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    receiver: Receiver<T>,
    cancellation: Option<CancellationToken>,
}

impl<T> TaskHandle<T> {
    /// Unique task id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the result is available.
    pub fn is_finished(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// The result, if the task has finished.
    pub fn try_get(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block until the task finishes. `None` if it panicked.
    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Cancel the task through its token, if it has one.
    pub fn cancel(&self) {
        if let Some(token) = &self.cancellation {
            token.cancel();
        }
    }
}

/// Settings for a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Worker count; `None` uses one per CPU core.
    pub num_threads: Option<usize>,
    /// Worker thread name prefix.
    pub thread_name: String,
    /// Worker stack size in bytes.
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "lattice-worker".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Default settings with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }
}

/// Count of tasks not yet finished, with a condvar signalled at zero.
#[derive(Debug, Default)]
struct ActiveTasks {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActiveTasks {
    fn start(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks a task finished even if it panics.
struct TaskScope(Arc<ActiveTasks>);

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A pool of worker threads.
pub struct ThreadPool {
    pool: RayonThreadPool,
    active: Arc<ActiveTasks>,
}

impl ThreadPool {
    /// The global pool, created with default settings on first use.
    pub fn global() -> Result<&'static ThreadPool, ThreadPoolError> {
        if let Some(pool) = GLOBAL_POOL.get() {
            return Ok(pool);
        }
        let pool = ThreadPool::new(ThreadPoolConfig::default())?;
        // Another thread may have won the race; either pool is fine.
        let _ = GLOBAL_POOL.set(pool);
        GLOBAL_POOL
            .get()
            .ok_or_else(|| ThreadPoolError::CreationFailed("global pool unavailable".to_string()))
    }

    /// Create the global pool with `config`. Fails if it already exists.
    pub fn init_global(config: ThreadPoolConfig) -> Result<&'static ThreadPool, ThreadPoolError> {
        if GLOBAL_POOL.get().is_some() {
            return Err(ThreadPoolError::AlreadyInitialized);
        }
        let pool = ThreadPool::new(config)?;
        GLOBAL_POOL.set(pool).map_err(|_| ThreadPoolError::AlreadyInitialized)?;
        GLOBAL_POOL.get().ok_or(ThreadPoolError::AlreadyInitialized)
    }

    /// Whether the global pool has been created.
    pub fn global_initialized() -> bool {
        GLOBAL_POOL.get().is_some()
    }

    /// Create a standalone pool.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        let name = config.thread_name.clone();
        let mut builder = ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{name}-{index}"))
            .panic_handler(|_| tracing::error!(target: targets::THREAD, "thread pool task panicked"));
        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let pool = builder
            .build()
            .map_err(|e| ThreadPoolError::CreationFailed(e.to_string()))?;
        tracing::debug!(target: targets::THREAD, threads = pool.current_num_threads(), "thread pool created");
        Ok(Self {
            pool,
            active: Arc::new(ActiveTasks::default()),
        })
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of tasks queued or running.
    pub fn active_tasks(&self) -> usize {
        *self.active.count.lock()
    }

    fn spawn_tracked(&self, task: impl FnOnce() + Send + 'static) {
        self.active.start();
        let scope = TaskScope(self.active.clone());
        self.pool.spawn(move || {
            let _scope = scope;
            task();
        });
    }

    /// Run `task` on a worker.
    pub fn spawn<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_internal(task, None)
    }

    /// Run `task` with a fresh cancellation token.
    pub fn spawn_cancellable<F, T>(&self, task: F) -> (TaskHandle<T>, CancellationToken)
    where
        F: FnOnce(CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let for_task = token.clone();
        let handle = self.spawn_internal(move || task(for_task), Some(token.clone()));
        (handle, token)
    }

    fn spawn_internal<F, T>(&self, task: F, cancellation: Option<CancellationToken>) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = bounded(1);
        self.spawn_tracked(move || {
            let _ = sender.send(task());
        });
        TaskHandle {
            id,
            receiver,
            cancellation,
        }
    }

    /// Run `task` on a worker and hand its result to `callback` in the
    /// thread of `context`, through a posted call.
    ///
    /// The callback is dropped if `context` has been destroyed by then.
    pub fn spawn_with_callback<F, T, C>(&self, context: ObjectId, task: F, callback: C)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.spawn_tracked(move || {
            let result = task();
            let Some(core) = object::core(context) else {
                tracing::trace!(target: targets::THREAD, ?context, "callback context destroyed; dropping result");
                return;
            };
            let pending = Mutex::new(Some((callback, result)));
            let deliver = Slot::callable(move |_| {
                if let Some((callback, result)) = pending.lock().take() {
                    callback(result);
                }
            });
            if let Err(err) = slot::queue_call(&core, None, deliver, &Arguments::new(), None) {
                tracing::warn!(target: targets::THREAD, ?context, %err, "could not deliver task result");
            }
        });
    }

    /// Run `task` inside the pool and wait for it.
    pub fn execute<F, T>(&self, task: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.pool.install(task)
    }

    /// Block until no task is queued or running, or `timeout` elapses.
    /// Returns whether the pool is idle.
    pub fn wait_for_done(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut count = self.active.count.lock();
        while *count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.active.idle.wait_until(&mut count, deadline).timed_out() {
                        return *count == 0;
                    }
                }
                None => self.active.idle.wait(&mut count),
            }
        }
        true
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Wait for the global pool, if it exists, to drain.
pub(crate) fn wait_for_global_done() {
    if let Some(pool) = GLOBAL_POOL.get() {
        tracing::debug!(target: targets::APPLICATION, active = pool.active_tasks(), "waiting for global thread pool");
        pool.wait_for_done(None);
    }
}

static_assertions::assert_impl_all!(ThreadPool: Send, Sync);
static_assertions::assert_impl_all!(CancellationToken: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{register, Object, ObjectBase};
    use crate::posted;
    use std::sync::atomic::AtomicUsize;

    fn pool() -> ThreadPool {
        ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap()
    }

    #[test]
    fn test_spawn_and_wait() {
        let pool = pool();
        assert_eq!(pool.num_threads(), 2);
        let handle = pool.spawn(|| 21 * 2);
        assert_eq!(handle.wait(), Some(42));
    }

    #[test]
    fn test_cancellation() {
        let pool = pool();
        let (handle, token) = pool.spawn_cancellable(|token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            "stopped"
        });
        token.cancel();
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some("stopped"));
    }

    #[test]
    fn test_wait_for_done() {
        let pool = pool();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let done = done.clone();
            pool.spawn(move || {
                std::thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.wait_for_done(Some(Duration::from_secs(10))));
        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert_eq!(pool.active_tasks(), 0);
    }

    #[test]
    fn test_panicking_task_is_not_counted() {
        let pool = pool();
        let handle = pool.spawn(|| -> i32 { panic!("task failure") });
        assert_eq!(handle.wait(), None);
        assert!(pool.wait_for_done(Some(Duration::from_secs(5))));
    }

    struct Context {
        base: ObjectBase,
    }

    impl Object for Context {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }
    }

    #[test]
    fn test_callback_runs_in_context_thread() {
        std::thread::spawn(|| {
            let pool = pool();
            let context = register(Context {
                base: ObjectBase::new::<Context>(),
            });
            let result = Arc::new(Mutex::new(None));
            let sink = result.clone();
            let caller = std::thread::current().id();
            pool.spawn_with_callback(context.base.id(), || 7, move |value| {
                *sink.lock() = Some((value, std::thread::current().id()));
            });
            assert!(pool.wait_for_done(Some(Duration::from_secs(5))));
            assert!(result.lock().is_none());
            posted::send_posted_events(None, None);
            assert_eq!(*result.lock(), Some((7, caller)));
        })
        .join()
        .unwrap();
    }
}
