//! Single-thread task dispatcher
//!
//! A `DispatchThread` owns one OS thread that runs posted closures in order.
//! Closures can be delayed and cancelled, and callers can check whether they
//! are running on the dispatcher's thread. The capture thread and the
//! watchdog timer are both built on it.

use crate::errors::{CaptureError, CaptureResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies a posted task so it can be cancelled before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct QueueInner {
    // Ordered by due time, then by post order.
    tasks: BTreeMap<(Instant, u64), Task>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    name: String,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    thread_id: OnceLock<ThreadId>,
}

/// Cloneable handle for posting work to a `DispatchThread`.
#[derive(Clone)]
pub struct DispatchHandle {
    shared: Arc<Shared>,
}

/// Owner of the dispatcher's thread. Dropping it shuts the thread down.
pub struct DispatchThread {
    handle: DispatchHandle,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchThread {
    pub fn spawn(name: impl Into<String>) -> CaptureResult<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            inner: Mutex::new(QueueInner {
                tasks: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            cv: Condvar::new(),
            thread_id: OnceLock::new(),
        });

        let worker = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(worker))
            .map_err(|e| {
                log::error!("Failed to spawn thread {}: {}", name, e);
                CaptureError::CaptureThreadStopped
            })?;
        let _ = shared.thread_id.set(join.thread().id());

        log::debug!("Dispatch thread {} started", shared.name);
        Ok(Self {
            handle: DispatchHandle { shared },
            join: Mutex::new(Some(join)),
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Stop accepting work, run tasks that are already due, drop delayed ones
    /// and join the thread. Joining is skipped when called from the thread itself.
    pub fn shutdown(&self) {
        {
            let mut g = lock(&self.handle.shared.inner);
            g.closed = true;
            self.handle.shared.cv.notify_all();
        }

        let join = lock(&self.join).take();
        if let Some(join) = join {
            if self.handle.is_current() {
                log::debug!("Dispatch thread {} shut down from itself", self.handle.shared.name);
                return;
            }
            if join.join().is_err() {
                log::error!("Dispatch thread {} panicked", self.handle.shared.name);
            }
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DispatchHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn post<F>(&self, task: F) -> CaptureResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed(task, Duration::ZERO)
    }

    pub fn post_delayed<F>(&self, task: F, delay: Duration) -> CaptureResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut g = lock(&self.shared.inner);
        if g.closed {
            return Err(CaptureError::CaptureThreadStopped);
        }
        let seq = g.next_seq;
        g.next_seq += 1;
        g.tasks.insert((Instant::now() + delay, seq), Box::new(task));
        self.shared.cv.notify_one();
        Ok(TaskId(seq))
    }

    /// Remove a task that has not started yet. Returns false if it already ran
    /// or was never posted here.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut g = lock(&self.shared.inner);
            let key = g.tasks.keys().find(|(_, seq)| *seq == id.0).copied();
            key.and_then(|k| g.tasks.remove(&k))
        };
        removed.is_some()
    }

    pub fn is_current(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Panics when called from any thread other than the dispatcher's.
    pub fn check_is_current(&self) {
        if !self.is_current() {
            log::error!("Check is on {} thread failed.", self.shared.name);
            panic!("{}", CaptureError::NotOnCaptureThread);
        }
    }

    /// Run `f` on the dispatcher's thread and wait for its result. Runs
    /// inline when already on that thread.
    pub fn invoke<F, R>(&self, f: F) -> CaptureResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.post(move || {
            let _ = tx.send(f());
        })?;
        rx.recv().map_err(|_| CaptureError::CaptureThreadStopped)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.inner).closed
    }
}

fn run(shared: Arc<Shared>) {
    let _ = shared.thread_id.set(thread::current().id());
    let mut g = lock(&shared.inner);
    loop {
        let now = Instant::now();
        let next = g.tasks.keys().next().copied();
        match next {
            Some(key) if key.0 <= now => {
                let task = g.tasks.remove(&key);
                drop(g);
                if let Some(task) = task {
                    task();
                }
                g = lock(&shared.inner);
            }
            Some(key) => {
                if g.closed {
                    break;
                }
                let (ng, _) = shared
                    .cv
                    .wait_timeout(g, key.0 - now)
                    .unwrap_or_else(PoisonError::into_inner);
                g = ng;
            }
            None => {
                if g.closed {
                    break;
                }
                g = shared.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    let dropped = std::mem::take(&mut g.tasks);
    drop(g);
    if !dropped.is_empty() {
        log::debug!("Dispatch thread {} dropped {} delayed tasks", shared.name, dropped.len());
    }
    log::debug!("Dispatch thread {} exiting", shared.name);
}
