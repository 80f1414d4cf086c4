use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, LocalSet};
use tokio::time::MissedTickBehavior;

use crate::completion::Completion;
use crate::error::{panic_message, DispatchError};
use crate::invoker::{AllowList, HandlerKey, HandlerRegistration, HandlerTable, Invocation, InvocationOutcome};

/// Default cadence of the main-thread drain loop.
pub const DEFAULT_DISPATCHER_TICK: Duration = Duration::from_millis(16);

type MainThreadWork = Box<dyn FnOnce() + Send + 'static>;
type LocalFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;
type AsyncWork = Box<dyn FnOnce() -> LocalFuture + Send + 'static>;

pub(crate) enum QueuedWork {
    Run(MainThreadWork),
    Spawn(AsyncWork),
    Invoke(Invocation),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters for one drain pass.
pub struct DrainReport {
    pub executed: usize,
    pub panicked: usize,
    pub rejected: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.executed == 0 && self.panicked == 0 && self.rejected == 0
    }

    fn merge(&mut self, other: DrainReport) {
        self.executed += other.executed;
        self.panicked += other.panicked;
        self.rejected += other.rejected;
    }
}

/// Single-consumer work queue bound to the thread that created it.
///
/// The dispatcher is deliberately `!Send`: it can only be drained on its own
/// thread. Other threads reach it through [`DispatcherHandle`].
pub struct Dispatcher {
    handle: DispatcherHandle,
    receiver: RefCell<mpsc::UnboundedReceiver<QueuedWork>>,
    local: Rc<LocalSet>,
    handlers: Rc<HandlerTable>,
    tick: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("main_thread", &self.handle.main_thread)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher whose main thread is the calling thread.
    pub fn new() -> Self {
        Self::with_tick(DEFAULT_DISPATCHER_TICK)
    }

    pub fn with_tick(tick: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let allow_list = Arc::new(AllowList::default());
        let main_thread = thread::current().id();
        tracing::debug!(
            ?main_thread,
            tick_ms = launch_core::duration_to_millis(tick),
            "main-thread dispatcher created"
        );
        Self {
            handle: DispatcherHandle {
                sender,
                main_thread,
                allow_list: Arc::clone(&allow_list),
            },
            receiver: RefCell::new(receiver),
            local: Rc::new(LocalSet::new()),
            handlers: Rc::new(HandlerTable::new(allow_list)),
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn spawner(&self) -> LocalSpawner {
        LocalSpawner {
            local: Rc::downgrade(&self.local),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Registers `callback` as invokable from any thread under `target`/`handler`.
    ///
    /// The handler stays reachable until the returned registration is dropped.
    pub fn register_handler<A, R, F>(
        &self,
        target: impl Into<String>,
        handler: impl Into<String>,
        callback: F,
    ) -> Result<HandlerRegistration<A, R>, DispatchError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnMut(A) -> R + 'static,
    {
        let key = HandlerKey::new(target, handler);
        HandlerTable::register(&self.handlers, key, self.handle(), callback)
    }

    /// Runs every queued item in FIFO order. A panicking item is logged and the
    /// drain continues with the next one.
    pub fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let next = self.receiver.borrow_mut().try_recv();
            let Ok(work) = next else {
                break;
            };
            match work {
                QueuedWork::Run(work) => match catch_unwind(AssertUnwindSafe(work)) {
                    Ok(()) => report.executed += 1,
                    Err(payload) => {
                        report.panicked += 1;
                        tracing::error!(
                            error = %panic_message(payload.as_ref()),
                            "main-thread work panicked"
                        );
                    }
                },
                QueuedWork::Spawn(factory) => {
                    drop(self.local.spawn_local(factory()));
                    report.executed += 1;
                }
                QueuedWork::Invoke(invocation) => match self.handlers.dispatch(invocation) {
                    InvocationOutcome::Executed => report.executed += 1,
                    InvocationOutcome::Panicked => report.panicked += 1,
                    InvocationOutcome::Rejected => report.rejected += 1,
                },
            }
        }
        if !report.is_empty() {
            tracing::trace!(
                executed = report.executed,
                panicked = report.panicked,
                rejected = report.rejected,
                "main-thread drain finished"
            );
        }
        report
    }

    /// Drives `future` to completion on this thread, draining the queue on every
    /// tick and polling work spawned through [`LocalSpawner`].
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        let pump = async {
            tokio::pin!(future);
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    output = &mut future => return output,
                    _ = ticker.tick() => {
                        self.drain();
                    }
                }
            }
        };
        self.local.run_until(pump).await
    }

    /// Runs whatever is still queued and tears the dispatcher down. Handles held
    /// elsewhere report [`DispatchError::Closed`] afterwards.
    pub fn shutdown(self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let pass = self.drain();
            if pass.is_empty() {
                break;
            }
            report.merge(pass);
        }
        self.receiver.borrow_mut().close();
        self.handlers.clear();
        tracing::debug!(executed = report.executed, "main-thread dispatcher shut down");
        report
    }
}

#[derive(Clone)]
/// Cloneable, thread-safe entry point into a [`Dispatcher`].
pub struct DispatcherHandle {
    sender: mpsc::UnboundedSender<QueuedWork>,
    main_thread: ThreadId,
    pub(crate) allow_list: Arc<AllowList>,
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("main_thread", &self.main_thread)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl DispatcherHandle {
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Runs `work` on the main thread. Called from the main thread it runs
    /// inline; from anywhere else it is queued for the next drain.
    pub fn enqueue<F>(&self, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_main_thread() {
            work();
            return Ok(());
        }
        self.push(QueuedWork::Run(Box::new(work)))
    }

    pub fn enqueue_with_result<T, F>(&self, work: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_main_thread() {
            return Completion::ready(run_guarded(work));
        }
        let (sender, completion) = Completion::channel();
        let queued = QueuedWork::Run(Box::new(move || {
            let _ = sender.send(run_guarded(work));
        }));
        match self.push(queued) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }

    /// Schedules async work on the main thread. The future produced by `work`
    /// does not need to be `Send`; it is always polled on the main thread, so
    /// this is queued even when called from the main thread.
    pub fn enqueue_async<T, F, Fut>(&self, work: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
    {
        let (sender, completion) = Completion::channel();
        let factory: AsyncWork = Box::new(move || -> LocalFuture {
            Box::pin(async move {
                let result = match AssertUnwindSafe(async move { work().await })
                    .catch_unwind()
                    .await
                {
                    Ok(value) => Ok(value),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(error = %message, "main-thread async work panicked");
                        Err(DispatchError::WorkPanicked(message))
                    }
                };
                let _ = sender.send(result);
            })
        });
        match self.push(QueuedWork::Spawn(factory)) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn push(&self, work: QueuedWork) -> Result<(), DispatchError> {
        self.sender.send(work).map_err(|_| DispatchError::Closed)
    }
}

#[derive(Debug, Clone)]
/// Spawns `!Send` futures onto the dispatcher's main-thread task set.
pub struct LocalSpawner {
    local: Weak<LocalSet>,
}

impl LocalSpawner {
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, DispatchError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let local = self.local.upgrade().ok_or(DispatchError::Closed)?;
        Ok(local.spawn_local(future))
    }
}

fn run_guarded<T, F>(work: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(error = %message, "main-thread work panicked");
        DispatchError::WorkPanicked(message)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::Dispatcher;
    use crate::error::DispatchError;

    #[test]
    fn unit_enqueue_on_main_thread_runs_inline() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        handle
            .enqueue(move || *flag.lock().expect("flag lock") = true)
            .expect("enqueue");
        assert!(*ran.lock().expect("flag lock"));
        assert!(dispatcher.drain().is_empty());
    }

    #[test]
    fn functional_worker_thread_work_runs_fifo_on_main_thread() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let main_thread = thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let worker_seen = Arc::clone(&seen);
        thread::spawn(move || {
            for value in 1..=5 {
                let seen = Arc::clone(&worker_seen);
                handle
                    .enqueue(move || {
                        seen.lock()
                            .expect("seen lock")
                            .push((value, thread::current().id()));
                    })
                    .expect("enqueue from worker");
            }
        })
        .join()
        .expect("worker join");

        assert!(seen.lock().expect("seen lock").is_empty());
        let report = dispatcher.drain();
        assert_eq!(report.executed, 5);
        let seen = seen.lock().expect("seen lock");
        let order = seen.iter().map(|(value, _)| *value).collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        assert!(seen.iter().all(|(_, thread)| *thread == main_thread));
    }

    #[test]
    fn regression_panicking_work_does_not_stop_the_drain() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let worker_ran = Arc::clone(&ran);
        thread::spawn(move || {
            handle
                .enqueue(|| panic!("boom"))
                .expect("enqueue panicking work");
            handle
                .enqueue(move || worker_ran.lock().expect("ran lock").push("after"))
                .expect("enqueue follow-up");
        })
        .join()
        .expect("worker join");

        let report = dispatcher.drain();
        assert_eq!(report.panicked, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(*ran.lock().expect("ran lock"), vec!["after"]);
    }

    #[tokio::test]
    async fn functional_enqueue_with_result_delivers_value_and_panic_through_future() {
        let dispatcher = Dispatcher::with_tick(Duration::from_millis(1));
        let handle = dispatcher.handle();
        let (value, failure) = thread::spawn(move || {
            let value = handle.enqueue_with_result(|| 21 * 2);
            let failure = handle.enqueue_with_result(|| -> u32 { panic!("bad work") });
            (value, failure)
        })
        .join()
        .expect("worker join");

        let (value, failure) = dispatcher
            .run_until(async move { (value.await, failure.await) })
            .await;
        assert_eq!(value, Ok(42));
        assert_eq!(failure, Err(DispatchError::WorkPanicked("bad work".to_string())));
    }

    #[tokio::test]
    async fn functional_enqueue_async_polls_future_on_main_thread() {
        let dispatcher = Dispatcher::with_tick(Duration::from_millis(1));
        let handle = dispatcher.handle();
        let main_thread = thread::current().id();
        let completion = thread::spawn(move || {
            handle.enqueue_async(|| async move {
                tokio::task::yield_now().await;
                thread::current().id()
            })
        })
        .join()
        .expect("worker join");

        let polled_on = dispatcher
            .run_until(completion)
            .await
            .expect("async work result");
        assert_eq!(polled_on, main_thread);
    }

    #[tokio::test]
    async fn regression_enqueue_async_panic_is_reported_not_raised() {
        let dispatcher = Dispatcher::with_tick(Duration::from_millis(1));
        let completion = dispatcher
            .handle()
            .enqueue_async(|| async move { panic!("async boom") });
        let result: Result<(), DispatchError> = dispatcher.run_until(completion).await;
        assert_eq!(result, Err(DispatchError::WorkPanicked("async boom".to_string())));
    }

    #[test]
    fn regression_handle_reports_closed_after_shutdown() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let report = dispatcher.shutdown();
        assert!(report.is_empty());
        let result = thread::spawn(move || handle.enqueue(|| {}))
            .join()
            .expect("worker join");
        assert_eq!(result, Err(DispatchError::Closed));
    }

    #[test]
    fn regression_oversized_tick_is_kept_and_zero_tick_is_clamped() {
        let oversized = Duration::from_secs(u64::MAX);
        assert_eq!(Dispatcher::with_tick(oversized).tick(), oversized);
        assert_eq!(
            Dispatcher::with_tick(Duration::ZERO).tick(),
            Duration::from_millis(1)
        );
    }
}
