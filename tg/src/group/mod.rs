//! Task group: deferred calls run under a worker cap and a rate limit
//!
//! Calls are recorded with [`TaskGroup::go`] and nothing runs until
//! [`TaskGroup::wait`]. `wait` admits each call through the rate limiter in
//! registration order, dispatches it onto the worker pool, joins everything
//! and returns the results in registration order, whatever order the calls
//! finished in.

mod options;

use std::fmt;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Cancelled, GroupError};
use crate::join::ErrorJoinGroup;
use crate::limiter::{Admission, RateLimiter};
use crate::pool::{Job, WorkerPool};
use crate::value::{Args, CallError, Freeze, Function, Thread, Value};

pub use options::{GroupOptions, GroupOverrides};

/// One slot per registered call, each written once by the call that owns it
type Slots = Arc<Vec<OnceLock<Value>>>;

/// A recorded call
struct Task {
    function: Function,
    args: Args,
}

impl Task {
    /// Build the job that runs this call and stores its value in `slots[index]`
    fn into_job(self, index: usize, context: CancellationToken, slots: Slots) -> Job<CallError> {
        async move {
            let thread = Thread::with_context(format!("group.go#{}", index), context);
            debug!(index, function = %self.function.name(), thread = %thread.id(), "task: starting");
            let value = self.function.call(&thread, &self.args).await?;
            if slots[index].set(value).is_err() {
                warn!(index, "task: result slot already written");
            }
            Ok(())
        }
        .boxed()
    }
}

/// A group of deferred calls
pub struct TaskGroup<L = RateLimiter> {
    ctx: CancellationToken,
    cap: usize,
    limiter: L,
    frozen: bool,
    tasks: Vec<Task>,
}

impl TaskGroup<RateLimiter> {
    /// Create a group bound to `ctx` with the given options
    pub fn new(ctx: &CancellationToken, options: &GroupOptions) -> Result<Self, GroupError> {
        debug!(?options, "TaskGroup::new: called");
        let limiter = options.limiter()?;
        Ok(Self::with_limiter(ctx, options.cap(), limiter))
    }

    /// Create a group from call arguments `n`, `every` and `burst`, bound to the caller's context
    pub fn make(thread: &Thread, args: &Args) -> Result<Self, GroupError> {
        debug!(thread = %thread.id(), "TaskGroup::make: called");
        let options = GroupOptions::from_args(args)?;
        Self::new(thread.context(), &options)
    }
}

impl<L: Admission> TaskGroup<L> {
    /// Create a group with a caller-supplied admission gate
    ///
    /// The group runs under a child of `ctx`: cancelling `ctx` stops the group,
    /// a failing task never cancels `ctx`.
    pub fn with_limiter(ctx: &CancellationToken, cap: usize, limiter: L) -> Self {
        Self {
            ctx: ctx.child_token(),
            cap,
            limiter,
            frozen: false,
            tasks: Vec::new(),
        }
    }

    /// The context tasks run under
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Worker cap, zero meaning uncapped
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Number of calls registered and not yet run
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Record a call of `function` with `args` to run at [`wait`](Self::wait)
    ///
    /// The arguments are frozen now, so later changes by the caller fail
    /// rather than leak into the call. If the group's context is already
    /// cancelled the call is silently dropped.
    pub fn go(&mut self, function: impl Into<Value>, args: impl Into<Args>) -> Result<(), GroupError> {
        let function = match function.into() {
            Value::Function(function) => function,
            other => {
                debug!(type_name = other.type_name(), "TaskGroup::go: not callable");
                return Err(GroupError::NotCallable {
                    type_name: other.type_name(),
                });
            }
        };
        if self.frozen {
            debug!("TaskGroup::go: group is frozen");
            return Err(GroupError::Frozen { op: "group.go" });
        }

        let args = args.into();
        args.freeze();

        if self.ctx.is_cancelled() {
            debug!(function = %function.name(), "TaskGroup::go: context cancelled, dropping call");
            return Ok(());
        }

        debug!(index = self.tasks.len(), function = %function.name(), "TaskGroup::go: registered");
        self.tasks.push(Task { function, args });
        Ok(())
    }

    /// Run every registered call and return their results in registration order
    ///
    /// Freezes the group, so this succeeds at most once. Returns the first
    /// task error if any call fails, or [`GroupError::Cancelled`] if the
    /// context was cancelled before every call ran.
    pub async fn wait(&mut self) -> Result<Vec<Value>, GroupError> {
        debug!(tasks = self.tasks.len(), cap = self.cap, "TaskGroup::wait: called");
        if self.frozen {
            debug!("TaskGroup::wait: already waited");
            return Err(GroupError::Frozen { op: "group.wait" });
        }
        self.frozen = true;

        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            debug!("TaskGroup::wait: nothing registered");
            return Ok(Vec::new());
        }

        let total = tasks.len();
        let slots: Slots = Arc::new((0..total).map(|_| OnceLock::new()).collect());
        let mut pool = WorkerPool::new(self.cap, ErrorJoinGroup::with_token(self.ctx.clone()));
        let mut stopped: Option<Cancelled> = None;

        for (index, task) in tasks.into_iter().enumerate() {
            if let Err(err) = self.limiter.admit(&self.ctx).await {
                debug!(index, "TaskGroup::wait: admission cancelled");
                stopped = Some(err);
                break;
            }
            let job = task.into_job(index, self.ctx.child_token(), slots.clone());
            if let Err(err) = pool.dispatch(job).await {
                debug!(index, "TaskGroup::wait: dispatch cancelled");
                stopped = Some(err);
                break;
            }
        }

        let dispatched = pool.dispatched();
        let workers = pool.workers();
        if let Err(err) = pool.wait().await {
            warn!(error = %err, "TaskGroup::wait: task failed");
            return Err(err.into());
        }
        if let Some(cancelled) = stopped {
            warn!(dispatched, total, "TaskGroup::wait: cancelled before all tasks were dispatched");
            return Err(cancelled.into());
        }

        // a queued job is dropped unrun when the context is cancelled after dispatch
        let results: Option<Vec<Value>> = slots.iter().map(|slot| slot.get().cloned()).collect();
        let Some(results) = results else {
            warn!(dispatched, total, "TaskGroup::wait: cancelled before all tasks ran");
            return Err(Cancelled.into());
        };

        info!(total, workers, "TaskGroup::wait: all tasks completed");
        Ok(results)
    }
}

impl<L> fmt::Display for TaskGroup<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group()")
    }
}

impl<L> fmt::Debug for TaskGroup<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("cap", &self.cap)
            .field("frozen", &self.frozen)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Admission gate that counts calls and refuses after `allow` admissions
    struct FakeLimiter {
        admitted: Arc<AtomicUsize>,
        allow: usize,
    }

    #[async_trait]
    impl Admission for FakeLimiter {
        async fn admit(&self, _ctx: &CancellationToken) -> Result<(), Cancelled> {
            if self.admitted.load(Ordering::SeqCst) >= self.allow {
                return Err(Cancelled);
            }
            self.admitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fake_group(cap: usize, allow: usize) -> (TaskGroup<FakeLimiter>, Arc<AtomicUsize>) {
        let admitted = Arc::new(AtomicUsize::new(0));
        let limiter = FakeLimiter {
            admitted: admitted.clone(),
            allow,
        };
        (TaskGroup::with_limiter(&CancellationToken::new(), cap, limiter), admitted)
    }

    fn identity() -> Function {
        Function::native("identity", |_thread, args| async move {
            Ok(args.get(0).cloned().unwrap_or_default())
        })
    }

    /// Function recording the order it was started in
    fn recorder(log: Arc<Mutex<Vec<i64>>>) -> Function {
        Function::native("record", move |_thread, args| {
            let log = log.clone();
            async move {
                let i = args.get(0).and_then(Value::as_int).unwrap_or(-1);
                log.lock().unwrap().push(i);
                Ok(Value::from(i))
            }
        })
    }

    #[tokio::test]
    async fn test_go_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let f = Function::native("count", move |_thread, _args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::None)
            }
        });

        let (mut group, _) = fake_group(0, usize::MAX);
        group.go(f.clone(), Args::new()).unwrap();
        group.go(f, Args::new()).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        group.wait().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_wait_skips_admission() {
        let (mut group, admitted) = fake_group(2, 0);
        assert_eq!(group.wait().await.unwrap(), Vec::<Value>::new());
        assert_eq!(admitted.load(Ordering::SeqCst), 0);
        assert!(group.is_frozen());
    }

    #[tokio::test]
    async fn test_admission_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut group, admitted) = fake_group(1, usize::MAX);
        for i in 0..6 {
            group.go(recorder(log.clone()), Args::new().arg(i)).unwrap();
        }

        let results = group.wait().await.unwrap();
        assert_eq!(admitted.load(Ordering::SeqCst), 6);
        // a single worker runs calls in the order they were admitted
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(results, (0..6).map(Value::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_refused_admission_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut group, admitted) = fake_group(0, 3);
        for i in 0..10 {
            group.go(recorder(log.clone()), Args::new().arg(i)).unwrap();
        }

        let err = group.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(admitted.load(Ordering::SeqCst), 3);
        let mut ran = log.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_not_callable() {
        let (mut group, _) = fake_group(0, usize::MAX);
        let err = group.go(Value::from(3), Args::new()).unwrap_err();
        assert_eq!(err, GroupError::NotCallable { type_name: "int" });
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_go_after_wait_is_frozen() {
        let (mut group, _) = fake_group(0, usize::MAX);
        group.go(identity(), Args::new().arg(1)).unwrap();
        group.wait().await.unwrap();

        let err = group.go(identity(), Args::new()).unwrap_err();
        assert_eq!(err, GroupError::Frozen { op: "group.go" });
        let err = group.wait().await.unwrap_err();
        assert_eq!(err, GroupError::Frozen { op: "group.wait" });
    }

    #[tokio::test]
    async fn test_go_on_cancelled_context_is_ignored() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::with_limiter(&parent, 0, RateLimiter::unlimited());
        group.go(identity(), Args::new().arg(1)).unwrap();
        parent.cancel();
        group.go(identity(), Args::new().arg(2)).unwrap();
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_task_error_is_returned_verbatim() {
        let (mut group, _) = fake_group(2, usize::MAX);
        let fail = Function::native("fail", |_thread, _args| async move {
            Err::<Value, _>(CallError::failed("fail", "bad input"))
        });
        group.go(identity(), Args::new().arg(1)).unwrap();
        group.go(fail, Args::new()).unwrap();

        let err = group.wait().await.unwrap_err();
        assert_eq!(err, GroupError::Task(CallError::failed("fail", "bad input")));
    }

    #[tokio::test]
    async fn test_task_threads_are_distinct_and_bound_to_group() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let seen = ids.clone();
        let probe = Function::native("probe", move |thread, _args| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(thread.id());
                Ok(Value::from(thread.is_cancelled()))
            }
        });

        let (mut group, _) = fake_group(0, usize::MAX);
        for _ in 0..4 {
            group.go(probe.clone(), Args::new()).unwrap();
        }
        let results = group.wait().await.unwrap();
        assert!(results.iter().all(|v| *v == Value::Bool(false)));

        let mut ids = ids.lock().unwrap().clone();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_external_cancel_reaches_running_tasks() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::with_limiter(&parent, 0, RateLimiter::unlimited());
        let waiter = Function::native("waiter", |thread, _args| async move {
            thread.context().cancelled().await;
            Err::<Value, _>(CallError::cancelled("waiter"))
        });
        group.go(waiter, Args::new()).unwrap();

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = group.wait().await.unwrap_err();
        assert!(err.task_error().is_some_and(CallError::is_cancelled));
    }

    #[test]
    fn test_display() {
        let group = TaskGroup::with_limiter(&CancellationToken::new(), 0, RateLimiter::unlimited());
        assert_eq!(group.to_string(), "group()");
    }

    #[test]
    fn test_make_from_args() {
        let thread = Thread::new("main");
        let group = TaskGroup::make(&thread, &Args::new().kwarg("n", 3).kwarg("every", "10ms")).unwrap();
        assert_eq!(group.cap(), 3);

        let err = TaskGroup::make(&thread, &Args::new().kwarg("every", "often")).unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_make_uses_thread_context() {
        let token = CancellationToken::new();
        let thread = Thread::with_context("main", token.clone());
        let group = TaskGroup::make(&thread, &Args::new()).unwrap();
        token.cancel();
        assert!(group.context().is_cancelled());
    }
}
