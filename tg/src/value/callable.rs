//! Callable values and the per-call execution context

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{CallError, Freeze, Value};

/// Execution context of a single call
///
/// Every invocation runs on its own `Thread`: a fresh identity bound to the
/// cancellation token of whoever started it. Bodies that want to stop early
/// observe [`Thread::context`].
#[derive(Debug, Clone)]
pub struct Thread {
    id: Uuid,
    name: String,
    context: CancellationToken,
}

impl Thread {
    /// Create a thread with a fresh context that is never cancelled by anyone else
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_context(name, CancellationToken::new())
    }

    /// Create a thread bound to an existing context
    pub fn with_context(name: impl Into<String>, context: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            context,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &CancellationToken {
        &self.context
    }

    pub fn is_cancelled(&self) -> bool {
        self.context.is_cancelled()
    }
}

/// Positional and named arguments of a call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a named argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl Freeze for Args {
    fn freeze(&self) {
        for value in &self.positional {
            value.freeze();
        }
        for (_, value) in &self.named {
            value.freeze();
        }
    }

    fn is_frozen(&self) -> bool {
        self.positional.iter().all(Freeze::is_frozen) && self.named.iter().all(|(_, v)| v.is_frozen())
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }
}

/// Something that can be invoked with arguments to produce a value
#[async_trait]
pub trait Callable: Send + Sync {
    /// Name used in error messages and logs
    fn name(&self) -> &str;

    /// Invoke with the given arguments on the given thread
    async fn call(&self, thread: &Thread, args: &Args) -> Result<Value, CallError>;
}

/// A shared handle to a callable
#[derive(Clone)]
pub struct Function(Arc<dyn Callable>);

impl Function {
    pub fn new(callable: impl Callable + 'static) -> Self {
        Self(Arc::new(callable))
    }

    /// Wrap an async closure as a function
    ///
    /// The closure receives owned copies of the thread and arguments so the
    /// returned future can outlive the call site.
    pub fn native<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Thread, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        Self::new(NativeFunction {
            name: name.into(),
            body,
        })
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub async fn call(&self, thread: &Thread, args: &Args) -> Result<Value, CallError> {
        debug!(function = %self.name(), thread = %thread.id(), "Function::call: called");
        self.0.call(thread, args).await
    }

    /// Check if both handles refer to the same callable
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name())
    }
}

struct NativeFunction<F> {
    name: String,
    body: F,
}

#[async_trait]
impl<F, Fut> Callable for NativeFunction<F>
where
    F: Fn(Thread, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, thread: &Thread, args: &Args) -> Result<Value, CallError> {
        (self.body)(thread.clone(), args.clone()).await
    }
}
