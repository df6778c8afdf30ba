//! First-error join group
//!
//! Spawns futures onto the runtime, remembers the first error any of them
//! returns and cancels a shared token when that happens. Waiting joins every
//! spawned future; work that ignores the token still runs to completion.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs tasks concurrently and reports the first error
pub struct ErrorJoinGroup<E> {
    tasks: JoinSet<()>,
    first_error: Arc<Mutex<Option<E>>>,
    cancel: CancellationToken,
}

impl<E: Send + 'static> ErrorJoinGroup<E> {
    /// Create a group whose token is a child of `parent`
    ///
    /// Cancelling `parent` cancels the group's token; a failure inside the
    /// group never cancels `parent`.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    /// Create a group that cancels `cancel` on its first error
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            first_error: Arc::new(Mutex::new(None)),
            cancel,
        }
    }

    /// The token cancelled on first error
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of spawned tasks not yet joined
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `task` concurrently with everything else in the group
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let first_error = self.first_error.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            if let Err(err) = task.await {
                let mut slot = first_error.lock().await;
                if slot.is_none() {
                    debug!("ErrorJoinGroup: first error recorded, cancelling group");
                    *slot = Some(err);
                    cancel.cancel();
                }
            }
        });
    }

    /// Join every spawned task and return the first error, if any
    ///
    /// The group's token is cancelled once everything has joined. A task that
    /// panicked re-raises its panic here.
    pub async fn wait(mut self) -> Result<(), E> {
        debug!(tasks = self.tasks.len(), "ErrorJoinGroup::wait: called");
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    warn!("ErrorJoinGroup::wait: task panicked");
                    std::panic::resume_unwind(err.into_panic());
                }
                warn!(error = %err, "ErrorJoinGroup::wait: task was aborted");
            }
        }
        self.cancel.cancel();

        match self.first_error.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
