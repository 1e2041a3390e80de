//! A dedicated single-task execution context with two supervisory
//! cancellation trees, standing in for the source's `SingleThreadScopeGroup`.
//!
//! Confining all [`crate::pool::Pool`] state mutation to one `tokio` task
//! gives the same lock-free-without-atomics property the source gets from a
//! dedicated OS thread, while staying on the cooperative tokio runtime every
//! other module in this crate already depends on (the teacher and the rest
//! of the retrieval pack build event loops and correlation tables the same
//! way: one task owns the state, everyone else talks to it through a
//! channel — see `correlation::manager::CorrelationManager`'s background
//! cleanup task for the closest teacher analogue).
//!
//! Two [`tokio_util::sync::CancellationToken`]s model the source's `main_job`
//! / `work_job` supervisory trees: `work` is a child of `main`, so cancelling
//! `main` also cancels `work`, but `work` can be cancelled alone (e.g. to
//! fail every in-flight `with_permit` with `PoolClosed`) while `main` keeps
//! running long enough to drain shutdown bookkeeping.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A dedicated worker task plus its two cancellation trees.
#[derive(Clone)]
pub struct WorkerScope {
    main_cancel: CancellationToken,
    work_cancel: CancellationToken,
    jobs: mpsc::UnboundedSender<Job>,
}

impl WorkerScope {
    /// Spawns the worker task and returns a handle to it. The task runs
    /// until [`WorkerScope::close`] is called; jobs submitted afterward are
    /// silently dropped (their senders observe a closed channel and the
    /// `with_*_context` callers see a cancellation error instead).
    pub fn spawn() -> Self {
        let main_cancel = CancellationToken::new();
        let work_cancel = main_cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });

        Self {
            main_cancel,
            work_cancel,
            jobs: tx,
        }
    }

    /// `true` once the work tree has been cancelled (pool closing or
    /// closed). Pool operations call this at every recursion step so that
    /// shutdown is observed promptly rather than only at the next await
    /// point that happens to check it.
    pub fn ensure_active(&self) -> Result<(), PoolError> {
        if self.work_cancel.is_cancelled() {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    /// `true` once the work tree has been cancelled.
    pub fn is_work_cancelled(&self) -> bool {
        self.work_cancel.is_cancelled()
    }

    /// A child token of the work tree, for registering cancellable waiters
    /// (e.g. a pending-acquisition slot) that should fail the instant the
    /// pool starts shutting down.
    pub fn work_child_token(&self) -> CancellationToken {
        self.work_cancel.child_token()
    }

    /// Runs `f` on the worker task under the work tree, returning its
    /// result, or [`PoolError::Closed`] if the work tree is already
    /// cancelled or becomes cancelled before `f` completes, or
    /// [`PoolError::Cancelled`] if the calling task itself is dropped
    /// while waiting (the `Future` returned here is cancel-safe: dropping
    /// it before it resolves abandons the reply but the job already queued
    /// still runs to completion on the worker task, matching the source's
    /// guarantee that a permit already granted is always released even if
    /// the acquiring caller is cancelled).
    pub async fn with_work_context<F, Fut, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.work_cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let work_cancel = self.work_cancel.clone();
        let job: Job = Box::pin(async move {
            let result = tokio::select! {
                biased;
                _ = work_cancel.cancelled() => None,
                value = f() => Some(value),
            };
            let _ = tx.send(result);
        });
        if self.jobs.send(job).is_err() {
            return Err(PoolError::Closed);
        }
        match rx.await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(PoolError::Closed),
            Err(_) => Err(PoolError::Closed),
        }
    }

    /// As [`WorkerScope::with_work_context`], but bounded by `timeout`
    /// covering the full round trip (dispatch + execution). On timeout the
    /// work-tree child token used for this call is not touched — only this
    /// caller gives up; other waiters are unaffected.
    pub async fn with_work_context_timeout<F, Fut, T>(
        &self,
        timeout: std::time::Duration,
        f: F,
    ) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(timeout, self.with_work_context(f)).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(timeout)),
        }
    }

    /// Runs `f` on the worker task under the main tree. Used for shutdown
    /// bookkeeping (e.g. `factory.close()`) that must complete even while
    /// the work tree is already cancelled.
    pub async fn with_main_context<F, Fut, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.main_cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let value = f().await;
            let _ = tx.send(value);
        });
        if self.jobs.send(job).is_err() {
            return Err(PoolError::Closed);
        }
        rx.await.map_err(|_| PoolError::Closed)
    }

    /// Fire-and-forget variant of [`WorkerScope::with_work_context`].
    pub fn launch_in_work_scope<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.work_cancel.is_cancelled() {
            return;
        }
        let work_cancel = self.work_cancel.clone();
        let job: Job = Box::pin(async move {
            tokio::select! {
                biased;
                _ = work_cancel.cancelled() => {}
                _ = f() => {}
            }
        });
        let _ = self.jobs.send(job);
    }

    /// Fire-and-forget variant of [`WorkerScope::with_main_context`].
    pub fn launch_in_main_scope<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.main_cancel.is_cancelled() {
            return;
        }
        let job: Job = Box::pin(async move {
            f().await;
        });
        let _ = self.jobs.send(job);
    }

    /// Cancels the work tree with a "pool closed" error, then completes the
    /// main tree and drops the job sender — the worker task exits once any
    /// already-queued jobs finish draining.
    pub async fn close(&self) {
        self.work_cancel.cancel();
        self.main_cancel.cancel();
    }
}
