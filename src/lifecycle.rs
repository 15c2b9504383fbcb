//! Cooperative cancellation and completion shared by a tail and its watcher.

use crate::error::{Error, Result};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Kill signal, write-once terminal cause and completion barrier.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    dying: CancellationToken,
    cause: Mutex<Cause>,
    dead: CancellationToken,
}

#[derive(Debug, Default)]
enum Cause {
    #[default]
    Alive,
    Stopped,
    Failed(Error),
    Taken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. The first recorded cause wins; `None` means a
    /// graceful stop.
    pub(crate) fn kill(&self, reason: Option<Error>) {
        self.record(reason);
        self.dying.cancel();
    }

    pub(crate) fn is_dying(&self) -> bool {
        self.dying.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub(crate) async fn dying(&self) {
        self.dying.cancelled().await
    }

    /// Token other tasks can hold to observe the kill signal.
    pub(crate) fn token(&self) -> CancellationToken {
        self.dying.clone()
    }

    /// Mark the owning task as finished with `outcome`.
    pub(crate) fn done(&self, outcome: Result<()>) {
        let reason = match outcome {
            Ok(()) => None,
            Err(err) if err.is_cancelled() => None,
            Err(err) => Some(err),
        };
        self.record(reason);
        self.dying.cancel();
        self.dead.cancel();
    }

    /// Block until [`Lifecycle::done`] has run, then hand out the recorded
    /// cause. Only the first caller receives a failure.
    pub(crate) async fn wait(&self) -> Result<()> {
        self.dead.cancelled().await;
        let mut cause = self.lock();
        match std::mem::replace(&mut *cause, Cause::Taken) {
            Cause::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    fn record(&self, reason: Option<Error>) {
        let mut cause = self.lock();
        if matches!(*cause, Cause::Alive) {
            *cause = match reason {
                Some(err) if !err.is_cancelled() => Cause::Failed(err),
                _ => Cause::Stopped,
            };
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cause> {
        // A poisoned cell still holds a valid cause
        self.cause.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
