//! The Modified/Deleted/Truncated signal triad for one watched file.

use crate::error::Error;
use tokio::sync::mpsc;

/// What happened to a watched file.
#[derive(Debug)]
pub(crate) enum Change {
    /// More data may be available.
    Modified,
    /// The file was removed or replaced. Terminal.
    Deleted,
    /// The file shrank. Terminal.
    Truncated,
    /// The watcher could not inspect the file. Terminal.
    Failed(Error),
    /// The watcher stopped without a terminal signal.
    Closed,
}

/// Receiving half held by the tail engine.
#[derive(Debug)]
pub(crate) struct ChangeSet {
    modified: mpsc::Receiver<()>,
    deleted: mpsc::Receiver<()>,
    truncated: mpsc::Receiver<()>,
    failed: mpsc::Receiver<Error>,
}

/// Sending half held by the watcher task. Dropping it closes the set.
#[derive(Debug)]
pub(crate) struct ChangeNotifier {
    modified: mpsc::Sender<()>,
    deleted: mpsc::Sender<()>,
    truncated: mpsc::Sender<()>,
    failed: mpsc::Sender<Error>,
}

pub(crate) fn change_set() -> (ChangeNotifier, ChangeSet) {
    let (modified_tx, modified_rx) = mpsc::channel(1);
    let (deleted_tx, deleted_rx) = mpsc::channel(1);
    let (truncated_tx, truncated_rx) = mpsc::channel(1);
    let (failed_tx, failed_rx) = mpsc::channel(1);

    (
        ChangeNotifier {
            modified: modified_tx,
            deleted: deleted_tx,
            truncated: truncated_tx,
            failed: failed_tx,
        },
        ChangeSet {
            modified: modified_rx,
            deleted: deleted_rx,
            truncated: truncated_rx,
            failed: failed_rx,
        },
    )
}

impl ChangeNotifier {
    /// Coalescing: if the previous signal has not been consumed yet this is
    /// a no-op.
    pub(crate) fn notify_modified(&self) {
        let _ = self.modified.try_send(());
    }

    /// Signal deletion and close the set.
    pub(crate) fn notify_deleted(self) {
        let _ = self.deleted.try_send(());
    }

    /// Signal truncation and close the set.
    pub(crate) fn notify_truncated(self) {
        let _ = self.truncated.try_send(());
    }

    /// Report a failure and close the set.
    pub(crate) fn notify_failed(self, err: Error) {
        let _ = self.failed.try_send(err);
    }

    /// True once the engine dropped its [`ChangeSet`].
    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.modified.is_closed()
    }

    /// Resolves when the engine drops its [`ChangeSet`].
    pub(crate) async fn closed(&self) {
        self.modified.closed().await
    }
}

impl ChangeSet {
    /// Wait for the next change. Terminal signals are preferred over a
    /// pending Modified so a burst of writes never hides a deletion.
    ///
    /// Cancel safe.
    pub(crate) async fn next(&mut self) -> Change {
        tokio::select! {
            biased;
            Some(()) = self.deleted.recv() => Change::Deleted,
            Some(()) = self.truncated.recv() => Change::Truncated,
            Some(err) = self.failed.recv() => Change::Failed(err),
            Some(()) = self.modified.recv() => Change::Modified,
            else => Change::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_modified_coalesces() {
        let (notifier, mut changes) = change_set();
        notifier.notify_modified();
        notifier.notify_modified();
        notifier.notify_modified();

        assert!(matches!(changes.next().await, Change::Modified));

        // The extra signals were folded into the first one
        let next = tokio::time::timeout(Duration::from_millis(20), changes.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_deleted_closes_set() {
        let (notifier, mut changes) = change_set();
        notifier.notify_deleted();

        assert!(matches!(changes.next().await, Change::Deleted));
        assert!(matches!(changes.next().await, Change::Closed));
    }

    #[tokio::test]
    async fn test_truncated_wins_over_pending_modified() {
        let (notifier, mut changes) = change_set();
        notifier.notify_modified();
        notifier.notify_truncated();

        assert!(matches!(changes.next().await, Change::Truncated));
    }

    #[tokio::test]
    async fn test_failed_carries_error() {
        let (notifier, mut changes) = change_set();
        notifier.notify_failed(Error::ServiceStopped);

        assert!(matches!(
            changes.next().await,
            Change::Failed(Error::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn test_dropped_notifier_closes_set() {
        let (notifier, mut changes) = change_set();
        drop(notifier);

        assert!(matches!(changes.next().await, Change::Closed));
    }

    #[tokio::test]
    async fn test_notifier_sees_closed_set() {
        let (notifier, changes) = change_set();
        assert!(!notifier.is_closed());

        drop(changes);
        assert!(notifier.is_closed());
        notifier.closed().await;
    }
}
