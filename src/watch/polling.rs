//! Change detection by periodically sampling file metadata.

use super::changes::{ChangeNotifier, ChangeSet, change_set};
use super::FileIdentity;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::logging::Logger;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Watches a file by stat-ing it every `interval`.
#[derive(Debug)]
pub(crate) struct PollingWatcher {
    path: PathBuf,
    interval: Duration,
    logger: Logger,
}

impl PollingWatcher {
    pub(crate) fn new(path: PathBuf, interval: Duration, logger: Logger) -> Self {
        Self {
            path,
            interval,
            logger,
        }
    }

    /// Sleep in `interval` steps until the path exists.
    pub(crate) async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        loop {
            match tokio::fs::metadata(&self.path).await {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::Stat {
                        path: self.path.display().to_string(),
                        source: err,
                    });
                }
            }

            tokio::select! {
                _ = lifecycle.dying() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Start a sampling task for the file described by `initial`.
    pub(crate) fn change_events(&self, lifecycle: &Lifecycle, initial: &Metadata) -> ChangeSet {
        let (notifier, changes) = change_set();

        let sampler = Sampler {
            path: self.path.clone(),
            interval: self.interval,
            logger: self.logger,
            identity: FileIdentity::of(initial),
            prev_size: initial.len(),
            prev_modified: None,
        };
        tokio::spawn(sampler.run(notifier, lifecycle.token()));

        changes
    }
}

struct Sampler {
    path: PathBuf,
    interval: Duration,
    logger: Logger,
    identity: FileIdentity,
    prev_size: u64,
    // Starts unset so the first sample always wakes the reader; that covers
    // writes that landed between the caller's stat and this task starting.
    prev_modified: Option<SystemTime>,
}

/// Result of comparing one sample against the previous one.
#[derive(Debug, PartialEq, Eq)]
enum Sample {
    Deleted,
    Replaced,
    Truncated,
    Modified,
    Unchanged,
}

impl Sampler {
    async fn run(mut self, notifier: ChangeNotifier, cancel: CancellationToken) {
        let path = self.path.display().to_string();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = notifier.closed() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let sample = match tokio::fs::metadata(&self.path).await {
                Ok(meta) => self.compare(&meta),
                Err(err) if err.kind() == ErrorKind::NotFound => Sample::Deleted,
                Err(err) => {
                    notifier.notify_failed(Error::Stat { path, source: err });
                    return;
                }
            };

            match sample {
                Sample::Deleted | Sample::Replaced => {
                    self.logger
                        .debug(&path, format_args!("poll detected removal ({:?})", sample));
                    notifier.notify_deleted();
                    return;
                }
                Sample::Truncated => {
                    self.logger.debug(&path, format_args!("poll detected truncation"));
                    notifier.notify_truncated();
                    return;
                }
                Sample::Modified => notifier.notify_modified(),
                Sample::Unchanged => {}
            }
        }
    }

    fn compare(&mut self, meta: &Metadata) -> Sample {
        if FileIdentity::of(meta) != self.identity {
            return Sample::Replaced;
        }

        let size = meta.len();
        if size < self.prev_size {
            return Sample::Truncated;
        }
        self.prev_size = size;

        let modified = meta.modified().ok();
        if modified.is_none() || modified != self.prev_modified {
            self.prev_modified = modified;
            return Sample::Modified;
        }
        Sample::Unchanged
    }
}
