//! File change notification: a native multiplexed watcher and a polling
//! fallback behind one [`FileWatcher`] value.

mod changes;
mod native;
mod polling;
mod service;

pub(crate) use changes::{Change, ChangeSet};
pub use service::{WatchEvent, WatchEventKind, WatchEvents, WatchService};

use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use native::NativeWatcher;
use polling::PollingWatcher;
use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::Arc;

/// Watcher implementation chosen once when a tail starts.
#[derive(Debug)]
pub(crate) enum FileWatcher {
    Native(NativeWatcher),
    Polling(PollingWatcher),
}

impl FileWatcher {
    /// Pick the implementation `config` asks for. Without a shared service a
    /// private one is created for this file.
    pub(crate) fn from_config(path: PathBuf, config: &Config) -> Result<Self> {
        if config.poll {
            return Ok(FileWatcher::Polling(PollingWatcher::new(
                path,
                config.poll_interval,
                config.logger,
            )));
        }

        let watcher = match &config.watch_service {
            Some(service) => NativeWatcher::new(
                path,
                Arc::clone(service),
                config.poll_interval,
                config.logger,
            ),
            None => NativeWatcher::new(
                path,
                Arc::new(WatchService::with_logger(config.logger)?),
                config.poll_interval,
                config.logger,
            )
            .owning_service(),
        };
        Ok(FileWatcher::Native(watcher))
    }

    /// Block until the file exists. Returns `Error::Cancelled` if the
    /// lifecycle is killed first.
    pub(crate) async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        match self {
            FileWatcher::Native(watcher) => watcher.block_until_exists(lifecycle).await,
            FileWatcher::Polling(watcher) => watcher.block_until_exists(lifecycle).await,
        }
    }

    /// Subscribe to changes of the file currently described by `initial`.
    pub(crate) async fn change_events(
        &self,
        lifecycle: &Lifecycle,
        initial: &Metadata,
    ) -> Result<ChangeSet> {
        match self {
            FileWatcher::Native(watcher) => watcher.change_events(lifecycle, initial).await,
            FileWatcher::Polling(watcher) => Ok(watcher.change_events(lifecycle, initial)),
        }
    }

    /// Release native watch resources held for this file.
    pub(crate) fn cleanup(&self) {
        if let FileWatcher::Native(watcher) = self {
            watcher.release();
        }
    }
}

/// Identifies the file behind a path so a replacement can be told apart from
/// the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    #[cfg(unix)]
    pub(crate) fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn of(meta: &Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}
