//! Change detection driven by the shared [`WatchService`].

use super::changes::{ChangeNotifier, ChangeSet, change_set};
use super::polling::PollingWatcher;
use super::service::{WatchEventKind, WatchEvents, WatchService};
use super::FileIdentity;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::logging::Logger;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) struct NativeWatcher {
    path: PathBuf,
    service: Arc<WatchService>,
    logger: Logger,
    /// Used when another tail already holds the directory watch.
    fallback: PollingWatcher,
    /// The service was created for this file alone.
    owns_service: bool,
}

impl NativeWatcher {
    pub(crate) fn new(
        path: PathBuf,
        service: Arc<WatchService>,
        poll_interval: Duration,
        logger: Logger,
    ) -> Self {
        let fallback = PollingWatcher::new(path.clone(), poll_interval, logger);
        Self {
            path,
            service,
            logger,
            fallback,
            owns_service: false,
        }
    }

    pub(crate) fn owning_service(mut self) -> Self {
        self.owns_service = true;
        self
    }

    #[cfg(test)]
    pub(crate) fn service(&self) -> &Arc<WatchService> {
        &self.service
    }

    /// Drop the file watch, or shut the service down when nobody shares it.
    pub(crate) fn release(&self) {
        if self.owns_service {
            self.service.shutdown();
        } else {
            self.service.remove_watch(&self.path);
        }
    }

    /// Watch the parent directory until the file shows up.
    pub(crate) async fn block_until_exists(&self, lifecycle: &Lifecycle) -> Result<()> {
        let dir = parent_dir(&self.path);
        self.register(&dir, lifecycle).await?;

        let Some(mut events) = self.service.events(&dir) else {
            return self.fallback.block_until_exists(lifecycle).await;
        };
        let _guard = RemoveOnDrop {
            service: &self.service,
            path: &dir,
        };

        // The file may have appeared before the directory watch was in place
        if self.exists().await? {
            return Ok(());
        }

        loop {
            let event = tokio::select! {
                _ = lifecycle.dying() => return Err(Error::Cancelled),
                event = events.recv() => event,
            };

            match event {
                Some(event) if event.path == self.path => {
                    if self.exists().await? {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(Error::ServiceStopped),
            }
        }
    }

    /// Subscribe to native events for the file described by `initial`.
    pub(crate) async fn change_events(
        &self,
        lifecycle: &Lifecycle,
        initial: &Metadata,
    ) -> Result<ChangeSet> {
        self.register(&self.path, lifecycle).await?;
        let events = self
            .service
            .events(&self.path)
            .ok_or_else(|| Error::WatchUnavailable {
                path: self.path.display().to_string(),
            })?;

        let (notifier, changes) = change_set();
        let pump = EventPump {
            path: self.path.clone(),
            service: Arc::clone(&self.service),
            logger: self.logger,
            identity: FileIdentity::of(initial),
            prev_size: initial.len(),
            prev_modified: initial.modified().ok(),
        };
        tokio::spawn(pump.run(events, notifier, lifecycle.token()));

        Ok(changes)
    }

    /// Register `path` with the service unless the tail is stopped first.
    async fn register(&self, path: &Path, lifecycle: &Lifecycle) -> Result<()> {
        tokio::select! {
            _ = lifecycle.dying() => Err(Error::Cancelled),
            registered = self.service.watch(path) => registered,
        }
    }

    async fn exists(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::Stat {
                path: self.path.display().to_string(),
                source: err,
            }),
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct RemoveOnDrop<'a> {
    service: &'a WatchService,
    path: &'a Path,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        self.service.remove_watch(self.path);
    }
}

/// What a fresh stat says about the watched file.
#[derive(Debug, PartialEq, Eq)]
enum Inspection {
    Deleted,
    Truncated,
    Modified,
    Unchanged,
}

/// Turns routed native events for one file into change signals.
struct EventPump {
    path: PathBuf,
    service: Arc<WatchService>,
    logger: Logger,
    identity: FileIdentity,
    prev_size: u64,
    prev_modified: Option<SystemTime>,
}

impl EventPump {
    async fn run(
        mut self,
        mut events: WatchEvents,
        notifier: ChangeNotifier,
        cancel: CancellationToken,
    ) {
        let path = self.path.display().to_string();

        // Catch writes that landed between the caller's stat and the watch
        // registration
        let mut inspection = self.inspect().await;

        loop {
            match inspection {
                Ok(Inspection::Modified) => notifier.notify_modified(),
                Ok(Inspection::Unchanged) => {}
                Ok(Inspection::Deleted) => {
                    self.service.remove_watch(&self.path);
                    notifier.notify_deleted();
                    return;
                }
                Ok(Inspection::Truncated) => {
                    self.service.remove_watch(&self.path);
                    notifier.notify_truncated();
                    return;
                }
                Err(err) => {
                    self.service.remove_watch(&self.path);
                    notifier.notify_failed(err);
                    return;
                }
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = notifier.closed() => break,
                event = events.recv() => event,
            };
            // A closed stream means the service went away
            let Some(event) = event else { break };

            inspection = match event.kind {
                WatchEventKind::Removed | WatchEventKind::Renamed => {
                    self.logger
                        .debug(&path, format_args!("native watch reported {:?}", event.kind));
                    Ok(Inspection::Deleted)
                }
                WatchEventKind::Created | WatchEventKind::Modified => self.inspect().await,
            };
        }

        self.service.remove_watch(&self.path);
    }

    async fn inspect(&mut self) -> Result<Inspection> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Inspection::Deleted),
            Err(err) => {
                return Err(Error::Stat {
                    path: self.path.display().to_string(),
                    source: err,
                });
            }
        };

        if FileIdentity::of(&meta) != self.identity {
            return Ok(Inspection::Deleted);
        }

        let size = meta.len();
        if size < self.prev_size {
            return Ok(Inspection::Truncated);
        }

        let modified = meta.modified().ok();
        let changed = size != self.prev_size || modified != self.prev_modified;
        self.prev_size = size;
        self.prev_modified = modified;

        Ok(if changed {
            Inspection::Modified
        } else {
            Inspection::Unchanged
        })
    }
}
