//! One native watcher shared by many files.
//!
//! Native notification facilities are cheapest to run as a single instance,
//! so [`WatchService`] owns one `notify` watcher inside a worker task and fans
//! its events out to a per-path channel. Registration and removal requests are
//! funneled through the worker so the native watcher has a single owner; the
//! routing table is the only state shared with callers.

use crate::error::{Error, Result};
use crate::logging::Logger;
use futures::Stream;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Events buffered per path before the worker waits on the subscriber.
const SUBSCRIPTION_BUFFER: usize = 16;

/// Kind of a routed native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

/// A native event routed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path the event is about. For directory subscriptions this is the
    /// child that changed.
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

/// Receive side of a subscription. Ends when the watch is removed or the
/// service shuts down.
#[derive(Debug)]
pub struct WatchEvents {
    receiver: mpsc::Receiver<WatchEvent>,
}

impl WatchEvents {
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}

impl Stream for WatchEvents {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[derive(Debug)]
struct Subscription {
    sender: mpsc::Sender<WatchEvent>,
    receiver: Option<mpsc::Receiver<WatchEvent>>,
    /// Cancelled on removal so a delivery blocked on a full channel gives up.
    done: CancellationToken,
}

type RoutingTable = Arc<Mutex<HashMap<PathBuf, Subscription>>>;

enum Request {
    Add {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        path: PathBuf,
    },
    Shutdown,
}

/// Shared native watch multiplexer.
///
/// Construct once per scope that owns tails and hand it to each tail through
/// [`Config::with_watch_service`](crate::Config::with_watch_service).
#[derive(Debug)]
pub struct WatchService {
    requests: mpsc::UnboundedSender<Request>,
    table: RoutingTable,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Add { path, .. } => f.debug_struct("Add").field("path", path).finish(),
            Request::Remove { path } => f.debug_struct("Remove").field("path", path).finish(),
            Request::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl WatchService {
    /// Create the native watcher and start the worker task.
    ///
    /// Failing to create the native watcher is fatal for this service; use
    /// polling when native notifications are unavailable.
    pub fn new() -> Result<Self> {
        Self::with_logger(Logger::default())
    }

    pub fn with_logger(logger: Logger) -> Result<Self> {
        let (native_tx, native_rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = native_tx.send(res);
            },
            Config::default(),
        )?;

        let (requests, request_rx) = mpsc::unbounded_channel();
        let table = RoutingTable::default();

        let worker = Worker {
            watcher,
            table: Arc::clone(&table),
            logger,
        };
        tokio::spawn(worker.run(request_rx, native_rx));

        Ok(Self { requests, table })
    }

    /// Register `path` with the native watcher. Repeated calls for a path
    /// that is already watched succeed without re-registering.
    pub async fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Add {
                path: path.as_ref().to_path_buf(),
                reply,
            })
            .map_err(|_| Error::ServiceStopped)?;

        response.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Claim the event stream for a watched path. Returns `None` if the path
    /// is not watched or its stream was already claimed.
    pub fn events(&self, path: impl AsRef<Path>) -> Option<WatchEvents> {
        let mut table = lock(&self.table);
        let receiver = table.get_mut(path.as_ref())?.receiver.take()?;
        Some(WatchEvents { receiver })
    }

    /// Stop watching `path` and close its event stream.
    pub fn remove_watch(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        {
            let table = lock(&self.table);
            match table.get(path) {
                Some(subscription) => subscription.done.cancel(),
                None => return,
            }
        }
        let _ = self.requests.send(Request::Remove {
            path: path.to_path_buf(),
        });
    }

    /// Alias for [`WatchService::remove_watch`].
    pub fn cleanup(&self, path: impl AsRef<Path>) {
        self.remove_watch(path)
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        lock(&self.table).contains_key(path.as_ref())
    }

    /// Drop every watch and release the native watcher.
    pub fn shutdown(&self) {
        for subscription in lock(&self.table).values() {
            subscription.done.cancel();
        }
        let _ = self.requests.send(Request::Shutdown);
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

fn lock(table: &RoutingTable) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Subscription>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a native event onto the kinds subscribers care about.
fn classify(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Remove(_) => Some(WatchEventKind::Removed),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Renamed),
        EventKind::Modify(_) => Some(WatchEventKind::Modified),
        _ => None,
    }
}

/// Interrupted system calls are routine and not worth reporting.
fn is_benign(err: &notify::Error) -> bool {
    matches!(&err.kind, notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::Interrupted)
}

/// Snapshot of a subscription taken for one delivery.
struct Target {
    sender: mpsc::Sender<WatchEvent>,
    done: CancellationToken,
    claimed: bool,
}

struct Worker {
    watcher: RecommendedWatcher,
    table: RoutingTable,
    logger: Logger,
}

impl Worker {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut native: mpsc::UnboundedReceiver<notify::Result<Event>>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Add { path, reply }) => {
                        let _ = reply.send(self.add(path));
                    }
                    Some(Request::Remove { path }) => self.remove(&path),
                    Some(Request::Shutdown) | None => break,
                },
                event = native.recv() => match event {
                    Some(Ok(event)) => self.deliver(event).await,
                    Some(Err(err)) => {
                        if !is_benign(&err) {
                            self.logger.warn("", format_args!("Error in native watcher: {}", err));
                        }
                    }
                    None => break,
                },
            }
        }

        // Dropping the subscriptions closes every event stream
        lock(&self.table).clear();
        tracing::debug!("watch service stopped");
    }

    fn add(&mut self, path: PathBuf) -> Result<()> {
        let mut table = lock(&self.table);
        if table.contains_key(&path) {
            return Ok(());
        }

        self.watcher.watch(&path, RecursiveMode::NonRecursive)?;

        // A fresh channel and done-signal so nothing from a previous
        // subscription on this path leaks through
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        table.insert(
            path,
            Subscription {
                sender,
                receiver: Some(receiver),
                done: CancellationToken::new(),
            },
        );
        Ok(())
    }

    fn remove(&mut self, path: &Path) {
        let removed = lock(&self.table).remove(path);
        if removed.is_none() {
            return;
        }

        if let Err(err) = self.watcher.unwatch(path) {
            // The kernel drops watches on deleted files by itself
            self.logger.debug(
                &path.display().to_string(),
                format_args!("native unwatch failed: {}", err),
            );
        }
    }

    async fn deliver(&self, event: Event) {
        let Some(kind) = classify(&event.kind) else {
            return;
        };

        for path in &event.paths {
            for target in self.targets(path) {
                let routed = WatchEvent {
                    path: path.clone(),
                    kind,
                };
                if !target.claimed {
                    // Nobody reads an unclaimed stream yet; keep what fits
                    let _ = target.sender.try_send(routed);
                    continue;
                }
                tokio::select! {
                    _ = target.sender.send(routed) => {}
                    _ = target.done.cancelled() => {}
                }
            }
        }
    }

    /// Subscriptions interested in `path`: its own and its parent directory's.
    fn targets(&self, path: &Path) -> Vec<Target> {
        let table = lock(&self.table);
        [Some(path), path.parent()]
            .into_iter()
            .flatten()
            .filter_map(|key| table.get(key))
            .filter(|subscription| !subscription.done.is_cancelled())
            .map(|subscription| Target {
                sender: subscription.sender.clone(),
                done: subscription.done.clone(),
                claimed: subscription.receiver.is_none(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TempLogFile;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::time::Duration;

    async fn next_event(events: &mut WatchEvents) -> Option<WatchEvent> {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("expected an event before the timeout")
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(WatchEventKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File)),
            Some(WatchEventKind::Removed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(WatchEventKind::Renamed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WatchEventKind::Modified)
        );
        assert_eq!(classify(&EventKind::Any), None);
    }

    #[test]
    fn test_interrupted_errors_are_benign() {
        let interrupted = notify::Error::io(std::io::Error::from(std::io::ErrorKind::Interrupted));
        assert!(is_benign(&interrupted));
        assert!(!is_benign(&notify::Error::generic("boom")));
    }

    #[tokio::test]
    async fn test_watch_is_idempotent() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();

        service.watch(file.path()).await.unwrap();
        service.watch(file.path()).await.unwrap();
        assert!(service.is_watching(file.path()));

        assert!(service.events(file.path()).is_some());
        // The stream can only be claimed once
        assert!(service.events(file.path()).is_none());
    }

    #[tokio::test]
    async fn test_watch_missing_path_fails() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        let missing = file.path().with_file_name("missing.log");

        assert!(service.watch(&missing).await.is_err());
        assert!(!service.is_watching(&missing));
    }

    #[tokio::test]
    async fn test_modification_is_routed() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(file.path()).await.unwrap();
        let mut events = service.events(file.path()).unwrap();

        file.append_content("hello").unwrap();

        let event = next_event(&mut events).await.unwrap();
        assert_eq!(event.path, file.path());
        assert_eq!(event.kind, WatchEventKind::Modified);
    }

    #[tokio::test]
    async fn test_directory_watch_sees_creation() {
        let file = TempLogFile::new().unwrap();
        file.remove().unwrap();
        let dir = file.path().parent().unwrap().to_path_buf();

        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(&dir).await.unwrap();
        let mut events = service.events(&dir).unwrap();

        std::fs::write(file.path(), "hello\n").unwrap();

        let event = next_event(&mut events).await.unwrap();
        assert_eq!(event.path, file.path());
        assert_eq!(event.kind, WatchEventKind::Created);
    }

    #[tokio::test]
    async fn test_remove_watch_closes_stream() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(file.path()).await.unwrap();
        let mut events = service.events(file.path()).unwrap();

        service.remove_watch(file.path());

        assert_eq!(next_event(&mut events).await, None);
        assert!(!service.is_watching(file.path()));
    }

    #[tokio::test]
    async fn test_remove_unblocks_full_subscription() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(file.path()).await.unwrap();
        // Claim the stream but never read it so the channel fills up
        let _events = service.events(file.path()).unwrap();

        for i in 0..(SUBSCRIPTION_BUFFER * 2) {
            file.append_content(&format!("line {}", i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        service.remove_watch(file.path());

        // The worker must still answer requests afterwards
        let other = TempLogFile::new().unwrap();
        let registered =
            tokio::time::timeout(Duration::from_secs(2), service.watch(other.path())).await;
        assert!(matches!(registered, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_unclaimed_subscription_never_blocks_worker() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        // Registered but never claimed
        service.watch(file.path()).await.unwrap();

        for i in 0..(SUBSCRIPTION_BUFFER * 4) {
            file.append_content(&format!("line {}", i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let other = TempLogFile::new().unwrap();
        let registered =
            tokio::time::timeout(Duration::from_secs(2), service.watch(other.path())).await;
        assert!(matches!(registered, Ok(Ok(()))));

        // Early events are still there for a late claimer
        let mut events = service.events(file.path()).unwrap();
        let event = next_event(&mut events).await.unwrap();
        assert_eq!(event.path, file.path());
    }

    #[tokio::test]
    async fn test_rewatch_after_removal_gets_fresh_stream() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(file.path()).await.unwrap();
        let mut old_events = service.events(file.path()).unwrap();

        service.remove_watch(file.path());
        assert_eq!(next_event(&mut old_events).await, None);

        service.watch(file.path()).await.unwrap();
        let mut new_events = service.events(file.path()).unwrap();

        file.append_content("again").unwrap();
        let event = next_event(&mut new_events).await.unwrap();
        assert_eq!(event.kind, WatchEventKind::Modified);
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams_and_rejects_requests() {
        let file = TempLogFile::new().unwrap();
        let service = WatchService::with_logger(Logger::Silent).unwrap();
        service.watch(file.path()).await.unwrap();
        let mut events = service.events(file.path()).unwrap();

        service.shutdown();

        assert_eq!(next_event(&mut events).await, None);
        assert!(matches!(
            service.watch(file.path()).await,
            Err(Error::ServiceStopped)
        ));
    }
}
