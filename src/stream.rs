//! The tail engine and the stream handle handed to consumers.
//!
//! Each [`Tail`] owns one background task that opens the file, reads it line
//! by line and, once it reaches the end, waits on a [`ChangeSet`] from its
//! watcher before reading again, reopening, or stopping.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::line::{Line, LineKind, partition, trim_terminator};
use crate::reader::{LineReader, ReadLine};
use crate::watch::{Change, ChangeSet, FileWatcher};
use futures::Stream;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// A running tail. Yields [`Line`] records in file order and ends once the
/// tail terminates; call [`Tail::wait`] or [`Tail::stop`] to learn why.
pub struct Tail {
    receiver: mpsc::Receiver<Line>,
    lifecycle: Arc<Lifecycle>,
    offset: Arc<AtomicU64>,
    watcher: Arc<FileWatcher>,
    path: PathBuf,
}

impl Tail {
    /// Start tailing `path`.
    ///
    /// Fails immediately on invalid configuration, or when `must_exist` is set
    /// and the file cannot be opened. Every other problem is reported through
    /// [`Tail::wait`].
    pub async fn start<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;

        let path = std::path::absolute(path.as_ref()).map_err(|err| Error::InvalidPath {
            message: format!("{}: {}", path.as_ref().display(), err),
        })?;

        let initial = if config.must_exist {
            let file = File::open(&path).await.map_err(|source| Error::Open {
                path: path.display().to_string(),
                source,
            })?;
            Some(file)
        } else {
            None
        };

        let watcher = Arc::new(FileWatcher::from_config(path.clone(), &config)?);
        let (sender, receiver) = mpsc::channel(1);
        let lifecycle = Arc::new(Lifecycle::new());
        let offset = Arc::new(AtomicU64::new(0));

        let ticker = config.notify_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let engine = TailEngine {
            display: path.display().to_string(),
            path: path.clone(),
            config,
            initial,
            watcher: Arc::clone(&watcher),
            changes: None,
            lifecycle: Arc::clone(&lifecycle),
            lines: sender,
            offset: Arc::clone(&offset),
            opened_at: SystemTime::now(),
            ticker,
        };
        tokio::spawn(engine.run());

        Ok(Self {
            receiver,
            lifecycle,
            offset,
            watcher,
            path,
        })
    }

    /// The absolute path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last line the engine consumed. Best effort: the
    /// record for that line may still be waiting to be received.
    pub fn tell(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Request shutdown, wait for the engine to finish and return its
    /// outcome. Records not yet received are discarded.
    pub async fn stop(mut self) -> Result<()> {
        self.lifecycle.kill(None);
        self.drain().await;
        self.lifecycle.wait().await
    }

    /// Wait for the engine to finish on its own and return its outcome.
    /// Records not yet received are discarded.
    pub async fn wait(mut self) -> Result<()> {
        self.drain().await;
        self.lifecycle.wait().await
    }

    /// Stop the tail and release its native watch resources: the file's
    /// watch on a shared service, or the whole private service otherwise.
    /// The outcome reported by [`Tail::wait`] is a graceful stop.
    pub fn cleanup(&self) {
        self.lifecycle.kill(None);
        self.watcher.cleanup();
    }

    async fn drain(&mut self) {
        while self.receiver.recv().await.is_some() {}
    }
}

impl Drop for Tail {
    fn drop(&mut self) {
        // The engine exits at its next suspension point
        self.lifecycle.kill(None);
    }
}

impl Stream for Tail {
    type Item = Line;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// What to do after waiting for changes.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Resume,
    Reopen,
    Stop,
}

/// Why a wait for changes woke up.
enum Wake {
    Tick,
    Change(Change),
    Dying,
}

/// Per-file state machine. Sole owner of the file handle and reader.
struct TailEngine {
    path: PathBuf,
    display: String,
    config: Config,
    /// Opened at start when `must_exist` is set.
    initial: Option<File>,
    watcher: Arc<FileWatcher>,
    changes: Option<ChangeSet>,
    lifecycle: Arc<Lifecycle>,
    lines: mpsc::Sender<Line>,
    offset: Arc<AtomicU64>,
    opened_at: SystemTime,
    ticker: Option<Interval>,
}

impl TailEngine {
    async fn run(mut self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        let outcome = self.tail().await;

        match &outcome {
            Err(err) if !err.is_cancelled() => {
                self.config
                    .logger
                    .warn(&self.display, format_args!("tail stopped: {}", err));
            }
            _ => {
                self.config
                    .logger
                    .debug(&self.display, format_args!("tail finished"));
            }
        }

        // Closes the output stream and the file before the outcome is visible
        drop(self);
        lifecycle.done(outcome);
    }

    async fn tail(&mut self) -> Result<()> {
        let mut reader = match self.initial.take() {
            Some(file) => self.reader_for(file),
            None => self.open().await?,
        };

        // Only the first open honors the configured location
        if let Some(location) = self.config.location {
            reader.seek(location.to_seek_from()).await?;
        }

        loop {
            let read = tokio::select! {
                _ = self.lifecycle.dying() => return Err(Error::Cancelled),
                read = reader.read_line() => read?,
            };

            let flow = match read {
                ReadLine::Line(bytes) => {
                    self.send_line(&mut reader, &bytes).await?;
                    Flow::Resume
                }
                ReadLine::Partial(bytes) if self.config.follow => {
                    // Re-read the whole line once its terminator arrives
                    reader.unread(bytes.len()).await?;
                    self.wait_for_changes(&reader).await?
                }
                ReadLine::Partial(bytes) => {
                    self.send_line(&mut reader, &bytes).await?;
                    Flow::Stop
                }
                ReadLine::Eof if self.config.follow => self.wait_for_changes(&reader).await?,
                ReadLine::Eof => Flow::Stop,
            };

            match flow {
                Flow::Resume => {}
                Flow::Reopen => {
                    drop(reader);
                    reader = self.reopen().await?;
                }
                Flow::Stop => return Ok(()),
            }

            if self.lifecycle.is_dying() {
                return Err(Error::Cancelled);
            }
        }
    }

    /// Open the file, waiting for it to appear if it is missing.
    async fn open(&mut self) -> Result<LineReader> {
        loop {
            match File::open(&self.path).await {
                Ok(file) => return Ok(self.reader_for(file)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    self.config.logger.info(
                        &self.display,
                        format_args!("Waiting for {} to appear...", self.display),
                    );
                    match self.watcher.block_until_exists(&self.lifecycle).await {
                        Ok(()) => {}
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(err) => {
                            return Err(Error::WaitForFile {
                                path: self.display.clone(),
                                source: Box::new(err),
                            });
                        }
                    }
                }
                Err(source) => {
                    return Err(Error::Open {
                        path: self.display.clone(),
                        source,
                    });
                }
            }
        }
    }

    fn reader_for(&mut self, file: File) -> LineReader {
        self.opened_at = SystemTime::now();
        LineReader::new(
            file,
            self.display.clone(),
            self.config.max_line_size,
            Arc::clone(&self.offset),
        )
    }

    /// Open the file again from its start after rotation or truncation.
    async fn reopen(&mut self) -> Result<LineReader> {
        self.changes = None;
        let reader = self.open().await?;
        self.config
            .logger
            .info(&self.display, format_args!("Successfully reopened {}", self.display));

        let line = Line::new(
            String::new(),
            self.path.clone(),
            reader.offset(),
            self.opened_at,
            LineKind::NewFile,
        );
        self.emit(line).await?;
        Ok(reader)
    }

    /// Wait until the file is appended to, truncated, deleted or the tail is
    /// stopped.
    async fn wait_for_changes(&mut self, reader: &LineReader) -> Result<Flow> {
        let mut changes = match self.changes.take() {
            Some(changes) => changes,
            None => {
                let meta = reader.metadata().await?;
                self.watcher.change_events(&self.lifecycle, &meta).await?
            }
        };

        let change = loop {
            let wake = tokio::select! {
                _ = self.lifecycle.dying() => Wake::Dying,
                _ = tick(&mut self.ticker) => Wake::Tick,
                change = changes.next() => Wake::Change(change),
            };

            match wake {
                Wake::Dying => return Err(Error::Cancelled),
                Wake::Tick => {
                    let line = Line::new(
                        String::new(),
                        self.path.clone(),
                        reader.offset(),
                        self.opened_at,
                        LineKind::Ticker,
                    );
                    self.emit(line).await?;
                }
                Wake::Change(change) => break change,
            }
        };

        match change {
            Change::Modified => {
                self.changes = Some(changes);
                Ok(Flow::Resume)
            }
            Change::Deleted if self.config.reopen => {
                self.config.logger.info(
                    &self.display,
                    format_args!("Re-opening moved/deleted file {} ...", self.display),
                );
                self.pause(self.config.reopen_delay).await?;
                Ok(Flow::Reopen)
            }
            Change::Deleted => {
                self.config.logger.info(
                    &self.display,
                    format_args!("Stopping tail as file no longer exists: {}", self.display),
                );
                Ok(Flow::Stop)
            }
            Change::Truncated => {
                self.config.logger.info(
                    &self.display,
                    format_args!("Re-opening truncated file {} ...", self.display),
                );
                Ok(Flow::Reopen)
            }
            Change::Failed(err) => Err(err),
            Change::Closed if self.lifecycle.is_dying() => Err(Error::Cancelled),
            Change::Closed => Err(Error::WatcherClosed {
                path: self.display.clone(),
            }),
        }
    }

    /// Emit `bytes` as one or more records and apply the rate limit.
    async fn send_line(&mut self, reader: &mut LineReader, bytes: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(trim_terminator(bytes));
        let parts = match self.config.max_line_size {
            Some(max) => partition(&text, max),
            None => vec![text.into_owned()],
        };

        for part in parts {
            let line = Line::new(
                part,
                self.path.clone(),
                reader.offset(),
                self.opened_at,
                LineKind::NewLine,
            );
            self.emit(line).await?;

            let admitted = match &self.config.rate_limiter {
                Some(bucket) => bucket.pour(1),
                None => true,
            };
            if !admitted {
                return self.cooloff(reader).await;
            }
        }
        Ok(())
    }

    /// Warn the consumer, pause, then skip everything written meanwhile.
    async fn cooloff(&mut self, reader: &mut LineReader) -> Result<()> {
        self.config.logger.warn(
            &self.display,
            format_args!(
                "Rate limit reached on file {}; entering {:?} cooloff period",
                self.display, self.config.cooloff
            ),
        );

        let warning = Line::new(
            Error::Cooloff.to_string(),
            self.path.clone(),
            reader.offset(),
            self.opened_at,
            LineKind::NewLine,
        )
        .with_error(Error::Cooloff);
        self.emit(warning).await?;

        self.pause(self.config.cooloff).await?;
        reader.seek(SeekFrom::End(0)).await?;
        Ok(())
    }

    /// Hand a record to the consumer, waiting until it is accepted.
    async fn emit(&self, line: Line) -> Result<()> {
        tokio::select! {
            sent = self.lines.send(line) => sent.map_err(|_| Error::Cancelled),
            _ = self.lifecycle.dying() => Err(Error::Cancelled),
        }
    }

    async fn pause(&self, duration: std::time::Duration) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.lifecycle.dying() => Err(Error::Cancelled),
        }
    }
}

/// Next heartbeat, or never when no notify interval is configured.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
