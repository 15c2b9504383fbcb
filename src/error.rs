//! Error types for the log tail library.

use thiserror::Error;

/// The main error type for log tail operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The supplied configuration cannot be honored.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// File path errors.
    #[error("Invalid file path: {message}")]
    InvalidPath { message: String },

    /// The file could not be opened for a reason other than it being absent
    /// (or it was absent and `must_exist` was requested).
    #[error("Unable to open file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Seek error on {path}: {source}")]
    Seek {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for a missing file to appear failed.
    #[error("Failed to detect creation of {path}: {source}")]
    WaitForFile {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// The event stream for a watched path has already been claimed.
    #[error("Watch events for {path} are already in use")]
    WatchUnavailable { path: String },

    /// The watcher feeding a change set went away without a terminal event.
    #[error("Watcher for {path} closed unexpectedly")]
    WatcherClosed { path: String },

    /// The shared watch service is no longer running.
    #[error("Watch service stopped")]
    ServiceStopped,

    /// The tail is shutting down.
    #[error("Tail is stopping")]
    Cancelled,

    /// Attached to the warning line emitted when the rate limit engages.
    #[error("Too much activity; entering a cool-off period")]
    Cooloff,
}

impl Error {
    /// Returns true for the shutdown sentinel, which is never reported as a
    /// terminal outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// A convenient Result type for log tail operations.
pub type Result<T> = std::result::Result<T, Error>;
