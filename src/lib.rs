//! A log tail library that follows files line by line, the way `tail -F` does.
//!
//! A [`Tail`] streams every line appended to a file and keeps going across
//! rotation, truncation and deletion. Changes are picked up either through a
//! shared native [`WatchService`] or by polling file metadata.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tail::{Config, SeekInfo, tail_file};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default()
//!         .with_follow(true)
//!         .with_reopen(true)
//!         .with_location(SeekInfo::end());
//!     let mut tail = tail_file("app.log", config).await?;
//!
//!     while let Some(line) = tail.next().await {
//!         println!("{}", line.text);
//!     }
//!
//!     tail.wait().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod lifecycle;
mod line;
mod logging;
mod ratelimit;
mod reader;
mod stream;
mod watch;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use config::{Config, DEFAULT_COOLOFF, DEFAULT_POLL_INTERVAL, SeekInfo, Whence};
pub use error::{Error, Result};
pub use line::{Line, LineKind};
pub use logging::Logger;
pub use ratelimit::{BucketStore, LeakyBucket};
pub use stream::Tail;
pub use watch::{WatchEvent, WatchEventKind, WatchEvents, WatchService};

use std::path::Path;

/// Starts tailing a file.
///
/// # Arguments
///
/// * `path` - File path to follow; it does not need to exist yet unless
///   `config.must_exist` is set
/// * `config` - How to follow the file
///
/// # Example
///
/// ```rust,no_run
/// use log_tail::{Config, tail_file};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut tail = tail_file("app.log", Config::default()).await?;
///
///     while let Some(line) = tail.next().await {
///         println!("{}", line.text);
///     }
///
///     Ok(())
/// }
/// ```
pub async fn tail_file<P: AsRef<Path>>(path: P, config: Config) -> Result<Tail> {
    Tail::start(path, config).await
}
