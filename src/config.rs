//! Tail configuration.

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::ratelimit::LeakyBucket;
use crate::watch::WatchService;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between metadata samples of the polling watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default pause applied when the rate limiter rejects a line.
pub const DEFAULT_COOLOFF: Duration = Duration::from_secs(1);

/// Reference point for [`SeekInfo::offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Where to position the file on first open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekInfo {
    pub offset: i64,
    pub whence: Whence,
}

impl SeekInfo {
    /// Start reading from the beginning of the file.
    pub fn start() -> Self {
        Self {
            offset: 0,
            whence: Whence::Start,
        }
    }

    /// Only read content appended after the tail starts.
    pub fn end() -> Self {
        Self {
            offset: 0,
            whence: Whence::End,
        }
    }

    pub(crate) fn to_seek_from(self) -> SeekFrom {
        match self.whence {
            Whence::Start => SeekFrom::Start(self.offset.max(0) as u64),
            Whence::Current => SeekFrom::Current(self.offset),
            Whence::End => SeekFrom::End(self.offset),
        }
    }
}

/// Specifies how a file is tailed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seek here before the first read. Ignored on reopen.
    pub location: Option<SeekInfo>,
    /// Keep waiting for new lines at end of file (`tail -f`).
    pub follow: bool,
    /// Reopen the file after it is deleted or rotated (`tail -F`).
    pub reopen: bool,
    /// Pause between noticing a deletion and reopening.
    pub reopen_delay: Duration,
    /// Fail at start if the file does not exist.
    pub must_exist: bool,
    /// Sample file metadata instead of using native notifications.
    pub poll: bool,
    pub poll_interval: Duration,
    /// Split lines longer than this many bytes into several records.
    pub max_line_size: Option<usize>,
    /// Emit a heartbeat record at this interval while waiting for changes.
    pub notify_interval: Option<Duration>,
    pub rate_limiter: Option<Arc<LeakyBucket>>,
    pub cooloff: Duration,
    pub logger: Logger,
    /// Shared native watch service. A private one is created per tail when
    /// this is `None` and `poll` is off.
    pub watch_service: Option<Arc<WatchService>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: None,
            follow: false,
            reopen: false,
            reopen_delay: Duration::ZERO,
            must_exist: false,
            poll: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_line_size: None,
            notify_interval: None,
            rate_limiter: None,
            cooloff: DEFAULT_COOLOFF,
            logger: Logger::default(),
            watch_service: None,
        }
    }
}

impl Config {
    pub fn with_location(mut self, location: SeekInfo) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn with_reopen(mut self, reopen: bool) -> Self {
        self.reopen = reopen;
        self
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    pub fn with_must_exist(mut self, must_exist: bool) -> Self {
        self.must_exist = must_exist;
        self
    }

    pub fn with_poll(mut self, poll: bool) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_line_size(mut self, size: usize) -> Self {
        self.max_line_size = Some(size);
        self
    }

    pub fn with_notify_interval(mut self, interval: Duration) -> Self {
        self.notify_interval = Some(interval);
        self
    }

    pub fn with_rate_limiter(mut self, bucket: Arc<LeakyBucket>) -> Self {
        self.rate_limiter = Some(bucket);
        self
    }

    pub fn with_cooloff(mut self, cooloff: Duration) -> Self {
        self.cooloff = cooloff;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_watch_service(mut self, service: Arc<WatchService>) -> Self {
        self.watch_service = Some(service);
        self
    }

    /// Reject combinations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.reopen && !self.follow {
            return Err(invalid("cannot set reopen without follow"));
        }
        if self.max_line_size == Some(0) {
            return Err(invalid("max_line_size must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than zero"));
        }
        if self.notify_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(invalid("notify_interval must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_ok!(config.validate());
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.cooloff, DEFAULT_COOLOFF);
        assert!(!config.follow);
    }

    #[test]
    fn test_reopen_requires_follow() {
        let config = Config::default().with_reopen(true);
        match config.validate() {
            Err(Error::InvalidConfig { message }) => assert!(message.contains("reopen")),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }

        let config = Config::default().with_follow(true).with_reopen(true);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert_err!(Config::default().with_max_line_size(0).validate());
        assert!(
            Config::default()
                .with_poll_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            Config::default()
                .with_notify_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_seek_info_conversion() {
        assert_eq!(SeekInfo::start().to_seek_from(), SeekFrom::Start(0));
        assert_eq!(SeekInfo::end().to_seek_from(), SeekFrom::End(0));

        let back = SeekInfo {
            offset: -4,
            whence: Whence::End,
        };
        assert_eq!(back.to_seek_from(), SeekFrom::End(-4));

        let negative_start = SeekInfo {
            offset: -4,
            whence: Whence::Start,
        };
        assert_eq!(negative_start.to_seek_from(), SeekFrom::Start(0));
    }
}
