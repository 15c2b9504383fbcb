//! Injectable logging sink for the tail engine and watchers.
//!
//! Records go through `tracing`; the process decides where they end up by
//! installing a subscriber (the bundled binary writes to stderr).

use std::fmt;

/// Where library diagnostics go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Logger {
    /// Emit through the `tracing` macros.
    #[default]
    Tracing,
    /// Drop everything.
    Silent,
}

impl Logger {
    pub(crate) fn info(&self, path: &str, message: fmt::Arguments<'_>) {
        if *self == Logger::Tracing {
            tracing::info!(path = %path, "{}", message);
        }
    }

    pub(crate) fn warn(&self, path: &str, message: fmt::Arguments<'_>) {
        if *self == Logger::Tracing {
            tracing::warn!(path = %path, "{}", message);
        }
    }

    pub(crate) fn debug(&self, path: &str, message: fmt::Arguments<'_>) {
        if *self == Logger::Tracing {
            tracing::debug!(path = %path, "{}", message);
        }
    }
}
