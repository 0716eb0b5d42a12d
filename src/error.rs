//! Error taxonomy for scopes, interception and rendering.
//!
//! None of these errors are allowed to abort the work a scope is tracking:
//! [`Error::WidthExceeded`] and [`Error::Io`] are soft-failed by the painter
//! (the bar degrades a frame), and [`Error::AlreadyActive`] is only returned
//! from [`open`](crate::open) before any work has started.

use thiserror::Error;

/// Errors produced by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The rendered frame is wider than the terminal.
    #[error("frame of {width} columns does not fit a terminal of {columns} columns")]
    WidthExceeded {
        /// Width of the frame that was produced.
        width: usize,
        /// Columns currently available.
        columns: usize,
    },

    /// The output handle is already being captured by another scope.
    #[error("output is already captured by an active progress scope")]
    AlreadyActive,

    /// Writing to the real output target failed.
    #[error("failed to write to the output target: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
