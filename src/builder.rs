//! Fluent interface for opening progress scopes.
//!
//! [`open`](crate::open) covers the common case of "title, glyphs, maybe a
//! width". The [`ScopeBuilder`] exposes everything else: tick interval, how
//! long scope exit may wait for the render thread, where the column count
//! comes from, and an explicit start time.
//!
//! # Key Features
//!
//! * **Injected terminal width:** [`ScopeBuilder::columns`] replaces the
//!   terminal query, which makes rendering deterministic in tests and lets
//!   hosts that already track their own layout feed it in.
//! * **Time Travel:** [`ScopeBuilder::with_start_time`] backdates the ETA
//!   baseline, useful when resuming a batch that was already partly done.

use std::{fmt, sync::Arc, time::Duration};

use compact_str::CompactString;
use web_time::Instant;

use crate::{
    error::Result,
    io::SharedOutput,
    render::{ColumnSource, SpinnerSequence, Style, terminal_columns},
    scope::ScopeHandle,
};

/// Default pause between two frames.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Default upper bound on how long scope exit waits for the render thread.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A builder for configuring and opening a [`ScopeHandle`].
#[derive(Clone)]
pub struct ScopeBuilder {
    pub(crate) total: u64,
    pub(crate) style: Style,
    pub(crate) spinner: SpinnerSequence,
    pub(crate) tick_interval: Duration,
    pub(crate) join_timeout: Duration,
    pub(crate) columns: ColumnSource,
    pub(crate) start: Option<Instant>,
}

impl fmt::Debug for ScopeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeBuilder")
            .field("total", &self.total)
            .field("style", &self.style)
            .field("spinner", &self.spinner)
            .field("tick_interval", &self.tick_interval)
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

impl ScopeBuilder {
    /// Starts building a scope tracking `total` items.
    #[must_use]
    pub fn new(total: impl Into<u64>) -> Self {
        Self {
            total: total.into(),
            style: Style::default(),
            spinner: SpinnerSequence::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            columns: Arc::new(terminal_columns),
            start: None,
        }
    }

    /// Replaces the item count.
    #[must_use]
    pub const fn total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Text shown in front of the bar.
    #[must_use]
    pub fn title(mut self, title: impl Into<CompactString>) -> Self {
        self.style.title = title.into();
        self
    }

    /// Glyph for completed cells.
    #[must_use]
    pub fn fill(mut self, fill: impl Into<CompactString>) -> Self {
        self.style.fill = fill.into();
        self
    }

    /// Glyph for remaining cells.
    #[must_use]
    pub fn empty(mut self, empty: impl Into<CompactString>) -> Self {
        self.style.empty = empty.into();
        self
    }

    /// Pins the bar to `width` cells, or sizes it to the terminal with `None`.
    ///
    /// A pinned bar wider than the terminal is clipped, never wrapped.
    #[must_use]
    pub fn width(mut self, width: impl Into<Option<usize>>) -> Self {
        self.style.width = width.into();
        self
    }

    /// Replaces the whole style at once.
    #[must_use]
    pub fn style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    /// Sets the spinner glyphs.
    #[must_use]
    pub fn spinner(mut self, spinner: SpinnerSequence) -> Self {
        self.spinner = spinner;
        self
    }

    /// Sets the pause between two frames.
    #[must_use]
    pub const fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the total time scope exit waits for the render thread and the final
    /// frame before abandoning them.
    #[must_use]
    pub const fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Overrides how the terminal width is obtained.
    #[must_use]
    pub fn columns(mut self, columns: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        self.columns = Arc::new(columns);
        self
    }

    /// Sets the ETA baseline explicitly.
    #[must_use]
    pub const fn with_start_time(mut self, start: Instant) -> Self {
        self.start = Some(start);
        self
    }

    /// Captures `output` and starts rendering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyActive`](crate::Error::AlreadyActive) if
    /// `output` is already captured, or [`Error::Io`](crate::Error::Io) if the
    /// render thread cannot be spawned.
    pub fn open(self, output: &SharedOutput) -> Result<ScopeHandle> {
        ScopeHandle::enter(self, output)
    }
}
