//! Frame assembly.
//!
//! A frame is one terminal line:
//!
//! ```text
//! {title}[{fill × x}{empty × (width − x)}] {spinner} {current}/{total} est: MM:SS.ss
//! ```
//!
//! where `x = floor(width × current / total)`. When no width is pinned the
//! bar is sized to whatever the terminal has left after the fixed parts, and
//! the last column is always kept free so the cursor never wraps.
//!
//! Widths are counted in terminal columns, so double-width glyphs take two
//! cells' worth of space. Titles and glyphs are expected to be free of escape
//! sequences.

use std::{env, sync::Arc, time::Duration};

use compact_str::CompactString;
use terminal_size::{Width, terminal_size};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::{
    error::{Error, Result},
    progress::ProgressSnapshot,
};

/// Shown in place of the ETA before the first item completes.
pub const ETA_UNKNOWN: &str = "--:--";

/// Glyphs cycled by the spinner, plus the glyph shown once the work is done.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpinnerSequence {
    frames: Vec<CompactString>,
    done: CompactString,
}

impl Default for SpinnerSequence {
    fn default() -> Self {
        Self {
            frames: ["|", "/", "-", "\\"].map(CompactString::const_new).to_vec(),
            done: CompactString::const_new("*"),
        }
    }
}

impl SpinnerSequence {
    /// Builds a sequence from custom frames.
    ///
    /// An empty frame list falls back to the default cycle.
    pub fn new<I, S>(frames: I, done: impl Into<CompactString>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        let frames: Vec<CompactString> = frames.into_iter().map(Into::into).collect();
        if frames.is_empty() {
            return Self {
                done: done.into(),
                ..Self::default()
            };
        }
        Self {
            frames,
            done: done.into(),
        }
    }

    /// The animation frames.
    #[must_use]
    pub fn frames(&self) -> &[CompactString] {
        &self.frames
    }

    /// The completion glyph.
    #[must_use]
    pub fn done(&self) -> &str {
        &self.done
    }

    /// Glyph for a spinner index, or the completion glyph once `complete`.
    #[must_use]
    pub fn glyph(&self, index: u64, complete: bool) -> &str {
        if complete {
            return &self.done;
        }
        let len = self.frames.len() as u64;
        // frames is never empty, see `new`
        let slot = usize::try_from(index % len).unwrap_or_default();
        &self.frames[slot]
    }

    /// Widest glyph, reserved in every frame so the bar does not jitter.
    #[must_use]
    pub fn width(&self) -> usize {
        self.frames
            .iter()
            .chain(std::iter::once(&self.done))
            .map(|glyph| glyph.width())
            .max()
            .unwrap_or(1)
    }
}

/// Static look of a bar.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Style {
    /// Text shown in front of the bar.
    pub title: CompactString,
    /// Glyph for completed cells.
    pub fill: CompactString,
    /// Glyph for remaining cells.
    pub empty: CompactString,
    /// Pinned bar width in cells; `None` sizes the bar to the terminal.
    pub width: Option<usize>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            title: CompactString::default(),
            fill: CompactString::const_new("="),
            empty: CompactString::const_new("-"),
            width: None,
        }
    }
}

/// Turns snapshots into frames.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Renderer {
    style: Style,
    spinner: SpinnerSequence,
}

impl Renderer {
    /// Creates a renderer for the given style and spinner.
    #[must_use]
    pub const fn new(style: Style, spinner: SpinnerSequence) -> Self {
        Self { style, spinner }
    }

    /// The `"{current}/{total} est: {eta}"` tail of a frame.
    #[must_use]
    pub fn end_string(snapshot: &ProgressSnapshot) -> String {
        format!(
            "{}/{} est: {}",
            snapshot.position(),
            snapshot.total(),
            format_eta(snapshot.eta())
        )
    }

    /// Bar width in cells: the pinned width, or whatever fits in `columns`.
    #[must_use]
    pub fn bar_width(&self, snapshot: &ProgressSnapshot, columns: usize) -> usize {
        if let Some(width) = self.style.width {
            return width;
        }

        // "[" + "] " + spinner + " " + end
        let overhead = self.style.title.width()
            + 3
            + self.spinner.width()
            + 1
            + Self::end_string(snapshot).width();
        let cell = self
            .style
            .fill
            .width()
            .max(self.style.empty.width())
            .max(1);

        usable_columns(columns).saturating_sub(overhead) / cell
    }

    /// Columns the full frame occupies, saturating instead of overflowing.
    #[must_use]
    pub fn frame_width(&self, snapshot: &ProgressSnapshot, columns: usize) -> usize {
        let width = self.bar_width(snapshot, columns);
        let filled = snapshot.filled_cells(width);
        let complete = snapshot.is_complete();

        let cells = filled
            .saturating_mul(self.style.fill.width())
            .saturating_add(width.saturating_sub(filled).saturating_mul(self.style.empty.width()));

        // "[" + cells + "] " + spinner + " " + end
        self.style
            .title
            .width()
            .saturating_add(cells)
            .saturating_add(4)
            .saturating_add(self.spinner.glyph(snapshot.spinner_index(), complete).width())
            .saturating_add(Self::end_string(snapshot).width())
    }

    /// Assembles the frame without checking it against the terminal.
    ///
    /// At most one cell per usable column is built, so a bar pinned far wider
    /// than the terminal comes out truncated rather than allocated in full.
    #[must_use]
    pub fn compose(&self, snapshot: &ProgressSnapshot, columns: usize) -> String {
        let width = self.bar_width(snapshot, columns);
        let filled = snapshot.filled_cells(width);
        let complete = snapshot.is_complete();

        let budget = usable_columns(columns);
        let fill_cells = filled.min(budget);
        let empty_cells = width.saturating_sub(filled).min(budget - fill_cells);

        format!(
            "{title}[{fill}{empty}] {spinner} {end}",
            title = self.style.title,
            fill = self.style.fill.repeat(fill_cells),
            empty = self.style.empty.repeat(empty_cells),
            spinner = self.spinner.glyph(snapshot.spinner_index(), complete),
            end = Self::end_string(snapshot),
        )
    }

    /// Assembles the frame for a terminal `columns` wide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WidthExceeded`] if the frame does not fit, which can
    /// only happen with a pinned width or a terminal too narrow for the fixed
    /// parts of the frame.
    pub fn render(&self, snapshot: &ProgressSnapshot, columns: usize) -> Result<String> {
        let width = self.frame_width(snapshot, columns);
        if width > usable_columns(columns) {
            return Err(Error::WidthExceeded { width, columns });
        }
        Ok(self.compose(snapshot, columns))
    }

    /// Assembles the frame, cutting it down to the terminal if it does not fit.
    #[must_use]
    pub fn render_clipped(&self, snapshot: &ProgressSnapshot, columns: usize) -> String {
        self.render(snapshot, columns)
            .unwrap_or_else(|_| clip(&self.compose(snapshot, columns), columns))
    }
}

/// Reports the terminal's current column count. Queried once per frame.
pub type ColumnSource = Arc<dyn Fn() -> usize + Send + Sync>;

/// Used when neither the terminal nor `COLUMNS` reports a width.
pub const FALLBACK_COLUMNS: usize = 80;

/// Current terminal width.
///
/// Asks the terminal first, then the `COLUMNS` environment variable, then
/// falls back to [`FALLBACK_COLUMNS`].
#[must_use]
pub fn terminal_columns() -> usize {
    if let Some((Width(w), _)) = terminal_size().filter(|(Width(w), _)| *w > 0) {
        return usize::from(w);
    }
    env::var("COLUMNS")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|&columns| columns > 0)
        .unwrap_or(FALLBACK_COLUMNS)
}

/// Columns a frame may occupy; the last one stays free.
const fn usable_columns(columns: usize) -> usize {
    columns.saturating_sub(1)
}

/// Truncates `frame` so it fits a terminal `columns` wide.
///
/// A double-width glyph that would straddle the last usable column is dropped
/// whole.
#[must_use]
pub fn clip(frame: &str, columns: usize) -> String {
    let budget = usable_columns(columns);
    let mut used = 0usize;
    frame
        .chars()
        .take_while(|ch| {
            used += UnicodeWidthChar::width(*ch).unwrap_or(0);
            used <= budget
        })
        .collect()
}

/// Formats an ETA as `MM:SS.ss`, or [`ETA_UNKNOWN`].
#[must_use]
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return ETA_UNKNOWN.to_owned();
    };

    let centis = eta.as_millis().saturating_add(5) / 10;
    let mins = centis / 6000;
    let rest = centis % 6000;
    format!("{mins:02}:{:02}.{:02}", rest / 100, rest % 100)
}
