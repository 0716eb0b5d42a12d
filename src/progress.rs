//! Shared counters for a single progress scope.
//!
//! [`ProgressState`] is split the same way every field is owned:
//!
//! * **Foreground-written:** the position, bumped by [`ProgressState::advance`].
//! * **Render-written:** the spinner phase and the running flag, packed into one
//!   atomic word so that "advance the spinner only while running" is a single
//!   compare-and-swap and can never race the final stop.
//! * **Immutable:** the total and the start instant.
//!
//! # Snapshots
//!
//! Rendering never reads the atomics piecemeal. [`ProgressState::snapshot`]
//! copies everything into a [`ProgressSnapshot`] which also derives the ETA.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use web_time::Instant;

/// High bit of the phase word: set while the render loop is running.
const RUNNING_BIT: u64 = 1 << 63;

/// A thread-safe, cloneable handle to the counters of one scope.
///
/// Cloning is cheap (Arc bump) and every clone points to the same state.
#[derive(Clone, Debug)]
pub struct ProgressState {
    pub(crate) start: Instant,
    pub(crate) total: u64,
    pub(crate) position: Arc<AtomicU64>,
    /// Spinner index in the low bits, [`RUNNING_BIT`] in the high bit.
    pub(crate) phase: Arc<AtomicU64>,
}

impl ProgressState {
    /// Creates a running state with the timer started now.
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self::with_start_time(total, Instant::now())
    }

    /// Creates a running state with an explicit start instant.
    #[must_use]
    pub fn with_start_time(total: u64, start: Instant) -> Self {
        Self {
            start,
            total,
            position: Arc::new(AtomicU64::new(0)),
            phase: Arc::new(AtomicU64::new(RUNNING_BIT)),
        }
    }

    // ========================================================================
    // Foreground
    // ========================================================================

    /// Increments the position by one, saturating at the total.
    pub fn advance(&self) {
        let total = self.total;
        // Err only means we were already at the total.
        let _ = self
            .position
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pos| {
                (pos < total).then_some(pos + 1)
            });
    }

    /// Gets the current position.
    #[must_use]
    pub fn get_pos(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Gets the total target count.
    #[must_use]
    pub const fn get_total(&self) -> u64 {
        self.total
    }

    /// Whether every item has been processed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.get_pos() >= self.total
    }

    /// Duration elapsed since the scope was entered.
    #[must_use]
    pub fn get_elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    // ========================================================================
    // Render thread
    // ========================================================================

    /// Current spinner index (not yet reduced modulo the sequence length).
    #[must_use]
    pub fn spinner_index(&self) -> u64 {
        self.phase.load(Ordering::Acquire) & !RUNNING_BIT
    }

    /// Whether the render loop is still allowed to animate.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) & RUNNING_BIT != 0
    }

    /// Advances the spinner by one step.
    ///
    /// Returns `false`, leaving the index untouched, once the state has been stopped.
    pub fn advance_spinner(&self) -> bool {
        self.phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |phase| {
                (phase & RUNNING_BIT != 0).then(|| RUNNING_BIT | (phase.wrapping_add(1) & !RUNNING_BIT))
            })
            .is_ok()
    }

    /// Clears the running flag.
    ///
    /// Returns `true` only for the call that actually flipped it.
    pub fn stop(&self) -> bool {
        self.phase.fetch_and(!RUNNING_BIT, Ordering::AcqRel) & RUNNING_BIT != 0
    }

    /// Creates a consistent snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.into()
    }
}

/// A plain-data view of a [`ProgressState`] at one instant.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSnapshot {
    elapsed: Duration,
    position: u64,
    total: u64,
    spinner_index: u64,
    running: bool,
}

impl From<&ProgressState> for ProgressSnapshot {
    fn from(state: &ProgressState) -> Self {
        let phase = state.phase.load(Ordering::Acquire);

        Self {
            elapsed: state.get_elapsed(),
            position: state.get_pos().min(state.total),
            total: state.total,
            spinner_index: phase & !RUNNING_BIT,
            running: phase & RUNNING_BIT != 0,
        }
    }
}

impl ProgressSnapshot {
    /// Builds a snapshot from raw values. Mostly useful for driving a
    /// [`Renderer`](crate::Renderer) directly.
    #[must_use]
    pub fn new(position: u64, total: u64, elapsed: Duration, spinner_index: u64) -> Self {
        Self {
            elapsed,
            position: position.min(total),
            total,
            spinner_index,
            running: true,
        }
    }

    /// Returns the elapsed duration.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns the current position.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Returns the total target count.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Returns the spinner index.
    #[must_use]
    pub const fn spinner_index(&self) -> u64 {
        self.spinner_index
    }

    /// Returns whether the render loop was running when the snapshot was taken.
    #[must_use]
    pub const fn running(&self) -> bool {
        self.running
    }

    /// Whether every item has been processed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.position >= self.total
    }

    /// Number of filled cells in a bar `width` cells wide.
    ///
    /// `floor(width * position / total)`, always within `0..=width`. An empty
    /// workload counts as complete.
    #[must_use]
    pub fn filled_cells(&self, width: usize) -> usize {
        if self.total == 0 {
            return width;
        }
        let filled = (width as u128 * u128::from(self.position)) / u128::from(self.total);
        // position <= total, so filled <= width
        usize::try_from(filled).map_or(width, |x| x.min(width))
    }

    /// Estimates the time remaining by linear extrapolation.
    ///
    /// Returns `None` when nothing has been processed yet or no measurable
    /// time has passed, and zero once complete.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        if self.is_complete() {
            return Some(Duration::ZERO);
        }
        if self.position == 0 {
            return None;
        }

        let secs = self.elapsed.as_secs_f64();
        if secs <= 1e-6 {
            return None;
        }

        let remaining_items = (self.total - self.position) as f64;
        let remaining_secs = secs / self.position as f64 * remaining_items;

        Duration::try_from_secs_f64(remaining_secs).ok()
    }
}
