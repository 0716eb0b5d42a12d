//! Background rendering.
//!
//! The [`RenderLoop`] owns a thread that wakes every tick interval, echoes
//! new captured lines, redraws the frame and advances the spinner. It moves
//! through [`LoopState`] strictly forward:
//!
//! ```text
//! Idle -> Running -> Draining -> Stopped
//! ```
//!
//! A stop request (or the work completing) moves it to `Draining`, where it
//! paints exactly once more and halts. The stop request is a channel message,
//! so the sleep between ticks is interrupted immediately. Shutdown waits for
//! an acknowledgment for a bounded time only; a thread that does not answer
//! in time is abandoned and its painter cancelled.

use std::{
    fmt,
    io::Write as _,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    error::Error,
    io::{CaptureBuffer, RealWriter},
    lines::{CLEAR_LINE, LineDiffer},
    progress::ProgressState,
    render::{ColumnSource, Renderer},
};

/// Lifecycle of a [`RenderLoop`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoopState {
    /// Not started.
    #[default]
    Idle,
    /// Painting every tick.
    Running,
    /// Performing the final paint.
    Draining,
    /// Halted; never paints again.
    Stopped,
}

impl LoopState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell holding a [`LoopState`].
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`; fails if another transition got there first.
    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn force(&self, to: LoopState) {
        self.0.store(to as u8, Ordering::Release);
    }
}

/// Everything needed to put one frame on screen.
///
/// Shared between the render thread and scope exit behind a mutex, so the
/// echo cursor and last frame are never updated from two places at once.
pub(crate) struct Painter {
    renderer: Renderer,
    differ: LineDiffer,
    capture: Arc<CaptureBuffer>,
    out: RealWriter,
    columns: ColumnSource,
    last_frame: Option<String>,
    warned_width: bool,
    cancelled: bool,
}

impl fmt::Debug for Painter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Painter")
            .field("differ", &self.differ)
            .field("last_frame", &self.last_frame)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

impl Painter {
    pub(crate) fn new(
        renderer: Renderer,
        capture: Arc<CaptureBuffer>,
        out: RealWriter,
        columns: ColumnSource,
    ) -> Self {
        Self {
            renderer,
            differ: LineDiffer::new(),
            capture,
            out,
            columns,
            last_frame: None,
            warned_width: false,
            cancelled: false,
        }
    }

    /// Echoes new lines and redraws the frame.
    ///
    /// Skips the write entirely when nothing was echoed and the frame is
    /// unchanged. Returns whether anything was written. If the real target
    /// rejects the write, the echoed lines are retried on the next paint.
    pub(crate) fn paint(&mut self, state: &ProgressState) -> bool {
        if self.cancelled {
            return false;
        }

        let snapshot = state.snapshot();
        let columns = (self.columns)();

        let mut buf = Vec::new();
        let mut differ = self.differ;
        let echoed = differ
            .echo_new(&self.capture, &mut buf)
            .unwrap_or_default();

        let frame = match self.renderer.render(&snapshot, columns) {
            Ok(frame) => frame,
            Err(err) => {
                if !self.warned_width {
                    warn!("progress frame clipped: {err}");
                    self.warned_width = true;
                }
                self.renderer.render_clipped(&snapshot, columns)
            }
        };

        if echoed == 0 && self.last_frame.as_deref() == Some(frame.as_str()) {
            self.differ = differ;
            return false;
        }

        // Writes into a Vec cannot fail.
        let _ = write!(buf, "{CLEAR_LINE}{frame}");
        if let Err(err) = self.out.write_all(&buf) {
            debug!("{}", Error::from(err));
            return false;
        }
        self.differ = differ;
        self.last_frame = Some(frame);
        true
    }

    /// One render-loop tick: paint, then advance the spinner.
    pub(crate) fn tick(&mut self, state: &ProgressState) {
        if self.cancelled {
            return;
        }
        self.paint(state);
        state.advance_spinner();
    }

    /// Makes every later paint a no-op.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// The most recently written frame.
    pub(crate) fn last_frame(&self) -> Option<&str> {
        self.last_frame.as_deref()
    }

    /// Number of captured lines echoed so far.
    pub(crate) const fn echoed(&self) -> usize {
        self.differ.echoed()
    }
}

/// Handle to the background render thread.
pub struct RenderLoop {
    state: Arc<StateCell>,
    wake: Sender<()>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLoop")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RenderLoop {
    /// Starts the render thread.
    pub(crate) fn spawn(
        progress: ProgressState,
        painter: Arc<Mutex<Painter>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let state = Arc::new(StateCell::default());
        let (wake_tx, wake_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);

        state.transition(LoopState::Idle, LoopState::Running);
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("progress-render".into())
            .spawn(move || {
                run(&progress, &painter, &thread_state, &wake_rx, interval);
                let _ = done_tx.send(());
            });

        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                state.force(LoopState::Stopped);
                return Err(err);
            }
        };

        Ok(Self {
            state,
            wake: wake_tx,
            done: done_rx,
            handle: Some(handle),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Interrupts the current sleep so the loop notices a state change now.
    ///
    /// Never blocks.
    pub(crate) fn wake(&self) {
        let _ = self.wake.try_send(());
    }

    /// Requests a drain and waits up to `timeout` for it to finish.
    ///
    /// Returns `true` if the thread stopped on its own. Otherwise the thread
    /// is marked stopped and detached; the caller must cancel the painter.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return self.state() == LoopState::Stopped;
        };

        self.wake();
        match self.done.recv_timeout(timeout) {
            Ok(()) => {
                // Acknowledged: the thread is past its last paint.
                if handle.join().is_err() {
                    warn!("progress render thread panicked");
                }
                true
            }
            Err(err) => {
                warn!("progress render thread did not stop in {timeout:?} ({err}), abandoning it");
                self.state.force(LoopState::Stopped);
                false
            }
        }
    }
}

fn run(
    progress: &ProgressState,
    painter: &Mutex<Painter>,
    state: &StateCell,
    wake: &Receiver<()>,
    interval: Duration,
) {
    debug!("progress render loop running, interval {interval:?}");

    while state.get() == LoopState::Running && !progress.is_complete() {
        painter.lock().tick(progress);

        match wake.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            // Woken: either a stop request or the work just completed.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !state.transition(LoopState::Running, LoopState::Draining) {
        // Forced to Stopped while we were busy.
        return;
    }
    painter.lock().paint(progress);
    progress.stop();
    state.transition(LoopState::Draining, LoopState::Stopped);

    debug!("progress render loop stopped");
}
