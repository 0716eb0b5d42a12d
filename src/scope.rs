//! The acquire/release boundary around tracked work.
//!
//! Opening a scope captures the [`SharedOutput`], starts the render thread and
//! returns a [`ScopeHandle`]. Closing it, explicitly with
//! [`ScopeHandle::close`] or implicitly when the handle is dropped (including
//! while unwinding from a panic), always:
//!
//! 1. asks the render thread to drain and waits a bounded time for it,
//! 2. paints a final frame with everything still in the capture buffer,
//! 3. restores the real output target,
//! 4. writes a newline so later output starts on a clean line.

use std::{io::Write as _, sync::Arc, time::Duration};

use compact_str::CompactString;
use log::{debug, warn};
use parking_lot::Mutex;
use web_time::Instant;

use crate::{
    builder::ScopeBuilder,
    error::Result,
    io::{OutputInterceptor, SharedOutput},
    progress::{ProgressSnapshot, ProgressState},
    render::{Renderer, SpinnerSequence},
    render_loop::{LoopState, Painter, RenderLoop},
};

/// Opens a progress scope on `output`.
///
/// `explicit_width` pins the bar to that many cells; `None` sizes it to the
/// terminal every frame. `spinner` defaults to [`SpinnerSequence::default`].
///
/// # Errors
///
/// Returns [`Error::AlreadyActive`](crate::Error::AlreadyActive) if another
/// scope is already capturing `output`.
///
/// # Example
///
/// ```no_run
/// use std::io::Write as _;
/// use scoped_progress::SharedOutput;
///
/// let mut out = SharedOutput::stdout();
/// let files = ["a.txt", "b.txt", "c.txt"];
///
/// let scope = scoped_progress::open(&out, files.len() as u64, "upload ", "=", "-", None, None)?;
/// for file in files {
///     writeln!(out, "sending {file}")?;
///     scope.advance();
/// }
/// let report = scope.close();
/// assert_eq!(report.snapshot.position(), 3);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open(
    output: &SharedOutput,
    total_items: u64,
    title: impl Into<CompactString>,
    fill: impl Into<CompactString>,
    empty: impl Into<CompactString>,
    explicit_width: Option<usize>,
    spinner: Option<SpinnerSequence>,
) -> Result<ScopeHandle> {
    ScopeBuilder::new(total_items)
        .title(title)
        .fill(fill)
        .empty(empty)
        .width(explicit_width)
        .spinner(spinner.unwrap_or_default())
        .open(output)
}

/// Summary returned when a scope closes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScopeReport {
    /// Final state of the counters.
    pub snapshot: ProgressSnapshot,
    /// Number of captured lines echoed above the bar.
    pub echoed_lines: usize,
    /// The last frame written, if any.
    pub final_frame: Option<String>,
    /// Whether the render thread missed the exit deadline and was abandoned.
    pub render_thread_abandoned: bool,
    /// Render loop state after exit; always [`LoopState::Stopped`].
    pub loop_state: LoopState,
}

/// A live progress scope.
///
/// Dropping the handle closes the scope.
#[derive(Debug)]
pub struct ScopeHandle {
    state: ProgressState,
    painter: Arc<Mutex<Painter>>,
    render_loop: RenderLoop,
    interceptor: Option<OutputInterceptor>,
    output: SharedOutput,
    join_timeout: Duration,
}

impl ScopeHandle {
    pub(crate) fn enter(config: ScopeBuilder, output: &SharedOutput) -> Result<Self> {
        let interceptor = OutputInterceptor::install(output)?;

        let state = ProgressState::with_start_time(
            config.total,
            config.start.unwrap_or_else(Instant::now),
        );
        let painter = Arc::new(Mutex::new(Painter::new(
            Renderer::new(config.style, config.spinner),
            Arc::clone(interceptor.capture()),
            interceptor.real_writer(),
            config.columns,
        )));

        // On error the interceptor is dropped here, restoring the output.
        let render_loop =
            RenderLoop::spawn(state.clone(), Arc::clone(&painter), config.tick_interval)?;

        debug!("progress scope opened for {} items", config.total);

        Ok(Self {
            state,
            painter,
            render_loop,
            interceptor: Some(interceptor),
            output: output.clone(),
            join_timeout: config.join_timeout,
        })
    }

    /// Marks one more item as done.
    ///
    /// Never blocks and never fails; calls past the total are ignored.
    pub fn advance(&self) {
        self.state.advance();
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    /// Current render loop state.
    #[must_use]
    pub fn loop_state(&self) -> LoopState {
        self.render_loop.state()
    }

    /// Closes the scope and reports how it went.
    pub fn close(mut self) -> ScopeReport {
        self.exit().unwrap_or_default()
    }

    fn exit(&mut self) -> Option<ScopeReport> {
        let interceptor = self.interceptor.take()?;

        // One budget covers both the drain and the final paint.
        let started = Instant::now();
        let stopped = self.render_loop.shutdown(self.join_timeout);
        let remaining = self.join_timeout.saturating_sub(started.elapsed());

        // Output without a trailing newline is still shown once.
        interceptor.capture().seal();

        let (echoed_lines, final_frame) = match self.painter.try_lock_for(remaining) {
            Some(mut painter) => {
                painter.paint(&self.state);
                painter.cancel();
                (painter.echoed(), painter.last_frame().map(ToOwned::to_owned))
            }
            None => {
                warn!(
                    "progress painter still busy after {:?}, skipping final frame",
                    self.join_timeout
                );
                (0, None)
            }
        };
        self.state.stop();

        interceptor.uninstall();
        if let Err(err) = self.output.write_all(b"\n").and_then(|()| self.output.flush()) {
            debug!("failed to finish progress line: {err}");
        }

        let snapshot = self.state.snapshot();
        debug!(
            "progress scope closed at {}/{} after {:?}",
            snapshot.position(),
            snapshot.total(),
            snapshot.elapsed()
        );

        Some(ScopeReport {
            snapshot,
            echoed_lines,
            final_frame,
            render_thread_abandoned: !stopped,
            loop_state: self.render_loop.state(),
        })
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write as _,
        panic::{self, AssertUnwindSafe},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    use super::open;
    use crate::{
        Error, ScopeBuilder, SharedOutput,
        io::Transcript,
        lines::CLEAR_LINE,
        render_loop::LoopState,
    };

    fn quick(total: u64) -> ScopeBuilder {
        ScopeBuilder::new(total)
            .width(10)
            .columns(|| 80)
            .tick_interval(Duration::from_millis(2))
    }

    /// Full Run
    /// Advancing `total` times ends on the completion glyph and a stopped loop.
    #[test]
    fn test_full_run_reaches_done() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let scope = quick(4).open(&out).unwrap();
        assert!(out.is_captured());
        for _ in 0..4 {
            scope.advance();
        }
        scope.advance(); // saturates

        let report = scope.close();
        assert_eq!(report.snapshot.position(), 4);
        assert!(!report.snapshot.running());
        assert!(!report.render_thread_abandoned);
        assert!(!out.is_captured());

        let text = sink.contents();
        assert!(text.ends_with("] * 4/4 est: 00:00.00\n"), "{text:?}");
        assert_eq!(
            report.final_frame.as_deref(),
            Some("[==========] * 4/4 est: 00:00.00")
        );
    }

    /// Loop State After Exit
    /// The render loop reports Stopped once the scope has closed.
    #[test]
    fn test_loop_stopped_after_exit() {
        let out = SharedOutput::new(Transcript::default());
        let scope = quick(2).open(&out).unwrap();
        assert_ne!(scope.loop_state(), LoopState::Idle);

        scope.advance();
        scope.advance();
        let state = scope.state.clone();
        let report = scope.close();

        assert_eq!(report.loop_state, LoopState::Stopped);
        assert!(!report.render_thread_abandoned);
        assert!(!state.is_running());
    }

    /// Every Line Once
    /// Printed lines show exactly once, in order, however many ticks pass.
    #[test]
    fn test_each_line_echoed_once_in_order() {
        let sink = Transcript::default();
        let mut out = SharedOutput::new(sink.clone());

        let scope = quick(3).open(&out).unwrap();
        for i in 0..3 {
            writeln!(out, "line {i}").unwrap();
            writeln!(out, "dup").unwrap();
            std::thread::sleep(Duration::from_millis(10));
            scope.advance();
        }
        write!(out, "tail without newline").unwrap();
        let report = scope.close();

        let text = sink.contents();
        let echoed: Vec<&str> = text
            .split(CLEAR_LINE)
            .filter_map(|chunk| chunk.strip_suffix('\n'))
            .filter(|chunk| !chunk.starts_with('['))
            .collect();
        assert_eq!(
            echoed,
            ["line 0", "dup", "line 1", "dup", "line 2", "dup", "tail without newline"]
        );
        assert_eq!(report.echoed_lines, 7);
    }

    /// Nested Scope
    /// Opening a second scope on a captured output fails fast.
    #[test]
    fn test_nested_open_is_rejected() {
        let out = SharedOutput::new(Transcript::default());
        let outer = quick(1).open(&out).unwrap();

        let inner = open(&out, 1, "", "=", "-", None, None);
        assert!(matches!(inner, Err(Error::AlreadyActive)));

        drop(outer);
        assert!(!out.is_captured());
        let again = quick(1).open(&out).unwrap();
        drop(again);
    }

    /// Panic Restore
    /// A panic inside the scope still restores the output and ends the line.
    #[test]
    fn test_panic_restores_output() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut printer = out.clone();
            let scope = quick(10).open(&out).unwrap();
            scope.advance();
            writeln!(printer, "about to fail").unwrap();
            panic!("upload failed");
        }));

        assert!(result.is_err());
        assert!(!out.is_captured());

        let mut after = out.clone();
        writeln!(after, "after").unwrap();
        let text = sink.contents();
        assert!(text.contains("about to fail\n"));
        assert!(text.ends_with("\nafter\n"), "{text:?}");
    }

    /// Early Exit
    /// Closing before completion keeps the partial count and never shows the done glyph.
    #[test]
    fn test_early_exit_keeps_partial_progress() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let scope = quick(5).open(&out).unwrap();
        scope.advance();
        scope.advance();
        let report = scope.close();

        assert_eq!(report.snapshot.position(), 2);
        let text = sink.contents();
        assert!(text.contains("[====------]"), "{text:?}");
        assert!(!text.contains(" * "));
    }

    /// Oversized Width
    /// A bar pinned far wider than the terminal is clipped and the scope still closes.
    #[test]
    fn test_huge_pinned_width_closes() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let scope = quick(4).width(usize::MAX).open(&out).unwrap();
            scope.advance();
            thread::sleep(Duration::from_millis(10));
            scope.close()
        }));

        let report = result.expect("closing must not panic");
        assert!(!out.is_captured());
        let frame = report.final_frame.unwrap();
        assert_eq!(frame.chars().count(), 79, "{frame}");
        assert!(frame.starts_with("[===="));
        assert!(sink.contents().ends_with('\n'));
    }

    /// Stuck Render Thread
    /// A painter blocked past the join timeout is abandoned within one timeout.
    #[test]
    fn test_stuck_painter_is_abandoned_once() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let entered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&entered);
        let scope = quick(3)
            .columns(move || {
                flag.store(true, Ordering::Release);
                thread::sleep(Duration::from_millis(600));
                80
            })
            .join_timeout(Duration::from_millis(100))
            .open(&out)
            .unwrap();
        while !entered.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        let report = scope.close();
        let took = started.elapsed();

        assert!(report.render_thread_abandoned);
        assert_eq!(report.loop_state, LoopState::Stopped);
        assert!(report.final_frame.is_none());
        assert!(took < Duration::from_millis(180), "close took {took:?}");
        assert!(!out.is_captured());
        assert_eq!(sink.contents(), "\n");
    }
}
