//! Output interception.
//!
//! Host code prints through a [`SharedOutput`] instead of writing to stdout
//! directly. While an [`OutputInterceptor`] is installed on that handle, every
//! write lands in a [`CaptureBuffer`] and the real target is reachable only
//! through the interceptor's [`RealWriter`]. Dropping the interceptor restores
//! the real target, so release happens on every exit path, panics included.
//!
//! # Mechanics
//!
//! The handle is an `Arc<Mutex<..>>` around the real target plus the
//! currently installed capture buffer. A foreground write and a render-thread
//! write both take the same lock, so bytes from the two never interleave
//! mid-write. The lock is a [`parking_lot::Mutex`], which does not poison:
//! a panic on the foreground thread cannot prevent the restore.

use std::{
    fmt,
    io::{self, Write},
    mem,
    sync::Arc,
};

use compact_str::CompactString;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A cloneable output handle whose target can be temporarily captured.
///
/// This is the injected replacement for a process-wide stdout: the program
/// creates one (usually via [`SharedOutput::stdout`]), prints through it, and
/// hands it to [`open`](crate::open) when a progress scope starts.
#[derive(Clone)]
pub struct SharedOutput {
    inner: Arc<Mutex<Target>>,
}

struct Target {
    real: Box<dyn Write + Send>,
    capture: Option<Arc<CaptureBuffer>>,
}

impl fmt::Debug for SharedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedOutput")
            .field("captured", &self.is_captured())
            .finish()
    }
}

impl SharedOutput {
    /// Wraps an arbitrary writer as the real output target.
    pub fn new(real: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Target {
                real: Box::new(real),
                capture: None,
            })),
        }
    }

    /// A handle writing to the process's standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Whether an interceptor is currently installed.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        self.inner.lock().capture.is_some()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let target = &mut *guard;
        match &target.capture {
            Some(capture) => {
                capture.append(buf);
                Ok(buf.len())
            }
            None => target.real.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut target = self.inner.lock();
        if target.capture.is_some() {
            Ok(())
        } else {
            target.real.flush()
        }
    }
}

/// Append-only log of captured lines.
///
/// Complete lines get consecutive positional indices; bytes after the last
/// newline are kept as a partial line until more arrive.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    inner: Mutex<Lines>,
}

#[derive(Debug, Default)]
struct Lines {
    complete: Vec<CompactString>,
    partial: Vec<u8>,
}

impl Lines {
    fn push_partial(&mut self) {
        let mut raw = mem::take(&mut self.partial);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        self.complete
            .push(CompactString::from(String::from_utf8_lossy(&raw)));
    }
}

impl CaptureBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes, splitting them into lines.
    pub fn append(&self, buf: &[u8]) {
        let mut lines = self.inner.lock();
        for chunk in buf.split_inclusive(|b| *b == b'\n') {
            match chunk.strip_suffix(b"\n") {
                Some(body) => {
                    lines.partial.extend_from_slice(body);
                    lines.push_partial();
                }
                None => lines.partial.extend_from_slice(chunk),
            }
        }
    }

    /// Turns a trailing partial line, if any, into a complete one.
    pub fn seal(&self) {
        let mut lines = self.inner.lock();
        if !lines.partial.is_empty() {
            lines.push_partial();
        }
    }

    /// Number of complete lines captured so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().complete.len()
    }

    /// Returns `true` if no complete line has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Complete lines with index `>= from`, in order.
    #[must_use]
    pub fn lines_from(&self, from: usize) -> Vec<CompactString> {
        let lines = self.inner.lock();
        lines.complete.get(from..).map(<[_]>::to_vec).unwrap_or_default()
    }

    /// The still-growing trailing line.
    #[must_use]
    pub fn partial(&self) -> CompactString {
        CompactString::from(String::from_utf8_lossy(&self.inner.lock().partial))
    }
}

/// Scoped capture of a [`SharedOutput`].
///
/// Created by [`OutputInterceptor::install`]; the real target is restored when
/// this value is dropped.
pub struct OutputInterceptor {
    output: SharedOutput,
    capture: Arc<CaptureBuffer>,
}

impl fmt::Debug for OutputInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputInterceptor")
            .field("captured_lines", &self.capture.len())
            .finish()
    }
}

impl OutputInterceptor {
    /// Swaps the handle's target for a fresh capture buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyActive`] if the handle is already captured.
    pub fn install(output: &SharedOutput) -> Result<Self> {
        let capture = Arc::new(CaptureBuffer::new());

        let mut target = output.inner.lock();
        if target.capture.is_some() {
            return Err(Error::AlreadyActive);
        }
        target.capture = Some(Arc::clone(&capture));
        drop(target);

        Ok(Self {
            output: output.clone(),
            capture,
        })
    }

    /// The buffer receiving captured writes.
    #[must_use]
    pub fn capture(&self) -> &Arc<CaptureBuffer> {
        &self.capture
    }

    /// A handle onto the real target, valid while this interceptor is installed.
    #[must_use]
    pub fn real_writer(&self) -> RealWriter {
        RealWriter {
            output: self.output.clone(),
            capture: Arc::clone(&self.capture),
        }
    }

    /// Restores the real target. Equivalent to dropping the interceptor.
    pub fn uninstall(self) {
        drop(self);
    }
}

impl Drop for OutputInterceptor {
    fn drop(&mut self) {
        let mut target = self.output.inner.lock();
        let ours = target
            .capture
            .as_ref()
            .is_some_and(|installed| Arc::ptr_eq(installed, &self.capture));
        if ours {
            target.capture = None;
        }
    }
}

/// Write access to the real target behind an installed interceptor.
///
/// Writes made after the owning interceptor was released are silently
/// discarded, so a render thread that outlives its scope cannot scribble over
/// the restored output.
#[derive(Clone)]
pub struct RealWriter {
    output: SharedOutput,
    capture: Arc<CaptureBuffer>,
}

impl fmt::Debug for RealWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealWriter")
            .field("live", &self.is_live())
            .finish()
    }
}

impl RealWriter {
    /// Whether the owning interceptor is still installed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.output
            .inner
            .lock()
            .capture
            .as_ref()
            .is_some_and(|installed| Arc::ptr_eq(installed, &self.capture))
    }

    /// Writes and flushes `bytes` to the real target in one locked section.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the real target.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut target = self.output.inner.lock();
        let live = target
            .capture
            .as_ref()
            .is_some_and(|installed| Arc::ptr_eq(installed, &self.capture));
        if !live {
            return Ok(());
        }
        target.real.write_all(bytes)?;
        target.real.flush()
    }
}

/// In-memory sink used by tests to inspect everything sent to the real target.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Transcript(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Transcript {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[cfg(test)]
impl Write for Transcript {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{CaptureBuffer, OutputInterceptor, SharedOutput, Transcript};
    use crate::Error;

    /// Line Splitting
    /// Complete lines are indexed in order; the tail stays partial.
    #[test]
    fn test_capture_splits_lines() {
        let buf = CaptureBuffer::new();
        buf.append(b"no newline yet");
        assert!(buf.is_empty(), "a partial line is not a line");
        buf.seal();
        assert!(!buf.is_empty());
        assert_eq!(buf.lines_from(0), vec!["no newline yet"]);

        let buf = CaptureBuffer::new();
        buf.append(b"one\ntw");
        buf.append(b"o\n\nthree");

        assert_eq!(buf.lines_from(0), vec!["one", "two", ""]);
        assert_eq!(buf.lines_from(2), vec![""]);
        assert!(buf.lines_from(10).is_empty());
        assert_eq!(buf.partial(), "three");

        buf.seal();
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.partial(), "");
    }

    /// Redirect & Restore
    /// Writes go to the capture while installed and to the real target after.
    #[test]
    fn test_install_and_restore() {
        let sink = Transcript::default();
        let mut out = SharedOutput::new(sink.clone());

        writeln!(out, "before").unwrap();
        let guard = OutputInterceptor::install(&out).unwrap();
        writeln!(out, "during").unwrap();
        assert!(out.is_captured());
        assert_eq!(guard.capture().lines_from(0), vec!["during"]);

        guard.real_writer().write_all(b"frame").unwrap();
        guard.uninstall();

        writeln!(out, "after").unwrap();
        assert!(!out.is_captured());
        assert_eq!(sink.contents(), "before\nframeafter\n");
    }

    /// Double Install
    /// A second interceptor on the same handle fails fast and leaves the first intact.
    #[test]
    fn test_double_install_is_rejected() {
        let out = SharedOutput::new(Transcript::default());
        let first = OutputInterceptor::install(&out).unwrap();

        let second = OutputInterceptor::install(&out);
        assert!(matches!(second, Err(Error::AlreadyActive)));
        assert!(out.is_captured(), "failed install must not release the first");

        drop(first);
        assert!(!out.is_captured());
    }

    /// Stale Writer
    /// A real writer outliving its interceptor is a no-op.
    #[test]
    fn test_stale_real_writer_discards() {
        let sink = Transcript::default();
        let out = SharedOutput::new(sink.clone());

        let guard = OutputInterceptor::install(&out).unwrap();
        let writer = guard.real_writer();
        assert!(writer.is_live());
        drop(guard);

        assert!(!writer.is_live());
        writer.write_all(b"late frame").unwrap();
        assert_eq!(sink.contents(), "");
    }
}
