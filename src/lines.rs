//! Echoing captured output above the bar.
//!
//! [`LineDiffer`] keeps a cursor into a [`CaptureBuffer`]: every line before
//! the cursor has already been echoed. Each pass emits the lines between the
//! cursor and the end of the buffer and moves the cursor, so the cost per
//! pass is proportional to the number of new lines only.
//!
//! Lines are keyed by position, not content: printing the same message twice
//! echoes it twice.

use std::io::{self, Write};

use crate::io::CaptureBuffer;

/// Carriage return followed by "erase to end of line".
pub const CLEAR_LINE: &str = "\r\x1b[K";

/// Cursor over the captured line log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineDiffer {
    cursor: usize,
    echoed: usize,
}

impl LineDiffer {
    /// A differ that has echoed nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cursor: 0,
            echoed: 0,
        }
    }

    /// Index of the first line not yet consumed.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of non-empty lines written so far.
    #[must_use]
    pub const fn echoed(&self) -> usize {
        self.echoed
    }

    /// Writes every complete, not yet echoed, non-empty line to `out`.
    ///
    /// Each line is prefixed with [`CLEAR_LINE`] so it replaces the frame
    /// currently on screen. Returns the number of lines written; zero means
    /// `out` was not touched.
    ///
    /// # Errors
    ///
    /// Propagates write errors. The cursor only moves past lines that were
    /// fully written.
    pub fn echo_new(&mut self, buffer: &CaptureBuffer, out: &mut impl Write) -> io::Result<usize> {
        let fresh = buffer.lines_from(self.cursor);
        let mut written = 0;

        for line in &fresh {
            if !line.is_empty() {
                writeln!(out, "{CLEAR_LINE}{line}")?;
                written += 1;
                self.echoed += 1;
            }
            self.cursor += 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::{CLEAR_LINE, LineDiffer};
    use crate::io::CaptureBuffer;

    /// Idempotent Echo
    /// Re-running with no new lines writes nothing.
    #[test]
    fn test_echo_is_idempotent() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"A\nB\n");

        let mut differ = LineDiffer::new();
        let mut out = Vec::new();

        assert_eq!(differ.echo_new(&buffer, &mut out).unwrap(), 2);
        assert_eq!(differ.echo_new(&buffer, &mut out).unwrap(), 0);
        assert_eq!(differ.echo_new(&buffer, &mut out).unwrap(), 0);

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{CLEAR_LINE}A\n{CLEAR_LINE}B\n")
        );
        assert_eq!(differ.cursor(), 2);
    }

    /// Positional Dedup
    /// Identical consecutive messages are both shown.
    #[test]
    fn test_duplicate_content_is_echoed_twice() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"same\nsame\n");

        let mut differ = LineDiffer::new();
        let mut out = Vec::new();
        differ.echo_new(&buffer, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap().matches("same").count(), 2);
        assert_eq!(differ.echoed(), 2);
    }

    /// Partial & Empty Lines
    /// The growing tail waits for its newline; blank lines are skipped.
    #[test]
    fn test_partial_and_empty_lines() {
        let buffer = CaptureBuffer::new();
        buffer.append(b"\n\nChecking server... ");

        let mut differ = LineDiffer::new();
        let mut out = Vec::new();
        assert_eq!(differ.echo_new(&buffer, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(differ.cursor(), 2, "blank lines still consume an index");

        buffer.append(b"OK!\n");
        assert_eq!(differ.echo_new(&buffer, &mut out).unwrap(), 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{CLEAR_LINE}Checking server... OK!\n")
        );
    }
}
