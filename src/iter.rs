//! Iterator adapters that drive a progress scope.
//!
//! [`ScopeIteratorExt`] wraps any [`ExactSizeIterator`] in a [`ScopeIter`]
//! whose total is the iterator's length. An item counts as done when the
//! *next* one is requested, i.e. after the loop body for it has run, so the
//! bar never runs ahead of the work. Exhausting the iterator closes the scope.
//!
//! # Example
//!
//! ```ignore
//! use scoped_progress::{ScopeIteratorExt, SharedOutput};
//!
//! let mut out = SharedOutput::stdout();
//! for file in files.iter().progress_scope(&out)? {
//!     writeln!(out, "uploaded {file}")?;
//! }
//! ```

use crate::{
    builder::ScopeBuilder,
    error::Result,
    io::SharedOutput,
    scope::{ScopeHandle, ScopeReport},
};

/// An iterator adapter that advances a scope once per finished item.
#[derive(Debug)]
pub struct ScopeIter<I> {
    iter: I,
    scope: Option<ScopeHandle>,
    pending: bool,
    report: Option<ScopeReport>,
}

impl<I> ScopeIter<I> {
    /// Wraps `iter`, reporting progress on an already opened `scope`.
    pub const fn new(iter: I, scope: ScopeHandle) -> Self {
        Self {
            iter,
            scope: Some(scope),
            pending: false,
            report: None,
        }
    }

    /// The live scope, until the iterator is exhausted.
    #[must_use]
    pub const fn scope(&self) -> Option<&ScopeHandle> {
        self.scope.as_ref()
    }

    /// The closing report, once the iterator is exhausted.
    #[must_use]
    pub const fn report(&self) -> Option<&ScopeReport> {
        self.report.as_ref()
    }
}

impl<I: Iterator> Iterator for ScopeIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending {
            if let Some(scope) = &self.scope {
                scope.advance();
            }
            self.pending = false;
        }

        let item = self.iter.next();
        if item.is_some() {
            self.pending = true;
        } else if let Some(scope) = self.scope.take() {
            self.report = Some(scope.close());
        }

        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Extension trait to track a loop over any exact-size iterator.
pub trait ScopeIteratorExt: Sized {
    /// Opens a default-styled scope on `output` and wraps the iterator.
    ///
    /// # Errors
    ///
    /// Fails like [`open`](crate::open).
    fn progress_scope(self, output: &SharedOutput) -> Result<ScopeIter<Self>>;

    /// Opens a scope configured by `builder`, with the total taken from the iterator.
    ///
    /// # Errors
    ///
    /// Fails like [`open`](crate::open).
    fn progress_scope_with(
        self,
        output: &SharedOutput,
        builder: ScopeBuilder,
    ) -> Result<ScopeIter<Self>>;
}

impl<I: ExactSizeIterator> ScopeIteratorExt for I {
    fn progress_scope(self, output: &SharedOutput) -> Result<ScopeIter<Self>> {
        self.progress_scope_with(output, ScopeBuilder::new(0u64))
    }

    fn progress_scope_with(
        self,
        output: &SharedOutput,
        builder: ScopeBuilder,
    ) -> Result<ScopeIter<Self>> {
        let scope = builder.total(self.len() as u64).open(output)?;
        Ok(ScopeIter::new(self, scope))
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, time::Duration};

    use super::ScopeIteratorExt as _;
    use crate::{ScopeBuilder, SharedOutput, io::Transcript};

    /// Iterator Integration
    /// The total comes from the length and exhaustion closes the scope.
    #[test]
    fn test_iterator_drives_scope() {
        let sink = Transcript::default();
        let mut out = SharedOutput::new(sink.clone());
        let builder = ScopeBuilder::new(0u64)
            .title("files ")
            .width(6)
            .columns(|| 80)
            .tick_interval(Duration::from_millis(2));

        let data = ["a", "b", "c"];
        let mut iter = data.iter().progress_scope_with(&out, builder).unwrap();
        assert_eq!(iter.scope().unwrap().snapshot().total(), 3);

        let first = iter.next().unwrap();
        writeln!(out, "got {first}").unwrap();
        assert_eq!(
            iter.scope().unwrap().snapshot().position(),
            0,
            "an item is not done while its body runs"
        );

        assert!(iter.next().is_some());
        assert_eq!(iter.scope().unwrap().snapshot().position(), 1);

        let rest: Vec<_> = iter.by_ref().collect();
        assert_eq!(rest, [&"c"]);
        assert!(iter.scope().is_none());
        assert!(!out.is_captured());

        let report = iter.report().unwrap();
        assert_eq!(report.snapshot.position(), 3);
        assert_eq!(report.echoed_lines, 1);
        assert!(sink.contents().contains("files [======] * 3/3"));
    }

    /// Early Break
    /// Dropping the adapter mid-loop still restores the output.
    #[test]
    fn test_break_restores_output() {
        let out = SharedOutput::new(Transcript::default());
        let builder = ScopeBuilder::new(0u64).columns(|| 80);

        for (i, _) in (0..10).progress_scope_with(&out, builder).unwrap().enumerate() {
            if i == 2 {
                break;
            }
        }
        assert!(!out.is_captured());
    }
}
