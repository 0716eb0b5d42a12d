//! # `scoped_progress`
//!
//! A single-line terminal progress bar that keeps working while the program
//! it tracks keeps printing.
//!
//! Open a scope on a [`SharedOutput`] and everything written through that
//! handle is captured instead of hitting the terminal. A background thread
//! redraws the bar at a fixed interval and echoes each captured line above it
//! exactly once, so diagnostics and the bar never overwrite each other. It is
//! designed to be:
//!
//! * **Scoped**: Output capture and the render thread live exactly as long as
//!   the [`ScopeHandle`]; dropping it (even during a panic) restores the output.
//! * **Non-blocking**: [`ScopeHandle::advance`] is a single atomic update. Only
//!   closing the scope waits, and only for a bounded time.
//! * **Resize-tolerant**: The bar is re-measured every frame and clipped rather
//!   than wrapped when the terminal gets too narrow.
//!
//! ## Modules
//!
//! * [`builder`]: Fluent interface for configuring a scope.
//! * [`io`]: The capturable output handle and its interceptor.
//! * [`iter`]: Extension trait driving a scope from an iterator.
//! * [`lines`]: Echoing captured lines above the bar.
//! * [`progress`]: Shared counters and snapshots.
//! * [`render`]: Frame layout, spinner and terminal width.
//! * [`render_loop`]: The background render thread.
//! * [`scope`]: Opening and closing scopes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod builder;
pub mod error;
pub mod io;
pub mod iter;
pub mod lines;
pub mod progress;
pub mod render;
pub mod render_loop;
pub mod scope;

pub use builder::ScopeBuilder;
pub use error::{Error, Result};
pub use io::SharedOutput;
pub use iter::{ScopeIter, ScopeIteratorExt};
pub use progress::{ProgressSnapshot, ProgressState};
pub use render::{Renderer, SpinnerSequence, Style};
pub use render_loop::LoopState;
pub use scope::{ScopeHandle, ScopeReport, open};
