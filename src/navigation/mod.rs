//! Variant navigation
//!
//! This module implements the backtracking state machine that walks the
//! cartesian product of argument templates:
//! - `state`: the mutable per-session record (index vector, cached value
//!   sequences, limits, extra values, assigned prefix)
//! - `engine`: `advance`, `retreat`, `random_pick` and the reset operations
//!
//! Index vectors are compared lexicographically in template declaration order.

mod engine;
mod state;

pub use state::{EqualsFn, LimitArgContext, LimitArgOnError, LimitPredicate, NavigationState};

use crate::args::Args;

/// Snapshot of one fully assigned variant
#[derive(Debug, Clone, PartialEq)]
pub struct Variant<V> {
    /// Assigned argument values in declaration order
    pub args: Args<V>,
    /// Selected index per argument
    pub indexes: Vec<usize>,
}
