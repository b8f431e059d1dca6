//! Navigation state owned by one enumeration session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::args::{ArgValue, Args};
use crate::error::{TemplateError, TemplateResult};
use crate::navigation::Variant;
use crate::template::Templates;

/// Custom value equality used when matching replayed values and extra values
pub type EqualsFn<V> = Arc<dyn Fn(&V, &V) -> bool + Send + Sync>;

/// Predicate choosing which arguments get an individual limit on error
pub type LimitPredicate = Arc<dyn Fn(&LimitArgContext<'_>) -> bool + Send + Sync>;

/// What a [`LimitPredicate`] gets to see about one argument of a failing variant
#[derive(Debug, Clone, Copy)]
pub struct LimitArgContext<'a> {
    pub name: &'a str,
    /// Declaration position of the argument
    pub position: usize,
    /// Index of the failing value within the argument's sequence
    pub value_index: usize,
}

/// How a failing variant narrows the remaining search space
#[derive(Clone, Default)]
pub enum LimitArgOnError {
    /// Limits form a single lexicographic bound on the whole index vector
    #[default]
    Off,
    /// Every argument is bounded on its own by the failing index
    All,
    /// Only arguments accepted by the predicate are bounded on their own
    Only(LimitPredicate),
}

impl LimitArgOnError {
    /// Whether limits are interpreted per argument rather than lexicographically
    pub fn is_per_arg(&self) -> bool {
        !matches!(self, LimitArgOnError::Off)
    }
}

impl fmt::Debug for LimitArgOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitArgOnError::Off => f.write_str("Off"),
            LimitArgOnError::All => f.write_str("All"),
            LimitArgOnError::Only(_) => f.write_str("Only(<fn>)"),
        }
    }
}

/// Mutable enumeration state: current position, cached value sequences and limits.
///
/// Invariants maintained by every operation:
/// - every set index is below the effective maximum of its argument;
/// - the cached sequence of argument `i` was computed from the current values
///   of arguments `0..i`;
/// - `args` holds exactly the arguments whose indexes form the valid prefix.
pub struct NavigationState<V> {
    pub(super) templates: Templates<V>,
    pub(super) indexes: Vec<Option<usize>>,
    pub(super) arg_values: Vec<Vec<V>>,
    pub(super) arg_limits: Vec<Option<usize>>,
    pub(super) extra_values: Vec<Option<Vec<V>>>,
    pub(super) args: Args<V>,
    pub(super) limit_arg_on_error: LimitArgOnError,
    pub(super) include_error_variant: bool,
    pub(super) equals: Option<EqualsFn<V>>,
    /// Whether the single empty variant of a zero-argument template set is selected
    pub(super) empty_selected: bool,
}

impl<V: ArgValue> NavigationState<V> {
    /// Create an unset state over the given templates
    pub fn new(templates: Templates<V>) -> Self {
        let len = templates.len();
        Self {
            templates,
            indexes: vec![None; len],
            arg_values: vec![Vec::new(); len],
            arg_limits: vec![None; len],
            extra_values: vec![None; len],
            args: Args::with_capacity(len),
            limit_arg_on_error: LimitArgOnError::Off,
            include_error_variant: false,
            equals: None,
            empty_selected: false,
        }
    }

    pub fn with_limit_arg_on_error(mut self, policy: LimitArgOnError) -> Self {
        self.limit_arg_on_error = policy;
        self
    }

    pub fn with_include_error_variant(mut self, include: bool) -> Self {
        self.include_error_variant = include;
        self
    }

    pub fn with_equals(mut self, equals: EqualsFn<V>) -> Self {
        self.equals = Some(equals);
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn templates(&self) -> &Templates<V> {
        &self.templates
    }

    /// Raw index vector; `None` marks an argument before its first value
    pub fn indexes(&self) -> &[Option<usize>] {
        &self.indexes
    }

    /// Assigned prefix of argument values
    pub fn args(&self) -> &Args<V> {
        &self.args
    }

    /// Cached candidate sequence of an argument (valid for the assigned prefix only)
    pub fn arg_values(&self, index: usize) -> &[V] {
        &self.arg_values[index]
    }

    pub fn arg_limits(&self) -> &[Option<usize>] {
        &self.arg_limits
    }

    /// Set or clear the inclusive index limit of one argument
    pub fn set_arg_limit(&mut self, index: usize, limit: Option<usize>) {
        log::debug!(
            "Setting limit of `{}` to {:?}",
            self.templates.name(index),
            limit
        );
        self.arg_limits[index] = limit;
    }

    pub fn clear_limits(&mut self) {
        self.arg_limits.iter_mut().for_each(|limit| *limit = None);
    }

    pub fn limit_arg_on_error(&self) -> &LimitArgOnError {
        &self.limit_arg_on_error
    }

    pub fn has_limits(&self) -> bool {
        self.arg_limits.iter().any(Option::is_some)
    }

    /// Whether the state currently selects a complete variant
    pub fn is_positioned(&self) -> bool {
        if self.is_empty() {
            self.empty_selected
        } else {
            self.indexes.iter().all(Option::is_some)
        }
    }

    /// Whether no argument has a selected value
    pub fn is_unset(&self) -> bool {
        if self.is_empty() {
            !self.empty_selected
        } else {
            self.indexes.iter().all(Option::is_none)
        }
    }

    /// The selected index vector, when a complete variant is selected
    pub fn current_indexes(&self) -> Option<Vec<usize>> {
        self.indexes.iter().copied().collect()
    }

    /// Snapshot of the selected variant
    pub fn snapshot(&self) -> Option<Variant<V>> {
        if !self.is_positioned() {
            return None;
        }
        Some(Variant {
            args: self.args.clone(),
            indexes: self.current_indexes().unwrap_or_default(),
        })
    }

    /// Inclusive limit in force for argument `index` given the current prefix.
    ///
    /// Per-argument limits always apply. Lexicographic limits apply to an
    /// argument only while every earlier argument sits exactly on its limit.
    pub(super) fn limit_at(&self, index: usize) -> Option<usize> {
        if self.limit_arg_on_error.is_per_arg() {
            return self.arg_limits[index];
        }
        let prefix_on_limit = (0..index).all(|j| match (self.arg_limits[j], self.indexes[j]) {
            (Some(limit), Some(selected)) => selected == limit,
            _ => false,
        });
        if prefix_on_limit {
            self.arg_limits[index]
        } else {
            None
        }
    }

    /// Exclusive upper bound for the index of argument `index`
    pub(super) fn effective_max(&self, index: usize) -> usize {
        let len = self.arg_values[index].len();
        match self.limit_at(index) {
            Some(limit) => len.min(limit.saturating_add(1)),
            None => len,
        }
    }

    /// Whether the selected vector is exactly the limit vector
    pub(super) fn on_limit_vector(&self) -> bool {
        !self.is_empty()
            && self
                .arg_limits
                .iter()
                .zip(&self.indexes)
                .all(|(limit, selected)| limit.is_some() && limit == selected)
    }

    /// Whether sequential navigation must skip the selected vector
    pub(super) fn excludes_current(&self) -> bool {
        !self.include_error_variant && self.on_limit_vector()
    }

    pub(super) fn values_equal(&self, a: &V, b: &V) -> bool {
        match &self.equals {
            Some(equals) => equals(a, b),
            None => a == b,
        }
    }

    /// Recompute the candidate sequence of argument `index` from the assigned prefix
    pub(super) fn recompute(&mut self, index: usize) -> TemplateResult<()> {
        self.args.truncate(index);
        let mut values = self.templates.evaluate(index, &self.args)?;
        if let Some(extra) = &self.extra_values[index] {
            for value in extra {
                if !values.iter().any(|candidate| self.values_equal(candidate, value)) {
                    values.push(value.clone());
                }
            }
        }
        log::trace!(
            "Recomputed `{}`: {} candidate values",
            self.templates.name(index),
            values.len()
        );
        self.arg_values[index] = values;
        Ok(())
    }

    /// Select value `value_index` for argument `index`, dropping every later assignment
    pub(super) fn select(&mut self, index: usize, value_index: usize) {
        self.indexes[index] = Some(value_index);
        self.args.truncate(index);
        let name = self.templates.shared_name(index);
        self.args.push(name, self.arg_values[index][value_index].clone());
    }

    /// Mark arguments `from..` as unset
    pub(super) fn unset_from(&mut self, from: usize) {
        for selected in &mut self.indexes[from..] {
            *selected = None;
        }
        self.args.truncate(from);
        if from == 0 {
            self.empty_selected = false;
        }
    }

    /// Tighten the limits from the index vector of a failing variant.
    ///
    /// Returns `false` when the vector lies outside the current limits and was
    /// ignored, so limits never widen.
    pub fn apply_error_limits(&mut self, indexes: &[usize]) -> bool {
        if indexes.len() != self.len() || !self.admits(indexes) {
            log::debug!("Ignoring error limits {:?} outside current limits", indexes);
            return false;
        }
        match self.limit_arg_on_error.clone() {
            LimitArgOnError::Off => {
                for (limit, &index) in self.arg_limits.iter_mut().zip(indexes) {
                    *limit = Some(index);
                }
            }
            LimitArgOnError::All => {
                for (limit, &index) in self.arg_limits.iter_mut().zip(indexes) {
                    *limit = Some(limit.map_or(index, |current| current.min(index)));
                }
            }
            LimitArgOnError::Only(predicate) => {
                for (position, &value_index) in indexes.iter().enumerate() {
                    let context = LimitArgContext {
                        name: self.templates.name(position),
                        position,
                        value_index,
                    };
                    if predicate(&context) {
                        let limit = &mut self.arg_limits[position];
                        *limit = Some(limit.map_or(value_index, |current| current.min(value_index)));
                    }
                }
            }
        }
        log::debug!("Applied error limits, now {:?}", self.arg_limits);
        true
    }

    /// Whether an index vector lies inside the current limits
    pub fn admits(&self, indexes: &[usize]) -> bool {
        if self.limit_arg_on_error.is_per_arg() {
            return self
                .arg_limits
                .iter()
                .zip(indexes)
                .all(|(limit, &index)| limit.map_or(true, |limit| index <= limit));
        }
        for (limit, &index) in self.arg_limits.iter().zip(indexes) {
            match limit {
                None => return true,
                Some(limit) if index < *limit => return true,
                Some(limit) if index > *limit => return false,
                Some(_) => {}
            }
        }
        true
    }

    /// Position the state on a saved variant given by name.
    ///
    /// Values missing from an argument's computed sequence are appended to its
    /// extra values so that the variant stays reachable. Limits are not
    /// consulted. On error the state is left unset.
    pub fn position_at(&mut self, values: &HashMap<String, V>) -> TemplateResult<Vec<usize>> {
        self.unset_from(0);
        let result = self.position_at_inner(values);
        if result.is_err() {
            self.unset_from(0);
        }
        result
    }

    fn position_at_inner(&mut self, values: &HashMap<String, V>) -> TemplateResult<Vec<usize>> {
        if self.is_empty() {
            self.empty_selected = true;
            return Ok(Vec::new());
        }
        for index in 0..self.len() {
            let name = self.templates.name(index).to_string();
            let value = values
                .get(&name)
                .ok_or_else(|| TemplateError::MissingArgument { name: name.clone() })?;
            self.recompute(index)?;
            let value_index = match self.find_value(index, value) {
                Some(found) => found,
                None => {
                    log::debug!("Adding extra value {:?} for `{}`", value, name);
                    self.extra_values[index]
                        .get_or_insert_with(Vec::new)
                        .push(value.clone());
                    self.recompute(index)?;
                    self.find_value(index, value)
                        .unwrap_or(self.arg_values[index].len() - 1)
                }
            };
            self.select(index, value_index);
        }
        Ok(self.current_indexes().unwrap_or_default())
    }

    fn find_value(&self, index: usize, value: &V) -> Option<usize> {
        self.arg_values[index]
            .iter()
            .position(|candidate| self.values_equal(candidate, value))
    }

    /// Extra values registered for an argument
    pub fn extra_values(&self, index: usize) -> Option<&[V]> {
        self.extra_values[index].as_deref()
    }
}

impl<V: fmt::Debug> fmt::Debug for NavigationState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationState")
            .field("indexes", &self.indexes)
            .field("arg_limits", &self.arg_limits)
            .field("args", &self.args)
            .field("limit_arg_on_error", &self.limit_arg_on_error)
            .field("include_error_variant", &self.include_error_variant)
            .finish()
    }
}
