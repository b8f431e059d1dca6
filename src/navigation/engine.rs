//! Backtracking navigation over dependent value sequences.
//!
//! `advance` and `retreat` share one cursor between the right-to-left search
//! for a position that can still move and the left-to-right replay that
//! refreshes every later argument. When the replay meets an argument with no
//! valid value, the search resumes from that argument, so an empty dependent
//! sequence cascades further left instead of restarting from the last position.

use rand::Rng;

use crate::args::ArgValue;
use crate::error::TemplateResult;
use crate::navigation::{NavigationState, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Where the right-to-left search starts
enum Scan {
    /// Continue searching at this position
    At(usize),
    /// A complete variant was already selected while repairing the state
    Selected,
    /// Nothing is left in this direction
    Exhausted,
}

impl<V: ArgValue> NavigationState<V> {
    /// Move to the lexicographically next valid variant.
    ///
    /// From the unset state this selects the first variant. Returns `false`
    /// and leaves the state unset once the space is exhausted.
    pub fn advance(&mut self) -> TemplateResult<bool> {
        let moved = self.step(Direction::Forward)?;
        if moved && self.excludes_current() {
            log::trace!("Skipping limit vector {:?}", self.indexes);
            return self.step(Direction::Forward);
        }
        Ok(moved)
    }

    /// Move to the lexicographically previous valid variant.
    ///
    /// From the unset state this selects the last variant. Returns `false`
    /// and leaves the state unset once the space is exhausted.
    pub fn retreat(&mut self) -> TemplateResult<bool> {
        let moved = self.step(Direction::Backward)?;
        if moved && self.excludes_current() {
            log::trace!("Skipping limit vector {:?}", self.indexes);
            return self.step(Direction::Backward);
        }
        Ok(moved)
    }

    /// Forget the current position; the next `advance` selects the first variant.
    pub fn reset_to_start(&mut self) {
        self.unset_from(0);
    }

    /// Select the last valid variant. Returns `false` when there is none.
    pub fn reset_to_end(&mut self) -> TemplateResult<bool> {
        self.unset_from(0);
        self.retreat()
    }

    /// Draw an independent random variant within the current limits.
    ///
    /// Each argument's sequence is recomputed as soon as its predecessors are
    /// fixed. With per-argument limits every index is clamped on its own. With
    /// lexicographic limits an index is clamped only until some earlier index
    /// fell strictly below its limit; a draw landing exactly on the limit
    /// vector is replaced by its predecessor. Returns `false` when no valid
    /// draw exists.
    pub fn random_pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> TemplateResult<bool> {
        if self.is_empty() {
            self.empty_selected = true;
            return Ok(true);
        }
        self.unset_from(0);
        let per_arg = self.limit_arg_on_error.is_per_arg();
        let mut below_max = !self.has_limits();

        for index in 0..self.len() {
            self.recompute(index)?;
            let len = self.arg_values[index].len();
            if len == 0 {
                log::trace!("No candidates for `{}`, no valid draw", self.templates.name(index));
                self.unset_from(0);
                return Ok(false);
            }
            let limit = self.arg_limits[index];
            let bound = if per_arg || !below_max {
                limit.map_or(len - 1, |limit| limit.min(len - 1))
            } else {
                len - 1
            };
            let value_index = rng.gen_range(0..=bound);
            if !per_arg && !below_max {
                below_max = limit.map_or(true, |limit| value_index < limit);
            }
            self.select(index, value_index);
        }

        if !per_arg && !below_max {
            log::trace!("Random draw hit the limit vector, stepping back");
            return self.retreat();
        }
        Ok(true)
    }

    /// Materialise every variant in enumeration order.
    ///
    /// The state is left unset afterwards.
    pub fn variants(&mut self) -> TemplateResult<Vec<Variant<V>>> {
        self.reset_to_start();
        let mut variants = Vec::new();
        while self.advance()? {
            if let Some(variant) = self.snapshot() {
                variants.push(variant);
            }
        }
        Ok(variants)
    }

    /// Count the variants reachable by `advance` from the unset state.
    ///
    /// The state is left unset afterwards.
    pub fn count_variants(&mut self) -> TemplateResult<u64> {
        self.reset_to_start();
        let mut count = 0;
        while self.advance()? {
            count += 1;
        }
        Ok(count)
    }

    fn step(&mut self, direction: Direction) -> TemplateResult<bool> {
        if self.is_empty() {
            self.empty_selected = !self.empty_selected;
            return Ok(self.empty_selected);
        }

        let mut cursor = match self.scan_start(direction)? {
            Scan::At(position) => position,
            Scan::Selected => return Ok(true),
            Scan::Exhausted => {
                self.unset_from(0);
                return Ok(false);
            }
        };

        loop {
            let max = self.effective_max(cursor);
            let candidate = match (direction, self.indexes[cursor]) {
                (Direction::Forward, None) => Some(0),
                (Direction::Forward, Some(selected)) => Some(selected + 1),
                (Direction::Backward, None) => max.checked_sub(1),
                (Direction::Backward, Some(selected)) if selected >= max => max.checked_sub(1),
                (Direction::Backward, Some(selected)) => selected.checked_sub(1),
            };

            match candidate {
                Some(value_index) if value_index < max => {
                    self.select(cursor, value_index);
                    match self.fill_from(cursor + 1, direction)? {
                        None => return Ok(true),
                        // shared cursor: resume the search at the stalled argument
                        Some(stalled) => cursor = stalled,
                    }
                }
                _ => {
                    self.unset_from(cursor);
                    if cursor == 0 {
                        return Ok(false);
                    }
                    cursor -= 1;
                }
            }
        }
    }

    /// Decide where the right-to-left search begins.
    ///
    /// An unset suffix starts the search at its first argument with a fresh
    /// sequence. Otherwise the selected vector is checked against limits that
    /// may have tightened since it was selected: moving forward skips past the
    /// leftmost offending argument, moving backward clamps it to its maximum
    /// and resets every later argument to its own maximum under the clamped
    /// prefix.
    fn scan_start(&mut self, direction: Direction) -> TemplateResult<Scan> {
        let len = self.len();
        if let Some(unset) = self.indexes.iter().position(Option::is_none) {
            self.unset_from(unset);
            self.recompute(unset)?;
            return Ok(Scan::At(unset));
        }

        let violation = (0..len).find(|&index| {
            self.indexes[index].map_or(false, |selected| selected >= self.effective_max(index))
        });
        let Some(position) = violation else {
            return Ok(Scan::At(len - 1));
        };
        log::debug!(
            "`{}` index {:?} exceeds its limit",
            self.templates.name(position),
            self.indexes[position]
        );

        let clamped = match direction {
            Direction::Forward => None,
            Direction::Backward => self.effective_max(position).checked_sub(1),
        };
        match clamped {
            Some(value_index) => {
                self.select(position, value_index);
                match self.fill_from(position + 1, direction)? {
                    None => Ok(Scan::Selected),
                    Some(stalled) => Ok(Scan::At(stalled)),
                }
            }
            None => {
                self.unset_from(position);
                Ok(match position.checked_sub(1) {
                    Some(previous) => Scan::At(previous),
                    None => Scan::Exhausted,
                })
            }
        }
    }

    /// Recompute and select arguments `from..`: the first value moving forward,
    /// the last valid value moving backward.
    ///
    /// Returns the first argument without any valid value, leaving it and
    /// everything after it unset, or `None` when the vector is complete.
    fn fill_from(&mut self, from: usize, direction: Direction) -> TemplateResult<Option<usize>> {
        for index in from..self.len() {
            self.recompute(index)?;
            let max = self.effective_max(index);
            if max == 0 {
                self.unset_from(index);
                return Ok(Some(index));
            }
            let value_index = match direction {
                Direction::Forward => 0,
                Direction::Backward => max - 1,
            };
            self.select(index, value_index);
        }
        Ok(None)
    }
}
