//! Best-error search over a materialised variant list.
//!
//! The list is cut into contiguous groups, each with its own cursor. Every
//! cycle visits each active group once, in a prime-stepped rotation, and runs
//! the test at that group's cursor. A group leaves the active set when it runs
//! out of variants or when its test fails; a failure also retires every
//! higher-numbered group, since those only cover later variants.
//!
//! Because the rotation spreads visits across the whole list, an interrupted
//! search has sampled the space evenly rather than only its front.

use crate::abort::AbortToken;

/// A failing variant found by the search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFailure<E> {
    /// Position in the searched list
    pub index: usize,
    pub error: E,
}

/// Result of a search run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome<E> {
    /// Earliest failing variant, if any group failed
    pub best: Option<SearchFailure<E>>,
    /// Tests executed
    pub iterations: u64,
    /// The abort token fired before the search completed
    pub interrupted: bool,
}

#[derive(Debug)]
struct Group {
    start: usize,
    end: usize,
    cursor: usize,
}

/// Group-partitioned earliest-failure search
#[derive(Debug, Clone, Default)]
pub struct ErrorSearch {
    group_size: usize,
    abort: Option<AbortToken>,
}

impl ErrorSearch {
    /// A group size of zero is treated as one
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
            abort: None,
        }
    }

    pub fn with_abort(mut self, abort: AbortToken) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Search `variants` for the lowest index at which `test` fails.
    ///
    /// `test` receives each variant with its index in the list.
    pub fn run<T, E, F>(&self, variants: &[T], mut test: F) -> SearchOutcome<E>
    where
        F: FnMut(&T, usize) -> Result<(), E>,
    {
        let mut groups: Vec<Group> = (0..variants.len())
            .step_by(self.group_size)
            .map(|start| Group {
                start,
                end: (start + self.group_size).min(variants.len()),
                cursor: 0,
            })
            .collect();
        let mut active: Vec<usize> = (0..groups.len()).collect();
        let mut retired = vec![false; groups.len()];
        let mut best: Option<(usize, SearchFailure<E>)> = None;
        let mut iterations = 0u64;

        log::debug!(
            "Searching {} variants in {} groups of {}",
            variants.len(),
            groups.len(),
            self.group_size
        );

        while !active.is_empty() {
            let count = active.len();
            let step = traversal_step(count);
            log::trace!("Search cycle over {} groups with step {}", count, step);

            for k in 0..count {
                let group_index = active[(k * step) % count];
                if retired[group_index] {
                    continue;
                }
                if self.abort.as_ref().map_or(false, AbortToken::is_cancelled) {
                    log::debug!("Search interrupted after {} tests", iterations);
                    return SearchOutcome {
                        best: best.map(|(_, failure)| failure),
                        iterations,
                        interrupted: true,
                    };
                }

                let group = &mut groups[group_index];
                let index = group.start + group.cursor;
                iterations += 1;
                match test(&variants[index], index) {
                    Ok(()) => {
                        group.cursor += 1;
                        if group.start + group.cursor >= group.end {
                            retired[group_index] = true;
                        }
                    }
                    Err(error) => {
                        log::debug!("Group {} failed at variant {}", group_index, index);
                        retired[group_index..].iter_mut().for_each(|flag| *flag = true);
                        if best.as_ref().map_or(true, |(group, _)| group_index < *group) {
                            best = Some((group_index, SearchFailure { index, error }));
                        }
                    }
                }
            }

            active.retain(|&group| !retired[group]);
        }

        SearchOutcome {
            best: best.map(|(_, failure)| failure),
            iterations,
            interrupted: false,
        }
    }
}

/// Largest prime not above half of `count` that does not divide it, else 1.
///
/// Such a step is coprime with `count`, so `k * step % count` visits every
/// position exactly once for `k` in `0..count`.
fn traversal_step(count: usize) -> usize {
    if count <= 2 {
        return 1;
    }
    (2..=count / 2)
        .rev()
        .find(|&candidate| is_prime(candidate) && count % candidate != 0)
        .unwrap_or(1)
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}
