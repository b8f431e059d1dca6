//! # Error Search Test Suite
//!
//! The group search over lists materialised from real template sets.

use test_variants::{ErrorSearch, NavigationState, SearchFailure, Templates};

fn materialised(a: usize, b: usize) -> Vec<Vec<usize>> {
    let templates = Templates::builder()
        .values("a", (0..a).collect::<Vec<_>>())
        .values("b", (0..b).collect::<Vec<_>>())
        .build()
        .unwrap();
    NavigationState::new(templates)
        .variants()
        .unwrap()
        .into_iter()
        .map(|variant| variant.indexes)
        .collect()
}

#[test]
fn finds_injected_failure_in_twenty_variants() {
    let variants = materialised(4, 5);
    assert_eq!(variants.len(), 20);

    let outcome = ErrorSearch::new(5).run(&variants, |indexes, _| {
        if indexes == &vec![2, 3] {
            return Err("injected");
        }
        Ok(())
    });
    assert_eq!(
        outcome.best,
        Some(SearchFailure {
            index: 13,
            error: "injected"
        })
    );
}

#[test]
fn single_failure_is_found_for_every_group_size() {
    let variants = materialised(3, 4);
    let n = variants.len();
    for group_size in [1, 2, n] {
        for failing in 0..n {
            let outcome = ErrorSearch::new(group_size)
                .run(&variants, |_, index| if index == failing { Err(index) } else { Ok(()) });
            assert_eq!(outcome.best.map(|failure| failure.error), Some(failing));
        }
    }
}

#[test]
fn passing_list_runs_every_variant_exactly_once() {
    let variants = materialised(6, 7);
    let mut counts = vec![0; variants.len()];
    let outcome = ErrorSearch::new(4).run(&variants, |_, index| {
        counts[index] += 1;
        Ok::<(), ()>(())
    });
    assert!(outcome.best.is_none());
    assert_eq!(outcome.iterations, 42);
    assert!(counts.iter().all(|&count| count == 1));
}

#[test]
fn zero_group_size_behaves_like_one() {
    let search = ErrorSearch::new(0);
    assert_eq!(search.group_size(), 1);
}
