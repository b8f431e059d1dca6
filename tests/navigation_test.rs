//! # Navigation Test Suite
//!
//! Enumeration through the public `NavigationState` API with dependent
//! templates, limits applied from failing variants, and seeded random draws.

use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use test_variants::{Args, LimitArgOnError, NavigationState, TemplateError, Templates};

/// `len` picks a length, `pos` indexes into it, `flag` is independent
fn dependent_templates() -> Templates<u32> {
    Templates::builder()
        .values("len", vec![0, 1, 2, 3])
        .dependent("pos", |args: &Args<u32>| (0..*args.get("len").unwrap()).collect())
        .values("flag", vec![0, 1])
        .build()
        .unwrap()
}

fn collect_forward(state: &mut NavigationState<u32>) -> Vec<Vec<u32>> {
    let mut visited = Vec::new();
    while state.advance().unwrap() {
        visited.push(state.args().values().copied().collect());
    }
    visited
}

#[test]
fn dependent_space_is_enumerated_in_both_directions() {
    let mut state = NavigationState::new(dependent_templates());
    let forward = collect_forward(&mut state);
    assert_eq!(forward.len(), (1 + 2 + 3) * 2);
    assert_eq!(forward[0], vec![1, 0, 0]);
    assert_eq!(forward.last(), Some(&vec![3, 2, 1]));
    assert!(forward.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(state.is_unset());

    let mut backward = Vec::new();
    while state.retreat().unwrap() {
        backward.push(state.args().values().copied().collect::<Vec<u32>>());
    }
    backward.reverse();
    assert_eq!(backward, forward);
    assert_eq!(state.count_variants().unwrap(), 12);
}

#[test]
fn combined_limits_keep_only_earlier_variants() {
    let mut state = NavigationState::new(dependent_templates());
    assert!(state.apply_error_limits(&[2, 1, 0]));
    let remaining = collect_forward(&mut state);
    assert_eq!(remaining.last(), Some(&vec![2, 0, 1]));
    assert!(remaining.iter().all(|values| values < &vec![2, 1, 0]));
}

#[test]
fn random_draws_respect_per_argument_limits() {
    let mut state =
        NavigationState::new(dependent_templates()).with_limit_arg_on_error(LimitArgOnError::All);
    assert!(state.apply_error_limits(&[2, 1, 0]));

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut draws = 0;
    for _ in 0..500 {
        if state.random_pick(&mut rng).unwrap() {
            draws += 1;
            let indexes = state.current_indexes().unwrap();
            assert!(indexes[0] <= 2 && indexes[1] <= 1 && indexes[2] == 0);
        }
    }
    assert!(draws > 0);
}

#[test]
fn replaying_a_saved_variant_with_an_unknown_value() {
    let mut state = NavigationState::new(dependent_templates());
    let saved: HashMap<String, u32> = [("len", 2), ("pos", 1), ("flag", 5)]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    let indexes = state.position_at(&saved).unwrap();
    assert_eq!(indexes, vec![2, 1, 2]);
    assert_eq!(state.args().get("flag"), Some(&5));
    assert_eq!(state.extra_values(2), Some(&[5][..]));

    assert!(state.advance().unwrap());
    assert_eq!(state.args().values().copied().collect::<Vec<_>>(), vec![3, 0, 0]);
}

#[test]
fn failing_dependent_template_names_the_argument() {
    let templates = Templates::builder()
        .values("a", vec![1, 2])
        .arg(
            "b",
            test_variants::Template::try_from_fn(|args: &Args<i32>| {
                if args.get("a") == Some(&2) {
                    return Err(TemplateError::dependent("b", "a must stay below 2"));
                }
                Ok(vec![0])
            }),
        )
        .build()
        .unwrap();
    let mut state = NavigationState::new(templates);
    assert!(state.advance().unwrap());
    let error = state.advance().unwrap_err();
    assert!(matches!(error, TemplateError::Dependent { ref name, .. } if name == "b"));
}
