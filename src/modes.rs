// This file is part of the test-variants implementation.
//
// Copyright (C) 2025 Test Variants Contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Mode-driven iteration over the variant space.
//!
//! The `ModeController` drives a `NavigationState` through a configured list of
//! iteration modes: forward and backward sweeps (with cycles and repeated
//! attempts per variant) and independent random draws. Each mode can carry its
//! own test and time limits; the whole list is repeated `cycles` times unless a
//! global limit or an abort stops the run first.

use std::fmt;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::abort::AbortToken;
use crate::args::ArgValue;
use crate::error::{ConfigError, TemplateResult};
use crate::navigation::{NavigationState, Variant};

/// Consecutive empty random draws after which a random mode counts as exhausted
const MAX_EMPTY_DRAWS: usize = 100;

/// Traversal discipline of one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    /// Lexicographically increasing
    Forward,
    /// Lexicographically decreasing
    Backward,
    /// Independent random draws
    Random,
}

impl IterationMode {
    /// Forward and backward sweeps honour cycles and attempts per variant
    pub fn is_sequential(self) -> bool {
        !matches!(self, IterationMode::Random)
    }
}

impl fmt::Display for IterationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IterationMode::Forward => "forward",
            IterationMode::Backward => "backward",
            IterationMode::Random => "random",
        })
    }
}

/// Configuration of one iteration mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub mode: IterationMode,
    /// Sweeps over the variant space per activation (sequential modes only)
    pub cycles: u32,
    /// Times each variant is yielded in a row (sequential modes only)
    pub attempts_per_variant: u32,
    /// Tests after which this mode hands over to the next one
    pub limit_tests: Option<u64>,
    /// Time after which this mode hands over to the next one
    pub limit_time: Option<Duration>,
}

impl ModeConfig {
    pub fn new(mode: IterationMode) -> Self {
        Self {
            mode,
            cycles: 1,
            attempts_per_variant: 1,
            limit_tests: None,
            limit_time: None,
        }
    }

    pub fn forward() -> Self {
        Self::new(IterationMode::Forward)
    }

    pub fn backward() -> Self {
        Self::new(IterationMode::Backward)
    }

    pub fn random() -> Self {
        Self::new(IterationMode::Random)
    }

    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_attempts_per_variant(mut self, attempts: u32) -> Self {
        self.attempts_per_variant = attempts;
        self
    }

    pub fn with_limit_tests(mut self, limit: u64) -> Self {
        self.limit_tests = Some(limit);
        self
    }

    pub fn with_limit_time(mut self, limit: Duration) -> Self {
        self.limit_time = Some(limit);
        self
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self::forward()
    }
}

/// Configuration of the whole mode schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Modes activated in order
    pub modes: Vec<ModeConfig>,
    /// Passes over the whole mode list
    pub cycles: u32,
    /// Global test limit
    pub limit_tests: Option<u64>,
    /// Global time limit
    pub limit_time: Option<Duration>,
    /// Seed for random mode; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            modes: vec![ModeConfig::forward()],
            cycles: 1,
            limit_tests: None,
            limit_time: None,
            seed: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modes.is_empty() {
            return Err(ConfigError::NoModes);
        }
        if self.cycles == 0 {
            return Err(ConfigError::ZeroCycles { mode_index: None });
        }
        let globally_bounded = self.limit_tests.is_some() || self.limit_time.is_some();
        for (index, mode) in self.modes.iter().enumerate() {
            if mode.mode.is_sequential() {
                if mode.cycles == 0 {
                    return Err(ConfigError::ZeroCycles {
                        mode_index: Some(index),
                    });
                }
                if mode.attempts_per_variant == 0 {
                    return Err(ConfigError::ZeroAttempts(index));
                }
            } else if !globally_bounded && mode.limit_tests.is_none() && mode.limit_time.is_none() {
                return Err(ConfigError::UnboundedRandomMode(index));
            }
        }
        Ok(())
    }
}

/// Notification emitted whenever a mode becomes active
#[derive(Debug, Clone, PartialEq)]
pub struct ModeChange {
    pub mode: IterationMode,
    pub mode_index: usize,
    /// Tests run before the switch
    pub tests: u64,
    /// Pass over the mode list, starting at 0
    pub round: u32,
}

/// Listener for mode changes
pub type ModeListener = Box<dyn Fn(&ModeChange) + Send + Sync>;

/// Why the controller stopped handing out variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every mode ran out of variants or cycles
    Exhausted,
    /// Global test limit reached
    TestLimit,
    /// Global time limit reached
    TimeLimit,
    /// The abort token was cancelled
    Aborted,
}

/// Progress of the active mode
#[derive(Debug)]
struct ActiveMode {
    cycle: u32,
    attempt_repeat: u32,
    tests: u64,
    started_at: Instant,
    /// Already positioned on a variant that has not been yielded yet
    fresh: bool,
}

/// Drives a navigation state through the configured iteration modes
pub struct ModeController<V> {
    state: NavigationState<V>,
    config: ControllerConfig,
    rng: ChaCha8Rng,
    abort: Option<AbortToken>,
    listeners: Vec<ModeListener>,
    mode_index: usize,
    round: u32,
    active: Option<ActiveMode>,
    tests: u64,
    started_at: Instant,
    stopped: Option<StopReason>,
}

impl<V: ArgValue> ModeController<V> {
    pub fn new(state: NavigationState<V>, config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            state,
            config,
            rng,
            abort: None,
            listeners: Vec::new(),
            mode_index: 0,
            round: 0,
            active: None,
            tests: 0,
            started_at: Instant::now(),
            stopped: None,
        })
    }

    /// Stop handing out variants once the token is cancelled
    pub fn with_abort(mut self, abort: AbortToken) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn add_listener(&mut self, listener: ModeListener) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> &NavigationState<V> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NavigationState<V> {
        &mut self.state
    }

    /// Variants handed out so far
    pub fn tests(&self) -> u64 {
        self.tests
    }

    pub fn mode_index(&self) -> usize {
        self.mode_index
    }

    /// The active mode, or `None` once stopped
    pub fn mode(&self) -> Option<IterationMode> {
        if self.stopped.is_some() {
            return None;
        }
        self.config.modes.get(self.mode_index).map(|mode| mode.mode)
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Narrow the remaining space after a failure at `indexes`.
    ///
    /// Pending repeats of the current variant are dropped.
    pub fn apply_error_limits(&mut self, indexes: &[usize]) -> bool {
        if let Some(active) = &mut self.active {
            active.attempt_repeat = 0;
        }
        self.state.apply_error_limits(indexes)
    }

    /// Hand out the next variant, or `None` when the schedule is over
    pub fn next_variant(&mut self) -> TemplateResult<Option<Variant<V>>> {
        loop {
            if self.stopped.is_some() {
                return Ok(None);
            }
            if let Some(reason) = self.global_stop() {
                self.stop(reason);
                return Ok(None);
            }
            if self.active.is_none() {
                self.start_mode()?;
            }

            let mode = self.config.modes[self.mode_index];
            if self.mode_limit_reached(&mode) {
                log::debug!("Mode #{} ({}) reached its limit", self.mode_index, mode.mode);
                self.next_mode();
                continue;
            }

            if mode.mode.is_sequential() && self.take_repeat() {
                if let Some(variant) = self.emit() {
                    return Ok(Some(variant));
                }
            }

            if self.step(&mode)? {
                if let Some(active) = &mut self.active {
                    active.attempt_repeat = mode.attempts_per_variant.saturating_sub(1);
                }
                if let Some(variant) = self.emit() {
                    return Ok(Some(variant));
                }
            }

            log::debug!("Mode #{} ({}) exhausted", self.mode_index, mode.mode);
            self.next_mode();
        }
    }

    fn global_stop(&self) -> Option<StopReason> {
        if self.abort.as_ref().map_or(false, AbortToken::is_cancelled) {
            return Some(StopReason::Aborted);
        }
        if self.config.limit_tests.map_or(false, |limit| self.tests >= limit) {
            return Some(StopReason::TestLimit);
        }
        if self
            .config
            .limit_time
            .map_or(false, |limit| self.started_at.elapsed() >= limit)
        {
            return Some(StopReason::TimeLimit);
        }
        None
    }

    fn stop(&mut self, reason: StopReason) {
        log::info!("Iteration stopped after {} tests: {:?}", self.tests, reason);
        self.stopped = Some(reason);
        self.active = None;
    }

    fn start_mode(&mut self) -> TemplateResult<()> {
        let mode = self.config.modes[self.mode_index];
        let fresh = match mode.mode {
            IterationMode::Forward => {
                self.state.reset_to_start();
                false
            }
            IterationMode::Backward => self.state.reset_to_end()?,
            IterationMode::Random => false,
        };
        self.active = Some(ActiveMode {
            cycle: 0,
            attempt_repeat: 0,
            tests: 0,
            started_at: Instant::now(),
            fresh,
        });

        let change = ModeChange {
            mode: mode.mode,
            mode_index: self.mode_index,
            tests: self.tests,
            round: self.round,
        };
        log::debug!("Starting mode #{} ({}) in round {}", change.mode_index, change.mode, change.round);
        for listener in &self.listeners {
            listener(&change);
        }
        Ok(())
    }

    fn next_mode(&mut self) {
        self.active = None;
        self.mode_index += 1;
        if self.mode_index >= self.config.modes.len() {
            self.mode_index = 0;
            self.round += 1;
            if self.round >= self.config.cycles {
                self.stop(StopReason::Exhausted);
            }
        }
    }

    fn mode_limit_reached(&self, mode: &ModeConfig) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        mode.limit_tests.map_or(false, |limit| active.tests >= limit)
            || mode
                .limit_time
                .map_or(false, |limit| active.started_at.elapsed() >= limit)
    }

    fn take_repeat(&mut self) -> bool {
        match &mut self.active {
            Some(active) if active.attempt_repeat > 0 && self.state.is_positioned() => {
                active.attempt_repeat -= 1;
                true
            }
            _ => false,
        }
    }

    /// Move the navigation state according to the mode
    fn step(&mut self, mode: &ModeConfig) -> TemplateResult<bool> {
        let Some(active) = &mut self.active else {
            return Ok(false);
        };

        if mode.mode == IterationMode::Random {
            for _ in 0..MAX_EMPTY_DRAWS {
                if self.state.random_pick(&mut self.rng)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if std::mem::take(&mut active.fresh) && self.state.is_positioned() {
            return Ok(true);
        }
        let moved = match mode.mode {
            IterationMode::Backward => self.state.retreat()?,
            _ => self.state.advance()?,
        };
        if moved {
            return Ok(true);
        }
        if active.cycle + 1 >= mode.cycles {
            return Ok(false);
        }

        active.cycle += 1;
        log::debug!("Mode #{} ({}) starting cycle {}", self.mode_index, mode.mode, active.cycle);
        match mode.mode {
            IterationMode::Backward => self.state.reset_to_end(),
            _ => {
                self.state.reset_to_start();
                self.state.advance()
            }
        }
    }

    fn emit(&mut self) -> Option<Variant<V>> {
        let variant = self.state.snapshot()?;
        self.tests += 1;
        if let Some(active) = &mut self.active {
            active.tests += 1;
        }
        log::trace!("Variant #{}: {:?}", self.tests, variant.args);
        Some(variant)
    }
}

impl<V> fmt::Debug for ModeController<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("config", &self.config)
            .field("mode_index", &self.mode_index)
            .field("round", &self.round)
            .field("tests", &self.tests)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Templates;
    use std::sync::{Arc, Mutex};

    fn grid_state() -> NavigationState<i32> {
        let templates = Templates::builder()
            .values("a", vec![0, 1])
            .values("b", vec![0, 1, 2])
            .build()
            .unwrap();
        NavigationState::new(templates)
    }

    fn config(modes: Vec<ModeConfig>) -> ControllerConfig {
        ControllerConfig {
            modes,
            seed: Some(11),
            ..ControllerConfig::default()
        }
    }

    fn drain(controller: &mut ModeController<i32>) -> Vec<Vec<usize>> {
        let mut visited = Vec::new();
        while let Some(variant) = controller.next_variant().unwrap() {
            visited.push(variant.indexes);
        }
        visited
    }

    fn all_forward() -> Vec<Vec<usize>> {
        let mut all = Vec::new();
        for a in 0..2 {
            for b in 0..3 {
                all.push(vec![a, b]);
            }
        }
        all
    }

    #[test]
    fn forward_mode_yields_each_variant_once() {
        let mut controller = ModeController::new(grid_state(), ControllerConfig::default()).unwrap();
        assert_eq!(drain(&mut controller), all_forward());
        assert_eq!(controller.tests(), 6);
        assert_eq!(controller.stop_reason(), Some(StopReason::Exhausted));
        assert!(controller.next_variant().unwrap().is_none());
    }

    #[test]
    fn backward_mode_yields_reverse_order() {
        let mut controller =
            ModeController::new(grid_state(), config(vec![ModeConfig::backward()])).unwrap();
        let mut expected = all_forward();
        expected.reverse();
        assert_eq!(drain(&mut controller), expected);
    }

    #[test]
    fn attempts_repeat_each_variant() {
        let mode = ModeConfig::forward().with_attempts_per_variant(2);
        let mut controller = ModeController::new(grid_state(), config(vec![mode])).unwrap();
        let visited = drain(&mut controller);
        assert_eq!(visited.len(), 12);
        assert_eq!(visited[0], visited[1]);
        assert_eq!(visited[2], vec![0, 1]);
    }

    #[test]
    fn sequential_cycles_restart_the_sweep() {
        let mode = ModeConfig::backward().with_cycles(2);
        let mut controller = ModeController::new(grid_state(), config(vec![mode])).unwrap();
        let visited = drain(&mut controller);
        assert_eq!(visited.len(), 12);
        assert_eq!(visited[0], vec![1, 2]);
        assert_eq!(visited[6], vec![1, 2]);
    }

    #[test]
    fn mode_limit_hands_over_to_next_mode() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let modes = vec![ModeConfig::forward().with_limit_tests(3), ModeConfig::backward()];
        let mut controller = ModeController::new(grid_state(), config(modes)).unwrap();
        controller.add_listener(Box::new(move |change: &ModeChange| sink.lock().unwrap().push(change.clone())));

        let visited = drain(&mut controller);
        assert_eq!(visited.len(), 9);
        assert_eq!(visited[..3], all_forward()[..3]);
        assert_eq!(visited[3], vec![1, 2]);

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].mode, IterationMode::Forward);
        assert_eq!(changes[1].mode, IterationMode::Backward);
        assert_eq!(changes[1].mode_index, 1);
        assert_eq!(changes[1].tests, 3);
    }

    #[test]
    fn global_cycles_repeat_the_mode_list() {
        let modes = vec![ModeConfig::forward(), ModeConfig::backward()];
        let mut controller = ModeController::new(
            grid_state(),
            ControllerConfig {
                cycles: 2,
                ..config(modes)
            },
        )
        .unwrap();
        assert_eq!(drain(&mut controller).len(), 24);
        assert_eq!(controller.round(), 2);
    }

    #[test]
    fn random_mode_draws_until_its_limit() {
        let modes = vec![ModeConfig::random().with_limit_tests(50)];
        let mut controller = ModeController::new(grid_state(), config(modes)).unwrap();
        let visited = drain(&mut controller);
        assert_eq!(visited.len(), 50);
        assert!(visited.iter().all(|indexes| indexes[0] < 2 && indexes[1] < 3));
    }

    #[test]
    fn global_test_limit_stops_iteration() {
        let mut controller = ModeController::new(
            grid_state(),
            ControllerConfig {
                limit_tests: Some(4),
                ..ControllerConfig::default()
            },
        )
        .unwrap();
        assert_eq!(drain(&mut controller).len(), 4);
        assert_eq!(controller.stop_reason(), Some(StopReason::TestLimit));
    }

    #[test]
    fn abort_stops_before_the_next_variant() {
        let abort = AbortToken::new();
        let mut controller = ModeController::new(grid_state(), ControllerConfig::default())
            .unwrap()
            .with_abort(abort.clone());
        assert!(controller.next_variant().unwrap().is_some());
        abort.cancel("test");
        assert!(controller.next_variant().unwrap().is_none());
        assert_eq!(controller.stop_reason(), Some(StopReason::Aborted));
    }

    #[test]
    fn error_limits_narrow_a_backward_sweep() {
        let mut controller =
            ModeController::new(grid_state(), config(vec![ModeConfig::backward()])).unwrap();
        assert_eq!(controller.next_variant().unwrap().unwrap().indexes, vec![1, 2]);
        let failing = controller.next_variant().unwrap().unwrap().indexes;
        assert_eq!(failing, vec![1, 1]);
        assert!(controller.apply_error_limits(&failing));

        let rest = drain(&mut controller);
        assert_eq!(rest, vec![vec![1, 0], vec![0, 2], vec![0, 1], vec![0, 0]]);
    }

    #[test]
    fn random_mode_over_empty_space_is_exhausted() {
        let templates = Templates::builder()
            .values("a", Vec::<i32>::new())
            .build()
            .unwrap();
        let modes = vec![ModeConfig::random().with_limit_tests(10)];
        let mut controller =
            ModeController::new(NavigationState::new(templates), config(modes)).unwrap();
        assert!(controller.next_variant().unwrap().is_none());
        assert_eq!(controller.stop_reason(), Some(StopReason::Exhausted));
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let unbounded = config(vec![ModeConfig::random()]);
        assert_eq!(unbounded.validate(), Err(ConfigError::UnboundedRandomMode(0)));
        assert_eq!(config(vec![]).validate(), Err(ConfigError::NoModes));
        assert_eq!(
            config(vec![ModeConfig::forward().with_attempts_per_variant(0)]).validate(),
            Err(ConfigError::ZeroAttempts(0))
        );
        let bounded = ControllerConfig {
            limit_tests: Some(5),
            ..unbounded
        };
        assert!(bounded.validate().is_ok());
    }

    #[test]
    fn mode_configs_load_from_json() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{ "modes": [ { "mode": "random", "limit_tests": 10 }, { "mode": "backward", "cycles": 2 } ] }"#,
        )
        .unwrap();
        assert_eq!(config.modes[0], ModeConfig::random().with_limit_tests(10));
        assert_eq!(config.modes[1].cycles, 2);
        assert_eq!(config.cycles, 1);
    }
}
