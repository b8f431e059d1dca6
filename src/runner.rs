//! VariantsRunner - the test execution entry point
//!
//! The runner wires templates to a navigation session and drives it with the
//! configured iteration modes. A run goes through these phases:
//!
//! 1. replay of previously saved failing variants (newest first)
//! 2. mode-driven iteration, dispatching each variant snapshot to the
//!    executor (inline, or a bounded pool of worker threads)
//! 3. failure handling: persist the variant, then either fail fast or record
//!    it as the best error so far and narrow the remaining space
//!
//! A test fails by returning `Err` or by panicking; a caught panic is reported
//! as [`TestError::Panicked`] and handled like any other failure.
//!
//! With [`BestErrorStrategy::Grouped`] phase 2 is replaced by a materialised
//! [`ErrorSearch`] over the whole variant list.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::abort::AbortToken;
use crate::args::{ArgValue, Args};
use crate::error::{ConfigError, TestError, TestFailure, VariantsError};
use crate::modes::{ControllerConfig, ModeChange, ModeConfig, ModeController};
use crate::navigation::{EqualsFn, LimitArgOnError, NavigationState, Variant};
use crate::persistence::ErrorVariantStore;
use crate::pool::Executor;
use crate::progress::{LogObserver, Pacer, PauseConfig, ProgressEvent, ProgressObserver};
use crate::search::ErrorSearch;
use crate::template::Templates;

/// How best-error mode looks for the earliest failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BestErrorStrategy {
    /// Keep iterating after each failure with limits narrowed to it
    #[default]
    Narrowing,
    /// Materialise every variant and run the group search over them
    Grouped { group_size: usize },
}

/// Configuration of best-error mode
#[derive(Clone, Default)]
pub struct FindBestErrorConfig {
    /// How a failure narrows the remaining space
    pub limit_arg_on_error: LimitArgOnError,
    /// Whether sequential modes may yield the failing variant again
    pub include_error_variant: bool,
    /// Return the best error in `RunOutcome` instead of as `Err`
    pub dont_throw_if_error: bool,
    pub strategy: BestErrorStrategy,
}

impl fmt::Debug for FindBestErrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindBestErrorConfig")
            .field("limit_arg_on_error", &self.limit_arg_on_error)
            .field("include_error_variant", &self.include_error_variant)
            .field("dont_throw_if_error", &self.dont_throw_if_error)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Where failing variants are saved and whether replays narrow the search
#[derive(Debug, Clone)]
pub struct SaveErrorVariantsConfig<V> {
    pub store: ErrorVariantStore<V>,
    /// A failing replay narrows the limits like a fresh failure would
    pub use_to_find_best_error: bool,
}

impl<V> SaveErrorVariantsConfig<V> {
    pub fn new(store: ErrorVariantStore<V>) -> Self {
        Self {
            store,
            use_to_find_best_error: false,
        }
    }
}

/// Configuration for a variants run
#[derive(Clone)]
pub struct RunnerConfig<V> {
    /// Iteration modes, activated in order
    pub modes: Vec<ModeConfig>,

    /// Passes over the whole mode list
    pub cycles: u32,

    /// Maximum number of tests from mode iteration
    pub limit_tests: Option<u64>,

    /// Maximum wall time for mode iteration
    pub limit_time: Option<Duration>,

    /// Seed for random mode
    pub seed: Option<u64>,

    /// Maximum number of concurrent test invocations
    pub parallel: usize,

    /// External cancellation
    pub abort: Option<AbortToken>,

    /// Value equality used to match replayed variants
    pub equals: Option<EqualsFn<V>>,

    /// Keep going after failures and report the earliest one
    pub find_best_error: Option<FindBestErrorConfig>,

    /// Persist failing variants and replay them on the next run
    pub save_error_variants: Option<SaveErrorVariantsConfig<V>>,

    pub pause: PauseConfig,

    /// Interval between periodic progress events
    pub log_interval: Option<Duration>,

    pub observer: Arc<dyn ProgressObserver>,
}

impl<V> Default for RunnerConfig<V> {
    fn default() -> Self {
        Self {
            modes: vec![ModeConfig::forward()],
            cycles: 1,
            limit_tests: None,
            limit_time: None,
            seed: None,
            parallel: 1,
            abort: None,
            equals: None,
            find_best_error: None,
            save_error_variants: None,
            pause: PauseConfig::default(),
            log_interval: Some(Duration::from_secs(10)),
            observer: Arc::new(LogObserver),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for RunnerConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("modes", &self.modes)
            .field("cycles", &self.cycles)
            .field("limit_tests", &self.limit_tests)
            .field("limit_time", &self.limit_time)
            .field("seed", &self.seed)
            .field("parallel", &self.parallel)
            .field("abort", &self.abort)
            .field("find_best_error", &self.find_best_error)
            .field("save_error_variants", &self.save_error_variants)
            .field("pause", &self.pause)
            .field("log_interval", &self.log_interval)
            .finish()
    }
}

impl<V> RunnerConfig<V> {
    /// Mode schedule handed to the controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            modes: self.modes.clone(),
            cycles: self.cycles,
            limit_tests: self.limit_tests,
            limit_time: self.limit_time,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::ZeroParallel);
        }
        if let Some(BestErrorStrategy::Grouped { group_size: 0 }) =
            self.find_best_error.as_ref().map(|find| find.strategy)
        {
            return Err(ConfigError::ZeroGroupSize);
        }
        self.controller_config().validate()
    }
}

/// Per-invocation information handed to the test function
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Sequential number of this test in the run, replays included
    pub index: u64,
    /// Cancelled when the run stops; long tests should poll it
    pub abort: AbortToken,
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome<V, E> {
    /// Tests executed, replays included
    pub iterations: u64,
    /// Earliest failure found in best-error mode
    pub best_error: Option<TestFailure<V, E>>,
}

type Job<V> = (u64, Variant<V>);
type Finished<V, E> = (u64, Variant<V>, Result<(), TestError<E>>);

/// Call the test function, turning a panic into a failure
fn invoke<V, E, F>(test: &F, args: &Args<V>, context: &TestContext) -> Result<(), TestError<E>>
where
    F: Fn(&Args<V>, &TestContext) -> Result<(), E>,
{
    match catch_unwind(AssertUnwindSafe(|| test(args, context))) {
        Ok(result) => result.map_err(TestError::Returned),
        Err(payload) => Err(TestError::from_panic(payload)),
    }
}

/// Runs a test function over every variant of a template set
pub struct VariantsRunner<V> {
    templates: Templates<V>,
    config: RunnerConfig<V>,
}

impl<V: ArgValue> VariantsRunner<V> {
    pub fn new(templates: Templates<V>, config: RunnerConfig<V>) -> Self {
        Self { templates, config }
    }

    pub fn config(&self) -> &RunnerConfig<V> {
        &self.config
    }

    pub fn templates(&self) -> &Templates<V> {
        &self.templates
    }

    /// Run `test` over the variants.
    ///
    /// Without best-error mode the first failure is returned as
    /// `VariantsError::TestFailed`. An external abort with no failure found
    /// yields `VariantsError::Aborted`.
    pub fn run<E, F>(&self, test: F) -> Result<RunOutcome<V, E>, VariantsError<V, E>>
    where
        E: fmt::Display + fmt::Debug + Send,
        F: Fn(&Args<V>, &TestContext) -> Result<(), E> + Sync,
    {
        self.config.validate()?;

        let abort = match &self.config.abort {
            Some(parent) => parent.child(),
            None => AbortToken::new(),
        };
        let mut session = Session {
            config: &self.config,
            abort,
            best: None,
            tests: 0,
            started_at: Instant::now(),
        };

        let result = session.execute(&self.templates, &test);
        let failed = session.best.is_some() || matches!(result, Err(VariantsError::TestFailed(_)));
        self.config.observer.on_event(&ProgressEvent::Completed {
            tests: session.tests,
            elapsed: session.started_at.elapsed(),
            failed,
        });
        result?;

        let iterations = session.tests;
        if let Some(best) = session.best {
            let dont_throw = self
                .config
                .find_best_error
                .as_ref()
                .map_or(false, |find| find.dont_throw_if_error);
            if dont_throw {
                return Ok(RunOutcome {
                    iterations,
                    best_error: Some(best),
                });
            }
            return Err(VariantsError::TestFailed(Box::new(best)));
        }
        if self.config.abort.as_ref().map_or(false, AbortToken::is_cancelled) {
            return Err(VariantsError::Aborted { iterations });
        }
        Ok(RunOutcome {
            iterations,
            best_error: None,
        })
    }
}

/// Mutable bookkeeping of one run
struct Session<'r, V, E> {
    config: &'r RunnerConfig<V>,
    abort: AbortToken,
    best: Option<TestFailure<V, E>>,
    tests: u64,
    started_at: Instant,
}

impl<'r, V, E> Session<'r, V, E>
where
    V: ArgValue,
    E: fmt::Display + fmt::Debug + Send,
{
    fn execute<F>(&mut self, templates: &Templates<V>, test: &F) -> Result<(), VariantsError<V, E>>
    where
        F: Fn(&Args<V>, &TestContext) -> Result<(), E> + Sync,
    {
        let mut state = self.navigation_state(templates);

        let saved = match &self.config.save_error_variants {
            Some(save) => save.store.load()?,
            None => Vec::new(),
        };
        self.config.observer.on_event(&ProgressEvent::Started {
            modes: self.config.modes.len(),
            saved_variants: saved.len(),
        });

        let narrow_on_replay = self
            .config
            .save_error_variants
            .as_ref()
            .map_or(false, |save| save.use_to_find_best_error);
        for variant in &saved {
            if self.abort.is_cancelled() {
                return Ok(());
            }
            log::info!("Replaying saved variant {}", variant.path.display());
            let indexes = state.position_at(&variant.values)?;
            let args = state.args().clone();
            let index = self.next_index();
            let context = TestContext {
                index,
                abort: self.abort.clone(),
            };
            if let Err(error) = invoke(test, &args, &context) {
                let failure = TestFailure {
                    error,
                    args,
                    indexes: Some(indexes),
                    test_index: index,
                };
                self.report(&failure, false);
                self.record(failure, narrow_on_replay, &mut |indexes: &[usize]| {
                    state.apply_error_limits(indexes)
                })?;
            }
        }

        match self.config.find_best_error.as_ref().map(|find| find.strategy) {
            Some(BestErrorStrategy::Grouped { group_size }) => {
                self.grouped_search(state, group_size, test)
            }
            _ => self.iterate(state, test),
        }
    }

    fn navigation_state(&self, templates: &Templates<V>) -> NavigationState<V> {
        let mut state = NavigationState::new(templates.clone());
        if let Some(find) = &self.config.find_best_error {
            state = state
                .with_limit_arg_on_error(find.limit_arg_on_error.clone())
                .with_include_error_variant(find.include_error_variant);
        }
        if let Some(equals) = &self.config.equals {
            state = state.with_equals(Arc::clone(equals));
        }
        state
    }

    fn next_index(&mut self) -> u64 {
        let index = self.tests;
        self.tests += 1;
        index
    }

    /// Mode-driven iteration with narrowing on failure
    fn iterate<F>(&mut self, state: NavigationState<V>, test: &F) -> Result<(), VariantsError<V, E>>
    where
        F: Fn(&Args<V>, &TestContext) -> Result<(), E> + Sync,
    {
        let mut controller = ModeController::new(state, self.config.controller_config())?
            .with_abort(self.abort.clone());
        let observer = Arc::clone(&self.config.observer);
        controller.add_listener(Box::new(move |change: &ModeChange| {
            observer.on_event(&ProgressEvent::ModeChanged {
                mode: change.mode,
                mode_index: change.mode_index,
                tests: change.tests,
            })
        }));
        let mut pacer = Pacer::new(self.config.pause.clone(), self.config.log_interval);

        let abort = self.abort.clone();
        let work = |(index, variant): Job<V>| -> Finished<V, E> {
            let context = TestContext {
                index,
                abort: abort.clone(),
            };
            let result = invoke(test, &variant.args, &context);
            (index, variant, result)
        };
        let work: &(dyn Fn(Job<V>) -> Finished<V, E> + Sync) = &work;

        std::thread::scope(|scope| -> Result<(), VariantsError<V, E>> {
            let mut executor = Executor::spawn(scope, self.config.parallel, work);
            loop {
                for finished in executor.try_collect() {
                    self.on_finished(&mut controller, finished)?;
                }
                while !executor.has_capacity() {
                    match executor.wait_one() {
                        Some(finished) => self.on_finished(&mut controller, finished)?,
                        None => break,
                    }
                }

                pacer.maybe_pause(self.tests);
                if pacer.progress_due() {
                    self.config.observer.on_event(&ProgressEvent::Progress {
                        tests: self.tests,
                        elapsed: self.started_at.elapsed(),
                        mode: controller.mode(),
                    });
                }

                let Some(variant) = controller.next_variant()? else {
                    break;
                };
                let index = self.next_index();
                executor.submit((index, variant));
            }
            for finished in executor.finish() {
                self.on_finished(&mut controller, finished)?;
            }
            Ok(())
        })
    }

    fn on_finished(
        &mut self,
        controller: &mut ModeController<V>,
        (index, variant, result): Finished<V, E>,
    ) -> Result<(), VariantsError<V, E>> {
        let Err(error) = result else {
            return Ok(());
        };
        let failure = TestFailure {
            error,
            args: variant.args,
            indexes: Some(variant.indexes),
            test_index: index,
        };
        self.report(&failure, true);
        self.record(failure, true, &mut |indexes: &[usize]| controller.apply_error_limits(indexes))
    }

    /// Materialise the variant list and search it group by group
    fn grouped_search<F>(
        &mut self,
        mut state: NavigationState<V>,
        group_size: usize,
        test: &F,
    ) -> Result<(), VariantsError<V, E>>
    where
        F: Fn(&Args<V>, &TestContext) -> Result<(), E> + Sync,
    {
        let variants = state.variants()?;
        log::info!("Searching {} variants for the earliest failure", variants.len());

        let mut failed_at = Vec::new();
        let outcome = ErrorSearch::new(group_size)
            .with_abort(self.abort.clone())
            .run(&variants, |variant, position| {
                let index = self.next_index();
                let context = TestContext {
                    index,
                    abort: self.abort.clone(),
                };
                let result = invoke(test, &variant.args, &context);
                if let Err(error) = &result {
                    self.report_parts(index, &variant.args, error, true);
                    failed_at.push((position, index));
                }
                result
            });

        if let Some(found) = outcome.best {
            let variant = &variants[found.index];
            let test_index = failed_at
                .iter()
                .find(|(position, _)| *position == found.index)
                .map_or(self.tests, |&(_, index)| index);
            log::info!("Earliest failure at variant {} of {}", found.index, variants.len());
            self.best = Some(TestFailure {
                error: found.error,
                args: variant.args.clone(),
                indexes: Some(variant.indexes.clone()),
                test_index,
            });
        }
        Ok(())
    }

    /// Notify the observer and persist the failing variant
    fn report(&self, failure: &TestFailure<V, E>, persist: bool) {
        self.report_parts(failure.test_index, &failure.args, &failure.error, persist);
    }

    fn report_parts(&self, test_index: u64, args: &Args<V>, error: &TestError<E>, persist: bool) {
        self.config.observer.on_event(&ProgressEvent::Error {
            test_index,
            args: format!("{:?}", args),
            error: error.to_string(),
        });
        if !persist {
            return;
        }
        if let Some(save) = &self.config.save_error_variants {
            // a failed write never replaces the test failure
            if let Err(e) = save.store.save(args) {
                log::warn!("Failed to save failing variant: {}", e);
            }
        }
    }

    /// Fail fast, or keep the failure as the best error when it is admitted
    fn record(
        &mut self,
        failure: TestFailure<V, E>,
        narrow: bool,
        apply_limits: &mut dyn FnMut(&[usize]) -> bool,
    ) -> Result<(), VariantsError<V, E>> {
        if self.config.find_best_error.is_none() {
            self.abort.cancel("test failed");
            return Err(VariantsError::TestFailed(Box::new(failure)));
        }
        let admitted = match (&failure.indexes, narrow) {
            (Some(indexes), true) => apply_limits(indexes),
            // without narrowing the earliest variant seen so far stays best
            _ => self.best.as_ref().map_or(true, |best| precedes(&failure, best)),
        };
        if admitted {
            log::info!("New best error at test #{}: {}", failure.test_index, failure.error);
            self.best = Some(failure);
        } else {
            log::debug!(
                "Discarding failure of test #{}, not earlier than the best error",
                failure.test_index
            );
        }
        Ok(())
    }
}

/// Whether `failure` comes before `best` in enumeration order
fn precedes<V, E>(failure: &TestFailure<V, E>, best: &TestFailure<V, E>) -> bool {
    match (&failure.indexes, &best.indexes) {
        (Some(candidate), Some(current)) => candidate < current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentObserver;

    fn templates() -> Templates<i32> {
        Templates::builder()
            .values("a", vec![0, 1, 2])
            .values("b", vec![0, 1, 2])
            .build()
            .unwrap()
    }

    fn quiet() -> RunnerConfig<i32> {
        RunnerConfig {
            observer: Arc::new(SilentObserver),
            log_interval: None,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn passing_run_visits_every_variant() {
        let runner = VariantsRunner::new(templates(), quiet());
        let outcome = runner.run(|_, _| Ok::<(), String>(())).unwrap();
        assert_eq!(outcome.iterations, 9);
        assert!(outcome.best_error.is_none());
    }

    #[test]
    fn first_failure_fails_fast() {
        let runner = VariantsRunner::new(templates(), quiet());
        let error = runner
            .run(|args, _| {
                if args.get("b") == Some(&2) {
                    return Err("b = 2".to_string());
                }
                Ok(())
            })
            .unwrap_err();
        let failure = error.failure().unwrap();
        assert_eq!(failure.indexes, Some(vec![0, 2]));
        assert_eq!(failure.test_index, 2);
    }

    #[test]
    fn invalid_configuration_is_rejected_before_running() {
        let config = RunnerConfig {
            parallel: 0,
            ..quiet()
        };
        let runner = VariantsRunner::new(templates(), config);
        let error = runner.run(|_, _| Ok::<(), String>(())).unwrap_err();
        assert!(matches!(error, VariantsError::Config(ConfigError::ZeroParallel)));
    }

    #[test]
    fn test_index_counts_every_invocation() {
        let runner = VariantsRunner::new(templates(), quiet());
        let seen = std::sync::Mutex::new(Vec::new());
        runner
            .run(|_, context| {
                seen.lock().unwrap().push(context.index);
                Ok::<(), String>(())
            })
            .unwrap();
        assert_eq!(seen.into_inner().unwrap(), (0..9).collect::<Vec<u64>>());
    }
}
