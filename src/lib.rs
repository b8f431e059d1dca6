//! # Test Variants
//!
//! A combinatorial test engine. Each argument gets a template: a fixed list of
//! candidate values, or a function of the arguments declared before it. The
//! engine walks the cartesian product of those templates ("variants") and runs
//! a test against each one.
//!
//! When failures occur the engine can keep going and narrow the remaining
//! space to variants that come earlier in enumeration order, so the reported
//! failure is the earliest one rather than the first one hit.

pub mod abort;
pub mod args;
pub mod error;
pub mod modes;
pub mod navigation;
pub mod persistence;
pub mod progress;
pub mod runner;
pub mod search;
pub mod template;

mod pool;

// Re-export core types for easy access
pub use abort::AbortToken;
pub use args::{ArgValue, Args};
pub use error::{
    ConfigError, TemplateError, TemplateResult, TestError, TestFailure, VariantsError,
};
pub use modes::{ControllerConfig, IterationMode, ModeChange, ModeConfig, ModeController, StopReason};
pub use navigation::{
    EqualsFn, LimitArgContext, LimitArgOnError, LimitPredicate, NavigationState, Variant,
};
pub use persistence::{
    ErrorVariantStore, FnCodec, JsonCodec, PersistenceError, PersistenceResult, SavedVariant,
    VariantCodec,
};
pub use progress::{LogObserver, PauseConfig, ProgressEvent, ProgressObserver, SilentObserver};
pub use runner::{
    BestErrorStrategy, FindBestErrorConfig, RunOutcome, RunnerConfig, SaveErrorVariantsConfig,
    TestContext, VariantsRunner,
};
pub use search::{ErrorSearch, SearchFailure, SearchOutcome};
pub use template::{Template, Templates, TemplatesBuilder};
