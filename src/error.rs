//! Error types shared across the crate.
//!
//! Exhaustion is never an error: navigation operations report "no more
//! variants" as `Ok(false)`. The types here cover caller programming errors
//! (templates and configuration), test failures and cancellation.

use std::any::Any;
use std::fmt;

use crate::args::Args;
use crate::persistence::PersistenceError;

/// Type alias for template evaluation results
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors raised while declaring or evaluating templates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("argument `{0}` is declared more than once")]
    DuplicateArgument(String),

    #[error("argument names must not be empty (template #{0})")]
    EmptyArgumentName(usize),

    #[error("argument `{requested}` is not assigned yet (assigned: {assigned:?})")]
    UnassignedArgument {
        requested: String,
        assigned: Vec<String>,
    },

    #[error("variant has no value for argument `{name}`")]
    MissingArgument { name: String },

    #[error("template for argument `{name}` failed: {message}")]
    Dependent { name: String, message: String },
}

impl TemplateError {
    /// Build a failure a dependent template can return from its own checks
    pub fn dependent(name: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::Dependent {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Invalid run configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one iteration mode is required")]
    NoModes,

    #[error("`cycles` must be at least 1 (mode #{mode_index:?})")]
    ZeroCycles { mode_index: Option<usize> },

    #[error("`attempts_per_variant` must be at least 1 (mode #{0})")]
    ZeroAttempts(usize),

    #[error("random mode #{0} has no test or time limit and the run has no global limit")]
    UnboundedRandomMode(usize),

    #[error("`parallel` must be at least 1")]
    ZeroParallel,

    #[error("search group size must be at least 1")]
    ZeroGroupSize,
}

/// Why a single test invocation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestError<E> {
    /// The test function returned `Err`
    Returned(E),
    /// The test function panicked; holds the panic message
    Panicked(String),
}

impl<E> TestError<E> {
    /// The error the test returned, if it did not panic
    pub fn returned(&self) -> Option<&E> {
        match self {
            TestError::Returned(error) => Some(error),
            TestError::Panicked(_) => None,
        }
    }

    pub fn into_returned(self) -> Option<E> {
        match self {
            TestError::Returned(error) => Some(error),
            TestError::Panicked(_) => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TestError::Panicked(_))
    }

    /// Classify the payload of a caught unwind
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TestError::Panicked(message)
    }
}

impl<E: fmt::Display> fmt::Display for TestError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Returned(error) => fmt::Display::fmt(error, f),
            TestError::Panicked(message) => write!(f, "test panicked: {}", message),
        }
    }
}

/// A failing variant together with the error the test produced for it
#[derive(Debug, Clone)]
pub struct TestFailure<V, E> {
    /// The error returned by the test function, or the panic it raised
    pub error: TestError<E>,
    /// The argument values of the failing variant
    pub args: Args<V>,
    /// Index vector of the failing variant, when it came from navigation
    pub indexes: Option<Vec<usize>>,
    /// Sequential number of the test run that failed
    pub test_index: u64,
}

impl<V: fmt::Debug, E: fmt::Display> fmt::Display for TestFailure<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "test #{} failed with args {:?}: {}",
            self.test_index, self.args, self.error
        )
    }
}

/// Errors surfaced by a variants run
#[derive(Debug, thiserror::Error)]
pub enum VariantsError<V: fmt::Debug, E: fmt::Display + fmt::Debug> {
    #[error("{0}")]
    TestFailed(Box<TestFailure<V, E>>),

    #[error("run aborted after {iterations} tests")]
    Aborted { iterations: u64 },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl<V: fmt::Debug, E: fmt::Display + fmt::Debug> VariantsError<V, E> {
    /// The failing variant, when this error is a test failure
    pub fn failure(&self) -> Option<&TestFailure<V, E>> {
        match self {
            VariantsError::TestFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, VariantsError::Aborted { .. })
    }
}
