//! Argument templates: where each argument's candidate values come from.
//!
//! A template is either a fixed ordered list of candidate values, or a function
//! of the arguments declared before it. Declaration order of the templates is
//! the dimension order used for every lexicographic comparison in the engine.

use std::fmt;
use std::sync::Arc;

use crate::args::{ArgValue, Args};
use crate::error::{TemplateError, TemplateResult};

/// Function computing candidate values from the already assigned prefix
pub type DependentFn<V> = Arc<dyn Fn(&Args<V>) -> TemplateResult<Vec<V>> + Send + Sync>;

/// Candidate-value source for one argument
#[derive(Clone)]
pub enum Template<V> {
    /// Fixed ordered sequence of candidate values
    Values(Arc<[V]>),
    /// Sequence computed from the previously assigned arguments
    Dependent(DependentFn<V>),
}

impl<V: ArgValue> Template<V> {
    /// Fixed candidate list
    pub fn values(values: impl Into<Vec<V>>) -> Self {
        Template::Values(Arc::from(values.into()))
    }

    /// Candidate list computed from earlier arguments
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Args<V>) -> Vec<V> + Send + Sync + 'static,
    {
        Template::Dependent(Arc::new(move |args: &Args<V>| Ok(f(args))))
    }

    /// Candidate list computed from earlier arguments, allowed to fail.
    ///
    /// Typically used with [`Args::value`] so that asking for an argument that
    /// is not assigned yet turns into a [`TemplateError`] naming it.
    pub fn try_from_fn<F>(f: F) -> Self
    where
        F: Fn(&Args<V>) -> TemplateResult<Vec<V>> + Send + Sync + 'static,
    {
        Template::Dependent(Arc::new(f))
    }

    /// Evaluate the template for the given prefix
    pub fn evaluate(&self, args: &Args<V>) -> TemplateResult<Vec<V>> {
        match self {
            Template::Values(values) => Ok(values.to_vec()),
            Template::Dependent(f) => f(args),
        }
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self, Template::Dependent(_))
    }
}

impl<V: fmt::Debug> fmt::Debug for Template<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::Values(values) => f.debug_tuple("Values").field(values).finish(),
            Template::Dependent(_) => f.write_str("Dependent(<fn>)"),
        }
    }
}

impl<V: ArgValue> From<Vec<V>> for Template<V> {
    fn from(values: Vec<V>) -> Self {
        Template::values(values)
    }
}

/// Ordered, validated collection of named templates
#[derive(Clone)]
pub struct Templates<V> {
    names: Vec<Arc<str>>,
    templates: Vec<Template<V>>,
}

impl<V: ArgValue> Templates<V> {
    /// Start declaring templates
    pub fn builder() -> TemplatesBuilder<V> {
        TemplatesBuilder {
            entries: Vec::new(),
        }
    }

    /// Build from `(name, template)` pairs, validating names
    pub fn new<N, I>(entries: I) -> TemplateResult<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Template<V>)>,
    {
        let mut names: Vec<Arc<str>> = Vec::new();
        let mut templates = Vec::new();
        for (position, (name, template)) in entries.into_iter().enumerate() {
            let name: String = name.into();
            if name.is_empty() {
                return Err(TemplateError::EmptyArgumentName(position));
            }
            if names.iter().any(|existing| existing.as_ref() == name) {
                return Err(TemplateError::DuplicateArgument(name));
            }
            names.push(Arc::from(name));
            templates.push(template);
        }
        log::debug!("Declared {} argument templates: {:?}", names.len(), names);
        Ok(Self { names, templates })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Argument name at a position
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub(crate) fn shared_name(&self, index: usize) -> Arc<str> {
        Arc::clone(&self.names[index])
    }

    /// Argument names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| name.as_ref())
    }

    /// Position of an argument by name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate.as_ref() == name)
    }

    /// Evaluate the template at `index` for the assigned prefix.
    ///
    /// `args` must hold exactly the arguments declared before `index`.
    pub fn evaluate(&self, index: usize, args: &Args<V>) -> TemplateResult<Vec<V>> {
        debug_assert_eq!(args.len(), index, "template evaluated with a non-prefix argument map");
        self.templates[index].evaluate(args)
    }
}

impl<V: fmt::Debug> fmt::Debug for Templates<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.names.iter().map(|name| name.as_ref()).zip(self.templates.iter()))
            .finish()
    }
}

/// Incremental declaration of templates
pub struct TemplatesBuilder<V> {
    entries: Vec<(String, Template<V>)>,
}

impl<V: ArgValue> TemplatesBuilder<V> {
    /// Declare the next argument
    pub fn arg(mut self, name: impl Into<String>, template: impl Into<Template<V>>) -> Self {
        self.entries.push((name.into(), template.into()));
        self
    }

    /// Declare the next argument with a fixed candidate list
    pub fn values(self, name: impl Into<String>, values: impl Into<Vec<V>>) -> Self {
        self.arg(name, Template::values(values))
    }

    /// Declare the next argument as a function of earlier ones
    pub fn dependent<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Args<V>) -> Vec<V> + Send + Sync + 'static,
    {
        self.arg(name, Template::from_fn(f))
    }

    pub fn build(self) -> TemplateResult<Templates<V>> {
        Templates::new(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let result = Templates::builder()
            .values("a", vec![1, 2])
            .values("a", vec![3])
            .build();
        assert_eq!(result.err(), Some(TemplateError::DuplicateArgument("a".into())));
    }

    #[test]
    fn rejects_empty_names() {
        let result = Templates::builder().values("", vec![1]).build();
        assert_eq!(result.err(), Some(TemplateError::EmptyArgumentName(0)));
    }

    #[test]
    fn dependent_template_sees_prefix() {
        let templates = Templates::builder()
            .values("a", vec![1, 2])
            .dependent("b", |args: &Args<i32>| {
                let a = *args.get("a").unwrap_or(&0);
                (0..a).collect()
            })
            .build()
            .unwrap();

        let mut args = Args::new();
        args.push(templates.shared_name(0), 2);
        assert_eq!(templates.evaluate(1, &args).unwrap(), vec![0, 1]);
        assert_eq!(templates.position("b"), Some(1));
    }

    #[test]
    fn fallible_template_names_the_unassigned_argument() {
        let templates = Templates::builder()
            .arg(
                "a",
                Template::try_from_fn(|args: &Args<i32>| Ok(vec![*args.value("later")?])),
            )
            .values("later", vec![1])
            .build()
            .unwrap();

        let error = templates.evaluate(0, &Args::new()).unwrap_err();
        assert!(matches!(
            error,
            TemplateError::UnassignedArgument { ref requested, .. } if requested == "later"
        ));
    }
}
