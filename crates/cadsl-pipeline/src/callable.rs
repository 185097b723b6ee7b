//! User-supplied functions captured by steps.
//!
//! Whether a function wants the execution [`Context`] is declared when the
//! step is built, by picking [`Callable::Plain`] or [`Callable::Contextual`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use cadsl_types::{Context, Fault};

pub enum Callable<I: ?Sized, O> {
    Plain(Arc<dyn Fn(&I) -> Result<O, Fault> + Send + Sync>),
    Contextual(Arc<dyn Fn(&I, &Context) -> Result<O, Fault> + Send + Sync>),
}

impl<I: ?Sized, O> Callable<I, O> {
    pub fn plain(f: impl Fn(&I) -> Result<O, Fault> + Send + Sync + 'static) -> Self {
        Callable::Plain(Arc::new(f))
    }

    pub fn contextual(f: impl Fn(&I, &Context) -> Result<O, Fault> + Send + Sync + 'static) -> Self {
        Callable::Contextual(Arc::new(f))
    }

    pub fn call(&self, input: &I, ctx: &Context) -> Result<O, Fault> {
        match self {
            Callable::Plain(f) => f(input),
            Callable::Contextual(f) => f(input, ctx),
        }
    }

    pub fn is_contextual(&self) -> bool {
        matches!(self, Callable::Contextual(_))
    }
}

impl<I: ?Sized, O> Clone for Callable<I, O> {
    fn clone(&self) -> Self {
        match self {
            Callable::Plain(f) => Callable::Plain(Arc::clone(f)),
            Callable::Contextual(f) => Callable::Contextual(Arc::clone(f)),
        }
    }
}

impl<I: ?Sized, O> fmt::Debug for Callable<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Plain(_) => f.write_str("Callable::Plain(..)"),
            Callable::Contextual(_) => f.write_str("Callable::Contextual(..)"),
        }
    }
}

/// Row predicate for `filter`.
pub type Predicate = Callable<Value, bool>;
/// Per-element transform for `map`.
pub type Transform = Callable<Value, Value>;
/// Per-element expansion for `flat_map`.
pub type FlatTransform = Callable<Value, Vec<Value>>;
/// Key extractor for `group_by` and `unique`.
pub type KeyFn = Callable<Value, Value>;
/// Per-group reduction for `group_by`.
pub type AggregateFn = Callable<[Value], Value>;
/// Side-effecting analysis for `tap`; a `Some` result is attached as an annotation.
pub type TapFn = Callable<Value, Option<Value>>;

/// `when` guard of a filter step.
pub type Guard = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Turns render data plus a resolved format name into output.
pub type Renderer = Arc<dyn Fn(&Value, &str) -> Result<Value, Fault> + Send + Sync>;
