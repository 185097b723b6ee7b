//! Monadic pipeline engine for CADSL tools.
//!
//! A [`Pipeline`] is a [`Source`] followed by an ordered list of [`Step`]s.
//! Running it threads a [`cadsl_types::Data`] value through each step and
//! stops at the first [`cadsl_types::PipelineError`].

pub mod aggregate;
pub mod callable;
pub mod findings;
pub mod pipeline;
pub mod python;
pub mod render;
pub mod source;
pub mod step;
pub mod substitute;

pub use aggregate::{
    aggregate_fn, aggregate_rows, AggOp, AggregateField, AggregateStep, GroupByStep, GroupKey,
    ALL_GROUP,
};
pub use callable::{
    AggregateFn, Callable, FlatTransform, Guard, KeyFn, Predicate, Renderer, TapFn, Transform,
};
pub use findings::{DuplicateCandidatesSource, SimilarClustersSource};
pub use pipeline::Pipeline;
pub use python::PythonStep;
pub use render::{
    graph_from_rows, graph_tap, render_by_format, render_json, render_markdown, render_mermaid,
    render_text, renderer_by_name, RenderFormat, RenderStep,
};
pub use source::{
    FnSource, LiteralValueSource, MappedSource, SemanticSearchSource, Source,
    StructuredQuerySource, NO_SEMANTIC_SEARCH,
};
pub use step::{
    ComposedStep, Count, FilterStep, FlatMapStep, FlattenStep, LimitStep, MapStep, OffsetStep,
    OrderByStep, SelectStep, SortKey, Step, TapStep, UniqueStep,
};
pub use substitute::{substitute_concepts, substitute_params, CONCEPTS};
