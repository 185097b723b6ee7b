//! CADSL tool declarations: parse tree in, executable tools out.
//!
//! - [`tree`]: the parse tree handed over by the grammar front end
//! - [`transformer`]: tree to [`ToolSpec`], with conditions compiled through an [`ExprCompiler`]
//! - [`builder`]: [`ToolSpec`] to [`cadsl_pipeline::Pipeline`], with named functions from a [`FunctionRegistry`]
//! - [`tool`]: `Query` / `Detector` / `Diagram` wrappers and the [`ToolRegistry`]

pub mod builder;
pub mod compiler;
pub mod spec;
pub mod tool;
pub mod transformer;
pub mod tree;

pub use builder::{FunctionRegistry, PipelineBuilder, PipelineFactory};
pub use compiler::{ExprCompiler, TreeCompiler};
pub use spec::{
    CountSpec, FormatSpec, GroupAggregate, GroupKeySpec, ParamSpec, ParamType, SourceSpec,
    StepSpec, ToolKind, ToolSpec,
};
pub use tool::{Detector, Diagram, Query, Tool, ToolRegistry};
pub use transformer::{Transformer, DEFAULT_EMIT_KEY, VALUE_PLACEHOLDER};
pub use tree::{Node, Token, Tree};
