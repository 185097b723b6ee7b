//! Inline code step.
//!
//! The script body is compiled once when the step is built. At run time it
//! sees `rows` (the upstream value), `ctx` (parameters, language, instance)
//! and `result`; whatever it assigns to `result` replaces the data. Leaving
//! `result` unassigned passes the data through.

use serde_json::Value;

use cadsl_expr::{Scope, Script};
use cadsl_types::{Context, Data, Origin, PipelineError, StepResult};

use crate::step::Step;

pub const RESULT_VAR: &str = "result";

pub struct PythonStep {
    script: Result<Script, String>,
}

impl PythonStep {
    /// Compile `code`. A syntax error is kept and reported when the step runs.
    pub fn new(code: &str) -> Self {
        let script = Script::parse(code).map_err(|e| e.to_string());
        if let Err(e) = &script {
            tracing::warn!(error = %e, "Inline code failed to compile");
        }
        Self { script }
    }

    pub fn is_compiled(&self) -> bool {
        self.script.is_ok()
    }
}

impl Step for PythonStep {
    fn name(&self) -> &'static str {
        "python"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let script = self.script.as_ref().map_err(|e| {
            PipelineError::new(Origin::Python, format!("Python syntax error: {e}")).with_cause(e)
        })?;
        let mut scope = Scope::new()
            .with_context(ctx)
            .bind("rows", data.primary().clone())
            .bind("ctx", ctx.to_json())
            .bind(RESULT_VAR, Value::Null);
        script.run(&mut scope).map_err(|e| {
            PipelineError::from_fault(Origin::Python, "Python execution error", e)
        })?;
        match scope.get(RESULT_VAR) {
            Some(Value::Null) | None => Ok(data),
            Some(result) => Ok(Data::Plain(result.clone())),
        }
    }
}
