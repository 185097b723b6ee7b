//! CLI binary for inspecting, validating and running CADSL tool declarations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use cadsl_tools::{FunctionRegistry, PipelineBuilder, ToolRegistry, ToolSpec, Transformer, Tree};
use cadsl_types::{Context, Fault, KnowledgeStore, RuntimeConfig, Table};

#[derive(Parser)]
#[command(name = "cadsl", version, about = "Declarative code-analysis tool runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools declared in a parse tree
    Inspect {
        /// Path to the parse tree (JSON)
        tree: PathBuf,
    },

    /// Check that every tool in a parse tree transforms and builds
    Validate {
        /// Path to the parse tree (JSON)
        tree: PathBuf,
    },

    /// Run one tool against a fixture store
    Run {
        /// Path to the parse tree (JSON)
        tree: PathBuf,

        /// Name of the tool to run
        #[arg(short, long)]
        tool: String,

        /// JSON array of rows returned for every structured query
        #[arg(short, long)]
        rows: Option<PathBuf>,

        /// Tool argument as key=value (value parsed as JSON when it can be)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Target language for concept substitution (overrides the config)
        #[arg(short, long)]
        language: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Inspect { tree } => cmd_inspect(&tree)?,
        Commands::Validate { tree } => cmd_validate(&tree, &config)?,
        Commands::Run {
            tree,
            tool,
            rows,
            params,
            language,
        } => cmd_run(&tree, &config, &tool, rows.as_deref(), &params, language)?,
    }

    Ok(())
}

/// Answers every structured query with the same rows.
struct FixtureStore {
    rows: Vec<Map<String, Value>>,
}

impl KnowledgeStore for FixtureStore {
    fn execute_query(&self, query: &str) -> Result<Table, Fault> {
        tracing::debug!(query, rows = self.rows.len(), "Fixture query");
        Ok(Table::from_rows(self.rows.clone()))
    }
}

fn load_tree(path: &Path) -> anyhow::Result<Tree> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading parse tree {}", path.display()))?;
    let tree = serde_json::from_str(&text)
        .with_context(|| format!("parsing parse tree {}", path.display()))?;
    Ok(tree)
}

fn load_specs(path: &Path) -> anyhow::Result<Vec<ToolSpec>> {
    let tree = load_tree(path)?;
    Ok(Transformer::default().transform(&tree)?)
}

fn load_rows(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rows {}", path.display()))?;
    let rows: Vec<Value> = serde_json::from_str(&text)?;
    rows.into_iter()
        .map(|row| match row {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("row is not an object: {other}"),
        })
        .collect()
}

/// `key=value`, with the value read as JSON and kept as a string otherwise.
fn parse_param(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("parameter '{raw}' is not key=value"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

fn registry(specs: Vec<ToolSpec>, config: &RuntimeConfig) -> anyhow::Result<ToolRegistry> {
    let builder = PipelineBuilder::new(config.clone(), Arc::new(FunctionRegistry::with_builtins()));
    let mut registry = ToolRegistry::new(builder);
    registry.register_all(specs)?;
    Ok(registry)
}

fn cmd_inspect(path: &Path) -> anyhow::Result<()> {
    let specs = load_specs(path)?;
    let summaries: Vec<Value> = specs.iter().map(ToolSpec::summary).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn cmd_validate(path: &Path, config: &RuntimeConfig) -> anyhow::Result<()> {
    let specs = match load_specs(path) {
        Ok(specs) => specs,
        Err(e) => {
            println!("[ERROR] {e:#}");
            std::process::exit(1);
        }
    };
    let count = specs.len();
    if let Err(e) = registry(specs, config) {
        println!("[ERROR] {e:#}");
        std::process::exit(1);
    }
    println!("{count} tool(s) valid");
    Ok(())
}

fn cmd_run(
    path: &Path,
    config: &RuntimeConfig,
    tool: &str,
    rows: Option<&Path>,
    params: &[String],
    language: Option<String>,
) -> anyhow::Result<()> {
    let registry = registry(load_specs(path)?, config)?;
    let rows = match rows {
        Some(p) => load_rows(p)?,
        None => Vec::new(),
    };
    let args = params
        .iter()
        .map(|p| parse_param(p))
        .collect::<anyhow::Result<Map<String, Value>>>()?;

    let mut ctx = Context::from_config(Arc::new(FixtureStore { rows }), config);
    if let Some(language) = language {
        ctx = ctx.with_language(language);
    }

    tracing::info!(tool, args = args.len(), "Running tool");
    let result = registry.invoke(tool, &args, &ctx);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.get("success") != Some(&Value::Bool(true)) {
        std::process::exit(1);
    }
    Ok(())
}
