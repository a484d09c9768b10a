//! Baton CLI - inspect and exercise action programs from the command line
//!
//! Provides subcommands for validating a program file, running it against an
//! in-memory field set, evaluating expressions, and listing the command
//! catalog.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use baton::{
    ActionProgram, Engine, EngineConfig, EventEnvelope, GlobalVars, InMemoryFieldProxy,
    InvokeContext, LocalVars, NullEventStore, NullMacroLoader, NullTracer, Tracer, Value,
    VarScopes, expr,
};

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Action interpreter engine for home-control automation", long_about = None)]
struct Cli {
    /// JSON file of seed fields: {"Moniker.Field": "value", ...}
    #[arg(short, long)]
    fields: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a program file: branch invariants, target resolution,
    /// per-parameter validation
    Check {
        /// Program JSON file
        program: PathBuf,
    },

    /// Run a program file to completion
    Run {
        /// Program JSON file
        program: PathBuf,

        /// Optional triggered-event envelope JSON file
        #[arg(long)]
        event: Option<PathBuf>,

        /// Print each step as it executes
        #[arg(short, long)]
        verbose: bool,
    },

    /// Evaluate one expression against the seed fields
    Eval {
        /// Expression source, e.g. '(($(a.b) > 15) AND (1 == 1))'
        expression: String,
    },

    /// List the command catalog of every built-in target
    Catalog,
}

/// Tracer that prints each step and variable write to stdout.
struct ConsoleTracer;

impl Tracer for ConsoleTracer {
    fn run_started(&self, run_id: Uuid) {
        println!("run {} started", run_id);
    }

    fn step(&self, index: usize, command: &str) {
        println!("  [{}] {}", index, command);
    }

    fn var_written(&self, name: &str, value: &Value) {
        println!("      {} = {}", name, value);
    }

    fn expression(&self, expanded: &str) {
        println!("      expr: {}", expanded);
    }

    fn run_ended(&self, run_id: Uuid, success: bool) {
        println!("run {} ended ({})", run_id, if success { "ok" } else { "failed" });
    }
}

fn load_fields(path: Option<&PathBuf>) -> anyhow::Result<Arc<InMemoryFieldProxy>> {
    let proxy = InMemoryFieldProxy::new();
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)?;
        let seeds: BTreeMap<String, String> = serde_json::from_str(&text)?;
        for (key, raw) in seeds {
            let (moniker, field) = key
                .split_once('.')
                .ok_or_else(|| anyhow::anyhow!("field key '{}' must be Moniker.Field", key))?;
            proxy.set(moniker, field, Value::tag_literal(&raw));
        }
    }
    Ok(Arc::new(proxy))
}

fn load_program(path: &PathBuf) -> anyhow::Result<ActionProgram> {
    let text = std::fs::read_to_string(path)?;
    Ok(ActionProgram::from_json(&text)?)
}

fn build_engine(fields: Arc<InMemoryFieldProxy>, verbose: bool) -> Engine {
    let engine = Engine::new(
        EngineConfig::default(),
        fields,
        Box::new(NullMacroLoader),
        Box::new(NullEventStore),
        GlobalVars::new(),
    );
    if verbose {
        engine.with_tracer(Arc::new(ConsoleTracer))
    } else {
        engine.with_tracer(Arc::new(NullTracer))
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let fields = load_fields(cli.fields.as_ref())?;

    match cli.command {
        Commands::Check { program } => {
            let mut program = load_program(&program)?;
            let engine = build_engine(fields, false);
            engine.prepare(&mut program)?;
            let issues = engine.check_parameters(&program);
            if issues.is_empty() {
                println!("{}: {} steps, ok", program.name, program.len());
            } else {
                for issue in &issues {
                    println!(
                        "step {} param {}: {}",
                        issue.step, issue.param, issue.error
                    );
                }
                anyhow::bail!("{} parameter problem(s)", issues.len());
            }
        }

        Commands::Run {
            program,
            event,
            verbose,
        } => {
            let mut program = load_program(&program)?;
            let envelope: Option<EventEnvelope> = match event {
                Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
                None => None,
            };
            let mut engine = build_engine(fields, verbose);
            engine.prepare(&mut program)?;
            let report = engine.run(&program, envelope.as_ref())?;
            println!("result: {:?}", report.result);
            if let (Some(step), Some(error)) = (report.failed_step, report.error.as_ref()) {
                println!("failed at step {}: {}", step, error);
            }
        }

        Commands::Eval { expression } => {
            let node = expr::parse(&expression)?;
            let mut local = LocalVars::new();
            let globals = GlobalVars::new();
            let vars = VarScopes::new(&mut local, &globals, &NullTracer);
            let outcome = expr::evaluate(&node, fields.as_ref(), &vars)?;
            println!("{} -> {}", outcome.expanded, outcome.value);
        }

        Commands::Catalog => {
            let engine = build_engine(fields, false);
            for (target, commands) in engine.catalog(InvokeContext::Normal) {
                println!("{}", target);
                for command in commands {
                    let params: Vec<&str> = command.params.iter().map(|p| p.name).collect();
                    let marker = if command.conditional { "?" } else { " " };
                    println!("  {}{} ({})", command.name, marker, params.join(", "));
                }
            }
        }
    }

    Ok(())
}
