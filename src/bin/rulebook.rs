//! rulebook: command-line front end for loading, evaluating, validating and
//! conformance-checking rule books.

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use rulebook_engine::compute::engine_by_id;
use rulebook_engine::conformance::Harness;
use rulebook_engine::output::OutputTable;
use rulebook_engine::store::RawFacts;
use rulebook_engine::validation::{check_shape, validate, FieldScope};
use rulebook_engine::{Rulebook, RunConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rulebook")]
#[command(about = "Evaluate and cross-validate schema-driven rule books")]
#[command(version)]
struct Cli {
    /// Run configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved evaluation order
    Order {
        #[arg(long)]
        schema: PathBuf,
    },

    /// Evaluate raw facts and export the output table
    Evaluate {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        facts: PathBuf,
        #[arg(long, default_value = "eager")]
        engine: String,
        /// Write the table here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Validate a candidate table against an answer table
    Validate {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        candidate: PathBuf,
        #[arg(long)]
        answer: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run engines side by side and validate each against the answer table
    Conform {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        facts: PathBuf,
        #[arg(long)]
        answer: PathBuf,
        /// Engines to run (repeatable); defaults to every shipped engine
        #[arg(long)]
        engine: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn emit(text: &str, out: Option<&Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => std::fs::write(path, text).with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::default(),
    };

    match cli.command {
        Commands::Order { schema } => {
            let rulebook = Rulebook::from_path(&schema)?;
            for (i, name) in rulebook.order().enumerate() {
                println!("{:>4}  {}", i + 1, name);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Evaluate { schema, facts, engine, out } => {
            let rulebook = Rulebook::from_path(&schema)?;
            let data = rulebook.bind(&RawFacts::from_path(&facts)?)?;
            let engine = engine_by_id(&engine, config.parallel)?;
            let table = rulebook.evaluate(&*engine, &data, config.export_precision)?;
            for failure in &table.failures {
                eprintln!("{}[{}].{}: {}", failure.entity, failure.primary_key, failure.field, failure.error);
            }
            emit(&table.to_json_pretty()?, out.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { schema, candidate, answer, out } => {
            let rulebook = Rulebook::from_path(&schema)?;
            let candidate = OutputTable::from_path(&candidate)?;
            let answer = OutputTable::from_path(&answer)?;
            check_shape(rulebook.schema(), &candidate)?;
            let scope = FieldScope::from_schema(rulebook.schema(), config.scope);
            let report = validate(&candidate, &answer, &scope, config.tolerance)?;
            eprint!("{}", report);
            emit(&serde_json::to_string_pretty(&report)?, out.as_deref())?;
            Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }

        Commands::Conform { schema, facts, answer, engine, out } => {
            let rulebook = Rulebook::from_path(&schema)?;
            let data = rulebook.bind(&RawFacts::from_path(&facts)?)?;
            let answer = OutputTable::from_path(&answer)?;

            let harness = if engine.is_empty() {
                Harness::with_shipped_engines(&config)
            } else {
                let mut harness = Harness::new(&config);
                for id in &engine {
                    harness = harness.with_engine(Arc::from(engine_by_id(id, config.parallel)?));
                }
                harness
            };
            let report = harness.run(&rulebook, &data, &answer)?;

            for run in &report.runs {
                match run.report() {
                    Some(r) => eprintln!("{}: {} passed, {} failed", run.engine_id, r.pass_count, r.fail_count),
                    None => eprintln!("{}: unavailable", run.engine_id),
                }
            }
            for a in &report.agreement {
                eprintln!("{} vs {}: {} mismatches", a.left, a.right, a.report.mismatches.len());
            }
            emit(&serde_json::to_string_pretty(&report)?, out.as_deref())?;
            Ok(if report.all_passed() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
