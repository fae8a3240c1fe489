use anyhow::Context;
use clap::Parser;
use mb_engine::{logging, Evaluator, ModelRegistry};
use mb_optimizer::{OptimizationProblem, ParameterFormat};
use std::path::PathBuf;

/// Analysis driver forked by Dakota: evaluates one parameters file and
/// writes the matching results file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Problem definition (JSON)
    #[arg(long, value_name = "PATH")]
    problem: PathBuf,

    /// Parameters file format (dakota or yaml)
    #[arg(long, default_value = "dakota", value_name = "FORMAT")]
    format: ParameterFormat,

    /// Parameters file written by the solver
    params: PathBuf,

    /// Results file to write
    results: PathBuf,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write logs to a file in addition to stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, false, cli.log_file.as_deref())?;

    let problem = OptimizationProblem::from_json_file(&cli.problem)
        .with_context(|| format!("failed to load problem {}", cli.problem.display()))?;
    let mut evaluator = Evaluator::new(problem, &ModelRegistry::default())?;
    evaluator
        .evaluate_files(&cli.params, &cli.results, cli.format)
        .with_context(|| format!("evaluation of {} failed", cli.params.display()))?;

    Ok(())
}
