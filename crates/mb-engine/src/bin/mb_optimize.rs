use anyhow::Context;
use clap::Parser;
use mb_engine::{logging, OptimizationRunner, RunnerConfig};
use mb_optimizer::{OptimizationProblem, ParameterFormat};
use std::path::PathBuf;
use tracing::debug;

/// Run a Dakota optimization for an MDOBridge problem file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Problem definition (JSON)
    #[arg(value_name = "PROBLEM")]
    problem: PathBuf,

    /// Directory the solver runs in [env: MB_WORK_DIR]
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Dakota executable [env: MB_DAKOTA_BIN]
    #[arg(long, value_name = "BIN")]
    dakota: Option<String>,

    /// Restart utility executable [env: MB_RESTART_UTIL_BIN]
    #[arg(long, value_name = "BIN")]
    restart_util: Option<String>,

    /// Analysis driver executable [env: MB_EVAL_BIN]
    #[arg(long, value_name = "BIN")]
    eval_bin: Option<String>,

    /// Full analysis driver command, replacing the one built from --eval-bin
    #[arg(long, value_name = "COMMAND")]
    driver: Option<String>,

    /// Parameters file format the driver is told to read (dakota or yaml)
    #[arg(long, value_name = "FORMAT")]
    format: Option<ParameterFormat>,

    /// Keep files left in the work directory by a previous run
    #[arg(long)]
    no_clean: bool,

    /// Only prepare the work directory and write the input files
    #[arg(long)]
    prepare_only: bool,

    /// Write the run report as JSON
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Write logs to a file in addition to stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::from_env().with_clean(!self.no_clean);
        if let Some(dir) = &self.work_dir {
            config = config.with_work_dir(dir);
        }
        if let Some(bin) = &self.dakota {
            config = config.with_dakota_bin(bin);
        }
        if let Some(bin) = &self.restart_util {
            config = config.with_restart_util_bin(bin);
        }
        if let Some(bin) = &self.eval_bin {
            config = config.with_eval_bin(bin);
        }
        if let Some(driver) = &self.driver {
            config = config.with_driver(driver);
        }
        if let Some(format) = self.format {
            config = config.with_parameter_format(format);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;
    debug!("Arguments: {:?}", cli);

    let problem = OptimizationProblem::from_json_file(&cli.problem)
        .with_context(|| format!("failed to load problem {}", cli.problem.display()))?;
    let runner = OptimizationRunner::new(problem, cli.runner_config())?;

    if cli.prepare_only {
        runner.prepare_workspace()?;
        runner.write_inputs()?;
        println!("Inputs written to {}", runner.config().work_dir.display());
        return Ok(());
    }

    let report = runner.run().await?;

    println!(
        "{}: {} evaluations",
        report.status.problem, report.status.evaluations_completed
    );
    if let Some(best) = report.best() {
        println!("best evaluation {}", best.eval_id);
        for (label, value) in report.labels.iter().zip(&best.parameters) {
            println!("  {label} = {value}");
        }
        for (name, value) in report.responses.iter().zip(&best.responses) {
            println!("  {name} = {value}");
        }
    }

    if let Some(path) = &cli.report {
        report
            .to_json_file(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }

    Ok(())
}
