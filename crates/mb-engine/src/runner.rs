//! Drives a complete Dakota optimization: workspace preparation, input deck,
//! solver and restart-utility subprocesses, and history collection.

use mb_optimizer::{
    DakotaInput, EvaluationRecord, InterfaceConfig, ObjectiveDirection, OptimizationProblem,
    ParameterFormat, RunStatus, TabularData, VariableCodec,
};
use mb_types::{config_error, MbResult, SolverError, StructuredValues};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Name of the problem file the analysis driver loads from its evaluation
/// directory.
pub const PROBLEM_FILE: &str = "problem.json";

const STALE_EXTENSIONS: [&str; 4] = ["in", "out", "rst", "dat"];

/// Where and how the solver runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub work_dir: PathBuf,
    pub dakota_bin: String,
    pub restart_util_bin: String,
    /// Analysis driver binary Dakota forks per evaluation.
    pub eval_bin: String,
    /// Full driver command; overrides the one built from `eval_bin`.
    pub driver: Option<String>,
    pub parameter_format: ParameterFormat,
    pub input_file: String,
    pub output_file: String,
    pub restart_file: String,
    /// Remove stale solver files from `work_dir` before running.
    pub clean: bool,
    pub interface: InterfaceConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            dakota_bin: "dakota".to_string(),
            restart_util_bin: "dakota_restart_util".to_string(),
            eval_bin: "mb-eval".to_string(),
            driver: None,
            parameter_format: ParameterFormat::Dakota,
            input_file: "dakota.in".to_string(),
            output_file: "dakota.out".to_string(),
            restart_file: "dakota.rst".to_string(),
            clean: true,
            interface: InterfaceConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by `MB_DAKOTA_BIN`, `MB_RESTART_UTIL_BIN`,
    /// `MB_EVAL_BIN` and `MB_WORK_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bin) = std::env::var("MB_DAKOTA_BIN") {
            config.dakota_bin = bin;
        }
        if let Ok(bin) = std::env::var("MB_RESTART_UTIL_BIN") {
            config.restart_util_bin = bin;
        }
        if let Ok(bin) = std::env::var("MB_EVAL_BIN") {
            config.eval_bin = bin;
        }
        if let Ok(dir) = std::env::var("MB_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_dakota_bin(mut self, bin: impl Into<String>) -> Self {
        self.dakota_bin = bin.into();
        self
    }

    pub fn with_restart_util_bin(mut self, bin: impl Into<String>) -> Self {
        self.restart_util_bin = bin.into();
        self
    }

    pub fn with_eval_bin(mut self, bin: impl Into<String>) -> Self {
        self.eval_bin = bin.into();
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_parameter_format(mut self, format: ParameterFormat) -> Self {
        self.parameter_format = format;
        self
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// The driver command written into the interface block.
    pub fn analysis_driver(&self) -> String {
        if let Some(driver) = &self.driver {
            return driver.clone();
        }
        let format = match self.parameter_format {
            ParameterFormat::Dakota => "dakota",
            ParameterFormat::Yaml => "yaml",
        };
        format!("{} --problem {PROBLEM_FILE} --format {format}", self.eval_bin)
    }

    /// Interface settings with the resolved driver command.
    pub fn resolved_interface(&self) -> InterfaceConfig {
        InterfaceConfig {
            analysis_driver: self.analysis_driver(),
            ..self.interface.clone()
        }
    }

    pub fn input_path(&self) -> PathBuf {
        self.work_dir.join(&self.input_file)
    }

    pub fn template_path(&self) -> PathBuf {
        self.work_dir.join(&self.interface.template_dir)
    }

    pub fn tabular_path(&self) -> PathBuf {
        self.work_dir.join(&self.interface.tabular_file)
    }

    /// Top-level directory holding the per-evaluation directories. `None`
    /// unless it is a plain directory name inside `work_dir`.
    pub fn history_path(&self) -> Option<PathBuf> {
        let mut components = Path::new(&self.interface.work_directory)
            .components()
            .skip_while(|c| matches!(c, Component::CurDir));
        match components.next() {
            Some(Component::Normal(root)) => Some(self.work_dir.join(root)),
            _ => None,
        }
    }

    /// Directories the solver creates or cleans must stay inside `work_dir`.
    pub fn validate(&self) -> MbResult<()> {
        for (field, value) in [
            ("work_directory", &self.interface.work_directory),
            ("template_dir", &self.interface.template_dir),
        ] {
            let path = Path::new(value);
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if value.trim().is_empty() || escapes {
                return Err(config_error!(
                    "interface {} '{}' must be a relative path inside the work directory",
                    field,
                    value
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a finished optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub labels: Vec<String>,
    pub responses: Vec<String>,
    pub evaluations: Vec<EvaluationRecord>,
}

impl RunReport {
    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.status.best.as_ref()
    }

    /// The best evaluation's parameters as structured design variables.
    pub fn best_design(&self, codec: &VariableCodec) -> MbResult<Option<StructuredValues>> {
        match self.best() {
            Some(best) => Ok(Some(codec.unflatten(&best.parameters)?)),
            None => Ok(None),
        }
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> MbResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Runs one problem through Dakota.
#[derive(Debug)]
pub struct OptimizationRunner {
    problem: OptimizationProblem,
    codec: VariableCodec,
    config: RunnerConfig,
}

impl OptimizationRunner {
    pub fn new(problem: OptimizationProblem, config: RunnerConfig) -> MbResult<Self> {
        config.validate()?;
        problem.validate()?;
        let codec = problem.codec()?;
        info!(
            "Prepared runner for '{}' ({} flat parameters) in {}",
            problem.name,
            codec.len(),
            config.work_dir.display()
        );
        Ok(Self {
            problem,
            codec,
            config,
        })
    }

    pub fn problem(&self) -> &OptimizationProblem {
        &self.problem
    }

    pub fn codec(&self) -> &VariableCodec {
        &self.codec
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Create the work and template directories and clear out files left by
    /// a previous run. Only `work_dir` is touched.
    pub fn prepare_workspace(&self) -> MbResult<()> {
        let work_dir = &self.config.work_dir;
        std::fs::create_dir_all(work_dir)?;

        if self.config.clean {
            for entry in std::fs::read_dir(work_dir)? {
                let path = entry?.path();
                let stale = path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| STALE_EXTENSIONS.contains(&ext));
                if stale {
                    debug!("Removing stale {}", path.display());
                    std::fs::remove_file(&path)?;
                }
            }
            if let Some(history) = self.config.history_path().filter(|p| p.is_dir()) {
                debug!("Removing previous evaluation history {}", history.display());
                std::fs::remove_dir_all(history)?;
            }
        }

        std::fs::create_dir_all(self.config.template_path())?;
        Ok(())
    }

    /// Write the problem file for the analysis driver and the input deck.
    pub fn write_inputs(&self) -> MbResult<()> {
        self.problem
            .to_json_file(self.config.template_path().join(PROBLEM_FILE))?;

        let interface = self.config.resolved_interface();
        DakotaInput::new(&self.problem, &self.codec, &interface).write(self.config.input_path())?;
        info!(
            "Wrote {} with driver '{}'",
            self.config.input_path().display(),
            interface.analysis_driver
        );
        Ok(())
    }

    /// Run the solver, then convert its restart file into tabular history.
    pub async fn run_solver(&self) -> MbResult<()> {
        let config = &self.config;
        run_command(
            &config.dakota_bin,
            &[
                "-i",
                &config.input_file,
                "-o",
                &config.output_file,
                "-write_restart",
                &config.restart_file,
            ],
            &config.work_dir,
        )
        .await?;

        run_command(
            &config.restart_util_bin,
            &["to_tabular", &config.restart_file, &config.interface.tabular_file],
            &config.work_dir,
        )
        .await
    }

    /// Read the tabular history into `status`.
    pub fn collect(&self, status: &mut RunStatus) -> MbResult<Vec<EvaluationRecord>> {
        let path = self.config.tabular_path();
        if !path.is_file() {
            return Err(SolverError::MissingOutput { path }.into());
        }

        let responses = self.response_names();
        let responses: Vec<&str> = responses.iter().map(String::as_str).collect();
        let data = TabularData::read(&path, &self.codec, &responses)?;
        if data.records.is_empty() {
            warn!("{} holds no evaluations", path.display());
        }
        for record in &data.records {
            status.record(record);
        }
        Ok(data.records)
    }

    /// Full run: prepare, write inputs, solve and collect.
    pub async fn run(&self) -> MbResult<RunReport> {
        let mut status = RunStatus::new(self.problem.name.clone(), ObjectiveDirection::Minimize);
        status.mark_running();
        info!("Starting optimization '{}' (run {})", self.problem.name, status.id);

        let outcome = match self.execute().await {
            Ok(()) => self.collect(&mut status),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(evaluations) => {
                status.mark_completed();
                match status.best.as_ref().and_then(EvaluationRecord::objective) {
                    Some(best) => info!(
                        "Optimization '{}' finished after {} evaluations, best objective {}",
                        self.problem.name, status.evaluations_completed, best
                    ),
                    None => info!(
                        "Optimization '{}' finished without a usable evaluation",
                        self.problem.name
                    ),
                }
                Ok(RunReport {
                    status,
                    labels: self.codec.labels().map(str::to_string).collect(),
                    responses: self.response_names(),
                    evaluations,
                })
            }
            Err(e) => {
                status.mark_failed(e.to_string());
                error!("Optimization '{}' (run {}) failed: {}", self.problem.name, status.id, e);
                Err(e)
            }
        }
    }

    async fn execute(&self) -> MbResult<()> {
        self.prepare_workspace()?;
        self.write_inputs()?;
        self.run_solver().await
    }

    fn response_names(&self) -> Vec<String> {
        self.problem
            .ordered_responses()
            .into_iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

async fn run_command(program: &str, args: &[&str], dir: &Path) -> MbResult<()> {
    info!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| SolverError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SolverError::NonZeroExit {
            program: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    debug!(
        "{} finished ({} bytes of stdout)",
        program,
        output.stdout.len()
    );
    Ok(())
}
