//! The analysis driver: one parameters file in, one results file out.

use crate::model::{Model, ModelRegistry};
use mb_optimizer::{
    read_parameters, write_results, OptimizationProblem, ParameterFormat, VariableCodec,
};
use mb_types::{CodecError, MbResult, ModelError};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Evaluates a problem's model at points supplied by the solver.
pub struct Evaluator {
    problem: OptimizationProblem,
    codec: VariableCodec,
    model: Box<dyn Model>,
}

impl Evaluator {
    /// Validate `problem` and instantiate the model it names from `registry`.
    pub fn new(problem: OptimizationProblem, registry: &ModelRegistry) -> MbResult<Self> {
        let model = registry.create(&problem.model)?;
        Self::with_model(problem, model)
    }

    pub fn with_model(problem: OptimizationProblem, model: Box<dyn Model>) -> MbResult<Self> {
        problem.validate()?;
        let codec = problem.codec()?;
        Ok(Self {
            problem,
            codec,
            model,
        })
    }

    pub fn problem(&self) -> &OptimizationProblem {
        &self.problem
    }

    pub fn codec(&self) -> &VariableCodec {
        &self.codec
    }

    /// Evaluate at a labeled point, returning scaled responses in solver order.
    pub fn evaluate(&mut self, parameters: &HashMap<String, f64>) -> MbResult<Vec<f64>> {
        let inputs = self.codec.unflatten_labeled(parameters)?;
        let outputs = self.model.compute(&inputs)?;

        let values = self
            .problem
            .ordered_responses()
            .into_iter()
            .map(|response| {
                outputs
                    .get(&response.name)
                    .map(|value| value * response.scaler)
                    .ok_or_else(|| ModelError::MissingOutput {
                        model: self.model.name().to_string(),
                        output: response.name.clone(),
                    })
            })
            .collect::<Result<Vec<f64>, ModelError>>()?;

        debug!("Responses for '{}': {:?}", self.problem.name, values);
        Ok(values)
    }

    /// Evaluate at a flat point given in codec order.
    pub fn evaluate_point(&mut self, point: &[f64]) -> MbResult<Vec<f64>> {
        if point.len() != self.codec.len() {
            return Err(CodecError::LengthMismatch {
                expected: self.codec.len(),
                actual: point.len(),
            }
            .into());
        }
        let labeled: HashMap<String, f64> = self
            .codec
            .labels()
            .map(str::to_string)
            .zip(point.iter().copied())
            .collect();
        self.evaluate(&labeled)
    }

    /// Read `params_path`, evaluate, and write `results_path`. Nothing is
    /// written when any step fails.
    pub fn evaluate_files<P: AsRef<Path>, R: AsRef<Path>>(
        &mut self,
        params_path: P,
        results_path: R,
        format: ParameterFormat,
    ) -> MbResult<Vec<f64>> {
        let params_path = params_path.as_ref();
        let results_path = results_path.as_ref();
        info!(
            "Evaluating '{}' with model '{}' from {}",
            self.problem.name,
            self.model.name(),
            params_path.display()
        );

        let parameters = read_parameters(params_path, format)?;
        let values = self.evaluate(&parameters)?;
        write_results(results_path, &values)?;

        info!("Wrote {} responses to {}", values.len(), results_path.display());
        Ok(values)
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("problem", &self.problem.name)
            .field("model", &self.model.name())
            .field("parameters", &self.codec.len())
            .finish()
    }
}

/// One-shot evaluation used by the `mb-eval` binary.
pub fn evaluate<P: AsRef<Path>, R: AsRef<Path>>(
    problem: OptimizationProblem,
    registry: &ModelRegistry,
    params_path: P,
    results_path: R,
    format: ParameterFormat,
) -> MbResult<Vec<f64>> {
    Evaluator::new(problem, registry)?.evaluate_files(params_path, results_path, format)
}
