//! Optimization problem definitions loaded from JSON problem files.

use mb_types::{validation_error, DesignVariableSpec, MbError, MbResult, StructuredValues};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::codec::VariableCodec;

/// One design variable as written in a problem file.
///
/// `bounds` is a nested array whose trailing dimension holds
/// `[lower, upper]`, e.g. `[[0.0, 1.0], [0.0, 1.0]]` for a 2-vector. `shape`
/// is inferred from `bounds` when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    pub bounds: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Value>,
}

impl VariableDef {
    pub fn scalar(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            shape: None,
            bounds: serde_json::json!([lower, upper]),
            initial: None,
        }
    }

    pub fn array(name: impl Into<String>, bounds: Value) -> Self {
        Self {
            name: name.into(),
            shape: None,
            bounds,
            initial: None,
        }
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_initial(mut self, initial: Value) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Convert into a codec spec; bound contents are checked by the codec.
    pub fn to_spec(&self) -> MbResult<DesignVariableSpec> {
        let bounds = nested_to_array(&self.name, &self.bounds)?;
        let shape = match &self.shape {
            Some(shape) => shape.clone(),
            None => match bounds.shape().split_last() {
                Some((&2, rest)) => rest.to_vec(),
                _ => {
                    return Err(validation_error!(
                        "bounds for '{}' must end in a [lower, upper] pair, got shape {:?}",
                        self.name,
                        bounds.shape()
                    ))
                }
            },
        };
        Ok(DesignVariableSpec::new(self.name.clone(), shape, bounds))
    }
}

/// Whether a response is minimized or constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Objective,
    InequalityConstraint,
}

/// A model output reported back to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDef {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ResponseKind,
    /// Multiplier applied to the model output before it is written.
    #[serde(default = "default_scaler")]
    pub scaler: f64,
    /// Upper bound for inequality constraints (`g(x) <= upper`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
}

fn default_kind() -> ResponseKind {
    ResponseKind::Objective
}

fn default_scaler() -> f64 {
    1.0
}

/// Solver method settings written into the input deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodOptions {
    /// Dakota method keyword (e.g. "coliny_cobyla").
    pub method: String,
    pub max_function_evaluations: Option<usize>,
    pub max_iterations: Option<usize>,
    pub convergence_tolerance: Option<f64>,
    /// How many evaluations Dakota may run at once.
    pub evaluation_concurrency: usize,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            method: "coliny_cobyla".to_string(),
            max_function_evaluations: None,
            max_iterations: None,
            convergence_tolerance: None,
            evaluation_concurrency: 1,
        }
    }
}

/// A complete optimization problem: design space, responses and solver
/// settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProblem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Registry name of the model to evaluate.
    pub model: String,
    pub variables: Vec<VariableDef>,
    pub responses: Vec<ResponseDef>,
    #[serde(default)]
    pub method: MethodOptions,
}

impl OptimizationProblem {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: model.into(),
            variables: Vec::new(),
            responses: Vec::new(),
            method: MethodOptions::default(),
        }
    }

    pub fn add_variable(mut self, variable: VariableDef) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn add_objective(mut self, name: impl Into<String>) -> Self {
        self.responses.push(ResponseDef {
            name: name.into(),
            kind: ResponseKind::Objective,
            scaler: 1.0,
            upper_bound: None,
        });
        self
    }

    pub fn add_constraint(mut self, name: impl Into<String>, upper_bound: f64) -> Self {
        self.responses.push(ResponseDef {
            name: name.into(),
            kind: ResponseKind::InequalityConstraint,
            scaler: 1.0,
            upper_bound: Some(upper_bound),
        });
        self
    }

    /// Set the output scaler of an already declared response. Unknown names
    /// leave the problem unchanged and are logged.
    pub fn with_scaler(mut self, name: &str, scaler: f64) -> Self {
        match self.responses.iter_mut().find(|r| r.name == name) {
            Some(response) => response.scaler = scaler,
            None => warn!(
                "Ignoring scaler for undeclared response '{}' in problem '{}'",
                name, self.name
            ),
        }
        self
    }

    pub fn with_method(mut self, method: MethodOptions) -> Self {
        self.method = method;
        self
    }

    pub fn from_json_str(text: &str) -> MbResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let problem = Self::from_json_str(&text)?;
        info!(
            "Loaded problem '{}' from {} ({} variables, {} responses)",
            problem.name,
            path.display(),
            problem.variables.len(),
            problem.responses.len()
        );
        Ok(problem)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> MbResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn design_specs(&self) -> MbResult<Vec<DesignVariableSpec>> {
        self.variables.iter().map(VariableDef::to_spec).collect()
    }

    pub fn codec(&self) -> MbResult<VariableCodec> {
        let codec = VariableCodec::new(self.design_specs()?)?;
        debug!(
            "Built codec for '{}' with {} flat parameters",
            self.name,
            codec.len()
        );
        Ok(codec)
    }

    /// Responses in solver order: objectives first, then constraints.
    pub fn ordered_responses(&self) -> Vec<&ResponseDef> {
        let objectives = self
            .responses
            .iter()
            .filter(|r| r.kind == ResponseKind::Objective);
        let constraints = self
            .responses
            .iter()
            .filter(|r| r.kind == ResponseKind::InequalityConstraint);
        objectives.chain(constraints).collect()
    }

    pub fn objectives(&self) -> impl Iterator<Item = &ResponseDef> {
        self.responses
            .iter()
            .filter(|r| r.kind == ResponseKind::Objective)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ResponseDef> {
        self.responses
            .iter()
            .filter(|r| r.kind == ResponseKind::InequalityConstraint)
    }

    /// Initial values of every variable, or `None` when no variable has one.
    pub fn initial_values(&self) -> MbResult<Option<StructuredValues>> {
        let given = self.variables.iter().filter(|v| v.initial.is_some()).count();
        if given == 0 {
            return Ok(None);
        }
        if given != self.variables.len() {
            return Err(validation_error!(
                "initial values given for {} of {} variables; provide all or none",
                given,
                self.variables.len()
            ));
        }

        let mut values = StructuredValues::with_capacity(self.variables.len());
        for variable in &self.variables {
            if let Some(initial) = &variable.initial {
                values.insert(
                    variable.name.clone(),
                    nested_to_array(&variable.name, initial)?,
                );
            }
        }
        Ok(Some(values))
    }

    /// The flattened initial point, if the problem declares one.
    pub fn initial_point(&self, codec: &VariableCodec) -> MbResult<Option<Vec<f64>>> {
        match self.initial_values()? {
            Some(values) => Ok(Some(codec.flatten(&values)?)),
            None => Ok(None),
        }
    }

    /// Check everything that can be checked before the solver starts.
    pub fn validate(&self) -> MbResult<()> {
        if self.model.trim().is_empty() {
            return Err(validation_error!("problem '{}' names no model", self.name));
        }
        if self.variables.is_empty() {
            return Err(validation_error!("problem '{}' has no design variables", self.name));
        }
        if self.objectives().next().is_none() {
            return Err(validation_error!("problem '{}' has no objective", self.name));
        }

        let mut seen = HashSet::new();
        for response in &self.responses {
            // Response names become quoted descriptors and tabular headers.
            if response.name.is_empty()
                || response.name.contains(|c: char| c.is_whitespace() || c == '"')
            {
                return Err(validation_error!(
                    "response name '{}' must be non-empty without spaces or quotes",
                    response.name
                ));
            }
            if !seen.insert(response.name.as_str()) {
                return Err(validation_error!("duplicate response '{}'", response.name));
            }
            if !response.scaler.is_finite() {
                return Err(validation_error!(
                    "scaler for '{}' must be finite, got {}",
                    response.name,
                    response.scaler
                ));
            }
        }

        let codec = self.codec()?;
        let (lower, upper) = codec.flatten_bounds()?;
        if let Some(point) = self.initial_point(&codec)? {
            for (i, parameter) in codec.parameters().iter().enumerate() {
                if point[i] < lower[i] || point[i] > upper[i] {
                    return Err(validation_error!(
                        "initial value {} of '{}' lies outside [{}, {}]",
                        point[i],
                        parameter.label,
                        lower[i],
                        upper[i]
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Convert a nested JSON array (or a bare number) into an n-dimensional
/// array, inferring its shape from the nesting.
pub fn nested_to_array(name: &str, value: &Value) -> MbResult<ArrayD<f64>> {
    let mut data = Vec::new();
    let shape = collect_nested(name, value, &mut data)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| validation_error!("array for '{}' is malformed: {}", name, e))
}

fn collect_nested(name: &str, value: &Value, data: &mut Vec<f64>) -> MbResult<Vec<usize>> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| ragged(name, "non-finite number"))?;
            data.push(v);
            Ok(Vec::new())
        }
        Value::Array(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = collect_nested(name, item, data)?;
                match &inner {
                    Some(expected) if *expected != shape => {
                        return Err(ragged(name, "rows of differing shape"));
                    }
                    Some(_) => {}
                    None => inner = Some(shape),
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Ok(shape)
        }
        other => Err(ragged(name, &format!("unexpected value {other}"))),
    }
}

fn ragged(name: &str, reason: &str) -> MbError {
    validation_error!("array for '{}' is not rectangular: {}", name, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paraboloid() -> OptimizationProblem {
        OptimizationProblem::new("paraboloid", "paraboloid")
            .add_variable(VariableDef::scalar("x", 3.0, 8.0).with_initial(json!(4.0)))
            .add_variable(VariableDef::scalar("y", 2.0, 10.0).with_initial(json!(3.0)))
            .add_objective("f")
    }

    #[test]
    fn nested_arrays_infer_shape() {
        let array = nested_to_array("b", &json!([[[0.0, 1.0], [2.0, 3.0]]])).unwrap();
        assert_eq!(array.shape(), &[1, 2, 2]);
        assert_eq!(array.iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0]);

        let scalar = nested_to_array("s", &json!(2.5)).unwrap();
        assert_eq!(scalar.shape(), &[] as &[usize]);
    }

    #[test]
    fn ragged_arrays_are_rejected() {
        let err = nested_to_array("b", &json!([[0.0, 1.0], [2.0]])).unwrap_err();
        assert!(matches!(err, MbError::Validation(ref m) if m.contains("'b'")));

        assert!(nested_to_array("b", &json!(["low", "high"])).is_err());
    }

    #[test]
    fn variable_shape_is_inferred_from_bounds() {
        let scalar = VariableDef::scalar("x", 0.0, 1.0).to_spec().unwrap();
        assert!(scalar.shape.is_empty());

        let vector = VariableDef::array("x", json!([[0.0, 1.0], [0.0, 1.0]]))
            .to_spec()
            .unwrap();
        assert_eq!(vector.shape, vec![2]);

        let bad = VariableDef::array("x", json!([[0.0, 1.0, 2.0]])).to_spec();
        assert!(bad.is_err());
    }

    #[test]
    fn problem_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problem.json");

        let problem = paraboloid().with_method(MethodOptions {
            max_function_evaluations: Some(50),
            ..MethodOptions::default()
        });
        problem.to_json_file(&path).unwrap();

        let loaded = OptimizationProblem::from_json_file(&path).unwrap();
        assert_eq!(loaded, problem);
    }

    #[test]
    fn defaults_fill_sparse_problem_files() {
        let problem = OptimizationProblem::from_json_str(
            r#"{
                "name": "test",
                "model": "quadratic",
                "variables": [{"name": "x", "bounds": [[0.0, 1.0], [0.0, 1.0]]}],
                "responses": [{"name": "y"}]
            }"#,
        )
        .unwrap();

        assert_eq!(problem.method, MethodOptions::default());
        assert_eq!(problem.responses[0].kind, ResponseKind::Objective);
        assert_eq!(problem.responses[0].scaler, 1.0);
        assert_eq!(problem.codec().unwrap().len(), 2);
    }

    #[test]
    fn scaler_for_undeclared_response_is_logged_and_ignored() {
        use tracing_subscriber::{fmt, prelude::*};

        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("problem.log");
        let file = std::fs::File::create(&log_path).unwrap();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false),
        );

        let problem = tracing::subscriber::with_default(subscriber, || {
            paraboloid().with_scaler("g", 10.0)
        });

        assert_eq!(problem, paraboloid());
        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("WARN"));
        assert!(content.contains("undeclared response 'g'"));
    }

    #[test]
    fn responses_are_ordered_objectives_first() {
        let problem = OptimizationProblem::new("p", "quadratic")
            .add_variable(VariableDef::scalar("x", 0.0, 1.0))
            .add_constraint("c1", 0.0)
            .add_objective("obj")
            .with_scaler("obj", -2.0);

        let names: Vec<&str> = problem
            .ordered_responses()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["obj", "c1"]);
        assert_eq!(problem.ordered_responses()[0].scaler, -2.0);
    }

    #[test]
    fn initial_point_flattens_in_codec_order() {
        let problem = OptimizationProblem::new("test", "simple")
            .add_variable(
                VariableDef::array("x", json!([[0.0, 1.0], [0.0, 1.0]]))
                    .with_initial(json!([0.0, 0.25])),
            )
            .add_objective("y");
        let codec = problem.codec().unwrap();
        assert_eq!(problem.initial_point(&codec).unwrap(), Some(vec![0.0, 0.25]));
    }

    #[test]
    fn partial_initial_values_are_rejected() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 0.0, 1.0).with_initial(json!(0.5)))
            .add_variable(VariableDef::scalar("y", 0.0, 1.0))
            .add_objective("f");
        assert!(matches!(problem.initial_values(), Err(MbError::Validation(_))));
    }

    #[test]
    fn validate_accepts_well_formed_problem() {
        paraboloid().validate().unwrap();
    }

    #[test]
    fn validate_rejects_initial_point_out_of_bounds() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 3.0, 8.0).with_initial(json!(9.0)))
            .add_objective("f");
        let err = problem.validate().unwrap_err();
        assert!(err.to_string().contains("x_0"));
    }

    #[test]
    fn validate_surfaces_codec_errors() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("a.b", 0.0, 1.0))
            .add_variable(VariableDef::scalar("a_b", 0.0, 1.0))
            .add_objective("f");
        assert!(matches!(
            problem.validate(),
            Err(MbError::Codec(mb_types::CodecError::DuplicateLabel { .. }))
        ));

        let inverted = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 1.0, 0.0))
            .add_objective("f");
        assert!(matches!(
            inverted.validate(),
            Err(MbError::Codec(mb_types::CodecError::InvalidBounds { .. }))
        ));
    }

    #[test]
    fn validate_rejects_missing_objective_and_duplicates() {
        let no_objective = OptimizationProblem::new("p", "quadratic")
            .add_variable(VariableDef::scalar("x", 0.0, 1.0))
            .add_constraint("c1", 0.0);
        assert!(no_objective.validate().is_err());

        let duplicate = paraboloid().add_objective("f");
        assert!(duplicate.validate().is_err());
    }
}
