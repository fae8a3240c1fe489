//! Models evaluated by the analysis driver, plus the example payloads that
//! ship with MDOBridge.

use mb_types::{ModelError, StructuredValues};
use std::collections::HashMap;
use tracing::debug;

/// Named scalar outputs of one model evaluation.
pub type ModelOutputs = HashMap<String, f64>;

/// A model mapping structured design variables to named scalar outputs.
pub trait Model: Send {
    fn name(&self) -> &str;

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        (**self).compute(inputs)
    }
}

/// Read a single-element input as a scalar.
pub fn scalar_input(model: &str, inputs: &StructuredValues, name: &str) -> Result<f64, ModelError> {
    let array = inputs.get(name).ok_or_else(|| ModelError::MissingInput {
        model: model.to_string(),
        input: name.to_string(),
    })?;
    match array.iter().next() {
        Some(&value) if array.len() == 1 => Ok(value),
        _ => Err(ModelError::InvalidInput {
            model: model.to_string(),
            input: name.to_string(),
            message: format!("expected a scalar, got shape {:?}", array.shape()),
        }),
    }
}

/// Read an input as a row-major vector of its elements.
pub fn vector_input(
    model: &str,
    inputs: &StructuredValues,
    name: &str,
) -> Result<Vec<f64>, ModelError> {
    inputs
        .get(name)
        .map(|array| array.iter().copied().collect())
        .ok_or_else(|| ModelError::MissingInput {
            model: model.to_string(),
            input: name.to_string(),
        })
}

/// Recomputes the wrapped model only every `calls_between` calls and replays
/// the frozen outputs in between.
///
/// Meant for the expensive discipline of a [`Coupled`] model, so the cheap
/// ones stay live. The call counter lives in this value: it spans the
/// evaluations of one process (an [`crate::Evaluator`] reused across points),
/// not separate `mb-eval` invocations, each of which starts from zero.
#[derive(Debug)]
pub struct Intermittent<M> {
    inner: M,
    calls_between: usize,
    calls: usize,
    compute_calls: usize,
    frozen: Option<ModelOutputs>,
}

impl<M: Model> Intermittent<M> {
    pub fn new(inner: M, calls_between: usize) -> Self {
        Self {
            inner,
            calls_between: calls_between.max(1),
            calls: 0,
            compute_calls: 0,
            frozen: None,
        }
    }

    /// Number of times the wrapped model actually ran.
    pub fn compute_calls(&self) -> usize {
        self.compute_calls
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Model> Model for Intermittent<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let due = self.calls % self.calls_between == 0;
        self.calls += 1;

        match &self.frozen {
            Some(frozen) if !due => Ok(frozen.clone()),
            _ => {
                let outputs = self.inner.compute(inputs)?;
                self.compute_calls += 1;
                self.frozen = Some(outputs.clone());
                Ok(outputs)
            }
        }
    }
}

/// `f = (x - 3)^2 + x*y + (y + 4)^2 - 3`, minimum -27.333 at (6.667, -7.333).
#[derive(Debug, Clone, Default)]
pub struct Paraboloid;

impl Model for Paraboloid {
    fn name(&self) -> &str {
        "paraboloid"
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let x = scalar_input(self.name(), inputs, "x")?;
        let y = scalar_input(self.name(), inputs, "y")?;
        let f = (x - 3.0).powi(2) + x * y + (y + 4.0).powi(2) - 3.0;
        Ok(HashMap::from([("f".to_string(), f)]))
    }
}

/// `obj = x^2 + y^2` with the constraint `c1 = sqrt(x + y) - 3`.
#[derive(Debug, Clone, Default)]
pub struct Quadratic;

impl Model for Quadratic {
    fn name(&self) -> &str {
        "quadratic"
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let x = scalar_input(self.name(), inputs, "x")?;
        let y = scalar_input(self.name(), inputs, "y")?;
        if x + y < 0.0 {
            return Err(ModelError::InvalidInput {
                model: self.name().to_string(),
                input: "x + y".to_string(),
                message: format!("sqrt of negative value {}", x + y),
            });
        }
        Ok(HashMap::from([
            ("obj".to_string(), x * x + y * y),
            ("c1".to_string(), (x + y).sqrt() - 3.0),
        ]))
    }
}

/// Rosenbrock function of a vector `x`, split into its two terms:
/// `f1 = m1 * sum((1 - x_i)^2)`, `f2 = m2 * sum((x_{i+1} - x_i^2)^2)` and
/// `f = f1 + f2`.
#[derive(Debug, Clone)]
pub struct Rosenbrock {
    pub multiplier_1: f64,
    pub multiplier_2: f64,
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Self {
            multiplier_1: 1.0,
            multiplier_2: 100.0,
        }
    }
}

impl Model for Rosenbrock {
    fn name(&self) -> &str {
        "rosenbrock"
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let x = rosenbrock_input(self.name(), inputs)?;
        let f1 = self.multiplier_1 * rosenbrock_f1(&x);
        let f2 = self.multiplier_2 * rosenbrock_f2(&x);

        Ok(HashMap::from([
            ("f1".to_string(), f1),
            ("f2".to_string(), f2),
            ("f".to_string(), f1 + f2),
        ]))
    }
}

/// A single Rosenbrock term as its own discipline, with its multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RosenbrockTerm {
    /// `f1 = m * sum((1 - x_i)^2)`
    F1(f64),
    /// `f2 = m * sum((x_{i+1} - x_i^2)^2)`
    F2(f64),
}

impl Model for RosenbrockTerm {
    fn name(&self) -> &str {
        match self {
            Self::F1(_) => "rosenbrock_f1",
            Self::F2(_) => "rosenbrock_f2",
        }
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let x = rosenbrock_input(self.name(), inputs)?;
        let (output, value) = match *self {
            Self::F1(m) => ("f1", m * rosenbrock_f1(&x)),
            Self::F2(m) => ("f2", m * rosenbrock_f2(&x)),
        };
        Ok(HashMap::from([(output.to_string(), value)]))
    }
}

fn rosenbrock_input(model: &str, inputs: &StructuredValues) -> Result<Vec<f64>, ModelError> {
    let x = vector_input(model, inputs, "x")?;
    if x.len() < 2 {
        return Err(ModelError::InvalidInput {
            model: model.to_string(),
            input: "x".to_string(),
            message: format!("needs at least 2 elements, got {}", x.len()),
        });
    }
    Ok(x)
}

fn rosenbrock_f1(x: &[f64]) -> f64 {
    x[..x.len() - 1].iter().map(|xi| (1.0 - xi).powi(2)).sum()
}

fn rosenbrock_f2(x: &[f64]) -> f64 {
    x.windows(2).map(|w| (w[1] - w[0] * w[0]).powi(2)).sum()
}

/// Disciplines evaluated on the same inputs, with their outputs merged and
/// optional totals summed from them.
pub struct Coupled {
    name: String,
    disciplines: Vec<Box<dyn Model>>,
    totals: Vec<(String, Vec<String>)>,
}

impl Coupled {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disciplines: Vec::new(),
            totals: Vec::new(),
        }
    }

    pub fn with_discipline(mut self, model: impl Model + 'static) -> Self {
        self.disciplines.push(Box::new(model));
        self
    }

    /// Add output `name` as the sum of the discipline outputs `parts`.
    pub fn with_total(mut self, name: impl Into<String>, parts: &[&str]) -> Self {
        self.totals
            .push((name.into(), parts.iter().map(|p| p.to_string()).collect()));
        self
    }
}

impl Model for Coupled {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&mut self, inputs: &StructuredValues) -> Result<ModelOutputs, ModelError> {
        let mut outputs = ModelOutputs::new();
        for discipline in &mut self.disciplines {
            outputs.extend(discipline.compute(inputs)?);
        }

        for (total, parts) in &self.totals {
            let sum = parts
                .iter()
                .map(|part| {
                    outputs.get(part).copied().ok_or_else(|| ModelError::MissingOutput {
                        model: self.name.clone(),
                        output: part.clone(),
                    })
                })
                .sum::<Result<f64, ModelError>>()?;
            outputs.insert(total.clone(), sum);
        }
        Ok(outputs)
    }
}

impl std::fmt::Debug for Coupled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let disciplines: Vec<&str> = self.disciplines.iter().map(|d| d.name()).collect();
        f.debug_struct("Coupled")
            .field("name", &self.name)
            .field("disciplines", &disciplines)
            .field("totals", &self.totals)
            .finish()
    }
}

/// Rosenbrock with `f1` recomputed every 900 calls and `f2` always live.
pub fn split_rosenbrock() -> Coupled {
    Coupled::new("rosenbrock_split")
        .with_discipline(Intermittent::new(RosenbrockTerm::F1(1.0), 900))
        .with_discipline(RosenbrockTerm::F2(100.0))
        .with_total("f", &["f1", "f2"])
}

type ModelFactory = Box<dyn Fn() -> Box<dyn Model> + Send + Sync>;

/// Name-based lookup of model constructors, used by the analysis driver to
/// instantiate the model a problem file names.
pub struct ModelRegistry {
    factories: HashMap<String, ModelFactory>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the bundled example models.
    pub fn with_examples() -> Self {
        let mut registry = Self::new();
        registry.register("paraboloid", || Box::new(Paraboloid));
        registry.register("quadratic", || Box::new(Quadratic));
        registry.register("rosenbrock", || Box::new(Rosenbrock::default()));
        registry.register("rosenbrock_split", || Box::new(split_rosenbrock()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Model> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering model '{}'", name);
        self.factories.insert(name, Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Model>, ModelError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ModelError::UnknownModel {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_examples()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .finish()
    }
}
