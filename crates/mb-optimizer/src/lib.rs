//! # mb-optimizer
//!
//! Design-space handling and the Dakota file boundary for MDOBridge.
//!
//! Provides the variable codec that flattens named, arbitrarily-shaped design
//! variables into the solver's flat parameter vector, problem definitions,
//! rendering and parsing of the files exchanged with Dakota, and run
//! tracking.

pub mod codec;
mod dakota;
mod problem;
mod trial;

pub use codec::{build, flatten, flatten_bounds, unflatten, VariableCodec};
pub use dakota::{
    parse_parameters, read_parameters, render_results, write_results, DakotaInput,
    InterfaceConfig, ParameterFormat, TabularData,
};
pub use problem::{
    nested_to_array, MethodOptions, OptimizationProblem, ResponseDef, ResponseKind, VariableDef,
};
pub use trial::{EvaluationRecord, ObjectiveDirection, RunId, RunState, RunStatus};
