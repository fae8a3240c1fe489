//! # mb-engine
//!
//! Runs MDOBridge problems: the models a problem can name, the analysis
//! driver Dakota forks for every evaluation, and the runner that prepares a
//! work directory and drives the solver binaries.

pub mod evaluate;
pub mod logging;
pub mod model;
pub mod runner;

pub use evaluate::{evaluate, Evaluator};
pub use model::{
    split_rosenbrock, Coupled, Intermittent, Model, ModelOutputs, ModelRegistry, Paraboloid,
    Quadratic, Rosenbrock, RosenbrockTerm,
};
pub use runner::{OptimizationRunner, RunReport, RunnerConfig, PROBLEM_FILE};
