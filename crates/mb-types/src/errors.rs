use std::path::PathBuf;

use thiserror::Error;

/// Main error type for MDOBridge
#[derive(Error, Debug)]
pub enum MbError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("File format error: {0}")]
    FileFormat(#[from] FileFormatError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Layout and validation failures raised while mapping structured design
/// variables to the flat parameter vector and back.
///
/// Every variant names the offending variable (or label) so a malformed
/// problem definition can be fixed without a debugger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing design variable: {name}")]
    MissingVariable { name: String },

    #[error("Unknown design variable: {name}")]
    UnknownVariable { name: String },

    #[error("Length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Duplicate label '{label}' generated by '{first}' and '{second}'")]
    DuplicateLabel {
        label: String,
        first: String,
        second: String,
    },

    #[error("Missing label '{label}' for element {index} of '{variable}'")]
    MissingLabel {
        label: String,
        variable: String,
        index: usize,
    },

    #[error("Unknown label: {label}")]
    UnknownLabel { label: String },

    #[error("Invalid bounds for element {index} of '{variable}': lower {lower} > upper {upper}")]
    InvalidBounds {
        variable: String,
        index: usize,
        lower: f64,
        upper: f64,
    },
}

/// Errors from the external solver processes
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with status {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Solver output not found: {}", path.display())]
    MissingOutput { path: PathBuf },
}

/// Errors while reading the text files exchanged with the solver
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("Parameters file line {line}: {message}")]
    ParameterFile { line: usize, message: String },

    #[error("Tabular data line {line}: {message}")]
    TabularData { line: usize, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised by models during an evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown model: {name}")]
    UnknownModel { name: String },

    #[error("Model '{model}' is missing input '{input}'")]
    MissingInput { model: String, input: String },

    #[error("Model '{model}' did not produce output '{output}'")]
    MissingOutput { model: String, output: String },

    #[error("Model '{model}' rejected input '{input}': {message}")]
    InvalidInput {
        model: String,
        input: String,
        message: String,
    },
}

/// Result type alias for MDOBridge operations
pub type MbResult<T> = Result<T, MbError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::MbError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::MbError::Config(format!($($arg)*))
    };
}
