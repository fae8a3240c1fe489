//! Text files exchanged with Dakota: the input deck, per-evaluation
//! parameters and results files, and the tabular evaluation history.
//!
//! Everything here renders or parses; the layout itself comes from
//! [`VariableCodec`].

use mb_types::{FileFormatError, MbError, MbResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::codec::VariableCodec;
use crate::problem::OptimizationProblem;
use crate::trial::EvaluationRecord;

/// File names and driver command wired into the interface block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Parameters file Dakota writes for each evaluation.
    pub parameters_file: String,
    /// Results file the analysis driver must write.
    pub results_file: String,
    /// Directory whose contents are copied into every evaluation directory.
    pub template_dir: String,
    /// Command Dakota forks for each evaluation; the parameters and results
    /// paths are appended as its last two arguments.
    pub analysis_driver: String,
    /// Base name of the per-evaluation work directories.
    pub work_directory: String,
    pub tabular_file: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            parameters_file: "params.in".to_string(),
            results_file: "results.out".to_string(),
            template_dir: "template_dir".to_string(),
            analysis_driver: "mb-eval --problem problem.json".to_string(),
            work_directory: "run_history/run".to_string(),
            tabular_file: "dakota_data.dat".to_string(),
        }
    }
}

/// The Dakota input deck for one problem.
#[derive(Debug, Clone)]
pub struct DakotaInput<'a> {
    problem: &'a OptimizationProblem,
    codec: &'a VariableCodec,
    interface: &'a InterfaceConfig,
}

impl<'a> DakotaInput<'a> {
    pub fn new(
        problem: &'a OptimizationProblem,
        codec: &'a VariableCodec,
        interface: &'a InterfaceConfig,
    ) -> Self {
        Self {
            problem,
            codec,
            interface,
        }
    }

    pub fn render(&self) -> MbResult<String> {
        let (lower, upper) = self.codec.flatten_bounds()?;
        let initial = self.problem.initial_point(self.codec)?;
        let method = &self.problem.method;
        let interface = self.interface;

        let mut deck = String::new();
        deck.push_str(&format!(
            "# Dakota input file for problem '{}'\n",
            self.problem.name
        ));
        deck.push_str("environment\n");
        deck.push_str("  tabular_data\n");
        deck.push_str(&format!(
            "    tabular_data_file {}\n\n",
            quote(&interface.tabular_file)
        ));

        deck.push_str("method\n");
        deck.push_str(&format!("  {}\n", method.method));
        if let Some(n) = method.max_function_evaluations {
            deck.push_str(&format!("    max_function_evaluations {n}\n"));
        }
        if let Some(n) = method.max_iterations {
            deck.push_str(&format!("    max_iterations {n}\n"));
        }
        if let Some(tol) = method.convergence_tolerance {
            deck.push_str(&format!("    convergence_tolerance {}\n", number(tol)));
        }
        deck.push('\n');

        deck.push_str("variables\n");
        deck.push_str(&format!("  continuous_design {}\n", self.codec.len()));
        deck.push_str(&format!(
            "    descriptors {}\n",
            join_quoted(self.codec.labels())
        ));
        deck.push_str(&format!("    lower_bounds {}\n", join_numbers(&lower)));
        deck.push_str(&format!("    upper_bounds {}\n", join_numbers(&upper)));
        if let Some(point) = initial {
            deck.push_str(&format!("    initial_point {}\n", join_numbers(&point)));
        }
        deck.push('\n');

        deck.push_str("interface\n");
        deck.push_str("  fork\n");
        deck.push_str("    asynchronous\n");
        deck.push_str(&format!(
            "      evaluation_concurrency {}\n",
            method.evaluation_concurrency.max(1)
        ));
        deck.push_str(&format!(
            "    parameters_file {}\n",
            quote(&interface.parameters_file)
        ));
        deck.push_str(&format!(
            "    results_file {}\n",
            quote(&interface.results_file)
        ));
        deck.push_str(&format!(
            "    copy_files {}\n",
            quote(&format!("{}/*", interface.template_dir.trim_end_matches('/')))
        ));
        deck.push_str(&format!(
            "    analysis_driver {}\n",
            quote(&interface.analysis_driver)
        ));
        deck.push_str("    work_directory\n");
        deck.push_str(&format!(
            "      named {}\n",
            quote(&interface.work_directory)
        ));
        deck.push_str("      directory_tag\n");
        deck.push_str("      directory_save\n");
        deck.push_str("    file_save\n\n");

        let objectives: Vec<_> = self.problem.objectives().collect();
        let constraints: Vec<_> = self.problem.constraints().collect();
        deck.push_str("responses\n");
        deck.push_str(&format!("  objective_functions {}\n", objectives.len()));
        if !constraints.is_empty() {
            let bounds: Vec<f64> = constraints
                .iter()
                .map(|c| c.upper_bound.unwrap_or(0.0))
                .collect();
            deck.push_str(&format!(
                "  nonlinear_inequality_constraints {}\n",
                constraints.len()
            ));
            deck.push_str(&format!("    upper_bounds {}\n", join_numbers(&bounds)));
        }
        deck.push_str(&format!(
            "  descriptors {}\n",
            join_quoted(
                self.problem
                    .ordered_responses()
                    .into_iter()
                    .map(|r| r.name.as_str())
            )
        ));
        deck.push_str("  no_gradients\n");
        deck.push_str("  no_hessians\n");

        Ok(deck)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> MbResult<()> {
        let deck = self.render()?;
        std::fs::write(path.as_ref(), deck)?;
        debug!("Wrote Dakota input deck to {}", path.as_ref().display());
        Ok(())
    }
}

/// Format of the per-evaluation parameters file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterFormat {
    /// Dakota's standard parameters file (`value label` lines).
    #[default]
    Dakota,
    /// A flat YAML mapping `label: value`.
    Yaml,
}

impl FromStr for ParameterFormat {
    type Err = MbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dakota" => Ok(Self::Dakota),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(MbError::Config(format!(
                "unknown parameters format '{other}' (expected 'dakota' or 'yaml')"
            ))),
        }
    }
}

/// Parse a parameters file into a label -> value mapping.
pub fn parse_parameters(text: &str, format: ParameterFormat) -> MbResult<HashMap<String, f64>> {
    match format {
        ParameterFormat::Dakota => parse_dakota_parameters(text),
        ParameterFormat::Yaml => parse_yaml_parameters(text),
    }
}

pub fn read_parameters<P: AsRef<Path>>(
    path: P,
    format: ParameterFormat,
) -> MbResult<HashMap<String, f64>> {
    let text = std::fs::read_to_string(path)?;
    parse_parameters(&text, format)
}

/// Read the `N variables` block of a Dakota parameters file. The function,
/// derivative and analysis sections that follow it are ignored.
fn parse_dakota_parameters(text: &str) -> MbResult<HashMap<String, f64>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| param_error(1, "file is empty"))?;
    let count = match header.split_whitespace().collect::<Vec<_>>().as_slice() {
        [count, "variables"] => count
            .parse::<usize>()
            .map_err(|_| param_error(header_line, "variable count is not an integer"))?,
        _ => {
            return Err(param_error(
                header_line,
                &format!("expected '<N> variables', found '{header}'"),
            ))
        }
    };

    // Not pre-sized from `count`, which comes straight from the file.
    let mut values = HashMap::new();
    for _ in 0..count {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| param_error(header_line, "file ends inside the variables block"))?;
        let mut fields = line.split_whitespace();
        let (Some(value), Some(label), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(param_error(line_no, "expected '<value> <label>'"));
        };
        let value = value
            .parse::<f64>()
            .map_err(|_| param_error(line_no, &format!("'{value}' is not a number")))?;
        if values.insert(label.to_string(), value).is_some() {
            return Err(param_error(line_no, &format!("label '{label}' repeated")));
        }
    }

    Ok(values)
}

fn parse_yaml_parameters(text: &str) -> MbResult<HashMap<String, f64>> {
    let raw: HashMap<String, serde_yaml::Value> =
        serde_yaml::from_str(text).map_err(FileFormatError::Yaml)?;

    raw.into_iter()
        .map(|(label, value)| {
            let number = match &value {
                serde_yaml::Value::Number(n) => n.as_f64(),
                serde_yaml::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.map(|v| (label.clone(), v)).ok_or_else(|| {
                param_error(0, &format!("value of '{label}' is not numeric: {value:?}"))
            })
        })
        .collect()
}

fn param_error(line: usize, message: &str) -> MbError {
    FileFormatError::ParameterFile {
        line,
        message: message.to_string(),
    }
    .into()
}

/// Results file body: one value per line, in solver response order.
pub fn render_results(values: &[f64]) -> String {
    values.iter().map(|v| format!("{}\n", number(*v))).collect()
}

pub fn write_results<P: AsRef<Path>>(path: P, values: &[f64]) -> MbResult<()> {
    std::fs::write(path, render_results(values))?;
    Ok(())
}

/// Parsed `tabular_data_file` history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub records: Vec<EvaluationRecord>,
}

impl TabularData {
    /// Parse a tabular history whose variable columns must match the codec
    /// labels and whose response columns must match `responses`.
    ///
    /// The `interface` column is optional, as older Dakota releases omit it.
    pub fn parse(text: &str, codec: &VariableCodec, responses: &[&str]) -> MbResult<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| tabular_error(1, "file is empty"))?;
        let columns: Vec<String> = header
            .trim_start_matches('%')
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let has_interface = columns.get(1).map(String::as_str) == Some("interface");
        let leading = if has_interface { 2 } else { 1 };
        let expected: Vec<&str> = codec.labels().chain(responses.iter().copied()).collect();
        let found: Vec<&str> = columns.iter().skip(leading).map(String::as_str).collect();
        if columns.first().map(String::as_str) != Some("eval_id") || found != expected {
            return Err(tabular_error(
                header_line,
                &format!("header {columns:?} does not match eval_id + {expected:?}"),
            ));
        }

        let mut records = Vec::new();
        for (line_no, line) in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != columns.len() {
                return Err(tabular_error(
                    line_no,
                    &format!("expected {} columns, found {}", columns.len(), fields.len()),
                ));
            }
            let eval_id = fields[0]
                .parse::<usize>()
                .map_err(|_| tabular_error(line_no, "eval_id is not an integer"))?;
            let interface = if has_interface {
                fields[1].to_string()
            } else {
                String::new()
            };
            let numbers = fields[leading..]
                .iter()
                .map(|f| {
                    f.parse::<f64>()
                        .map_err(|_| tabular_error(line_no, &format!("'{f}' is not a number")))
                })
                .collect::<MbResult<Vec<f64>>>()?;
            let (parameters, responses) = numbers.split_at(codec.len());
            records.push(EvaluationRecord {
                eval_id,
                interface,
                parameters: parameters.to_vec(),
                responses: responses.to_vec(),
            });
        }

        Ok(Self { columns, records })
    }

    pub fn read<P: AsRef<Path>>(
        path: P,
        codec: &VariableCodec,
        responses: &[&str],
    ) -> MbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, codec, responses)
    }
}

fn tabular_error(line: usize, message: &str) -> MbError {
    FileFormatError::TabularData {
        line,
        message: message.to_string(),
    }
    .into()
}

fn quote(s: &str) -> String {
    format!("\"{s}\"")
}

fn join_quoted<'s>(items: impl Iterator<Item = &'s str>) -> String {
    items.map(quote).collect::<Vec<_>>().join(" ")
}

// Debug formatting keeps the shortest round-trip representation and switches
// to exponent notation for very large or small magnitudes.
fn number(v: f64) -> String {
    format!("{v:?}")
}

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| number(*v))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{MethodOptions, VariableDef};
    use serde_json::json;

    fn problem() -> OptimizationProblem {
        OptimizationProblem::new("two_d", "quadratic")
            .add_variable(
                VariableDef::array("x", json!([[0.0, 1.0], [0.0, 1.0]]))
                    .with_initial(json!([0.0, 0.25])),
            )
            .add_variable(VariableDef::scalar("y.z", 3.0, 8.0).with_initial(json!(4.0)))
            .add_objective("obj")
            .add_constraint("c1", 0.0)
            .with_method(MethodOptions {
                max_function_evaluations: Some(3),
                ..MethodOptions::default()
            })
    }

    #[test]
    fn deck_lists_variables_in_codec_order() {
        let problem = problem();
        let codec = problem.codec().unwrap();
        let interface = InterfaceConfig::default();
        let deck = DakotaInput::new(&problem, &codec, &interface).render().unwrap();

        assert!(deck.contains("  coliny_cobyla\n    max_function_evaluations 3\n"));
        assert!(deck.contains("  continuous_design 3\n"));
        assert!(deck.contains("    descriptors \"x_0\" \"x_1\" \"y_z_0\"\n"));
        assert!(deck.contains("    lower_bounds 0.0 0.0 3.0\n"));
        assert!(deck.contains("    upper_bounds 1.0 1.0 8.0\n"));
        assert!(deck.contains("    initial_point 0.0 0.25 4.0\n"));
        assert!(deck.contains("    copy_files \"template_dir/*\"\n"));
        assert!(deck.contains("    analysis_driver \"mb-eval --problem problem.json\"\n"));
        assert!(deck.contains("  objective_functions 1\n"));
        assert!(deck.contains("  nonlinear_inequality_constraints 1\n    upper_bounds 0.0\n"));
        assert!(deck.contains("  descriptors \"obj\" \"c1\"\n"));
        assert!(deck.ends_with("  no_gradients\n  no_hessians\n"));
    }

    #[test]
    fn deck_omits_unset_options() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 3.0, 8.0))
            .add_objective("f");
        let codec = problem.codec().unwrap();
        let interface = InterfaceConfig::default();
        let deck = DakotaInput::new(&problem, &codec, &interface).render().unwrap();

        assert!(!deck.contains("max_function_evaluations"));
        assert!(!deck.contains("initial_point"));
        assert!(!deck.contains("nonlinear_inequality_constraints"));
    }

    #[test]
    fn deck_rejects_inverted_bounds() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 8.0, 3.0))
            .add_objective("f");
        let codec = problem.codec().unwrap();
        let interface = InterfaceConfig::default();
        let result = DakotaInput::new(&problem, &codec, &interface).render();
        assert!(matches!(result, Err(MbError::Codec(_))));
    }

    const DAKOTA_PARAMS: &str = "                                          3 variables
                      0.000000000000000e+00 x_0
                      2.500000000000000e-01 x_1
                      4.000000000000000e+00 y_z_0
                                          2 functions
                                          1 ASV_1:obj
                                          1 ASV_2:c1
                                          3 derivative_variables
                                          1 DVV_1:x_0
                                          2 DVV_2:x_1
                                          3 DVV_3:y_z_0
                                          0 analysis_components
                                        1 eval_id
";

    #[test]
    fn dakota_and_yaml_parameters_agree() {
        let from_dakota = parse_parameters(DAKOTA_PARAMS, ParameterFormat::Dakota).unwrap();
        let from_yaml = parse_parameters(
            "x_0: 0.0\nx_1: '0.25'\ny_z_0: 4\n",
            ParameterFormat::Yaml,
        )
        .unwrap();

        assert_eq!(from_dakota.len(), 3);
        assert_eq!(from_dakota, from_yaml);

        let codec = problem().codec().unwrap();
        let values = codec.unflatten_labeled(&from_dakota).unwrap();
        assert_eq!(values["x"].iter().copied().collect::<Vec<_>>(), vec![0.0, 0.25]);
        assert_eq!(values["y.z"].iter().copied().collect::<Vec<_>>(), vec![4.0]);
    }

    #[test]
    fn truncated_dakota_parameters_are_rejected() {
        let err = parse_parameters("2 variables\n1.0 x_0\n", ParameterFormat::Dakota).unwrap_err();
        assert!(matches!(
            err,
            MbError::FileFormat(FileFormatError::ParameterFile { line: 1, .. })
        ));

        let err = parse_parameters("1 variables\nabc x_0\n", ParameterFormat::Dakota).unwrap_err();
        assert!(matches!(
            err,
            MbError::FileFormat(FileFormatError::ParameterFile { line: 2, .. })
        ));
    }

    #[test]
    fn oversized_variable_count_is_a_parse_error() {
        let text = format!("{} variables\n1.0 x_0\n", usize::MAX);
        let err = parse_parameters(&text, ParameterFormat::Dakota).unwrap_err();
        assert!(matches!(
            err,
            MbError::FileFormat(FileFormatError::ParameterFile { line: 1, .. })
        ));
    }

    #[test]
    fn non_numeric_yaml_values_are_rejected() {
        assert!(parse_parameters("x_0: [1, 2]\n", ParameterFormat::Yaml).is_err());
        assert!(parse_parameters("x_0: abc\n", ParameterFormat::Yaml).is_err());
        assert!(matches!(
            parse_parameters("- not a mapping\n", ParameterFormat::Yaml),
            Err(MbError::FileFormat(FileFormatError::Yaml(_)))
        ));
    }

    #[test]
    fn parameter_format_from_str() {
        assert_eq!("YAML".parse::<ParameterFormat>().unwrap(), ParameterFormat::Yaml);
        assert_eq!("dakota".parse::<ParameterFormat>().unwrap(), ParameterFormat::Dakota);
        assert!("json".parse::<ParameterFormat>().is_err());
    }

    #[test]
    fn results_are_one_value_per_line() {
        assert_eq!(render_results(&[-9.5, 0.25, 1e-12]), "-9.5\n0.25\n1e-12\n");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.out");
        write_results(&path, &[3.0]).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "3.0\n");
    }

    #[test]
    fn tabular_history_is_parsed() {
        let codec = problem().codec().unwrap();
        let text = "%eval_id interface         x_0          x_1        y_z_0          obj           c1
1        NO_ID         0         0.25            4       0.0625         -2.5
2        NO_ID       0.5         0.25            4         0.3125     -0.8
";
        let data = TabularData::parse(text, &codec, &["obj", "c1"]).unwrap();
        assert_eq!(data.records.len(), 2);

        let second = &data.records[1];
        assert_eq!(second.eval_id, 2);
        assert_eq!(second.interface, "NO_ID");
        assert_eq!(second.parameters, vec![0.5, 0.25, 4.0]);
        assert_eq!(second.responses, vec![0.3125, -0.8]);
        assert_eq!(second.objective(), Some(0.3125));
    }

    #[test]
    fn tabular_history_without_interface_column() {
        let problem = OptimizationProblem::new("p", "paraboloid")
            .add_variable(VariableDef::scalar("x", 3.0, 8.0))
            .add_objective("f");
        let codec = problem.codec().unwrap();
        let data = TabularData::parse("%eval_id x_0 f\n1 4.0 -2.0\n", &codec, &["f"]).unwrap();
        assert_eq!(data.records[0].interface, "");
        assert_eq!(data.records[0].parameters, vec![4.0]);
    }

    #[test]
    fn tabular_history_rejects_foreign_header_and_short_rows() {
        let codec = problem().codec().unwrap();
        let foreign = "%eval_id interface a b c obj c1\n";
        assert!(TabularData::parse(foreign, &codec, &["obj", "c1"]).is_err());

        let short = "%eval_id interface x_0 x_1 y_z_0 obj c1\n1 NO_ID 0 0.25 4 0.0625\n";
        assert!(matches!(
            TabularData::parse(short, &codec, &["obj", "c1"]),
            Err(MbError::FileFormat(FileFormatError::TabularData { line: 2, .. }))
        ));
    }
}
