//! Mapping between structured design variables and the flat, labelled
//! parameter vector seen by the external optimizer.
//!
//! The layout is contiguous: variables in the order given, then elements of
//! each variable in row-major (C) order. Both directions iterate arrays in
//! logical order, so arrays with a non-standard memory layout (transposed
//! views, Fortran order) still flatten in row-major order.

use mb_types::{
    element_count, shapes_compatible, CodecError, DesignVariableSpec, FlatParameter,
    StructuredValues,
};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;

/// Build the flat parameter table for an ordered list of specs.
pub fn build(specs: &[DesignVariableSpec]) -> Result<Vec<FlatParameter>, CodecError> {
    for spec in specs {
        check_shape(spec)?;
    }
    check_labels(specs)?;

    let mut table = Vec::with_capacity(total_len(specs));
    for spec in specs {
        for (index, pair) in bound_pairs(spec).chunks_exact(2).enumerate() {
            table.push(FlatParameter {
                label: spec.label(index),
                variable: spec.name.clone(),
                index,
                position: table.len(),
                lower: pair[0],
                upper: pair[1],
            });
        }
    }

    Ok(table)
}

/// Flatten structured values into one vector in the codec layout.
pub fn flatten(
    specs: &[DesignVariableSpec],
    values: &StructuredValues,
) -> Result<Vec<f64>, CodecError> {
    check_labels(specs)?;
    let mut flat = Vec::with_capacity(total_len(specs));

    for spec in specs {
        let array = values
            .get(&spec.name)
            .ok_or_else(|| CodecError::MissingVariable {
                name: spec.name.clone(),
            })?;
        if !shapes_compatible(&spec.shape, array.shape()) {
            return Err(CodecError::ShapeMismatch {
                name: spec.name.clone(),
                expected: spec.shape.clone(),
                actual: array.shape().to_vec(),
            });
        }
        flat.extend(array.iter().copied());
    }

    let unknown = values
        .keys()
        .filter(|name| !specs.iter().any(|spec| &spec.name == *name))
        .min();
    if let Some(name) = unknown {
        return Err(CodecError::UnknownVariable { name: name.clone() });
    }

    Ok(flat)
}

/// Rebuild structured values from a flat vector in the codec layout.
pub fn unflatten(
    specs: &[DesignVariableSpec],
    flat: &[f64],
) -> Result<StructuredValues, CodecError> {
    check_labels(specs)?;
    let expected = total_len(specs);
    if flat.len() != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: flat.len(),
        });
    }

    let mut values = StructuredValues::with_capacity(specs.len());
    let mut offset = 0;
    for spec in specs {
        let slice = &flat[offset..offset + spec.len()];
        let array = ArrayD::from_shape_vec(IxDyn(&spec.shape), slice.to_vec()).map_err(|_| {
            CodecError::ShapeMismatch {
                name: spec.name.clone(),
                expected: spec.shape.clone(),
                actual: vec![slice.len()],
            }
        })?;
        values.insert(spec.name.clone(), array);
        offset += spec.len();
    }

    Ok(values)
}

/// Parallel lower and upper bound vectors in the codec layout.
pub fn flatten_bounds(specs: &[DesignVariableSpec]) -> Result<(Vec<f64>, Vec<f64>), CodecError> {
    let total = total_len(specs);
    let mut lower = Vec::with_capacity(total);
    let mut upper = Vec::with_capacity(total);

    for spec in specs {
        check_shape(spec)?;
        for (index, pair) in bound_pairs(spec).chunks_exact(2).enumerate() {
            // NaN bounds fail this comparison as well.
            if !(pair[0] <= pair[1]) {
                return Err(CodecError::InvalidBounds {
                    variable: spec.name.clone(),
                    index,
                    lower: pair[0],
                    upper: pair[1],
                });
            }
            lower.push(pair[0]);
            upper.push(pair[1]);
        }
    }

    Ok((lower, upper))
}

fn total_len(specs: &[DesignVariableSpec]) -> usize {
    specs.iter().map(DesignVariableSpec::len).sum()
}

/// Every element label must be unique across the layout. Repeated names, or
/// names that normalize to the same label, would overwrite each other.
fn check_labels(specs: &[DesignVariableSpec]) -> Result<(), CodecError> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for spec in specs {
        for index in 0..spec.len() {
            let label = spec.label(index);
            if let Some(first) = owners.insert(label.clone(), &spec.name) {
                return Err(CodecError::DuplicateLabel {
                    label,
                    first: first.to_string(),
                    second: spec.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_shape(spec: &DesignVariableSpec) -> Result<(), CodecError> {
    if spec.shape.contains(&0) {
        return Err(CodecError::ShapeMismatch {
            name: spec.name.clone(),
            expected: spec.shape.iter().map(|&d| d.max(1)).collect(),
            actual: spec.shape.clone(),
        });
    }
    let expected = spec.expected_bounds_shape();
    let scalar_bounds = element_count(&spec.shape) == 1 && spec.bounds.len() == 2;
    if spec.bounds.shape() != expected.as_slice() && !(scalar_bounds && spec.shape.len() <= 1) {
        return Err(CodecError::ShapeMismatch {
            name: spec.name.clone(),
            expected,
            actual: spec.bounds.shape().to_vec(),
        });
    }
    Ok(())
}

/// Bounds in logical order: `lower, upper` per element.
fn bound_pairs(spec: &DesignVariableSpec) -> Vec<f64> {
    spec.bounds.iter().copied().collect()
}

/// Validated codec for one optimization problem.
///
/// Construction runs [`build`] once; the resulting table and the label index
/// are reused for every evaluation. The codec holds no mutable state and can
/// be shared across threads.
#[derive(Debug, Clone)]
pub struct VariableCodec {
    specs: Vec<DesignVariableSpec>,
    parameters: Vec<FlatParameter>,
    positions: HashMap<String, usize>,
}

impl VariableCodec {
    pub fn new(specs: Vec<DesignVariableSpec>) -> Result<Self, CodecError> {
        let parameters = build(&specs)?;
        let positions = parameters
            .iter()
            .map(|p| (p.label.clone(), p.position))
            .collect();
        Ok(Self {
            specs,
            parameters,
            positions,
        })
    }

    pub fn specs(&self) -> &[DesignVariableSpec] {
        &self.specs
    }

    pub fn parameters(&self) -> &[FlatParameter] {
        &self.parameters
    }

    /// Total number of scalar parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.label.as_str())
    }

    /// Resolve a solver label back to its parameter slot.
    pub fn resolve(&self, label: &str) -> Option<&FlatParameter> {
        self.positions.get(label).map(|&pos| &self.parameters[pos])
    }

    pub fn flatten(&self, values: &StructuredValues) -> Result<Vec<f64>, CodecError> {
        flatten(&self.specs, values)
    }

    pub fn unflatten(&self, flat: &[f64]) -> Result<StructuredValues, CodecError> {
        unflatten(&self.specs, flat)
    }

    pub fn flatten_bounds(&self) -> Result<(Vec<f64>, Vec<f64>), CodecError> {
        flatten_bounds(&self.specs)
    }

    /// Rebuild structured values from a label -> value mapping, as read from
    /// a per-evaluation parameters file.
    pub fn unflatten_labeled(
        &self,
        values: &HashMap<String, f64>,
    ) -> Result<StructuredValues, CodecError> {
        let unknown = values
            .keys()
            .filter(|label| !self.positions.contains_key(label.as_str()))
            .min();
        if let Some(label) = unknown {
            return Err(CodecError::UnknownLabel {
                label: label.clone(),
            });
        }

        let flat = self
            .parameters
            .iter()
            .map(|p| {
                values
                    .get(&p.label)
                    .copied()
                    .ok_or_else(|| CodecError::MissingLabel {
                        label: p.label.clone(),
                        variable: p.variable.clone(),
                        index: p.index,
                    })
            })
            .collect::<Result<Vec<f64>, CodecError>>()?;

        self.unflatten(&flat)
    }
}
