//! Design-variable definitions shared by the codec, the solver boundary and
//! the models.

use ndarray::{arr1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured design-variable values keyed by variable name.
pub type StructuredValues = HashMap<String, ArrayD<f64>>;

/// A named, possibly array-valued design variable with elementwise bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignVariableSpec {
    /// Variable name, unique within a problem (e.g. "paraboloid.x").
    pub name: String,
    /// Array shape; `[]` and `[1]` both describe a scalar.
    pub shape: Vec<usize>,
    /// Bounds of shape `shape + [2]`, holding `[lower, upper]` per element.
    pub bounds: ArrayD<f64>,
}

impl DesignVariableSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, bounds: ArrayD<f64>) -> Self {
        Self {
            name: name.into(),
            shape,
            bounds,
        }
    }

    /// A scalar variable bounded by `[lower, upper]`.
    pub fn scalar(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self::new(name, Vec::new(), arr1(&[lower, upper]).into_dyn())
    }

    /// An array variable whose elements all share the same bounds.
    pub fn uniform(name: impl Into<String>, shape: Vec<usize>, lower: f64, upper: f64) -> Self {
        let last = shape.len();
        let bounds = ArrayD::from_shape_fn(IxDyn(&bounds_shape(&shape)), |idx| {
            if idx[last] == 0 {
                lower
            } else {
                upper
            }
        });
        Self::new(name, shape, bounds)
    }

    /// Number of scalar elements held by this variable.
    pub fn len(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shape the bounds array must have.
    pub fn expected_bounds_shape(&self) -> Vec<usize> {
        bounds_shape(&self.shape)
    }

    /// Label of the element at `index` (row-major) within this variable.
    pub fn label(&self, index: usize) -> String {
        flat_label(&self.name, index)
    }
}

/// One scalar slot of the flat parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatParameter {
    /// Solver-facing descriptor, `{normalized name}_{index}`.
    pub label: String,
    /// Name of the owning design variable.
    pub variable: String,
    /// Row-major index of the element within its variable.
    pub index: usize,
    /// Zero-based slot in the global flat vector.
    pub position: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Product of the extents; `1` for the empty (scalar) shape.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Whether a shape describes a single scalar (`[]` or `[1]`).
pub fn is_scalar_shape(shape: &[usize]) -> bool {
    shape.is_empty() || shape == [1]
}

/// Shapes match exactly, or both describe a scalar.
pub fn shapes_compatible(declared: &[usize], actual: &[usize]) -> bool {
    declared == actual || (is_scalar_shape(declared) && is_scalar_shape(actual))
}

fn bounds_shape(shape: &[usize]) -> Vec<usize> {
    let mut dims = shape.to_vec();
    dims.push(2);
    dims
}

/// Replace every character that is not ASCII alphanumeric or `_` with `_`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Label for element `index` of the variable called `name`.
pub fn flat_label(name: &str, index: usize) -> String {
    format!("{}_{}", normalize_name(name), index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_spec_has_one_element() {
        let spec = DesignVariableSpec::scalar("x", 3.0, 8.0);
        assert_eq!(spec.len(), 1);
        assert_eq!(spec.bounds.shape(), &[2]);
        assert_eq!(spec.expected_bounds_shape(), vec![2]);
    }

    #[test]
    fn uniform_spec_broadcasts_bounds() {
        let spec = DesignVariableSpec::uniform("b", vec![2, 2], -1.5, 1.5);
        assert_eq!(spec.len(), 4);
        assert_eq!(spec.bounds.shape(), &[2, 2, 2]);
        assert_eq!(spec.bounds[[1, 0, 0]], -1.5);
        assert_eq!(spec.bounds[[1, 1, 1]], 1.5);
    }

    #[test]
    fn labels_normalize_separators() {
        assert_eq!(normalize_name("paraboloid.x"), "paraboloid_x");
        assert_eq!(normalize_name("a:b c/d"), "a_b_c_d");
        assert_eq!(flat_label("a.b", 3), "a_b_3");
        assert_eq!(flat_label("a_b", 3), "a_b_3");
    }

    #[test]
    fn scalar_shapes_are_interchangeable() {
        assert!(shapes_compatible(&[], &[1]));
        assert!(shapes_compatible(&[1], &[]));
        assert!(shapes_compatible(&[2, 3], &[2, 3]));
        assert!(!shapes_compatible(&[2, 2], &[4]));
        assert!(!shapes_compatible(&[1, 1], &[]));
    }
}
