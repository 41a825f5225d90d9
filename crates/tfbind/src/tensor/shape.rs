//! Possibly partially known tensor shapes as reported by graph inference.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a graph output. `dims == None` means the rank is unknown and a
/// dimension of `-1` means that axis is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Option<Vec<i64>>,
}

impl Shape {
    /// Shape with unknown rank.
    pub fn unknown() -> Self {
        Shape { dims: None }
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Shape {
            dims: Some(Vec::new()),
        }
    }

    /// Builds a shape from explicit dimensions; `-1` marks an unknown axis.
    pub fn new<D: Into<Vec<i64>>>(dims: D) -> Self {
        Shape {
            dims: Some(dims.into()),
        }
    }

    pub fn from_usize(dims: &[usize]) -> Self {
        Shape::new(dims.iter().map(|&d| d as i64).collect::<Vec<_>>())
    }

    /// Number of axes, or `None` when the rank is unknown.
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    pub fn dims(&self) -> Option<&[i64]> {
        self.dims.as_deref()
    }

    /// Size of axis `dim`; negative values count from the back.
    /// Returns `-1` for unknown or out of range axes and `0` when indexing a
    /// scalar from the back.
    pub fn size(&self, dim: isize) -> i64 {
        let Some(dims) = &self.dims else {
            return -1;
        };
        let idx = if dim < 0 {
            if dims.is_empty() {
                return 0;
            }
            dim + dims.len() as isize
        } else {
            dim
        };
        if idx < 0 || idx as usize >= dims.len() {
            return -1;
        }
        dims[idx as usize]
    }

    /// True when the rank and every axis are known.
    pub fn is_fully_specified(&self) -> bool {
        matches!(&self.dims, Some(dims) if dims.iter().all(|&d| d >= 0))
    }

    /// Returns the (possibly partially known) dimensions, failing on unknown rank.
    pub fn to_vec(&self) -> Result<Vec<i64>> {
        self.dims
            .clone()
            .ok_or_else(|| anyhow!("cannot list the dimensions of a shape with unknown rank"))
    }

    /// Returns the dimensions as sizes, failing if anything is unknown.
    pub fn known_dims(&self) -> Result<Vec<usize>> {
        let dims = self.to_vec()?;
        if dims.iter().any(|&d| d < 0) {
            bail!("shape {} has unknown dimensions", self);
        }
        Ok(dims.into_iter().map(|d| d as usize).collect())
    }

    pub fn num_elements(&self) -> Result<usize> {
        Ok(self.known_dims()?.iter().product())
    }

    /// Merges two shapes, keeping the more specific information per axis.
    pub fn merge(&self, other: &Shape) -> Option<Shape> {
        match (&self.dims, &other.dims) {
            (None, _) => Some(other.clone()),
            (_, None) => Some(self.clone()),
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let mut merged = Vec::with_capacity(a.len());
                for (&x, &y) in a.iter().zip(b) {
                    match (x, y) {
                        (-1, d) | (d, -1) => merged.push(d),
                        (x, y) if x == y => merged.push(x),
                        _ => return None,
                    }
                }
                Some(Shape::new(merged))
            }
        }
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(dims) = &self.dims else {
            return f.write_str("?");
        };
        f.write_str("[")?;
        for (i, d) in dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if *d < 0 {
                f.write_str("?")?;
            } else {
                write!(f, "{d}")?;
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_supports_negative_indices() {
        let shape = Shape::new(vec![2, -1, 5]);
        assert_eq!(shape.size(0), 2);
        assert_eq!(shape.size(-1), 5);
        assert_eq!(shape.size(-2), -1);
        assert_eq!(shape.size(3), -1);
        assert_eq!(Shape::scalar().size(-1), 0);
        assert_eq!(Shape::unknown().size(0), -1);
    }

    #[test]
    fn display_marks_unknown_axes() {
        assert_eq!(Shape::new(vec![2, -1]).to_string(), "[2, ?]");
        assert_eq!(Shape::scalar().to_string(), "[]");
        assert_eq!(Shape::unknown().to_string(), "?");
    }

    #[test]
    fn known_dims_rejects_partial_shapes() {
        assert!(Shape::new(vec![3, -1]).known_dims().is_err());
        assert!(Shape::unknown().to_vec().is_err());
        assert_eq!(Shape::new(vec![3, 4]).num_elements().unwrap(), 12);
        assert!(!Shape::new(vec![3, -1]).is_fully_specified());
    }

    #[test]
    fn merge_prefers_known_axes() {
        let merged = Shape::new(vec![-1, 4]).merge(&Shape::new(vec![2, -1]));
        assert_eq!(merged, Some(Shape::new(vec![2, 4])));
        assert_eq!(Shape::new(vec![2]).merge(&Shape::new(vec![3])), None);
    }
}
