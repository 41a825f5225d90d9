//! Values flowing between kernels.
//!
//! Host tensors are decoded into one of three wide lane kinds so kernels only
//! deal with `f64`, `i64` and `bool`. Every value remembers its logical dtype
//! and is rounded (floats) or wrapped (integers) back into that dtype's range
//! after each kernel.

use half::{bf16, f16};
use tfbind::runtime::{RuntimeError, RuntimeResult};
use tfbind::{DType, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lanes {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
}

impl Lanes {
    pub fn len(&self) -> usize {
        match self {
            Lanes::Float(v) => v.len(),
            Lanes::Int(v) => v.len(),
            Lanes::Bool(v) => v.len(),
        }
    }
}

/// Which lane kind holds values of `dtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneKind {
    Float,
    Int,
    Bool,
}

pub(crate) fn lane_kind(dtype: DType) -> LaneKind {
    if dtype.is_float() {
        LaneKind::Float
    } else if dtype == DType::Bool {
        LaneKind::Bool
    } else {
        LaneKind::Int
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Value {
    pub dtype: DType,
    pub dims: Vec<usize>,
    pub lanes: Lanes,
}

fn round_float(dtype: DType, v: f64) -> f64 {
    match dtype {
        DType::Float => v as f32 as f64,
        DType::Half => f16::from_f64(v).to_f64(),
        DType::BFloat16 => bf16::from_f64(v).to_f64(),
        _ => v,
    }
}

fn wrap_int(dtype: DType, v: i64) -> i64 {
    match dtype {
        DType::Int8 => v as i8 as i64,
        DType::Int16 => v as i16 as i64,
        DType::Int32 => v as i32 as i64,
        DType::Uint8 => v as u8 as i64,
        DType::Uint16 => v as u16 as i64,
        DType::Uint32 => v as u32 as i64,
        _ => v,
    }
}

impl Value {
    /// Builds a value from lanes of the matching kind, normalizing them to `dtype`.
    pub fn new(dtype: DType, dims: Vec<usize>, lanes: Lanes) -> RuntimeResult<Self> {
        let expected: usize = dims.iter().product();
        if lanes.len() != expected {
            return Err(RuntimeError::internal(format!(
                "{} lanes do not fill shape {:?}",
                lanes.len(),
                dims
            )));
        }
        let lanes = match (lane_kind(dtype), lanes) {
            (LaneKind::Float, Lanes::Float(v)) => {
                Lanes::Float(v.into_iter().map(|x| round_float(dtype, x)).collect())
            }
            (LaneKind::Int, Lanes::Int(v)) => {
                Lanes::Int(v.into_iter().map(|x| wrap_int(dtype, x)).collect())
            }
            (LaneKind::Bool, Lanes::Bool(v)) => Lanes::Bool(v),
            (_, other) => {
                return Err(RuntimeError::internal(format!(
                    "lane kind {:?} cannot hold {} values",
                    lane_kind_of(&other),
                    dtype.name()
                )))
            }
        };
        Ok(Value { dtype, dims, lanes })
    }

    /// Every element set to `value`, converted to the lane kind of `dtype`.
    pub fn filled(dtype: DType, dims: &[usize], value: f64) -> Self {
        let count: usize = dims.iter().product();
        let lanes = match lane_kind(dtype) {
            LaneKind::Float => Lanes::Float(vec![round_float(dtype, value); count]),
            LaneKind::Int => Lanes::Int(vec![wrap_int(dtype, value as i64); count]),
            LaneKind::Bool => Lanes::Bool(vec![value != 0.0; count]),
        };
        Value {
            dtype,
            dims: dims.to_vec(),
            lanes,
        }
    }

    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self::filled(dtype, &[], value)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn from_tensor(tensor: &Tensor) -> RuntimeResult<Self> {
        let dims = tensor.dims().to_vec();
        let decode_err = |err: anyhow::Error| RuntimeError::invalid_argument(format!("{err:#}"));
        let lanes = match tensor.dtype() {
            DType::Float => Lanes::Float(
                tensor
                    .to_vec::<f32>()
                    .map_err(decode_err)?
                    .into_iter()
                    .map(f64::from)
                    .collect(),
            ),
            DType::Double => Lanes::Float(tensor.to_vec::<f64>().map_err(decode_err)?),
            DType::Half => Lanes::Float(
                tensor
                    .to_vec::<f16>()
                    .map_err(decode_err)?
                    .into_iter()
                    .map(f16::to_f64)
                    .collect(),
            ),
            DType::BFloat16 => Lanes::Float(
                tensor
                    .to_vec::<bf16>()
                    .map_err(decode_err)?
                    .into_iter()
                    .map(bf16::to_f64)
                    .collect(),
            ),
            DType::Int8 => ints(tensor.to_vec::<i8>().map_err(decode_err)?),
            DType::Int16 => ints(tensor.to_vec::<i16>().map_err(decode_err)?),
            DType::Int32 => ints(tensor.to_vec::<i32>().map_err(decode_err)?),
            DType::Int64 => Lanes::Int(tensor.to_vec::<i64>().map_err(decode_err)?),
            DType::Uint8 => ints(tensor.to_vec::<u8>().map_err(decode_err)?),
            DType::Uint16 => ints(tensor.to_vec::<u16>().map_err(decode_err)?),
            DType::Uint32 => ints(tensor.to_vec::<u32>().map_err(decode_err)?),
            DType::Uint64 => Lanes::Int(
                tensor
                    .to_vec::<u64>()
                    .map_err(decode_err)?
                    .into_iter()
                    .map(|v| v as i64)
                    .collect(),
            ),
            DType::Bool => Lanes::Bool(tensor.to_vec::<bool>().map_err(decode_err)?),
        };
        Ok(Value {
            dtype: tensor.dtype(),
            dims,
            lanes,
        })
    }

    pub fn to_tensor(&self) -> RuntimeResult<Tensor> {
        let dims = &self.dims;
        let encoded = match (&self.lanes, self.dtype) {
            (Lanes::Float(v), DType::Float) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as f32).collect::<Vec<_>>())
            }
            (Lanes::Float(v), DType::Double) => Tensor::from_slice(dims, v),
            (Lanes::Float(v), DType::Half) => Tensor::from_slice(
                dims,
                &v.iter().map(|&x| f16::from_f64(x)).collect::<Vec<_>>(),
            ),
            (Lanes::Float(v), DType::BFloat16) => Tensor::from_slice(
                dims,
                &v.iter().map(|&x| bf16::from_f64(x)).collect::<Vec<_>>(),
            ),
            (Lanes::Int(v), DType::Int8) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as i8).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Int16) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as i16).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Int32) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as i32).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Int64) => Tensor::from_slice(dims, v),
            (Lanes::Int(v), DType::Uint8) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as u8).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Uint16) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as u16).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Uint32) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as u32).collect::<Vec<_>>())
            }
            (Lanes::Int(v), DType::Uint64) => {
                Tensor::from_slice(dims, &v.iter().map(|&x| x as u64).collect::<Vec<_>>())
            }
            (Lanes::Bool(v), DType::Bool) => Tensor::from_slice(dims, v),
            (lanes, dtype) => {
                return Err(RuntimeError::internal(format!(
                    "{:?} lanes cannot be encoded as {}",
                    lane_kind_of(lanes),
                    dtype.name()
                )))
            }
        };
        encoded.map_err(|err| RuntimeError::internal(format!("{err:#}")))
    }

    /// Every element widened to `f64`.
    pub fn as_f64(&self) -> Vec<f64> {
        match &self.lanes {
            Lanes::Float(v) => v.clone(),
            Lanes::Int(v) => v.iter().map(|&x| x as f64).collect(),
            Lanes::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Elements of an integer value, used for axes and shapes.
    pub fn index_list(&self, what: &str) -> RuntimeResult<Vec<i64>> {
        match &self.lanes {
            Lanes::Int(v) if self.dims.len() <= 1 => Ok(v.clone()),
            _ => Err(RuntimeError::invalid_argument(format!(
                "{what} must be an integer scalar or vector, got {} {:?}",
                self.dtype.name(),
                self.dims
            ))),
        }
    }

    /// Truth value of a one-element value; numbers are true when non-zero.
    pub fn truthy(&self) -> RuntimeResult<bool> {
        if self.len() != 1 {
            return Err(RuntimeError::invalid_argument(format!(
                "expected a single-element predicate, got shape {:?}",
                self.dims
            )));
        }
        Ok(match &self.lanes {
            Lanes::Float(v) => v[0] != 0.0,
            Lanes::Int(v) => v[0] != 0,
            Lanes::Bool(v) => v[0],
        })
    }
}

fn ints<T: Into<i64> + Copy>(values: Vec<T>) -> Lanes {
    Lanes::Int(values.into_iter().map(Into::into).collect())
}

pub(crate) fn lane_kind_of(lanes: &Lanes) -> LaneKind {
    match lanes {
        Lanes::Float(_) => LaneKind::Float,
        Lanes::Int(_) => LaneKind::Int,
        Lanes::Bool(_) => LaneKind::Bool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_types_are_normalized() {
        let v = Value::new(DType::Int8, vec![2], Lanes::Int(vec![130, -7])).unwrap();
        assert_eq!(v.lanes, Lanes::Int(vec![-126, -7]));
        let f = Value::new(DType::Float, vec![], Lanes::Float(vec![0.1])).unwrap();
        assert_eq!(f.lanes, Lanes::Float(vec![0.1f32 as f64]));
    }

    #[test]
    fn tensors_decode_and_encode() {
        let t = Tensor::from_slice(&[3], &[1u32, 2, u32::MAX]).unwrap();
        let v = Value::from_tensor(&t).unwrap();
        assert_eq!(v.lanes, Lanes::Int(vec![1, 2, u32::MAX as i64]));
        assert_eq!(v.to_tensor().unwrap(), t);

        let mismatched = Value {
            dtype: DType::Bool,
            dims: vec![1],
            lanes: Lanes::Int(vec![1]),
        };
        assert!(mismatched.to_tensor().is_err());
    }
}
