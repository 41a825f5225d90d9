//! Host kernels over [`Value`]s.
//!
//! Element-wise kernels follow numpy broadcasting. Shapes were already
//! checked by inference where they were known; kernels re-check against the
//! concrete dimensions.

use crate::value::{lane_kind, LaneKind, Lanes, Value};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use tfbind::runtime::{RuntimeError, RuntimeResult};
use tfbind::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Square,
    Sqrt,
    Rsqrt,
    Exp,
    Tanh,
    Sigmoid,
}

impl UnaryOp {
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        Some(match op_type {
            "Neg" => UnaryOp::Neg,
            "Abs" => UnaryOp::Abs,
            "Sign" => UnaryOp::Sign,
            "Square" => UnaryOp::Square,
            "Sqrt" => UnaryOp::Sqrt,
            "Rsqrt" => UnaryOp::Rsqrt,
            "Exp" => UnaryOp::Exp,
            "Tanh" => UnaryOp::Tanh,
            "Sigmoid" => UnaryOp::Sigmoid,
            _ => return None,
        })
    }

    /// Whether the op is only defined for floating point inputs.
    pub fn float_only(self) -> bool {
        matches!(
            self,
            UnaryOp::Sqrt | UnaryOp::Rsqrt | UnaryOp::Exp | UnaryOp::Tanh | UnaryOp::Sigmoid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivNoNan,
    Pow,
    Maximum,
    Less,
    Greater,
}

impl BinaryOp {
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        Some(match op_type {
            "Add" | "AddV2" => BinaryOp::Add,
            "Sub" => BinaryOp::Sub,
            "Mul" => BinaryOp::Mul,
            "DivNoNan" => BinaryOp::DivNoNan,
            "Pow" => BinaryOp::Pow,
            "Maximum" => BinaryOp::Maximum,
            "Less" => BinaryOp::Less,
            "Greater" => BinaryOp::Greater,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Less | BinaryOp::Greater)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReduceKind {
    Sum,
    Mean,
    Max,
}

impl ReduceKind {
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        Some(match op_type {
            "Sum" => ReduceKind::Sum,
            "Mean" => ReduceKind::Mean,
            "Max" => ReduceKind::Max,
            _ => return None,
        })
    }
}

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        if *dim > 0 {
            coords[i] = index % *dim;
            index /= *dim;
        }
    }
    coords
}

/// Numpy broadcast of two concrete shapes.
pub(crate) fn broadcast_dims(a: &[usize], b: &[usize]) -> RuntimeResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(RuntimeError::invalid_argument(format!(
                    "Incompatible shapes: {a:?} vs. {b:?}"
                )))
            }
        };
    }
    Ok(out)
}

/// For every element of `out_dims`, the offset of the element of `in_dims`
/// it broadcasts from.
fn broadcast_offsets(in_dims: &[usize], out_dims: &[usize]) -> Vec<usize> {
    let total: usize = out_dims.iter().product();
    if in_dims == out_dims {
        return (0..total).collect();
    }
    let lead = out_dims.len() - in_dims.len();
    let in_strides = compute_strides(in_dims);
    (0..total)
        .map(|flat| {
            let coords = unravel_index(flat, out_dims);
            in_dims
                .iter()
                .enumerate()
                .map(|(i, &d)| if d == 1 { 0 } else { coords[lead + i] * in_strides[i] })
                .sum()
        })
        .collect()
}

fn zip_broadcast<T: Copy, U>(
    a: &[T],
    a_dims: &[usize],
    b: &[T],
    b_dims: &[usize],
    out_dims: &[usize],
    f: impl Fn(T, T) -> RuntimeResult<U>,
) -> RuntimeResult<Vec<U>> {
    let ia = broadcast_offsets(a_dims, out_dims);
    let ib = broadcast_offsets(b_dims, out_dims);
    ia.into_iter()
        .zip(ib)
        .map(|(i, j)| f(a[i], b[j]))
        .collect()
}

pub(crate) fn unary(op: UnaryOp, x: &Value) -> RuntimeResult<Value> {
    let lanes = match &x.lanes {
        Lanes::Float(v) => Lanes::Float(
            v.iter()
                .map(|&a| match op {
                    UnaryOp::Neg => -a,
                    UnaryOp::Abs => a.abs(),
                    UnaryOp::Sign => {
                        if a > 0.0 {
                            1.0
                        } else if a < 0.0 {
                            -1.0
                        } else {
                            0.0
                        }
                    }
                    UnaryOp::Square => a * a,
                    UnaryOp::Sqrt => a.sqrt(),
                    UnaryOp::Rsqrt => 1.0 / a.sqrt(),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Tanh => a.tanh(),
                    UnaryOp::Sigmoid => 1.0 / (1.0 + (-a).exp()),
                })
                .collect(),
        ),
        Lanes::Int(v) if !op.float_only() => Lanes::Int(
            v.iter()
                .map(|&a| match op {
                    UnaryOp::Neg => a.wrapping_neg(),
                    UnaryOp::Abs => a.wrapping_abs(),
                    UnaryOp::Sign => a.signum(),
                    _ => a.wrapping_mul(a),
                })
                .collect(),
        ),
        _ => {
            return Err(RuntimeError::unimplemented(format!(
                "{op:?} is not defined for {} values",
                x.dtype.name()
            )))
        }
    };
    Value::new(x.dtype, x.dims.clone(), lanes)
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::DivNoNan => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Maximum => a.max(b),
        BinaryOp::Less | BinaryOp::Greater => unreachable!("comparisons produce booleans"),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> RuntimeResult<i64> {
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::DivNoNan => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        BinaryOp::Pow => {
            if b < 0 {
                return Err(RuntimeError::invalid_argument(
                    "Integers to negative integer powers are not allowed",
                ));
            }
            a.wrapping_pow(b.min(u32::MAX as i64) as u32)
        }
        BinaryOp::Maximum => a.max(b),
        BinaryOp::Less | BinaryOp::Greater => unreachable!("comparisons produce booleans"),
    })
}

pub(crate) fn binary(op: BinaryOp, x: &Value, y: &Value) -> RuntimeResult<Value> {
    if x.dtype != y.dtype {
        return Err(RuntimeError::invalid_argument(format!(
            "{op:?} expects matching types, got {} and {}",
            x.dtype.name(),
            y.dtype.name()
        )));
    }
    let dims = broadcast_dims(&x.dims, &y.dims)?;
    if op.is_comparison() {
        let less = op == BinaryOp::Less;
        let lanes = match (&x.lanes, &y.lanes) {
            (Lanes::Float(a), Lanes::Float(b)) => {
                zip_broadcast(a, &x.dims, b, &y.dims, &dims, |p, q| {
                    Ok(if less { p < q } else { p > q })
                })?
            }
            (Lanes::Int(a), Lanes::Int(b)) => {
                zip_broadcast(a, &x.dims, b, &y.dims, &dims, |p, q| {
                    Ok(if less { p < q } else { p > q })
                })?
            }
            _ => {
                return Err(RuntimeError::unimplemented(format!(
                    "{op:?} is not defined for {} values",
                    x.dtype.name()
                )))
            }
        };
        return Value::new(DType::Bool, dims, Lanes::Bool(lanes));
    }
    let lanes = match (&x.lanes, &y.lanes) {
        (Lanes::Float(a), Lanes::Float(b)) => Lanes::Float(zip_broadcast(
            a,
            &x.dims,
            b,
            &y.dims,
            &dims,
            |p, q| Ok(float_binary(op, p, q)),
        )?),
        (Lanes::Int(a), Lanes::Int(b)) => Lanes::Int(zip_broadcast(
            a,
            &x.dims,
            b,
            &y.dims,
            &dims,
            |p, q| int_binary(op, p, q),
        )?),
        _ => {
            return Err(RuntimeError::unimplemented(format!(
                "{op:?} is not defined for {} values",
                x.dtype.name()
            )))
        }
    };
    Value::new(x.dtype, dims, lanes)
}

pub(crate) fn cast(x: &Value, dtype: DType) -> RuntimeResult<Value> {
    let lanes = match (&x.lanes, lane_kind(dtype)) {
        (Lanes::Float(v), LaneKind::Float) => Lanes::Float(v.clone()),
        (Lanes::Int(v), LaneKind::Int) => Lanes::Int(v.clone()),
        (Lanes::Bool(v), LaneKind::Bool) => Lanes::Bool(v.clone()),
        (Lanes::Float(v), LaneKind::Int) => {
            Lanes::Int(v.iter().map(|&a| a as i64).collect())
        }
        (Lanes::Float(v), LaneKind::Bool) => {
            Lanes::Bool(v.iter().map(|&a| a != 0.0).collect())
        }
        (Lanes::Int(v), LaneKind::Float) => {
            Lanes::Float(v.iter().map(|&a| a as f64).collect())
        }
        (Lanes::Int(v), LaneKind::Bool) => {
            Lanes::Bool(v.iter().map(|&a| a != 0).collect())
        }
        (Lanes::Bool(v), LaneKind::Float) => {
            Lanes::Float(v.iter().map(|&a| if a { 1.0 } else { 0.0 }).collect())
        }
        (Lanes::Bool(v), LaneKind::Int) => Lanes::Int(v.iter().map(|&a| a as i64).collect()),
    };
    Value::new(dtype, x.dims.clone(), lanes)
}

/// Resolves possibly negative, possibly repeated axes against `rank`.
pub(crate) fn normalize_axes(axes: &[i64], rank: usize) -> RuntimeResult<Vec<usize>> {
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = if axis < 0 { axis + rank as i64 } else { axis };
        if resolved < 0 || resolved as usize >= rank {
            return Err(RuntimeError::invalid_argument(format!(
                "Invalid reduction dimension {axis} for input with {rank} dimension(s)"
            )));
        }
        if !out.contains(&(resolved as usize)) {
            out.push(resolved as usize);
        }
    }
    out.sort_unstable();
    Ok(out)
}

pub(crate) fn reduced_dims(dims: &[usize], axes: &[usize], keep_dims: bool) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(d),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect()
}

pub(crate) fn reduce(
    kind: ReduceKind,
    x: &Value,
    axes: &[i64],
    keep_dims: bool,
) -> RuntimeResult<Value> {
    let axes = normalize_axes(axes, x.dims.len())?;
    let kept = reduced_dims(&x.dims, &axes, true);
    let out_dims = reduced_dims(&x.dims, &axes, keep_dims);
    let out_len: usize = kept.iter().product();
    let count: usize = axes.iter().map(|&a| x.dims[a]).product();
    let kept_strides = compute_strides(&kept);
    let target = |flat: usize| -> usize {
        unravel_index(flat, &x.dims)
            .iter()
            .enumerate()
            .map(|(i, &c)| if axes.contains(&i) { 0 } else { c * kept_strides[i] })
            .sum()
    };
    let lanes = match &x.lanes {
        Lanes::Float(v) => {
            let init = if kind == ReduceKind::Max {
                f64::NEG_INFINITY
            } else {
                0.0
            };
            let mut acc = vec![init; out_len];
            for (flat, &value) in v.iter().enumerate() {
                let slot = &mut acc[target(flat)];
                *slot = match kind {
                    ReduceKind::Max => slot.max(value),
                    _ => *slot + value,
                };
            }
            if kind == ReduceKind::Mean && count > 0 {
                acc.iter_mut().for_each(|a| *a /= count as f64);
            }
            Lanes::Float(acc)
        }
        Lanes::Int(v) => {
            let init = if kind == ReduceKind::Max { i64::MIN } else { 0 };
            let mut acc = vec![init; out_len];
            for (flat, &value) in v.iter().enumerate() {
                let slot = &mut acc[target(flat)];
                *slot = match kind {
                    ReduceKind::Max => (*slot).max(value),
                    _ => slot.wrapping_add(value),
                };
            }
            if kind == ReduceKind::Mean && count > 0 {
                acc.iter_mut().for_each(|a| *a /= count as i64);
            }
            Lanes::Int(acc)
        }
        Lanes::Bool(_) => {
            return Err(RuntimeError::unimplemented(format!(
                "{kind:?} is not defined for bool values"
            )))
        }
    };
    Value::new(x.dtype, out_dims, lanes)
}

/// Concrete dimensions for a reshape request; one `-1` absorbs the rest.
pub(crate) fn resolve_reshape(total: usize, requested: &[i64]) -> RuntimeResult<Vec<usize>> {
    let mut unknown = None;
    let mut known = 1usize;
    for (i, &d) in requested.iter().enumerate() {
        match d {
            -1 if unknown.is_none() => unknown = Some(i),
            d if d >= 0 => known *= d as usize,
            _ => {
                return Err(RuntimeError::invalid_argument(format!(
                    "invalid reshape target {requested:?}"
                )))
            }
        }
    }
    let mut dims: Vec<usize> = requested.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = unknown {
        if known == 0 || total % known != 0 {
            return Err(RuntimeError::invalid_argument(format!(
                "cannot reshape a tensor with {total} elements to {requested:?}"
            )));
        }
        dims[i] = total / known;
    } else if known != total {
        return Err(RuntimeError::invalid_argument(format!(
            "cannot reshape a tensor with {total} elements to {requested:?}"
        )));
    }
    Ok(dims)
}

pub(crate) fn reshape(x: &Value, dims: Vec<usize>) -> RuntimeResult<Value> {
    Value::new(x.dtype, dims, x.lanes.clone())
}

/// Stacks same-shaped values along a new leading axis.
pub(crate) fn pack(values: &[&Value]) -> RuntimeResult<Value> {
    let first = values
        .first()
        .ok_or_else(|| RuntimeError::invalid_argument("Pack needs at least one value"))?;
    let mut dims = vec![values.len()];
    dims.extend_from_slice(&first.dims);
    let mismatch = values
        .iter()
        .find(|v| v.dims != first.dims || v.dtype != first.dtype);
    if let Some(v) = mismatch {
        return Err(RuntimeError::invalid_argument(format!(
            "Pack expects identical shapes and types, got {} {:?} and {} {:?}",
            first.dtype.name(),
            first.dims,
            v.dtype.name(),
            v.dims
        )));
    }
    let lanes = match &first.lanes {
        Lanes::Float(_) => Lanes::Float(values.iter().flat_map(|v| v.as_f64()).collect()),
        Lanes::Int(_) => Lanes::Int(
            values
                .iter()
                .flat_map(|v| match &v.lanes {
                    Lanes::Int(x) => x.clone(),
                    _ => Vec::new(),
                })
                .collect(),
        ),
        Lanes::Bool(_) => Lanes::Bool(
            values
                .iter()
                .flat_map(|v| match &v.lanes {
                    Lanes::Bool(x) => x.clone(),
                    _ => Vec::new(),
                })
                .collect(),
        ),
    };
    Value::new(first.dtype, dims, lanes)
}

fn float_lanes<'v>(x: &'v Value, op: &str) -> RuntimeResult<&'v [f64]> {
    match &x.lanes {
        Lanes::Float(v) => Ok(v),
        _ => Err(RuntimeError::unimplemented(format!(
            "{op} supports floating point values only, got {}",
            x.dtype.name()
        ))),
    }
}

/// One `[m, k] x [k, n]` product into `out`.
fn matmul_block(
    a: &[f64],
    b: &[f64],
    (m, k, n): (usize, usize, usize),
    (ta, tb): (bool, bool),
    out: &mut [f64],
) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for p in 0..k {
                let av = if ta { a[p * m + i] } else { a[i * k + p] };
                let bv = if tb { b[j * k + p] } else { b[p * n + j] };
                acc += av * bv;
            }
            out[i * n + j] = acc;
        }
    }
}

pub(crate) fn matmul(a: &Value, b: &Value, ta: bool, tb: bool) -> RuntimeResult<Value> {
    if a.dims.len() != 2 || b.dims.len() != 2 {
        return Err(RuntimeError::invalid_argument(format!(
            "MatMul expects rank-2 operands, got {:?} and {:?}",
            a.dims, b.dims
        )));
    }
    let (m, k) = if ta {
        (a.dims[1], a.dims[0])
    } else {
        (a.dims[0], a.dims[1])
    };
    let (k2, n) = if tb {
        (b.dims[1], b.dims[0])
    } else {
        (b.dims[0], b.dims[1])
    };
    if k != k2 {
        return Err(RuntimeError::invalid_argument(format!(
            "Matrix size-incompatible: In[0]: {:?}, In[1]: {:?}",
            a.dims, b.dims
        )));
    }
    let mut out = vec![0.0; m * n];
    matmul_block(
        float_lanes(a, "MatMul")?,
        float_lanes(b, "MatMul")?,
        (m, k, n),
        (ta, tb),
        &mut out,
    );
    Value::new(a.dtype, vec![m, n], Lanes::Float(out))
}

/// Batched product; batch axes broadcast like element-wise operands.
pub(crate) fn batch_matmul(x: &Value, y: &Value, out_type: DType) -> RuntimeResult<Value> {
    if x.dims.len() < 2 || y.dims.len() < 2 {
        return Err(RuntimeError::invalid_argument(format!(
            "BatchMatMul expects operands of rank >= 2, got {:?} and {:?}",
            x.dims, y.dims
        )));
    }
    let (xb, xm) = x.dims.split_at(x.dims.len() - 2);
    let (yb, ym) = y.dims.split_at(y.dims.len() - 2);
    let (m, k, n) = (xm[0], xm[1], ym[1]);
    if ym[0] != k {
        return Err(RuntimeError::invalid_argument(format!(
            "Matrix size-incompatible: In[0]: {:?}, In[1]: {:?}",
            x.dims, y.dims
        )));
    }
    let batch = broadcast_dims(xb, yb)?;
    let xs = broadcast_offsets(xb, &batch);
    let ys = broadcast_offsets(yb, &batch);
    let a = float_lanes(x, "BatchMatMul")?;
    let b = float_lanes(y, "BatchMatMul")?;
    let mut out = vec![0.0; xs.len() * m * n];
    for (slot, (i, j)) in xs.into_iter().zip(ys).enumerate() {
        matmul_block(
            &a[i * m * k..(i + 1) * m * k],
            &b[j * k * n..(j + 1) * k * n],
            (m, k, n),
            (false, false),
            &mut out[slot * m * n..(slot + 1) * m * n],
        );
    }
    let mut dims = batch;
    dims.extend([m, n]);
    let product = Value::new(x.dtype, dims, Lanes::Float(out))?;
    if out_type == x.dtype {
        Ok(product)
    } else {
        cast(&product, out_type)
    }
}

/// `sum(x^2) / 2` as a scalar.
pub(crate) fn l2_loss(x: &Value) -> RuntimeResult<Value> {
    let total: f64 = float_lanes(x, "L2Loss")?.iter().map(|v| v * v).sum();
    Value::new(x.dtype, Vec::new(), Lanes::Float(vec![total / 2.0]))
}

pub(crate) fn random_uniform(rng: &mut StdRng, dtype: DType, dims: Vec<usize>) -> RuntimeResult<Value> {
    let count: usize = dims.iter().product();
    let values = (0..count).map(|_| rng.gen::<f64>()).collect();
    Value::new(dtype, dims, Lanes::Float(values))
}

/// Standard normal samples, re-drawn until within two standard deviations.
pub(crate) fn truncated_normal(
    rng: &mut StdRng,
    dtype: DType,
    dims: Vec<usize>,
) -> RuntimeResult<Value> {
    let count: usize = dims.iter().product();
    let values = (0..count)
        .map(|_| loop {
            let sample: f64 = rng.sample(StandardNormal);
            if sample.abs() <= 2.0 {
                break sample;
            }
        })
        .collect();
    Value::new(dtype, dims, Lanes::Float(values))
}

pub(crate) fn broadcast_to(x: &Value, dims: &[usize]) -> RuntimeResult<Value> {
    let target = broadcast_dims(&x.dims, dims)?;
    if target != dims {
        return Err(RuntimeError::invalid_argument(format!(
            "cannot broadcast {:?} to {:?}",
            x.dims, dims
        )));
    }
    let offsets = broadcast_offsets(&x.dims, dims);
    let lanes = match &x.lanes {
        Lanes::Float(v) => Lanes::Float(offsets.iter().map(|&i| v[i]).collect()),
        Lanes::Int(v) => Lanes::Int(offsets.iter().map(|&i| v[i]).collect()),
        Lanes::Bool(v) => Lanes::Bool(offsets.iter().map(|&i| v[i]).collect()),
    };
    Value::new(x.dtype, dims.to_vec(), lanes)
}

/// Sums a broadcast result back down to `dims`, undoing the broadcast.
pub(crate) fn sum_to_shape(x: &Value, dims: &[usize]) -> RuntimeResult<Value> {
    if x.dims == dims {
        return Ok(x.clone());
    }
    if broadcast_dims(dims, &x.dims)? != x.dims {
        return Err(RuntimeError::invalid_argument(format!(
            "{:?} is not a broadcast of {:?}",
            x.dims, dims
        )));
    }
    let offsets = broadcast_offsets(dims, &x.dims);
    let len: usize = dims.iter().product();
    let values = float_lanes(x, "gradient reduction")?;
    let mut acc = vec![0.0; len];
    for (value, offset) in values.iter().zip(offsets) {
        acc[offset] += value;
    }
    Value::new(x.dtype, dims.to_vec(), Lanes::Float(acc))
}

/// Expands the gradient of a reduction over `axes` back to `dims`, dividing
/// by the number of reduced elements when `scale` is set.
pub(crate) fn expand_reduction(
    grad: &Value,
    dims: &[usize],
    axes: &[i64],
    scale: bool,
) -> RuntimeResult<Value> {
    let axes = normalize_axes(axes, dims.len())?;
    let kept = reduced_dims(dims, &axes, true);
    let grad = reshape(grad, kept)?;
    let mut expanded = broadcast_to(&grad, dims)?;
    if scale {
        let count: usize = axes.iter().map(|&a| dims[a]).product();
        if count > 0 {
            let divisor = Value::scalar(expanded.dtype, count as f64);
            expanded = binary(BinaryOp::DivNoNan, &expanded, &divisor)?;
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(dims: &[usize], values: &[f64]) -> Value {
        Value::new(DType::Double, dims.to_vec(), Lanes::Float(values.to_vec())).unwrap()
    }

    #[test]
    fn broadcasting_binary_ops() {
        let a = floats(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = floats(&[3], &[10.0, 20.0, 30.0]);
        let sum = binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(sum.dims, vec![2, 3]);
        assert_eq!(sum.as_f64(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
        let c = floats(&[2], &[1.0, 2.0]);
        assert!(binary(BinaryOp::Add, &a, &c).is_err());
    }

    #[test]
    fn reductions_respect_axes_and_keep_dims() {
        let a = floats(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rows = reduce(ReduceKind::Sum, &a, &[1], false).unwrap();
        assert_eq!(rows.dims, vec![2]);
        assert_eq!(rows.as_f64(), vec![6.0, 15.0]);
        let cols = reduce(ReduceKind::Mean, &a, &[0], true).unwrap();
        assert_eq!(cols.dims, vec![1, 3]);
        assert_eq!(cols.as_f64(), vec![2.5, 3.5, 4.5]);
        let max = reduce(ReduceKind::Max, &a, &[-1, 0], false).unwrap();
        assert_eq!(max.as_f64(), vec![6.0]);
    }

    #[test]
    fn reshape_infers_one_axis() {
        assert_eq!(resolve_reshape(12, &[3, -1]).unwrap(), vec![3, 4]);
        assert!(resolve_reshape(12, &[5, -1]).is_err());
        assert!(resolve_reshape(12, &[-1, -1]).is_err());
    }

    #[test]
    fn matmul_with_transposes() {
        let a = floats(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = floats(&[2, 2], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(
            matmul(&a, &b, false, false).unwrap().as_f64(),
            vec![19.0, 22.0, 43.0, 50.0]
        );
        assert_eq!(
            matmul(&a, &b, true, false).unwrap().as_f64(),
            vec![26.0, 30.0, 38.0, 44.0]
        );
        assert_eq!(
            matmul(&a, &b, false, true).unwrap().as_f64(),
            vec![17.0, 23.0, 39.0, 53.0]
        );
    }

    #[test]
    fn gradient_helpers_undo_broadcasts() {
        let g = floats(&[2, 3], &[1.0; 6]);
        let summed = sum_to_shape(&g, &[3]).unwrap();
        assert_eq!(summed.as_f64(), vec![2.0, 2.0, 2.0]);
        let scalar = floats(&[], &[3.0]);
        let expanded = expand_reduction(&scalar, &[2, 3], &[0, 1], true).unwrap();
        assert_eq!(expanded.as_f64(), vec![0.5; 6]);
    }

    #[test]
    fn casts_truncate_towards_zero() {
        let a = floats(&[3], &[1.9, -1.9, 0.0]);
        let ints = cast(&a, DType::Int32).unwrap();
        assert_eq!(ints.lanes, Lanes::Int(vec![1, -1, 0]));
        let flags = cast(&a, DType::Bool).unwrap();
        assert_eq!(flags.lanes, Lanes::Bool(vec![true, true, false]));
    }

    #[test]
    fn casts_within_a_lane_kind_renormalize() {
        let wide = Value::new(DType::Int64, vec![2], Lanes::Int(vec![300, -7])).unwrap();
        let narrow = cast(&wide, DType::Int8).unwrap();
        assert_eq!(narrow.dtype, DType::Int8);
        assert_eq!(narrow.lanes, Lanes::Int(vec![44, -7]));

        let single = cast(&floats(&[1], &[0.1]), DType::Float).unwrap();
        assert_eq!(single.lanes, Lanes::Float(vec![0.1f32 as f64]));

        let flags = Value::new(DType::Bool, vec![2], Lanes::Bool(vec![true, false])).unwrap();
        assert_eq!(cast(&flags, DType::Bool).unwrap(), flags);
        let counts = cast(&flags, DType::Int32).unwrap();
        assert_eq!(counts.lanes, Lanes::Int(vec![1, 0]));
    }
}
