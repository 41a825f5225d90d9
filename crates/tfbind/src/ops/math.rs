//! Element-wise arithmetic, comparisons and reductions.

use super::Scope;
use crate::error::Result;
use crate::graph::{OpSpec, Output};
use crate::tensor::DType;

fn unary(scope: &Scope, op_type: &str, x: &Output) -> Result<Output> {
    Ok(scope.add_operation(OpSpec::new(op_type).input(x))?.output(0))
}

fn binary(scope: &Scope, op_type: &str, x: &Output, y: &Output) -> Result<Output> {
    Ok(scope
        .add_operation(OpSpec::new(op_type).input(x).input(y))?
        .output(0))
}

pub fn neg(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Neg", x)
}

pub fn abs(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Abs", x)
}

pub fn sign(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Sign", x)
}

pub fn square(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Square", x)
}

pub fn sqrt(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Sqrt", x)
}

pub fn rsqrt(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Rsqrt", x)
}

pub fn exp(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Exp", x)
}

pub fn tanh(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Tanh", x)
}

pub fn sigmoid(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "Sigmoid", x)
}

/// `x + y` with broadcasting.
pub fn add(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "AddV2", x, y)
}

pub fn sub(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Sub", x, y)
}

pub fn mul(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Mul", x, y)
}

/// `x / y`, yielding 0 where `y` is 0.
pub fn div_no_nan(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "DivNoNan", x, y)
}

pub fn pow(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Pow", x, y)
}

pub fn maximum(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Maximum", x, y)
}

pub fn less(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Less", x, y)
}

pub fn greater(scope: &Scope, x: &Output, y: &Output) -> Result<Output> {
    binary(scope, "Greater", x, y)
}

fn reduction(
    scope: &Scope,
    op_type: &str,
    x: &Output,
    axes: &Output,
    keep_dims: bool,
) -> Result<Output> {
    let spec = OpSpec::new(op_type)
        .input(x)
        .input(axes)
        .attr("keep_dims", keep_dims);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Sum over the axes given by the int32 tensor `axes`.
pub fn sum(scope: &Scope, x: &Output, axes: &Output, keep_dims: bool) -> Result<Output> {
    reduction(scope, "Sum", x, axes, keep_dims)
}

pub fn mean(scope: &Scope, x: &Output, axes: &Output, keep_dims: bool) -> Result<Output> {
    reduction(scope, "Mean", x, axes, keep_dims)
}

pub fn max(scope: &Scope, x: &Output, axes: &Output, keep_dims: bool) -> Result<Output> {
    reduction(scope, "Max", x, axes, keep_dims)
}

/// Matrix product of two rank-2 tensors.
pub fn mat_mul(
    scope: &Scope,
    a: &Output,
    b: &Output,
    transpose_a: bool,
    transpose_b: bool,
) -> Result<Output> {
    let spec = OpSpec::new("MatMul")
        .input(a)
        .input(b)
        .attr("transpose_a", transpose_a)
        .attr("transpose_b", transpose_b);
    Ok(scope.add_operation(spec)?.output(0))
}

/// `sum(x^2) / 2`.
pub fn l2_loss(scope: &Scope, x: &Output) -> Result<Output> {
    unary(scope, "L2Loss", x)
}

/// Batched matrix product; leading axes of `x` broadcast against `y`.
pub fn batch_mat_mul(scope: &Scope, x: &Output, y: &Output, out_type: DType) -> Result<Output> {
    let spec = OpSpec::new("BatchMatMulV3")
        .input(x)
        .input(y)
        .attr("adj_x", false)
        .attr("adj_y", false)
        .attr("Tout", out_type);
    Ok(scope.add_operation(spec)?.output(0))
}
