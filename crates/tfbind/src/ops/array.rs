//! Sources, constants and shape manipulation.

use super::Scope;
use crate::error::Result;
use crate::graph::{OpSpec, Output};
use crate::tensor::{DType, Element, Shape, Tensor};

/// Value fed at run time. `shape` constrains what may be fed.
pub fn placeholder(scope: &Scope, dtype: DType, shape: Option<Shape>) -> Result<Output> {
    let mut spec = OpSpec::new("Placeholder").attr("dtype", dtype);
    if let Some(shape) = shape {
        spec = spec.attr("shape", shape);
    }
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn constant(scope: &Scope, value: Tensor) -> Result<Output> {
    let spec = OpSpec::new("Const")
        .attr("dtype", value.dtype())
        .attr("value", value);
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn scalar<T: Element>(scope: &Scope, value: T) -> Result<Output> {
    constant(scope, Tensor::scalar(value))
}

pub fn vector<T: Element>(scope: &Scope, values: &[T]) -> Result<Output> {
    constant(scope, Tensor::vector(values))
}

pub fn identity(scope: &Scope, x: &Output) -> Result<Output> {
    Ok(scope.add_operation(OpSpec::new("Identity").input(x))?.output(0))
}

pub fn cast(scope: &Scope, x: &Output, dtype: DType) -> Result<Output> {
    let spec = OpSpec::new("Cast").input(x).attr("DstT", dtype);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Reshapes `x` to the runtime value of `shape` (an int32 or int64 vector,
/// `-1` infers one axis).
pub fn reshape(scope: &Scope, x: &Output, shape: &Output) -> Result<Output> {
    let spec = OpSpec::new("Reshape").input(x).input(shape);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Reshapes `x` to one dimension.
pub fn flatten(scope: &Scope, x: &Output) -> Result<Output> {
    let shape = vector(scope, &[-1i64])?;
    reshape(scope, x, &shape)
}

/// Stacks same-shaped tensors along a new leading axis.
pub fn pack(scope: &Scope, values: &[Output]) -> Result<Output> {
    let spec = OpSpec::new("Pack")
        .input(values)
        .attr("N", values.len() as i64)
        .attr("axis", 0i64);
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn zeros_like(scope: &Scope, x: &Output) -> Result<Output> {
    Ok(scope.add_operation(OpSpec::new("ZerosLike").input(x))?.output(0))
}

pub fn ones_like(scope: &Scope, x: &Output) -> Result<Output> {
    Ok(scope.add_operation(OpSpec::new("OnesLike").input(x))?.output(0))
}

/// Uninitialized tensor of the given runtime shape.
pub fn empty(scope: &Scope, shape: &Output, dtype: DType) -> Result<Output> {
    let spec = OpSpec::new("Empty").input(shape).attr("dtype", dtype);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Passes `x` through, failing at run time if it holds NaN or infinity.
pub fn check_numerics(scope: &Scope, x: &Output, message: &str) -> Result<Output> {
    let spec = OpSpec::new("CheckNumerics")
        .input(x)
        .attr("message", message);
    Ok(scope.add_operation(spec)?.output(0))
}
