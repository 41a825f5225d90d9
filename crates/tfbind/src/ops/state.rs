//! Variables, assignments and random sources.

use super::Scope;
use crate::error::Result;
use crate::graph::{OpSpec, Operation, Output};
use crate::tensor::{DType, Shape};

/// Mutable tensor living in the session. Reading it before an assignment
/// fails at run time.
pub fn variable(scope: &Scope, shape: Shape, dtype: DType) -> Result<Output> {
    let spec = OpSpec::new("VariableV2")
        .attr("shape", shape)
        .attr("dtype", dtype)
        .attr("container", "")
        .attr("shared_name", "");
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn assign(scope: &Scope, var: &Output, value: &Output) -> Result<Output> {
    let spec = OpSpec::new("Assign")
        .input(var)
        .input(value)
        .attr("validate_shape", true);
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn assign_add(scope: &Scope, var: &Output, value: &Output) -> Result<Output> {
    let spec = OpSpec::new("AssignAdd").input(var).input(value);
    Ok(scope.add_operation(spec)?.output(0))
}

pub fn assign_sub(scope: &Scope, var: &Output, value: &Output) -> Result<Output> {
    let spec = OpSpec::new("AssignSub").input(var).input(value);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Does nothing; useful as a target that carries control dependencies.
pub fn no_op(scope: &Scope) -> Result<Operation> {
    scope.add_operation(OpSpec::new("NoOp"))
}

/// Uniform values in `[0, 1)` of the runtime shape `shape`.
pub fn random_uniform(scope: &Scope, shape: &Output, dtype: DType) -> Result<Output> {
    let spec = OpSpec::new("RandomUniform")
        .input(shape)
        .attr("dtype", dtype)
        .attr("seed", 0i64)
        .attr("seed2", 0i64);
    Ok(scope.add_operation(spec)?.output(0))
}

/// Standard normal values re-drawn until within two standard deviations.
pub fn truncated_normal(scope: &Scope, shape: &Output, dtype: DType) -> Result<Output> {
    let spec = OpSpec::new("TruncatedNormal")
        .input(shape)
        .attr("dtype", dtype)
        .attr("seed", 0i64)
        .attr("seed2", 0i64);
    Ok(scope.add_operation(spec)?.output(0))
}
