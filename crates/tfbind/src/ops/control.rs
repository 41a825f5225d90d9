//! Functional control flow: loops and conditionals driven by registered
//! functions.

use super::Scope;
use crate::defs::AttrValue;
use crate::error::{Error, Result};
use crate::graph::{Func, OpSpec, Output};
use crate::tensor::DType;

fn dtypes_of(values: &[Output]) -> Result<Vec<DType>> {
    values
        .iter()
        .map(|v| {
            v.dtype().ok_or_else(|| {
                Error::InvalidArgument(format!("{} has no output type", v.tensor_name()))
            })
        })
        .collect()
}

/// Repeats `body` while `cond` yields true. Both functions take the loop
/// values and must be registered in the scope's graph; `body` returns the
/// next loop values, `cond` a boolean scalar.
pub fn while_loop(scope: &Scope, inputs: &[Output], cond: &Func, body: &Func) -> Result<Vec<Output>> {
    let dtypes = match dtypes_of(inputs) {
        Ok(dtypes) => dtypes,
        Err(err) => return Err(scope.fail(err)),
    };
    let spec = OpSpec::new("While")
        .input(inputs)
        .attr("T", dtypes)
        .attr("cond", AttrValue::Func(cond.name().to_string()))
        .attr("body", AttrValue::Func(body.name().to_string()))
        .attr("parallel_iterations", 10i64);
    Ok(scope.add_operation(spec)?.outputs())
}

/// Runs `body(i, values...)` for `i` in `start..limit` stepping by `delta`
/// (int32 scalars); `body` returns the next values.
pub fn for_loop(
    scope: &Scope,
    start: &Output,
    limit: &Output,
    delta: &Output,
    inputs: &[Output],
    body: &Func,
) -> Result<Vec<Output>> {
    let dtypes = match dtypes_of(inputs) {
        Ok(dtypes) => dtypes,
        Err(err) => return Err(scope.fail(err)),
    };
    let spec = OpSpec::new("For")
        .input(start)
        .input(limit)
        .input(delta)
        .input(inputs)
        .attr("T", dtypes)
        .attr("body", AttrValue::Func(body.name().to_string()));
    Ok(scope.add_operation(spec)?.outputs())
}

/// Calls `then_branch` or `else_branch` with `inputs` depending on the
/// boolean scalar `cond`. Both branches must return `out_types`.
pub fn if_then_else(
    scope: &Scope,
    cond: &Output,
    inputs: &[Output],
    then_branch: &Func,
    else_branch: &Func,
    out_types: &[DType],
) -> Result<Vec<Output>> {
    let in_types = match dtypes_of(inputs) {
        Ok(dtypes) => dtypes,
        Err(err) => return Err(scope.fail(err)),
    };
    let spec = OpSpec::new("If")
        .input(cond)
        .input(inputs)
        .attr("Tin", in_types)
        .attr("Tout", out_types.to_vec())
        .attr(
            "then_branch",
            AttrValue::Func(then_branch.name().to_string()),
        )
        .attr(
            "else_branch",
            AttrValue::Func(else_branch.name().to_string()),
        );
    Ok(scope.add_operation(spec)?.outputs())
}
