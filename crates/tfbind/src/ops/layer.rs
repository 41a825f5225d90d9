//! Dense layers that create and tag their own variables.

use super::activation::ActFn;
use super::array::check_numerics;
use super::math::{add, batch_mat_mul, mat_mul};
use super::state::variable;
use super::{Scope, VarTag};
use crate::error::{Error, Result};
use crate::graph::Output;
use crate::tensor::{DType, Shape};

const LINEAR_TAGS: [VarTag; 3] = [VarTag::InitXavierNormal, VarTag::Trainable, VarTag::DecayL2];
const BIAS_TAGS: [VarTag; 3] = [VarTag::InitEpsUniform, VarTag::Trainable, VarTag::DecayL1];

fn known_last_dim(scope: &Scope, x: &Output) -> Result<(i64, DType)> {
    let last = x.shape().size(-1);
    let dtype = x.dtype();
    match (last, dtype) {
        (last, Some(dtype)) if last > 0 => Ok((last, dtype)),
        _ => Err(scope.fail(Error::InvalidArgument(format!(
            "{} needs a known last dimension and type, got shape {}",
            x.tensor_name(),
            x.shape()
        )))),
    }
}

/// Projects the last axis of `x` to `out` features through a weight variable
/// of shape `[in, out]`. Without tags the weight is trainable, L2-decayed and
/// Xavier-normal initialized.
pub fn linear(scope: &Scope, x: &Output, out: usize, tags: &[VarTag]) -> Result<Output> {
    let (in_dim, dtype) = known_last_dim(scope, x)?;
    let weight = variable(scope, Shape::new(vec![in_dim, out as i64]), dtype)?;
    scope.tag(&weight, if tags.is_empty() { &LINEAR_TAGS[..] } else { tags });
    let checked = check_numerics(scope, &weight, weight.op.name())?;
    if x.shape().rank() == Some(2) {
        mat_mul(scope, x, &checked, false, false)
    } else {
        batch_mat_mul(scope, x, &checked, dtype)
    }
}

/// Adds a bias over the last axis of `x`. Without tags the bias is
/// trainable, L1-decayed and initialized with tiny uniform noise.
pub fn bias(scope: &Scope, x: &Output, tags: &[VarTag]) -> Result<Output> {
    let (features, dtype) = known_last_dim(scope, x)?;
    let bias = variable(scope, Shape::new(vec![features]), dtype)?;
    scope.tag(&bias, if tags.is_empty() { &BIAS_TAGS[..] } else { tags });
    let checked = check_numerics(scope, &bias, bias.op.name())?;
    add(scope, x, &checked)
}

/// Linear projection, followed by bias and activation when `act` is given.
pub fn mlp(
    scope: &Scope,
    x: &Output,
    out: usize,
    act: Option<ActFn>,
    tags: &[VarTag],
) -> Result<Output> {
    let y = linear(scope, x, out, tags)?;
    match act {
        Some(act) => {
            let y = bias(scope, &y, tags)?;
            act(scope, &y)
        }
        None => Ok(y),
    }
}
