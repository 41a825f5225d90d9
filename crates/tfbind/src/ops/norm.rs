//! Norms and normalizations composed from primitive operations.

use super::array::{flatten, reshape, scalar, vector};
use super::math::{abs, add, mean, mul, rsqrt, square, sub};
use super::Scope;
use crate::error::Result;
use crate::graph::Output;

const EPSILON: f32 = 1e-6;

/// Mean of all element values.
pub fn norm_l1(scope: &Scope, x: &Output) -> Result<Output> {
    let axis0 = scalar(scope, 0i32)?;
    mean(scope, &flatten(scope, x)?, &axis0, false)
}

/// Mean of all absolute element values.
pub fn norm_abs_l1(scope: &Scope, x: &Output) -> Result<Output> {
    let axis0 = scalar(scope, 0i32)?;
    let flat = flatten(scope, x)?;
    mean(scope, &abs(scope, &flat)?, &axis0, false)
}

/// Mean of all squared element values.
pub fn norm_l2(scope: &Scope, x: &Output) -> Result<Output> {
    let axis0 = scalar(scope, 0i32)?;
    let flat = flatten(scope, x)?;
    mean(scope, &square(scope, &flat)?, &axis0, false)
}

fn normalize(scope: &Scope, x: &Output, values: &Output, axis: i32, keep_dims: bool) -> Result<Output> {
    let axis = scalar(scope, axis)?;
    let mean1 = mean(scope, values, &axis, keep_dims)?;
    let mean2 = mean(scope, &square(scope, values)?, &axis, keep_dims)?;
    let eps = scalar(scope, EPSILON)?;
    let variance = sub(scope, &mean2, &square(scope, &mean1)?)?;
    let inv_std = rsqrt(scope, &add(scope, &eps, &variance)?)?;
    mul(scope, &inv_std, &sub(scope, x, &mean1)?)
}

/// Normalizes every batch element (axis 0 entry) to zero mean and unit variance.
pub fn layer_norm(scope: &Scope, x: &Output) -> Result<Output> {
    let batches = x.shape().size(0);
    let rows = reshape(scope, x, &vector(scope, &[batches, -1])?)?;
    normalize(scope, x, &rows, 1, true)
}

/// Normalizes every feature across the batch axis.
pub fn batch_norm(scope: &Scope, x: &Output) -> Result<Output> {
    normalize(scope, x, x, 0, false)
}
