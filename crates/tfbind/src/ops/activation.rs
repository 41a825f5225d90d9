//! Composite activation functions.

use super::{array::scalar, math, Scope};
use crate::error::Result;
use crate::graph::Output;

/// Activation applied by [`crate::ops::layer::mlp`].
pub type ActFn = fn(&Scope, &Output) -> Result<Output>;

/// `x * sigmoid(x)`.
pub fn swish(scope: &Scope, x: &Output) -> Result<Output> {
    let gate = math::sigmoid(scope, x)?;
    math::mul(scope, x, &gate)
}

/// Tanh approximation of the Gaussian error linear unit:
/// `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))`.
pub fn gelu(scope: &Scope, x: &Output) -> Result<Output> {
    let one = scalar(scope, 1.0f32)?;
    let half = scalar(scope, 0.5f32)?;
    let sqrt_2_over_pi = scalar(scope, 0.797_884_6_f32)?;
    let coeff = scalar(scope, 0.044_715_f32)?;
    let cube = math::mul(scope, x, &math::mul(scope, x, x)?)?;
    let inner = math::add(scope, x, &math::mul(scope, &coeff, &cube)?)?;
    let inner = math::mul(scope, &sqrt_2_over_pi, &inner)?;
    let gate = math::add(scope, &one, &math::tanh(scope, &inner)?)?;
    let half_x = math::mul(scope, &half, x)?;
    math::mul(scope, &half_x, &gate)
}
