//! Initialization of tagged variables.

use super::array::{cast, empty, ones_like, scalar, vector, zeros_like};
use super::math::{mul, sub};
use super::state::{assign, no_op, random_uniform, truncated_normal};
use super::{Scope, VarTag};
use crate::error::{Error, Result};
use crate::graph::{Operation, Output};
use crate::tensor::{DType, Shape};

impl Scope {
    /// Builds one `NoOp` that, when run, assigns every variable tagged with an
    /// initializer and runs every operation tagged [`VarTag::InitAssign`].
    pub fn init_op(&self) -> Result<Operation> {
        let mut init_ops = Vec::new();
        for tag in VarTag::INITIALIZERS {
            for var in self.params(&[tag]) {
                init_ops.push(add_init_op(self, &var, tag)?);
            }
        }
        for value in self.params(&[VarTag::InitAssign]) {
            init_ops.push(value.op.clone());
        }
        no_op(&self.with_control_dependencies(&init_ops))
    }
}

fn variable_meta(scope: &Scope, var: &Output) -> Result<(DType, Shape)> {
    let missing = |attr: &str| {
        scope.fail(Error::MissingAttr {
            op: var.op.name().to_string(),
            attr: attr.to_string(),
        })
    };
    let dtype = var
        .op
        .attr("dtype")
        .and_then(|v| v.as_type())
        .ok_or_else(|| missing("dtype"))?;
    let shape = var
        .op
        .attr("shape")
        .and_then(|v| v.as_shape())
        .filter(|s| s.is_fully_specified())
        .cloned()
        .ok_or_else(|| missing("shape"))?;
    Ok((dtype, shape))
}

/// Scalar constant of `dtype`.
fn constant_of(scope: &Scope, dtype: DType, value: f64) -> Result<Output> {
    let c = scalar(scope, value)?;
    if dtype == DType::Double {
        Ok(c)
    } else {
        cast(scope, &c, dtype)
    }
}

/// Uniform values in `[-limit, limit)`.
fn symmetric_uniform(scope: &Scope, shape: &Output, dtype: DType, limit: f64) -> Result<Output> {
    let u = random_uniform(scope, shape, dtype)?;
    let centered = sub(scope, &u, &constant_of(scope, dtype, 0.5)?)?;
    mul(scope, &centered, &constant_of(scope, dtype, 2.0 * limit)?)
}

fn scaled_normal(scope: &Scope, shape: &Output, dtype: DType, stddev: f64) -> Result<Output> {
    let n = truncated_normal(scope, shape, dtype)?;
    mul(scope, &n, &constant_of(scope, dtype, stddev)?)
}

fn add_init_op(scope: &Scope, var: &Output, tag: VarTag) -> Result<Operation> {
    let (dtype, shape) = variable_meta(scope, var)?;
    let fan_in = shape.size(0).max(1) as f64;
    let fan_out = shape.size(-1).max(1) as f64;
    let dims: Vec<i32> = shape.to_vec()?.into_iter().map(|d| d as i32).collect();
    let shape_const = vector(scope, &dims)?;
    let value = match tag {
        VarTag::InitZeros => zeros_like(scope, &empty(scope, &shape_const, dtype)?)?,
        VarTag::InitOnes => ones_like(scope, &empty(scope, &shape_const, dtype)?)?,
        VarTag::InitUniform => random_uniform(scope, &shape_const, dtype)?,
        VarTag::InitEpsUniform => {
            let u = random_uniform(scope, &shape_const, dtype)?;
            mul(scope, &u, &constant_of(scope, dtype, 1e-4)?)?
        }
        VarTag::InitTruncNormal => truncated_normal(scope, &shape_const, dtype)?,
        VarTag::InitHeUniform => {
            symmetric_uniform(scope, &shape_const, dtype, (2.0 / fan_in).sqrt())?
        }
        VarTag::InitHeNormal => scaled_normal(scope, &shape_const, dtype, (2.0 / fan_in).sqrt())?,
        VarTag::InitLecunUniform => {
            symmetric_uniform(scope, &shape_const, dtype, (3.0 / fan_in).sqrt())?
        }
        VarTag::InitLecunNormal => {
            scaled_normal(scope, &shape_const, dtype, (1.0 / fan_in).sqrt())?
        }
        VarTag::InitXavierUniform => symmetric_uniform(
            scope,
            &shape_const,
            dtype,
            (6.0 / (fan_in + fan_out)).sqrt(),
        )?,
        VarTag::InitXavierNormal => scaled_normal(
            scope,
            &shape_const,
            dtype,
            (2.0 / (fan_in + fan_out)).sqrt(),
        )?,
        VarTag::Trainable | VarTag::DecayL1 | VarTag::DecayL2 | VarTag::InitAssign => {
            return Err(scope.fail(Error::InvalidArgument(format!(
                "{tag} is not an initializer tag"
            ))))
        }
    };
    Ok(assign(scope, var, &value)?.op)
}
