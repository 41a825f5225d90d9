mod common;

use tfbind::ops::{self, layer, norm};
use tfbind::{DType, Output, Scope, Shape, Tensor, VarTag};

fn matrix(scope: &Scope, rows: &[[f32; 3]; 3]) -> anyhow::Result<Output> {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(ops::constant(scope, Tensor::from_slice(&[3, 3], &flat)?)?)
}

fn run_f32(scope: &Scope, outputs: &[Output]) -> anyhow::Result<Vec<Vec<f32>>> {
    let graph = scope.finalize()?;
    let session = common::session(&graph);
    common::fetch(&session, outputs)
        .iter()
        .map(|t| Ok(t.to_vec::<f32>()?))
        .collect()
}

#[test]
fn norms_reduce_to_scalars() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = matrix(&scope, &[[1.1, 2.2, 3.3], [9.1, 8.2, 7.3], [1.0, 1.0, 1.0]])?;
    let signed = ops::neg(&scope, &x)?;
    let l2 = norm::norm_l2(&scope, &x)?;
    let l1 = norm::norm_l1(&scope, &signed)?;
    let abs_l1 = norm::norm_abs_l1(&scope, &signed)?;
    assert_eq!(l2.shape(), Shape::scalar());

    let values = run_f32(&scope, &[l2, l1, abs_l1])?;
    common::assert_close(&values[0], &[24.809], 1e-3);
    common::assert_close(&values[1], &[-34.2 / 9.0], 1e-4);
    common::assert_close(&values[2], &[34.2 / 9.0], 1e-4);
    Ok(())
}

#[test]
fn layer_norm_normalizes_rows() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = matrix(&scope, &[[1.1, 2.2, 3.3], [9.7, 8.8, 7.9], [1.0, 1.0, 1.0]])?;
    let y = norm::layer_norm(&scope, &x)?;
    let values = run_f32(&scope, &[y])?;
    common::assert_close(
        &values[0],
        &[-1.22474, 0.0, 1.22474, 1.22474, 0.0, -1.22474, 0.0, 0.0, 0.0],
        1e-3,
    );
    Ok(())
}

#[test]
fn batch_norm_normalizes_columns() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = matrix(&scope, &[[1.1, 2.2, 3.3], [9.7, 8.8, 7.9], [1.0, 1.0, 1.0]])?;
    let y = norm::batch_norm(&scope, &x)?;
    let values = run_f32(&scope, &[y])?;
    common::assert_close(
        &values[0],
        &[
            -0.69481, -0.52489, -0.26726, 1.41414, 1.39971, 1.33631, -0.71933, -0.87482,
            -1.06904,
        ],
        1e-3,
    );
    Ok(())
}

#[test]
fn activations() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::vector(&scope, &[-1.0f32, 0.0, 1.0])?;
    let swish = ops::swish(&scope, &x)?;
    let gelu = ops::gelu(&scope, &x)?;
    let values = run_f32(&scope, &[swish, gelu])?;
    common::assert_close(&values[0], &[-0.268941, 0.0, 0.731059], 1e-5);
    common::assert_close(&values[1], &[-0.158808, 0.0, 0.841192], 1e-5);
    Ok(())
}

#[test]
fn init_op_assigns_tagged_variables() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let zeros = ops::variable(&scope, Shape::new(vec![2, 2]), DType::Float)?;
    let ones = ops::variable(&scope, Shape::new(vec![3]), DType::Double)?;
    let uniform = ops::variable(&scope, Shape::new(vec![64]), DType::Float)?;
    let he = ops::variable(&scope, Shape::new(vec![8, 4]), DType::Float)?;
    let counter = ops::variable(&scope, Shape::scalar(), DType::Int32)?;
    scope.tag(&zeros, &[VarTag::InitZeros]);
    scope.tag(&ones, &[VarTag::InitOnes]);
    scope.tag(&uniform, &[VarTag::InitUniform]);
    scope.tag(&he, &[VarTag::InitHeUniform]);
    let start = ops::assign(&scope, &counter, &ops::scalar(&scope, 5i32)?)?;
    scope.tag(&start, &[VarTag::InitAssign]);
    let init = scope.init_op()?;
    assert_eq!(init.op_type(), "NoOp");

    let graph = scope.finalize()?;
    let session = common::session(&graph);
    assert!(session.run(&[], &[zeros.clone()], &[]).is_err());
    session.run(&[], &[], &[init])?;

    let values = common::fetch(&session, &[zeros, ones, uniform, he, counter]);
    assert_eq!(values[0].to_vec::<f32>()?, vec![0.0; 4]);
    assert_eq!(values[1].to_vec::<f64>()?, vec![1.0; 3]);
    let uniform = values[2].to_vec::<f32>()?;
    assert!(uniform.iter().all(|v| (0.0..1.0).contains(v)));
    assert!(uniform.iter().any(|v| *v != uniform[0]));
    let limit = (2.0f32 / 8.0).sqrt();
    assert!(values[3].to_vec::<f32>()?.iter().all(|v| v.abs() <= limit));
    assert_eq!(values[4].scalar_value::<i32>()?, 5);
    Ok(())
}

#[test]
fn linear_and_bias_create_tagged_variables() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::constant(&scope, Tensor::from_slice(&[2, 3], &[1.0f32; 6])?)?;
    let y = layer::mlp(&scope, &x, 4, Some(ops::swish), &[])?;
    assert_eq!(y.shape(), Shape::new(vec![2, 4]));

    let trainable = scope.params(&[VarTag::Trainable]);
    assert_eq!(trainable.len(), 2);
    assert_eq!(trainable[0].shape(), Shape::new(vec![3, 4]));
    assert_eq!(trainable[1].shape(), Shape::new(vec![4]));
    assert_eq!(scope.params(&[VarTag::DecayL2]), vec![trainable[0].clone()]);
    assert_eq!(scope.params(&[VarTag::DecayL1]), vec![trainable[1].clone()]);

    let batched = ops::constant(&scope, Tensor::from_slice(&[2, 2, 3], &[0.5f32; 12])?)?;
    let projected = layer::linear(&scope, &batched, 5, &[VarTag::InitOnes])?;
    assert_eq!(projected.shape(), Shape::new(vec![2, 2, 5]));
    assert_eq!(projected.op.op_type(), "BatchMatMulV3");

    let init = scope.init_op()?;
    let graph = scope.finalize()?;
    let session = common::session(&graph);
    session.run(&[], &[], &[init])?;
    let values = common::fetch(&session, &[y, projected]);
    assert_eq!(values[0].dims(), &[2, 4]);
    assert_eq!(values[1].to_vec::<f32>()?, vec![1.5; 20]);
    Ok(())
}

#[test]
fn linear_needs_a_known_feature_count() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::placeholder(&scope, DType::Float, None)?;
    assert!(layer::linear(&scope, &x, 2, &[]).is_err());
    assert!(scope.err().is_some());
    Ok(())
}
