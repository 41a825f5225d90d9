mod common;

use tfbind::ops::{self, layer, norm};
use tfbind::train::{self, Optimizer};
use tfbind::{Output, Scope, Session, Shape, Tensor, VarTag};

/// Least squares fit of `y = x0 + 2 * x1` with one dense layer.
fn regression(scope: &Scope) -> anyhow::Result<Output> {
    let x = ops::constant(
        scope,
        Tensor::from_slice(&[4, 2], &[1.0f32, 2.0, 2.0, 1.0, 3.0, 0.0, 0.0, 3.0])?,
    )?;
    let target = ops::constant(scope, Tensor::from_slice(&[4, 1], &[5.0f32, 4.0, 3.0, 6.0])?)?;
    let model = scope.sub_scope("model");
    let y = layer::bias(&model, &layer::linear(&model, &x, 1, &[])?, &[])?;
    Ok(norm::norm_l2(scope, &ops::sub(scope, &y, &target)?)?)
}

fn loss_value(session: &Session, loss: &Output) -> anyhow::Result<f32> {
    Ok(common::fetch(session, &[loss.clone()])[0].scalar_value::<f32>()?)
}

#[test]
fn gradients_of_a_simple_expression() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::vector(&scope, &[1.0f32, -2.0, 3.0])?;
    let w = ops::vector(&scope, &[0.5f32, 0.5, 2.0])?;
    let y = ops::sum(
        &scope,
        &ops::mul(&scope, &ops::square(&scope, &x)?, &w)?,
        &ops::scalar(&scope, 0i32)?,
        false,
    )?;
    let grads = ops::gradients(&scope, &[y], &[x.clone(), w])?;
    assert!(grads[0].op.name().starts_with("gradients/"));

    let graph = scope.finalize()?;
    let session = common::session(&graph);
    let values = common::fetch(&session, &grads);
    common::assert_close(&values[0].to_vec::<f32>()?, &[1.0, -2.0, 12.0], 1e-6);
    common::assert_close(&values[1].to_vec::<f32>()?, &[1.0, 4.0, 9.0], 1e-6);
    Ok(())
}

#[test]
fn sgd_reduces_the_loss() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let loss = regression(&scope)?;
    let optimizer = train::sgd(&scope, &[loss.clone()], 0.1, &[])?;
    assert_eq!(optimizer.name(), "SGD");
    assert_eq!(optimizer.params().len(), 2);
    let init = scope.init_op()?;

    let graph = scope.finalize()?;
    let session = common::session(&graph);
    session.run(&[], &[], &[init])?;
    let before = loss_value(&session, &loss)?;
    for _ in 0..30 {
        optimizer.step(&session, &[], &[], &[])?;
    }
    let after = loss_value(&session, &loss)?;
    assert!(after < before, "loss went from {before} to {after}");
    Ok(())
}

#[test]
fn adam_reduces_the_loss() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let loss = regression(&scope)?;
    let optimizer = train::adam(&scope, &[loss.clone()], 0.05, 0.9, 0.999, &[])?;
    // Moment estimates are zero-initialized variables.
    assert_eq!(scope.params(&[VarTag::InitZeros]).len(), 4);
    let init = scope.init_op()?;

    let graph = scope.finalize()?;
    let session = common::session(&graph);
    session.run(&[], &[], &[init])?;
    let before = loss_value(&session, &loss)?;
    for _ in 0..59 {
        optimizer.step(&session, &[], &[], &[])?;
    }
    let last = optimizer.step(&session, &[], &[loss.clone()], &[])?;
    let after = loss_value(&session, &loss)?;
    assert!(after < before, "loss went from {before} to {after}");
    assert_eq!(last.len(), 1);
    Ok(())
}

#[test]
fn adam_w_decays_tagged_parameters() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let loss = regression(&scope)?;
    let optimizer = train::adam_w(&scope, &[loss.clone()], 0.01, 0.05, 0.9, 0.999, &[])?;
    assert_eq!(optimizer.name(), "AdamW");
    // The weight is L2-decayed and the bias L1-decayed; both are visited once.
    assert_eq!(optimizer.params().len(), 2);
    let init = scope.init_op()?;

    let graph = scope.finalize()?;
    let session = common::session(&graph);
    session.run(&[], &[], &[init])?;
    for _ in 0..5 {
        optimizer.step(&session, &[], &[], &[])?;
    }
    let params: Vec<Output> = optimizer.params().to_vec();
    for value in common::fetch(&session, &params) {
        assert!(value.to_vec::<f32>()?.iter().all(|v| v.is_finite()));
    }
    Ok(())
}

#[test]
fn weight_decay_without_decay_tags_is_a_no_op() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let v = ops::variable(&scope, Shape::new(vec![2]), tfbind::DType::Float)?;
    scope.tag(&v, &[VarTag::Trainable, VarTag::InitOnes]);
    let loss = norm::norm_l2(&scope, &v)?;
    let sgd = train::sgd(&scope, &[loss], 0.1, &[])?;
    let decayed = train::weight_decay(&scope, Box::new(sgd), 0.5)?;
    assert!(decayed.params().is_empty());
    assert_eq!(decayed.name(), "SGDW");
    Ok(())
}
