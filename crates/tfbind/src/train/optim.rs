//! Optimizers that add their update network to the graph at construction
//! time and run it once per [`Optimizer::step`].
//!
//! Gradients come from the runtime; the update formulas are expressed with
//! ordinary graph operations. Both SGD and Adam scale every gradient by
//! `learn_rate * max(losses) / |grad|^2` before applying it.

use crate::error::{Error, Result};
use crate::graph::{Operation, Output};
use crate::ops::{self, Scope, VarTag};
use crate::session::Session;
use crate::tensor::Tensor;
use std::collections::HashSet;

pub trait Optimizer {
    fn name(&self) -> &str;

    /// Variables updated by [`Optimizer::step`].
    fn params(&self) -> &[Output];

    fn learn_rate(&self) -> &Output;

    /// Runs one update alongside the requested fetches and targets.
    fn step(
        &self,
        session: &Session,
        feeds: &[(Output, Tensor)],
        fetches: &[Output],
        targets: &[Operation],
    ) -> Result<Vec<Tensor>>;
}

/// Optimizer whose whole update is one target operation.
#[derive(Debug)]
pub struct StepOptimizer {
    name: String,
    params: Vec<Output>,
    losses: Vec<Output>,
    learn_rate: Output,
    step_op: Operation,
}

impl StepOptimizer {
    pub fn losses(&self) -> &[Output] {
        &self.losses
    }
}

impl Optimizer for StepOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[Output] {
        &self.params
    }

    fn learn_rate(&self) -> &Output {
        &self.learn_rate
    }

    fn step(
        &self,
        session: &Session,
        feeds: &[(Output, Tensor)],
        fetches: &[Output],
        targets: &[Operation],
    ) -> Result<Vec<Tensor>> {
        let mut targets = targets.to_vec();
        targets.push(self.step_op.clone());
        session.run(feeds, fetches, &targets)
    }
}

/// `learn_rate * max(losses)`, the numerator of the gradient scaling.
fn scaled_max_loss(scope: &Scope, losses: &[Output], learn_rate: &Output) -> Result<Output> {
    let axis0 = ops::scalar(scope, 0i32)?;
    let packed = ops::flatten(scope, &ops::pack(scope, losses)?)?;
    let max_loss = ops::max(scope, &packed, &axis0, false)?;
    ops::mul(scope, learn_rate, &max_loss)
}

fn scale_gradient(scope: &Scope, grad: &Output, max_lr_loss: &Output) -> Result<Output> {
    let axis0 = ops::scalar(scope, 0i32)?;
    let flat = ops::flatten(scope, grad)?;
    let norm = ops::sum(scope, &ops::square(scope, &flat)?, &axis0, false)?;
    ops::mul(scope, grad, &ops::div_no_nan(scope, max_lr_loss, &norm)?)
}

/// Stochastic gradient descent over the parameters carrying `tags`
/// (default [`VarTag::Trainable`]).
///
/// # Panics
///
/// Panics if no parameter carries the requested tags.
pub fn sgd(
    scope: &Scope,
    losses: &[Output],
    learn_rate: f32,
    tags: &[VarTag],
) -> Result<StepOptimizer> {
    let params = scope.params_required(tags);
    let grads = ops::gradients(scope, losses, &params)?;
    let lr = ops::scalar(scope, learn_rate)?;
    let max_lr_loss = scaled_max_loss(scope, losses, &lr)?;
    let mut updates = Vec::with_capacity(grads.len());
    for (param, grad) in params.iter().zip(&grads) {
        let grad = scale_gradient(scope, grad, &max_lr_loss)?;
        updates.push(ops::assign_sub(scope, param, &grad)?.op);
    }
    let step_op = ops::no_op(&scope.with_control_dependencies(&updates))?;
    Ok(StepOptimizer {
        name: "SGD".to_string(),
        params,
        losses: losses.to_vec(),
        learn_rate: lr,
        step_op,
    })
}

/// Adaptive moment estimation. Moment variables are tagged
/// [`VarTag::InitZeros`], so build the init operation afterwards.
/// Typical values are `beta1 = 0.9`, `beta2 = 0.999`.
///
/// # Panics
///
/// Panics if no parameter carries the requested tags.
pub fn adam(
    scope: &Scope,
    losses: &[Output],
    learn_rate: f32,
    beta1: f32,
    beta2: f32,
    tags: &[VarTag],
) -> Result<StepOptimizer> {
    let params = scope.params_required(tags);
    let mut moments = Vec::with_capacity(params.len());
    for param in &params {
        let dtype = param.dtype().ok_or_else(|| {
            scope.fail(Error::InvalidArgument(format!(
                "parameter {} has no output type",
                param.tensor_name()
            )))
        })?;
        let m1 = ops::variable(scope, param.shape(), dtype)?;
        let m2 = ops::variable(scope, param.shape(), dtype)?;
        scope.tag(&m1, &[VarTag::InitZeros]);
        scope.tag(&m2, &[VarTag::InitZeros]);
        moments.push((m1, m2));
    }
    let grads = ops::gradients(scope, losses, &params)?;

    let lr = ops::scalar(scope, learn_rate)?;
    let max_lr_loss = scaled_max_loss(scope, losses, &lr)?;
    let b1 = ops::scalar(scope, beta1)?;
    let b1m = ops::scalar(scope, 1.0 - beta1)?;
    let b2 = ops::scalar(scope, beta2)?;
    let b2m = ops::scalar(scope, 1.0 - beta2)?;
    let eps = ops::scalar(scope, 1e-8f32)?;

    let mut updates = Vec::with_capacity(3 * grads.len());
    for ((param, grad), (m1, m2)) in params.iter().zip(&grads).zip(&moments) {
        let grad = scale_gradient(scope, grad, &max_lr_loss)?;
        let new_m1 = ops::add(
            scope,
            &ops::mul(scope, &b1, m1)?,
            &ops::mul(scope, &b1m, &grad)?,
        )?;
        let new_m2 = ops::add(
            scope,
            &ops::mul(scope, &b2, m2)?,
            &ops::mul(scope, &b2m, &ops::square(scope, &grad)?)?,
        )?;
        let denom = ops::add(scope, &eps, &ops::sqrt(scope, &new_m2)?)?;
        let direction = ops::div_no_nan(scope, &new_m1, &denom)?;
        let delta = ops::mul(scope, &lr, &direction)?;
        let after = scope.with_control_dependencies(&[delta.op.clone()]);
        updates.push(ops::assign_sub(&after, param, &delta)?.op);
        updates.push(ops::assign(&after, m1, &new_m1)?.op);
        updates.push(ops::assign(&after, m2, &new_m2)?.op);
    }
    let step_op = ops::no_op(&scope.with_control_dependencies(&updates))?;
    Ok(StepOptimizer {
        name: "Adam".to_string(),
        params,
        losses: losses.to_vec(),
        learn_rate: lr,
        step_op,
    })
}

/// Decoupled weight decay layered over another optimizer.
pub struct WeightDecay {
    name: String,
    reference: Box<dyn Optimizer>,
    decay: StepOptimizer,
}

impl Optimizer for WeightDecay {
    fn name(&self) -> &str {
        &self.name
    }

    /// The decayed subset of the reference optimizer's parameters.
    fn params(&self) -> &[Output] {
        self.decay.params()
    }

    fn learn_rate(&self) -> &Output {
        self.reference.learn_rate()
    }

    /// Runs the reference step, then the decay step.
    fn step(
        &self,
        session: &Session,
        feeds: &[(Output, Tensor)],
        fetches: &[Output],
        targets: &[Operation],
    ) -> Result<Vec<Tensor>> {
        let fetched = self.reference.step(session, feeds, fetches, targets)?;
        self.decay.step(session, &[], &[], &[])?;
        Ok(fetched)
    }
}

/// Adds decay towards zero for the reference optimizer's parameters tagged
/// [`VarTag::DecayL1`] (mean absolute value) or [`VarTag::DecayL2`] (L2
/// loss), scaled by `decay_rate` times the reference learning rate.
/// Parameters are visited in tagging order, each once.
pub fn weight_decay(
    scope: &Scope,
    reference: Box<dyn Optimizer>,
    decay_rate: f32,
) -> Result<WeightDecay> {
    let candidates: HashSet<&Output> = reference.params().iter().collect();
    let axis0 = ops::scalar(scope, 0i32)?;
    let mut seen = HashSet::new();
    let mut params = Vec::new();
    let mut losses = Vec::new();
    for param in scope.params(&[VarTag::DecayL1]) {
        if candidates.contains(&param) && seen.insert(param.clone()) {
            let flat = ops::flatten(scope, &param)?;
            losses.push(ops::mean(scope, &ops::abs(scope, &flat)?, &axis0, false)?);
            params.push(param);
        }
    }
    for param in scope.params(&[VarTag::DecayL2]) {
        if candidates.contains(&param) && seen.insert(param.clone()) {
            losses.push(ops::l2_loss(scope, &param)?);
            params.push(param);
        }
    }

    let decay = ops::scalar(scope, decay_rate)?;
    let rate = ops::mul(scope, &decay, reference.learn_rate())?;
    let mut updates = Vec::with_capacity(params.len());
    if !params.is_empty() {
        let grads = ops::gradients(scope, &losses, &params)?;
        for (param, grad) in params.iter().zip(&grads) {
            let delta = ops::mul(scope, &rate, grad)?;
            updates.push(ops::assign_sub(scope, param, &delta)?.op);
        }
    }
    let step_op = ops::no_op(&scope.with_control_dependencies(&updates))?;
    Ok(WeightDecay {
        name: format!("{}W", reference.name()),
        reference,
        decay: StepOptimizer {
            name: "wdecay".to_string(),
            params,
            losses,
            learn_rate: decay,
            step_op,
        },
    })
}

/// Adam with decoupled weight decay, built in `adam` and `wdecay` sub-scopes.
pub fn adam_w(
    scope: &Scope,
    losses: &[Output],
    decay_rate: f32,
    learn_rate: f32,
    beta1: f32,
    beta2: f32,
    tags: &[VarTag],
) -> Result<WeightDecay> {
    let adam = adam(&scope.sub_scope("adam"), losses, learn_rate, beta1, beta2, tags)?;
    weight_decay(&scope.sub_scope("wdecay"), Box::new(adam), decay_rate)
}
