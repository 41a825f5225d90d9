//! Training helpers built on tagged variables.

pub mod optim;

pub use optim::{adam, adam_w, sgd, weight_decay, Optimizer, StepOptimizer, WeightDecay};
