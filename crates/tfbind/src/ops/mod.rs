//! Graph construction: the [`Scope`] builder, variable tags, function
//! building, and thin wrappers for the operations used by layers and
//! optimizers.
//!
//! Every wrapper takes the scope first and returns `Result`; a failure is
//! also recorded as the scope tree's sticky error, so later calls on any
//! derived scope fail fast with [`crate::Error::Poisoned`].

pub mod activation;
mod array;
mod control;
mod func;
mod grad;
pub mod layer;
mod math;
pub mod norm;
mod scope;
mod state;
mod tags;
mod varinit;

pub use activation::{gelu, swish, ActFn};
pub use array::{
    cast, check_numerics, constant, empty, flatten, identity, ones_like, pack, placeholder,
    reshape, scalar, vector, zeros_like,
};
pub use control::{for_loop, if_then_else, while_loop};
pub use func::{build_func, build_func_pair, call, FuncOutputs};
pub use grad::gradients;
pub use math::{
    abs, add, batch_mat_mul, div_no_nan, exp, greater, l2_loss, less, mat_mul, max, maximum,
    mean, mul, neg, pow, rsqrt, sigmoid, sign, sqrt, square, sub, sum, tanh,
};
pub use scope::Scope;
pub use state::{assign, assign_add, assign_sub, no_op, random_uniform, truncated_normal, variable};
pub use tags::VarTag;
