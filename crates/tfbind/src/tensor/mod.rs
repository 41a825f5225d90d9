//! Host-side tensor types: dtypes, partially known shapes and dense payloads.

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::{Element, Tensor};
pub use shape::Shape;
