//! Build, capture and run computation graphs on a native ML runtime.
//!
//! The runtime does the heavy lifting (type inference, gradients, kernels,
//! sessions) behind [`runtime::Runtime`]. This crate manages runtime handle
//! lifetimes, marshals values, and provides the [`ops::Scope`] builder with
//! unique naming, namespaces, control dependencies, device placement and a
//! sticky error shared by a scope tree. Subgraphs can be captured as
//! [`Func`]s, serialized, registered into other graphs and invoked there.

pub mod cast;
pub mod defs;
mod env;
pub mod error;
pub mod graph;
pub mod io;
pub mod ops;
pub mod runtime;
pub mod saved_model;
pub mod session;
pub mod tensor;
pub mod train;

pub use cast::CastWorker;
pub use error::{Error, Result};
pub use graph::{Func, Graph, Input, OpSpec, Operation, Output};
pub use ops::{Scope, VarTag};
pub use runtime::{Runtime, SessionOptions};
pub use saved_model::{list_saved_model_details, SavedModel, SavedModelBuilder};
pub use session::Session;
pub use tensor::{DType, Shape, Tensor};
