//! The boundary to the native runtime.
//!
//! Everything that needs real graph machinery (type and shape inference,
//! function extraction, gradients, kernels, sessions) lives behind the
//! [`Runtime`] trait. Handles crossing the boundary are opaque identifiers
//! owned by the runtime; the binding wraps them in RAII types that release
//! them on drop.

pub mod registry;

use crate::defs::{AttrValue, MetaGraphDef};
use crate::tensor::{DType, Shape, Tensor};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle_id!(
    /// Runtime-owned graph.
    GraphId
);
handle_id!(
    /// Operation inside a graph; only meaningful together with its [`GraphId`].
    OperationId
);
handle_id!(
    /// Runtime-owned function object, independent of any graph.
    FuncId
);
handle_id!(
    /// Runtime-owned session.
    SessionId
);

/// Reference to one output of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub op: OperationId,
    pub index: usize,
}

/// Operation input as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    Single(OutputRef),
    List(Vec<OutputRef>),
}

/// Everything the runtime needs to append one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationDescription {
    pub op_type: String,
    pub name: String,
    pub inputs: Vec<InputRef>,
    pub control_inputs: Vec<OperationId>,
    pub device: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Inferred type and shape of an operation output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub dtype: DType,
    pub shape: Shape,
}

/// Immutable description of an appended operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationInfo {
    pub name: String,
    pub op_type: String,
    pub device: String,
    pub inputs: Vec<InputRef>,
    pub control_inputs: Vec<OperationId>,
    pub outputs: Vec<OutputInfo>,
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Request to extract a graph into a function.
#[derive(Debug, Clone)]
pub struct FunctionCapture {
    pub name: String,
    /// Suffix the name with a content hash so distinct bodies never collide.
    pub append_hash_to_name: bool,
    /// Operations to capture; `None` captures every operation of the graph.
    pub operations: Option<Vec<OperationId>>,
    pub inputs: Vec<OutputRef>,
    pub outputs: Vec<OutputRef>,
    pub output_names: Option<Vec<String>>,
    pub description: String,
}

/// Options forwarded when a session is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    /// Execution engine to connect to; empty means in-process.
    pub target: String,
    /// Opaque serialized runtime configuration.
    pub config: Vec<u8>,
}

/// Result of loading a saved model: a fresh graph, a session over it with the
/// variables restored, and the selected meta graph.
#[derive(Debug, Clone)]
pub struct LoadedSavedModel {
    pub graph: GraphId,
    pub session: SessionId,
    pub meta_graph: MetaGraphDef,
}

/// Status codes reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    OutOfRange,
    Unimplemented,
    Internal,
}

impl fmt::Display for RuntimeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RuntimeErrorCode::InvalidArgument => "invalid argument",
            RuntimeErrorCode::NotFound => "not found",
            RuntimeErrorCode::AlreadyExists => "already exists",
            RuntimeErrorCode::FailedPrecondition => "failed precondition",
            RuntimeErrorCode::OutOfRange => "out of range",
            RuntimeErrorCode::Unimplemented => "unimplemented",
            RuntimeErrorCode::Internal => "internal",
        };
        f.write_str(text)
    }
}

/// Structured failure reported across the runtime boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub code: RuntimeErrorCode,
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: RuntimeErrorCode, message: impl Into<String>) -> Self {
        RuntimeError {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::AlreadyExists, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::FailedPrecondition, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::OutOfRange, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorCode::Internal, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Convenience alias for results returned by runtime calls.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Native runtime consumed by the binding.
///
/// Every call may fail. Calls are blocking and the implementation must be
/// safe to share between threads; the binding never mutates one graph from
/// two threads at once.
pub trait Runtime: Send + Sync {
    /// Human-readable identifier (e.g. `"ref"`).
    fn runtime_name(&self) -> &str;

    fn version(&self) -> String;

    fn new_graph(&self) -> RuntimeResult<GraphId>;

    /// Releases a graph; unknown ids are ignored.
    fn delete_graph(&self, graph: GraphId);

    /// Validates and appends one operation, inferring its output types and shapes.
    fn add_operation(
        &self,
        graph: GraphId,
        desc: &OperationDescription,
    ) -> RuntimeResult<OperationId>;

    fn operation_info(&self, graph: GraphId, op: OperationId) -> RuntimeResult<OperationInfo>;

    fn operation_by_name(&self, graph: GraphId, name: &str) -> RuntimeResult<Option<OperationId>>;

    /// All operations in insertion order.
    fn operations(&self, graph: GraphId) -> RuntimeResult<Vec<OperationId>>;

    /// Serializes the graph (nodes and function library) as a `GraphDef`.
    fn export_graph(&self, graph: GraphId) -> RuntimeResult<Vec<u8>>;

    /// Imports a serialized `GraphDef`, prefixing node names with `prefix/` when non-empty.
    fn import_graph(&self, graph: GraphId, graph_def: &[u8], prefix: &str) -> RuntimeResult<()>;

    fn graph_to_function(&self, graph: GraphId, capture: &FunctionCapture)
        -> RuntimeResult<FuncId>;

    /// Copies a function (and optionally its gradient) into a graph's library.
    fn copy_function(
        &self,
        graph: GraphId,
        func: FuncId,
        gradient: Option<FuncId>,
    ) -> RuntimeResult<()>;

    /// Returns fresh function handles for every function in a graph's library.
    fn graph_functions(&self, graph: GraphId) -> RuntimeResult<Vec<FuncId>>;

    fn function_name(&self, func: FuncId) -> RuntimeResult<String>;

    fn function_to_bytes(&self, func: FuncId) -> RuntimeResult<Vec<u8>>;

    fn function_from_bytes(&self, bytes: &[u8]) -> RuntimeResult<FuncId>;

    fn function_set_attr(&self, func: FuncId, name: &str, value: &[u8]) -> RuntimeResult<()>;

    fn function_get_attr(&self, func: FuncId, name: &str) -> RuntimeResult<Vec<u8>>;

    /// Releases a function handle; copies registered in graphs are unaffected.
    fn delete_function(&self, func: FuncId);

    /// Adds operations computing `sum(dy/dx)` for every `x`, with optional
    /// initial gradients `dx` (defaults to ones).
    fn add_gradients(
        &self,
        graph: GraphId,
        prefix: &str,
        ys: &[OutputRef],
        xs: &[OutputRef],
        dx: Option<&[OutputRef]>,
    ) -> RuntimeResult<Vec<OutputRef>>;

    fn new_session(&self, graph: GraphId, options: &SessionOptions) -> RuntimeResult<SessionId>;

    fn session_run(
        &self,
        session: SessionId,
        feeds: &[(OutputRef, Tensor)],
        fetches: &[OutputRef],
        targets: &[OperationId],
    ) -> RuntimeResult<Vec<Tensor>>;

    fn close_session(&self, session: SessionId) -> RuntimeResult<()>;

    fn load_saved_model(
        &self,
        export_dir: &Path,
        tags: &[String],
        options: &SessionOptions,
    ) -> RuntimeResult<LoadedSavedModel>;
}
