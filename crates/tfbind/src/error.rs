//! Error type shared by every binding entry point.

use crate::defs::DefSerdeError;
use crate::runtime::{RuntimeError, RuntimeResult};
use std::sync::Arc;
use thiserror::Error;

/// Binding error. Cheap to clone so a scope tree can keep its first failure
/// while still handing it to the caller that triggered it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to add operation {op_type:?} named {name:?}: {source}")]
    AddOperation {
        op_type: String,
        name: String,
        #[source]
        source: RuntimeError,
    },
    /// A scope in the same tree already failed; carries the first failure.
    #[error("scope already failed: {0}")]
    Poisoned(#[source] Arc<Error>),
    #[error("scope has been finalized and is no longer usable")]
    ScopeFinalized,
    #[error("mismatch of outputs and their names: {outputs} vs {names}")]
    OutputNamesMismatch { outputs: usize, names: usize },
    #[error("{context}: {source}")]
    Runtime {
        context: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to build function {name:?}: {source}")]
    BuildFunc {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("operation {op:?} has no usable {attr:?} attribute")]
    MissingAttr { op: String, attr: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no runtime registered as {name:?} (available: {available:?})")]
    UnknownRuntime {
        name: String,
        available: Vec<String>,
    },
    #[error("decode error: {0}")]
    Decode(#[source] Arc<DefSerdeError>),
    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    #[error("{0:#}")]
    Other(Arc<anyhow::Error>),
}

impl Error {
    pub fn runtime(context: impl Into<String>, source: RuntimeError) -> Self {
        Error::Runtime {
            context: context.into(),
            source,
        }
    }

    /// The runtime status behind this error, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            Error::AddOperation { source, .. } | Error::Runtime { source, .. } => Some(source),
            Error::Poisoned(first) => first.runtime_error(),
            Error::BuildFunc { source, .. } => source.runtime_error(),
            _ => None,
        }
    }
}

impl From<DefSerdeError> for Error {
    fn from(err: DefSerdeError) -> Self {
        Error::Decode(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(Arc::new(err))
    }
}

/// Convenience alias used throughout the binding.
pub type Result<T> = std::result::Result<T, Error>;

/// Attaches a context string to runtime failures.
pub(crate) trait RuntimeResultExt<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> RuntimeResultExt<T> for RuntimeResult<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::runtime(context(), source))
    }
}
