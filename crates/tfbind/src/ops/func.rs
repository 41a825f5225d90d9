//! Building functions from closures and invoking them in a scope.

use super::{array::placeholder, Scope};
use crate::error::{Error, Result};
use crate::graph::{Func, Input, OpSpec, Output};
use crate::runtime::Runtime;
use crate::tensor::DType;
use std::sync::Arc;

/// What a function builder returns: the outputs, optional names for them and
/// a description stored in the signature.
#[derive(Debug, Clone, Default)]
pub struct FuncOutputs {
    pub outputs: Vec<Output>,
    pub names: Option<Vec<String>>,
    pub description: String,
}

impl FuncOutputs {
    pub fn new(outputs: Vec<Output>) -> Self {
        FuncOutputs {
            outputs,
            ..Default::default()
        }
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Builds a function by running `body` against a private scope holding one
/// placeholder per entry of `dtypes`. Every placeholder becomes an input in
/// order. Any construction failure inside `body` fails the whole build.
///
/// ```ignore
/// let adder = build_func(&runtime, "adder", &[DType::Float, DType::Float], |s, x| {
///     Ok(FuncOutputs::new(vec![ops::add(s, &x[0], &x[1])?]).with_description("just adding"))
/// })?;
/// ```
pub fn build_func<F>(
    runtime: &Arc<dyn Runtime>,
    name: &str,
    dtypes: &[DType],
    body: F,
) -> Result<Func>
where
    F: FnOnce(&Scope, &[Output]) -> Result<FuncOutputs>,
{
    let wrap = |source: Error| Error::BuildFunc {
        name: name.to_string(),
        source: Box::new(source),
    };
    let scope = Scope::new(Arc::clone(runtime)).map_err(wrap)?;
    let inputs = dtypes
        .iter()
        .map(|&dtype| placeholder(&scope, dtype, None))
        .collect::<Result<Vec<_>>>()
        .map_err(wrap)?;
    let outputs = body(&scope, &inputs).map_err(wrap)?;
    let graph = scope.finalize().map_err(wrap)?;
    graph
        .to_func(
            name,
            &inputs,
            &outputs.outputs,
            outputs.names.as_deref(),
            &outputs.description,
        )
        .map_err(wrap)
}

/// Builds two functions sharing the input types, e.g. the condition and
/// body of a while loop.
pub fn build_func_pair<F1, F2>(
    runtime: &Arc<dyn Runtime>,
    names: (&str, &str),
    dtypes: &[DType],
    first: F1,
    second: F2,
) -> Result<(Func, Func)>
where
    F1: FnOnce(&Scope, &[Output]) -> Result<FuncOutputs>,
    F2: FnOnce(&Scope, &[Output]) -> Result<FuncOutputs>,
{
    let func1 = build_func(runtime, names.0, dtypes, first)?;
    let func2 = build_func(runtime, names.1, dtypes, second)?;
    Ok((func1, func2))
}

/// Invokes a registered function as an operation and returns all of its outputs.
pub fn call(scope: &Scope, func: &Func, inputs: &[Output]) -> Result<Vec<Output>> {
    let mut spec = OpSpec::new(func.name());
    spec.inputs = inputs.iter().map(Input::from).collect();
    Ok(scope.add_operation(spec)?.outputs())
}
