//! Owned graph handles and the operation/output views built on top of them.

mod func;

pub use func::Func;

use crate::defs::AttrValue;
use crate::error::{Error, Result, RuntimeResultExt};
use crate::runtime::{
    FunctionCapture, GraphId, InputRef, OperationDescription, OperationId, OperationInfo,
    OutputRef, Runtime,
};
use crate::tensor::{DType, Shape};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct GraphInner {
    runtime: Arc<dyn Runtime>,
    id: GraphId,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        self.runtime.delete_graph(self.id);
    }
}

/// Shared handle to a runtime graph. The runtime graph is released when the
/// last handle (including those held by operations) is dropped.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("runtime", &self.inner.runtime.runtime_name())
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Graph {
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<Self> {
        let id = runtime
            .new_graph()
            .context(|| "failed to create graph".to_string())?;
        Ok(Self::from_raw(runtime, id))
    }

    /// Takes ownership of a graph the runtime already created.
    pub(crate) fn from_raw(runtime: Arc<dyn Runtime>, id: GraphId) -> Self {
        Graph {
            inner: Arc::new(GraphInner { runtime, id }),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.inner.runtime
    }

    pub fn id(&self) -> GraphId {
        self.inner.id
    }

    fn same_graph(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Appends an operation exactly as described. Most callers go through
    /// [`crate::ops::Scope::add_operation`], which adds naming and scoping.
    pub fn add_operation(&self, spec: OpSpec<'_>) -> Result<Operation> {
        let desc = spec.into_description(self)?;
        let id = self
            .runtime()
            .add_operation(self.id(), &desc)
            .map_err(|source| Error::AddOperation {
                op_type: desc.op_type.clone(),
                name: desc.name.clone(),
                source,
            })?;
        self.operation_from_id(id)
    }

    pub(crate) fn operation_from_id(&self, id: OperationId) -> Result<Operation> {
        let info = self
            .runtime()
            .operation_info(self.id(), id)
            .context(|| format!("failed to inspect operation {id:?}"))?;
        Ok(Operation {
            graph: self.clone(),
            id,
            info: Arc::new(info),
        })
    }

    pub fn operation_by_name(&self, name: &str) -> Result<Option<Operation>> {
        let found = self
            .runtime()
            .operation_by_name(self.id(), name)
            .context(|| format!("failed to look up operation {name:?}"))?;
        found.map(|id| self.operation_from_id(id)).transpose()
    }

    /// All operations in insertion order.
    pub fn operations(&self) -> Result<Vec<Operation>> {
        let ids = self
            .runtime()
            .operations(self.id())
            .context(|| "failed to list operations".to_string())?;
        ids.into_iter().map(|id| self.operation_from_id(id)).collect()
    }

    /// Serialized `GraphDef` of the graph, including its function library.
    pub fn export(&self) -> Result<Vec<u8>> {
        self.runtime()
            .export_graph(self.id())
            .context(|| "failed to export graph".to_string())
    }

    /// Imports a serialized `GraphDef`; names get `prefix/` when the prefix is non-empty.
    pub fn import(&self, graph_def: &[u8], prefix: &str) -> Result<()> {
        self.runtime()
            .import_graph(self.id(), graph_def, prefix)
            .context(|| "failed to import graph".to_string())
    }

    /// Copies `func` and an optional gradient function into this graph.
    /// The copy is independent of `func`, which may be deleted afterwards.
    pub fn register_func(&self, func: &Func, gradient: Option<&Func>) -> Result<()> {
        self.runtime()
            .copy_function(self.id(), func.id(), gradient.map(Func::id))
            .context(|| format!("failed to register function {:?}", func.name()))?;
        log::debug!(
            "registered function {} (gradient: {:?})",
            func.name(),
            gradient.map(Func::name)
        );
        Ok(())
    }

    /// Independent handles to every function registered in this graph.
    pub fn functions(&self) -> Result<Vec<Func>> {
        let ids = self
            .runtime()
            .graph_functions(self.id())
            .context(|| "failed to get functions for graph".to_string())?;
        ids.into_iter()
            .map(|id| Func::from_raw(Arc::clone(self.runtime()), id))
            .collect()
    }

    /// Captures the graph as a function.
    ///
    /// Every operation of the graph becomes part of the function body, not
    /// just the ones reachable from `outputs`. When `output_names` is given it
    /// must name every output. The runtime appends a content hash to `name`,
    /// so read the final name from [`Func::name`].
    pub fn to_func(
        &self,
        name: &str,
        inputs: &[Output],
        outputs: &[Output],
        output_names: Option<&[String]>,
        description: &str,
    ) -> Result<Func> {
        if let Some(names) = output_names {
            if names.len() != outputs.len() {
                return Err(Error::OutputNamesMismatch {
                    outputs: outputs.len(),
                    names: names.len(),
                });
            }
        }
        let capture = FunctionCapture {
            name: name.to_string(),
            append_hash_to_name: true,
            operations: None,
            inputs: self.output_refs(inputs)?,
            outputs: self.output_refs(outputs)?,
            output_names: output_names.map(<[String]>::to_vec),
            description: description.to_string(),
        };
        let id = self
            .runtime()
            .graph_to_function(self.id(), &capture)
            .context(|| format!("failed to capture function {name:?}"))?;
        let func = Func::from_raw(Arc::clone(self.runtime()), id)?;
        log::debug!(
            "captured function {} ({} inputs, {} outputs)",
            func.name(),
            inputs.len(),
            outputs.len()
        );
        Ok(func)
    }

    /// Adds symbolic gradients of the sum of `ys` with respect to each of `xs`.
    pub fn add_gradients(
        &self,
        prefix: &str,
        ys: &[Output],
        xs: &[Output],
        dx: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        let ys = self.output_refs(ys)?;
        let xs = self.output_refs(xs)?;
        let dx = dx.map(|dx| self.output_refs(dx)).transpose()?;
        let grads = self
            .runtime()
            .add_gradients(self.id(), prefix, &ys, &xs, dx.as_deref())
            .context(|| "failed to add gradients".to_string())?;
        grads
            .into_iter()
            .map(|r| Ok(self.operation_from_id(r.op)?.output(r.index)))
            .collect()
    }

    pub(crate) fn output_refs(&self, outputs: &[Output]) -> Result<Vec<OutputRef>> {
        outputs.iter().map(|o| o.to_ref(self)).collect()
    }
}

/// Input of an operation being appended.
#[derive(Debug, Clone)]
pub enum Input {
    Single(Output),
    List(Vec<Output>),
}

impl From<Output> for Input {
    fn from(value: Output) -> Self {
        Input::Single(value)
    }
}

impl From<&Output> for Input {
    fn from(value: &Output) -> Self {
        Input::Single(value.clone())
    }
}

impl From<Vec<Output>> for Input {
    fn from(value: Vec<Output>) -> Self {
        Input::List(value)
    }
}

impl From<&[Output]> for Input {
    fn from(value: &[Output]) -> Self {
        Input::List(value.to_vec())
    }
}

/// Description of an operation to append.
#[derive(Debug, Clone, Default)]
pub struct OpSpec<'a> {
    pub op_type: &'a str,
    /// Empty lets the scope generate `<Type>_<n>`.
    pub name: &'a str,
    pub inputs: Vec<Input>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub control_dependencies: Vec<Operation>,
    pub device: &'a str,
}

impl<'a> OpSpec<'a> {
    pub fn new(op_type: &'a str) -> Self {
        OpSpec {
            op_type,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn input(mut self, input: impl Into<Input>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    fn into_description(self, graph: &Graph) -> Result<OperationDescription> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| match input {
                Input::Single(o) => Ok(InputRef::Single(o.to_ref(graph)?)),
                Input::List(list) => Ok(InputRef::List(graph.output_refs(list)?)),
            })
            .collect::<Result<Vec<_>>>()?;
        let control_inputs = self
            .control_dependencies
            .iter()
            .map(|op| {
                if op.graph.same_graph(graph) {
                    Ok(op.id)
                } else {
                    Err(Error::InvalidArgument(format!(
                        "control dependency {:?} belongs to another graph",
                        op.name()
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(OperationDescription {
            op_type: self.op_type.to_string(),
            name: self.name.to_string(),
            inputs,
            control_inputs,
            device: self.device.to_string(),
            attrs: self.attrs,
        })
    }
}

/// A node of a graph. Metadata is read once when the handle is created since
/// operations are immutable after being appended.
#[derive(Clone)]
pub struct Operation {
    graph: Graph,
    id: OperationId,
    info: Arc<OperationInfo>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.info.name)
            .field("type", &self.info.op_type)
            .finish()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.graph.same_graph(&other.graph) && self.id == other.id
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.graph.id().hash(state);
        self.id.hash(state);
    }
}

impl Operation {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn op_type(&self) -> &str {
        &self.info.op_type
    }

    pub fn device(&self) -> &str {
        &self.info.device
    }

    pub fn num_outputs(&self) -> usize {
        self.info.outputs.len()
    }

    /// Output `index` of this operation. Out-of-range indices are caught when
    /// the output is used.
    pub fn output(&self, index: usize) -> Output {
        Output {
            op: self.clone(),
            index,
        }
    }

    pub fn outputs(&self) -> Vec<Output> {
        (0..self.num_outputs()).map(|i| self.output(i)).collect()
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.info.attrs.get(name)
    }

    pub fn control_inputs(&self) -> Result<Vec<Operation>> {
        self.info
            .control_inputs
            .iter()
            .map(|&id| self.graph.operation_from_id(id))
            .collect()
    }
}

/// One output tensor of an operation. Usable as a map key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Output {
    pub op: Operation,
    pub index: usize,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Output({}:{})", self.op.name(), self.index)
    }
}

impl Output {
    pub fn dtype(&self) -> Option<DType> {
        self.op.info.outputs.get(self.index).map(|o| o.dtype)
    }

    pub fn shape(&self) -> Shape {
        self.op
            .info
            .outputs
            .get(self.index)
            .map(|o| o.shape.clone())
            .unwrap_or_else(Shape::unknown)
    }

    /// `"name:index"` form used by signatures and feeds.
    pub fn tensor_name(&self) -> String {
        format!("{}:{}", self.op.name(), self.index)
    }

    pub(crate) fn to_ref(&self, graph: &Graph) -> Result<OutputRef> {
        if !self.op.graph.same_graph(graph) {
            return Err(Error::InvalidArgument(format!(
                "output {} belongs to another graph",
                self.tensor_name()
            )));
        }
        if self.index >= self.op.num_outputs() {
            return Err(Error::InvalidArgument(format!(
                "operation {:?} has {} outputs, index {} is out of range",
                self.op.name(),
                self.op.num_outputs(),
                self.index
            )));
        }
        Ok(OutputRef {
            op: self.op.id,
            index: self.index,
        })
    }
}
