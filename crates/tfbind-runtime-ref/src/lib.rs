//! Pure-Rust reference implementation of the tfbind runtime boundary.
//!
//! Graphs are append-only node lists with eager type and shape inference.
//! Sessions evaluate on the host with `f64`/`i64` lanes, rounding results to
//! the declared dtype after every kernel. All state sits behind one mutex.

mod exec;
mod function;
mod grad;
mod infer;
mod kernels;
mod nodes;
mod value;

use anyhow::Context;
use exec::{Executor, VariableStore};
use nodes::{Library, NodeInput, NodeSet, Port};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tfbind::defs::{
    AttrValue, FunctionDef, FunctionEntry, GraphDef, SavedModelDef, GRADIENT_ATTR,
    SAVED_MODEL_FILENAME,
};
use tfbind::runtime::{
    FuncId, FunctionCapture, GraphId, InputRef, LoadedSavedModel, OperationDescription,
    OperationId, OperationInfo, OutputRef, Runtime, RuntimeError, RuntimeResult, SessionId,
    SessionOptions,
};
use tfbind::Tensor;
use value::Value;

const DEFAULT_SEED: u64 = 0x5eed_7fb1;

static TFBIND_REF_SEED: Lazy<Option<u64>> = Lazy::new(|| {
    std::env::var("TFBIND_REF_SEED")
        .ok()
        .and_then(|value| value.trim().parse().ok())
});

/// Knobs of the reference runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRuntimeConfig {
    /// Seed of the random generator used by random ops.
    pub seed: u64,
    /// Honor `append_hash_to_name` when capturing functions.
    pub hash_function_names: bool,
}

impl Default for RefRuntimeConfig {
    fn default() -> Self {
        RefRuntimeConfig {
            seed: TFBIND_REF_SEED.unwrap_or(DEFAULT_SEED),
            hash_function_names: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: NodeSet,
    library: Library,
}

struct SessionState {
    graph: u64,
    variables: VariableStore,
}

struct State {
    next_id: u64,
    graphs: HashMap<u64, GraphState>,
    functions: HashMap<u64, FunctionDef>,
    sessions: HashMap<u64, SessionState>,
    rng: StdRng,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn graph(&self, graph: GraphId) -> RuntimeResult<&GraphState> {
        self.graphs
            .get(&graph.0)
            .ok_or_else(|| RuntimeError::not_found(format!("graph {} does not exist", graph.0)))
    }

    fn graph_mut(&mut self, graph: GraphId) -> RuntimeResult<&mut GraphState> {
        self.graphs
            .get_mut(&graph.0)
            .ok_or_else(|| RuntimeError::not_found(format!("graph {} does not exist", graph.0)))
    }

    fn function(&self, func: FuncId) -> RuntimeResult<&FunctionDef> {
        self.functions
            .get(&func.0)
            .ok_or_else(|| RuntimeError::not_found(format!("function {} does not exist", func.0)))
    }

    fn function_mut(&mut self, func: FuncId) -> RuntimeResult<&mut FunctionDef> {
        self.functions
            .get_mut(&func.0)
            .ok_or_else(|| RuntimeError::not_found(format!("function {} does not exist", func.0)))
    }

    fn insert_function(&mut self, def: FunctionDef) -> FuncId {
        let id = self.allocate();
        self.functions.insert(id, def);
        FuncId(id)
    }
}

/// Reference runtime. Cheap to create; every instance owns independent state.
pub struct RefRuntime {
    config: RefRuntimeConfig,
    state: Mutex<State>,
}

impl Default for RefRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn port(output: OutputRef) -> Port {
    Port::new(output.op.0 as usize, output.index)
}

fn output_ref(port: Port) -> OutputRef {
    OutputRef {
        op: OperationId(port.node as u64),
        index: port.index,
    }
}

fn decode_error(what: &str, err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::invalid_argument(format!("invalid {what}: {err}"))
}

/// Adds `entry` to `library`; re-adding an identical entry is a no-op.
fn merge_entry(library: &mut Library, entry: FunctionEntry) -> RuntimeResult<()> {
    match library.get(entry.def.name()) {
        Some(existing) if *existing == entry => Ok(()),
        Some(_) => Err(RuntimeError::already_exists(format!(
            "a different function named '{}' is already registered",
            entry.def.name()
        ))),
        None => {
            library.insert(entry.def.name().to_string(), entry);
            Ok(())
        }
    }
}

impl RefRuntime {
    pub fn new() -> Self {
        Self::with_config(RefRuntimeConfig::default())
    }

    pub fn with_config(config: RefRuntimeConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        RefRuntime {
            config,
            state: Mutex::new(State {
                next_id: 0,
                graphs: HashMap::new(),
                functions: HashMap::new(),
                sessions: HashMap::new(),
                rng,
            }),
        }
    }

    pub fn config(&self) -> &RefRuntimeConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("ref runtime state poisoned")
    }

    fn restore_variables(
        &self,
        session: SessionId,
        variables: &std::collections::BTreeMap<String, Tensor>,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let State {
            graphs, sessions, ..
        } = &mut *state;
        let session = sessions
            .get_mut(&session.0)
            .ok_or_else(|| RuntimeError::not_found("session vanished during restore"))?;
        let graph = graphs
            .get(&session.graph)
            .ok_or_else(|| RuntimeError::internal("graph vanished during restore"))?;
        for (name, tensor) in variables {
            let Some(index) = graph.nodes.find(name) else {
                log::warn!("saved variable {name} has no node in the loaded graph");
                continue;
            };
            let node = &graph.nodes.nodes()[index];
            if node.op_type != "VariableV2" {
                return Err(RuntimeError::invalid_argument(format!(
                    "saved variable {name} maps to a {} node",
                    node.op_type
                )));
            }
            let value = Value::from_tensor(tensor)?;
            if value.dtype != node.outputs[0].dtype {
                return Err(RuntimeError::invalid_argument(format!(
                    "saved variable {name} has dtype {}, graph expects {}",
                    value.dtype, node.outputs[0].dtype
                )));
            }
            session.variables.insert(index, value);
        }
        Ok(())
    }
}

impl Runtime for RefRuntime {
    fn runtime_name(&self) -> &str {
        "ref"
    }

    fn version(&self) -> String {
        format!("ref-{}", env!("CARGO_PKG_VERSION"))
    }

    fn new_graph(&self) -> RuntimeResult<GraphId> {
        let mut state = self.lock();
        let id = state.allocate();
        state.graphs.insert(id, GraphState::default());
        Ok(GraphId(id))
    }

    fn delete_graph(&self, graph: GraphId) {
        self.lock().graphs.remove(&graph.0);
    }

    fn add_operation(
        &self,
        graph: GraphId,
        desc: &OperationDescription,
    ) -> RuntimeResult<OperationId> {
        let mut state = self.lock();
        let graph = state.graph_mut(graph)?;
        let proto = nodes::NodeProto {
            name: desc.name.clone(),
            op_type: desc.op_type.clone(),
            device: desc.device.clone(),
            inputs: desc
                .inputs
                .iter()
                .map(|input| match input {
                    InputRef::Single(output) => NodeInput::Single(port(*output)),
                    InputRef::List(list) => NodeInput::List(list.iter().copied().map(port).collect()),
                })
                .collect(),
            control_inputs: desc.control_inputs.iter().map(|op| op.0 as usize).collect(),
            attrs: desc.attrs.clone(),
        };
        let index = graph.nodes.add(proto, &graph.library)?;
        Ok(OperationId(index as u64))
    }

    fn operation_info(&self, graph: GraphId, op: OperationId) -> RuntimeResult<OperationInfo> {
        let state = self.lock();
        let node = state.graph(graph)?.nodes.node(op.0 as usize)?;
        Ok(OperationInfo {
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            device: node.device.clone(),
            inputs: node
                .inputs
                .iter()
                .map(|input| match input {
                    NodeInput::Single(p) => InputRef::Single(output_ref(*p)),
                    NodeInput::List(list) => {
                        InputRef::List(list.iter().copied().map(output_ref).collect())
                    }
                })
                .collect(),
            control_inputs: node
                .control_inputs
                .iter()
                .map(|&c| OperationId(c as u64))
                .collect(),
            outputs: node.outputs.clone(),
            attrs: node.attrs.clone(),
        })
    }

    fn operation_by_name(&self, graph: GraphId, name: &str) -> RuntimeResult<Option<OperationId>> {
        let state = self.lock();
        Ok(state
            .graph(graph)?
            .nodes
            .find(name)
            .map(|index| OperationId(index as u64)))
    }

    fn operations(&self, graph: GraphId) -> RuntimeResult<Vec<OperationId>> {
        let state = self.lock();
        Ok((0..state.graph(graph)?.nodes.len())
            .map(|index| OperationId(index as u64))
            .collect())
    }

    fn export_graph(&self, graph: GraphId) -> RuntimeResult<Vec<u8>> {
        let state = self.lock();
        let graph = state.graph(graph)?;
        let def = GraphDef {
            nodes: graph
                .nodes
                .nodes()
                .iter()
                .map(|node| graph.nodes.node_def(node))
                .collect(),
            library: graph.library.values().cloned().collect(),
        };
        def.to_bytes()
            .map_err(|err| RuntimeError::internal(err.to_string()))
    }

    fn import_graph(&self, graph: GraphId, graph_def: &[u8], prefix: &str) -> RuntimeResult<()> {
        let def = GraphDef::from_bytes(graph_def).map_err(|err| decode_error("graph", err))?;
        let mut state = self.lock();
        let target = state.graph_mut(graph)?;
        let mut staged = target.clone();
        for entry in def.library {
            merge_entry(&mut staged.library, entry)?;
        }
        let rename = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };
        for node in &def.nodes {
            staged.nodes.add_node_def(node, &rename, &staged.library)?;
        }
        log::debug!(
            "imported {} nodes into graph {} under prefix {prefix:?}",
            def.nodes.len(),
            graph.0
        );
        *target = staged;
        Ok(())
    }

    fn graph_to_function(
        &self,
        graph: GraphId,
        capture: &FunctionCapture,
    ) -> RuntimeResult<FuncId> {
        let mut state = self.lock();
        let def = function::capture_function(
            &state.graph(graph)?.nodes,
            capture,
            self.config.hash_function_names,
        )?;
        log::debug!(
            "captured function {} with {} nodes",
            def.name(),
            def.nodes.len()
        );
        Ok(state.insert_function(def))
    }

    fn copy_function(
        &self,
        graph: GraphId,
        func: FuncId,
        gradient: Option<FuncId>,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let def = state.function(func)?.clone();
        let gradient_def = gradient.map(|g| state.function(g).cloned()).transpose()?;
        let target = state.graph_mut(graph)?;
        let mut staged = target.library.clone();
        let gradient_name = match &gradient_def {
            Some(g) => Some(g.name().to_string()),
            None => def
                .attrs
                .get(GRADIENT_ATTR)
                .and_then(|bytes| AttrValue::from_bytes(bytes).ok())
                .and_then(|attr| attr.as_str().map(str::to_string)),
        };
        if let Some(g) = gradient_def {
            merge_entry(
                &mut staged,
                FunctionEntry {
                    def: g,
                    gradient: None,
                },
            )?;
        }
        merge_entry(
            &mut staged,
            FunctionEntry {
                def,
                gradient: gradient_name,
            },
        )?;
        target.library = staged;
        Ok(())
    }

    fn graph_functions(&self, graph: GraphId) -> RuntimeResult<Vec<FuncId>> {
        let mut state = self.lock();
        let defs: Vec<FunctionDef> = state
            .graph(graph)?
            .library
            .values()
            .map(|entry| entry.def.clone())
            .collect();
        Ok(defs
            .into_iter()
            .map(|def| state.insert_function(def))
            .collect())
    }

    fn function_name(&self, func: FuncId) -> RuntimeResult<String> {
        Ok(self.lock().function(func)?.name().to_string())
    }

    fn function_to_bytes(&self, func: FuncId) -> RuntimeResult<Vec<u8>> {
        self.lock()
            .function(func)?
            .to_bytes()
            .map_err(|err| RuntimeError::internal(err.to_string()))
    }

    fn function_from_bytes(&self, bytes: &[u8]) -> RuntimeResult<FuncId> {
        let def = FunctionDef::from_bytes(bytes).map_err(|err| decode_error("function", err))?;
        if def.name().is_empty() {
            return Err(RuntimeError::invalid_argument("function has no name"));
        }
        Ok(self.lock().insert_function(def))
    }

    fn function_set_attr(&self, func: FuncId, name: &str, value: &[u8]) -> RuntimeResult<()> {
        self.lock()
            .function_mut(func)?
            .attrs
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn function_get_attr(&self, func: FuncId, name: &str) -> RuntimeResult<Vec<u8>> {
        let state = self.lock();
        let def = state.function(func)?;
        def.attrs.get(name).cloned().ok_or_else(|| {
            RuntimeError::not_found(format!(
                "function '{}' has no attribute '{name}'",
                def.name()
            ))
        })
    }

    fn delete_function(&self, func: FuncId) {
        self.lock().functions.remove(&func.0);
    }

    fn add_gradients(
        &self,
        graph: GraphId,
        prefix: &str,
        ys: &[OutputRef],
        xs: &[OutputRef],
        dx: Option<&[OutputRef]>,
    ) -> RuntimeResult<Vec<OutputRef>> {
        let mut state = self.lock();
        let target = state.graph_mut(graph)?;
        let mut staged = target.nodes.clone();
        let ys: Vec<Port> = ys.iter().copied().map(port).collect();
        let xs: Vec<Port> = xs.iter().copied().map(port).collect();
        let dx: Option<Vec<Port>> = dx.map(|dx| dx.iter().copied().map(port).collect());
        let grads = grad::add_gradients(
            &mut staged,
            &target.library,
            prefix,
            &ys,
            &xs,
            dx.as_deref(),
        )?;
        target.nodes = staged;
        Ok(grads.into_iter().map(output_ref).collect())
    }

    fn new_session(&self, graph: GraphId, options: &SessionOptions) -> RuntimeResult<SessionId> {
        if !options.target.is_empty() {
            return Err(RuntimeError::unimplemented(format!(
                "remote target {:?} is not supported",
                options.target
            )));
        }
        let mut state = self.lock();
        state.graph(graph)?;
        let id = state.allocate();
        state.sessions.insert(
            id,
            SessionState {
                graph: graph.0,
                variables: VariableStore::new(),
            },
        );
        log::debug!("created session {id} over graph {}", graph.0);
        Ok(SessionId(id))
    }

    fn session_run(
        &self,
        session: SessionId,
        feeds: &[(OutputRef, Tensor)],
        fetches: &[OutputRef],
        targets: &[OperationId],
    ) -> RuntimeResult<Vec<Tensor>> {
        let mut state = self.lock();
        let State {
            graphs,
            sessions,
            rng,
            ..
        } = &mut *state;
        let session_state = sessions
            .get_mut(&session.0)
            .ok_or_else(|| RuntimeError::not_found(format!("session {} does not exist", session.0)))?;
        let graph = graphs.get(&session_state.graph).ok_or_else(|| {
            RuntimeError::failed_precondition("the graph of this session has been deleted")
        })?;

        let mut fed = HashMap::with_capacity(feeds.len());
        for (output, tensor) in feeds {
            let p = port(*output);
            let info = graph.nodes.output_info(p)?;
            if tensor.dtype() != info.dtype {
                return Err(RuntimeError::invalid_argument(format!(
                    "cannot feed {} into {} which expects {}",
                    tensor.dtype(),
                    graph.nodes.tensor_ref(p),
                    info.dtype
                )));
            }
            if info.shape.merge(&tensor.shape()).is_none() {
                return Err(RuntimeError::invalid_argument(format!(
                    "cannot feed shape {:?} into {} which expects {:?}",
                    tensor.dims(),
                    graph.nodes.tensor_ref(p),
                    info.shape
                )));
            }
            fed.insert(p, Value::from_tensor(tensor)?);
        }
        let fetch_ports: Vec<Port> = fetches.iter().copied().map(port).collect();
        for &p in &fetch_ports {
            graph.nodes.output_info(p)?;
        }
        let target_nodes: Vec<usize> = targets.iter().map(|op| op.0 as usize).collect();
        for &t in &target_nodes {
            graph.nodes.node(t)?;
        }
        log::debug!(
            "session {} run: {} feeds, {} fetches, {} targets",
            session.0,
            feeds.len(),
            fetches.len(),
            targets.len()
        );
        let values = Executor::new(&graph.library, rng).run(
            &graph.nodes,
            &fed,
            &fetch_ports,
            &target_nodes,
            Some(&mut session_state.variables),
        )?;
        values.iter().map(Value::to_tensor).collect()
    }

    fn close_session(&self, session: SessionId) -> RuntimeResult<()> {
        self.lock()
            .sessions
            .remove(&session.0)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found(format!("session {} does not exist", session.0)))
    }

    fn load_saved_model(
        &self,
        export_dir: &Path,
        tags: &[String],
        options: &SessionOptions,
    ) -> RuntimeResult<LoadedSavedModel> {
        let path = export_dir.join(SAVED_MODEL_FILENAME);
        if !path.is_file() {
            return Err(RuntimeError::not_found(format!(
                "could not find {SAVED_MODEL_FILENAME} in {}",
                export_dir.display()
            )));
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(|err| RuntimeError::internal(format!("{err:#}")))?;
        let saved = SavedModelDef::from_bytes(&bytes).map_err(|err| decode_error("saved model", err))?;
        let meta_graph = saved.meta_graph(tags).cloned().ok_or_else(|| {
            RuntimeError::not_found(format!(
                "MetaGraphDef associated with tags {tags:?} could not be found in SavedModel"
            ))
        })?;

        let graph = self.new_graph()?;
        let loaded = meta_graph
            .graph_def
            .to_bytes()
            .map_err(|err| RuntimeError::internal(err.to_string()))
            .and_then(|graph_def| self.import_graph(graph, &graph_def, ""))
            .and_then(|()| self.new_session(graph, options));
        let session = match loaded {
            Ok(session) => session,
            Err(err) => {
                self.delete_graph(graph);
                return Err(err);
            }
        };
        if let Err(err) = self.restore_variables(session, &saved.variables) {
            let _ = self.close_session(session);
            self.delete_graph(graph);
            return Err(err);
        }
        log::info!(
            "loaded saved model from {} with tags {tags:?} ({} variables)",
            export_dir.display(),
            saved.variables.len()
        );
        Ok(LoadedSavedModel {
            graph,
            session,
            meta_graph,
        })
    }
}

/// Registers [`RefRuntime`] under the name `"ref"`.
pub fn register_ref_runtime() {
    tfbind::runtime::registry::register_runtime("ref", || Arc::new(RefRuntime::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tfbind::{DType, Shape};

    fn desc(op_type: &str, name: &str, inputs: Vec<InputRef>) -> OperationDescription {
        OperationDescription {
            op_type: op_type.to_string(),
            name: name.to_string(),
            inputs,
            ..Default::default()
        }
    }

    fn placeholder(rt: &RefRuntime, graph: GraphId, name: &str, dtype: DType) -> OutputRef {
        let mut d = desc("Placeholder", name, Vec::new());
        d.attrs.insert("dtype".into(), AttrValue::Type(dtype));
        let op = rt.add_operation(graph, &d).unwrap();
        OutputRef { op, index: 0 }
    }

    fn single(output: OutputRef) -> InputRef {
        InputRef::Single(output)
    }

    #[test]
    fn feeds_and_fetches() {
        let _ = env_logger::builder().is_test(true).try_init();
        let rt = RefRuntime::new();
        let graph = rt.new_graph().unwrap();
        let x = placeholder(&rt, graph, "x", DType::Float);
        let sq = rt
            .add_operation(graph, &desc("Square", "sq", vec![single(x)]))
            .unwrap();
        let info = rt.operation_info(graph, sq).unwrap();
        assert_eq!(info.outputs[0].dtype, DType::Float);
        assert_eq!(info.outputs[0].shape, Shape::unknown());

        let session = rt.new_session(graph, &SessionOptions::default()).unwrap();
        let out = rt
            .session_run(
                session,
                &[(x, Tensor::vector(&[1.5f32, -2.0]))],
                &[OutputRef { op: sq, index: 0 }],
                &[],
            )
            .unwrap();
        assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![2.25, 4.0]);

        let err = rt
            .session_run(session, &[(x, Tensor::scalar(1i32))], &[], &[])
            .unwrap_err();
        assert_eq!(err.code, tfbind::runtime::RuntimeErrorCode::InvalidArgument);
        rt.close_session(session).unwrap();
        assert!(rt.close_session(session).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let rt = RefRuntime::new();
        let graph = rt.new_graph().unwrap();
        placeholder(&rt, graph, "x", DType::Float);
        let mut d = desc("Placeholder", "x", Vec::new());
        d.attrs.insert("dtype".into(), AttrValue::Type(DType::Float));
        let err = rt.add_operation(graph, &d).unwrap_err();
        assert_eq!(err.code, tfbind::runtime::RuntimeErrorCode::AlreadyExists);
    }

    #[test]
    fn export_import_round_trip_is_stable() {
        let rt = RefRuntime::new();
        let graph = rt.new_graph().unwrap();
        let x = placeholder(&rt, graph, "x", DType::Double);
        rt.add_operation(graph, &desc("Neg", "neg", vec![single(x)]))
            .unwrap();
        let bytes = rt.export_graph(graph).unwrap();

        let copy = rt.new_graph().unwrap();
        rt.import_graph(copy, &bytes, "").unwrap();
        assert_eq!(rt.export_graph(copy).unwrap(), bytes);

        rt.import_graph(copy, &bytes, "imported").unwrap();
        assert!(rt.operation_by_name(copy, "imported/neg").unwrap().is_some());
        // A clash leaves the graph untouched.
        assert!(rt.import_graph(copy, &bytes, "").is_err());
        assert_eq!(rt.operations(copy).unwrap().len(), 4);
    }

    #[test]
    fn gradient_of_square() {
        let rt = RefRuntime::new();
        let graph = rt.new_graph().unwrap();
        let x = placeholder(&rt, graph, "x", DType::Float);
        let sq = rt
            .add_operation(graph, &desc("Square", "sq", vec![single(x)]))
            .unwrap();
        let y = OutputRef { op: sq, index: 0 };
        let grads = rt.add_gradients(graph, "", &[y], &[x], None).unwrap();
        let name = rt.operation_info(graph, grads[0].op).unwrap().name;
        assert!(name.starts_with("gradients/"));

        let session = rt.new_session(graph, &SessionOptions::default()).unwrap();
        let out = rt
            .session_run(session, &[(x, Tensor::vector(&[3.0f32, -1.0]))], &grads, &[])
            .unwrap();
        assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![6.0, -2.0]);
    }

    #[test]
    fn function_attrs_and_library() {
        let rt = RefRuntime::with_config(RefRuntimeConfig {
            seed: 1,
            hash_function_names: false,
        });
        let graph = rt.new_graph().unwrap();
        let x = placeholder(&rt, graph, "x", DType::Int32);
        let neg = rt
            .add_operation(graph, &desc("Neg", "neg", vec![single(x)]))
            .unwrap();
        let func = rt
            .graph_to_function(
                graph,
                &FunctionCapture {
                    name: "negate".into(),
                    append_hash_to_name: true,
                    operations: None,
                    inputs: vec![x],
                    outputs: vec![OutputRef { op: neg, index: 0 }],
                    output_names: None,
                    description: String::new(),
                },
            )
            .unwrap();
        assert_eq!(rt.function_name(func).unwrap(), "negate");
        assert!(rt.function_get_attr(func, "missing").is_err());
        rt.function_set_attr(func, "note", b"").unwrap();
        assert!(rt.function_get_attr(func, "note").unwrap().is_empty());

        let other = rt.new_graph().unwrap();
        rt.copy_function(other, func, None).unwrap();
        rt.copy_function(other, func, None).unwrap();
        let funcs = rt.graph_functions(other).unwrap();
        assert_eq!(funcs.len(), 1);
        assert_eq!(rt.function_name(funcs[0]).unwrap(), "negate");

        let c = {
            let mut d = desc("Const", "c", Vec::new());
            d.attrs.insert("dtype".into(), AttrValue::Type(DType::Int32));
            d.attrs
                .insert("value".into(), AttrValue::Tensor(Tensor::scalar(7i32)));
            rt.add_operation(other, &d).unwrap()
        };
        let call = rt
            .add_operation(
                other,
                &desc("negate", "call", vec![single(OutputRef { op: c, index: 0 })]),
            )
            .unwrap();
        let session = rt.new_session(other, &SessionOptions::default()).unwrap();
        let out = rt
            .session_run(session, &[], &[OutputRef { op: call, index: 0 }], &[])
            .unwrap();
        assert_eq!(out[0].scalar_value::<i32>().unwrap(), -7);
    }

    #[test]
    fn variables_live_in_sessions() {
        let rt = RefRuntime::new();
        let graph = rt.new_graph().unwrap();
        let mut var = desc("VariableV2", "v", Vec::new());
        var.attrs = BTreeMap::from([
            ("dtype".to_string(), AttrValue::Type(DType::Float)),
            ("shape".to_string(), AttrValue::Shape(Shape::scalar())),
        ]);
        let v = rt.add_operation(graph, &var).unwrap();
        let v = OutputRef { op: v, index: 0 };
        let mut one = desc("Const", "one", Vec::new());
        one.attrs = BTreeMap::from([
            ("dtype".to_string(), AttrValue::Type(DType::Float)),
            ("value".to_string(), AttrValue::Tensor(Tensor::scalar(1.0f32))),
        ]);
        let one = OutputRef {
            op: rt.add_operation(graph, &one).unwrap(),
            index: 0,
        };
        let assign = rt
            .add_operation(graph, &desc("Assign", "init", vec![single(v), single(one)]))
            .unwrap();
        let bump = rt
            .add_operation(graph, &desc("AssignAdd", "bump", vec![single(v), single(one)]))
            .unwrap();

        let session = rt.new_session(graph, &SessionOptions::default()).unwrap();
        let err = rt.session_run(session, &[], &[v], &[]).unwrap_err();
        assert_eq!(err.code, tfbind::runtime::RuntimeErrorCode::FailedPrecondition);
        rt.session_run(session, &[], &[], &[assign]).unwrap();
        rt.session_run(session, &[], &[], &[bump]).unwrap();
        let out = rt.session_run(session, &[], &[v], &[]).unwrap();
        assert_eq!(out[0].scalar_value::<f32>().unwrap(), 2.0);

        let fresh = rt.new_session(graph, &SessionOptions::default()).unwrap();
        assert!(rt.session_run(fresh, &[], &[v], &[]).is_err());
    }

    #[test]
    fn missing_saved_model_is_not_found() {
        let rt = RefRuntime::new();
        let err = rt
            .load_saved_model(
                Path::new("/nonexistent/tfbind/model"),
                &["serve".to_string()],
                &SessionOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.code, tfbind::runtime::RuntimeErrorCode::NotFound);
    }
}
