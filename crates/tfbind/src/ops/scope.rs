//! Hierarchical build context for graph construction.

use super::tags::{TagRegistry, VarTag};
use crate::error::{Error, Result};
use crate::graph::{Func, Graph, OpSpec, Operation, Output};
use crate::runtime::Runtime;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

/// State shared by every scope derived from one root.
struct ScopeShared {
    graph: Graph,
    state: RefCell<SharedState>,
}

#[derive(Default)]
struct SharedState {
    /// First construction failure of the tree.
    error: Option<Arc<Error>>,
    finalized: bool,
    tags: TagRegistry,
}

/// Name disambiguation for one namespace.
#[derive(Default)]
struct NameTable {
    op_counters: HashMap<String, usize>,
    namespaces: HashSet<String>,
}

/// Build context for adding operations to a graph.
///
/// A scope carries a namespace, a list of control dependencies and a device,
/// and hands out unique operation names. Scopes derived from one root share
/// the graph, the variable tags and a single error cell: once any of them
/// fails to add an operation, every scope of the tree refuses further work
/// and reports [`Error::Poisoned`] with the first failure.
///
/// Scopes are `!Send`; build one graph from one thread at a time.
#[derive(Clone)]
pub struct Scope {
    shared: Rc<ScopeShared>,
    names: Rc<RefCell<NameTable>>,
    namespace: String,
    control_deps: Vec<Operation>,
    device: String,
}

impl Scope {
    /// Root scope over a fresh graph.
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<Self> {
        Ok(Self::with_graph(Graph::new(runtime)?))
    }

    /// Root scope over an existing graph.
    pub fn with_graph(graph: Graph) -> Self {
        Scope {
            shared: Rc::new(ScopeShared {
                graph,
                state: RefCell::new(SharedState::default()),
            }),
            names: Rc::new(RefCell::new(NameTable::default())),
            namespace: String::new(),
            control_deps: Vec::new(),
            device: String::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        self.shared.graph.runtime()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn control_dependencies(&self) -> &[Operation] {
        &self.control_deps
    }

    /// The sticky failure of this scope tree, if any.
    pub fn err(&self) -> Option<Arc<Error>> {
        self.shared.state.borrow().error.clone()
    }

    pub(crate) fn check_usable(&self) -> Result<()> {
        let state = self.shared.state.borrow();
        if let Some(first) = &state.error {
            return Err(Error::Poisoned(Arc::clone(first)));
        }
        if state.finalized {
            return Err(Error::ScopeFinalized);
        }
        Ok(())
    }

    /// Records `err` as the tree's failure and hands it back for the caller to
    /// return. A poisoned scope answers with [`Error::Poisoned`] and a
    /// finalized one with [`Error::ScopeFinalized`]; neither records `err`.
    pub(crate) fn fail(&self, err: Error) -> Error {
        if let Err(unusable) = self.check_usable() {
            return unusable;
        }
        log::warn!("graph construction failed: {err}");
        self.shared.state.borrow_mut().error = Some(Arc::new(err.clone()));
        err
    }

    /// Appends an operation.
    ///
    /// Without an explicit name the operation is called `<Type>_<n>` with a
    /// per-type counter of this namespace starting at 1; the counter advances
    /// even if the append fails. The name is prefixed with the namespace, and
    /// the scope's control dependencies and device are attached.
    pub fn add_operation(&self, spec: OpSpec<'_>) -> Result<Operation> {
        self.check_usable()?;
        let OpSpec {
            op_type,
            name,
            inputs,
            attrs,
            mut control_dependencies,
            device,
        } = spec;
        let name = if name.is_empty() {
            let mut names = self.names.borrow_mut();
            let counter = names.op_counters.entry(op_type.to_string()).or_insert(0);
            *counter += 1;
            format!("{op_type}_{counter}")
        } else {
            name.to_string()
        };
        let full_name = if self.namespace.is_empty() {
            name
        } else {
            format!("{}/{}", self.namespace, name)
        };
        control_dependencies.extend(self.control_deps.iter().cloned());
        let device = if self.device.is_empty() {
            device
        } else {
            self.device.as_str()
        };
        let spec = OpSpec {
            op_type,
            name: &full_name,
            inputs,
            attrs,
            control_dependencies,
            device,
        };
        match self.shared.graph.add_operation(spec) {
            Ok(op) => {
                if crate::env::log_ops_enabled() {
                    log::info!("added {} ({}) device={:?}", op.name(), op_type, op.device());
                } else {
                    log::debug!("added {} ({}) device={:?}", op.name(), op_type, op.device());
                }
                Ok(op)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Derived scope whose operations live under `parent/name`. A name that
    /// was already used by a sibling gets a `_1`, `_2`, ... suffix. The new
    /// scope has its own name counters and shares everything else.
    pub fn sub_scope(&self, name: &str) -> Scope {
        let unique = {
            let mut names = self.names.borrow_mut();
            let mut candidate = name.to_string();
            let mut suffix = 0;
            while names.namespaces.contains(&candidate) {
                suffix += 1;
                candidate = format!("{name}_{suffix}");
            }
            names.namespaces.insert(candidate.clone());
            candidate
        };
        let namespace = if self.namespace.is_empty() {
            unique
        } else {
            format!("{}/{}", self.namespace, unique)
        };
        log::debug!("sub-scope {namespace}");
        Scope {
            shared: Rc::clone(&self.shared),
            names: Rc::new(RefCell::new(NameTable::default())),
            namespace,
            control_deps: self.control_deps.clone(),
            device: self.device.clone(),
        }
    }

    /// Derived scope whose operations also depend on `ops`. Shares this
    /// scope's namespace and name counters.
    pub fn with_control_dependencies(&self, ops: &[Operation]) -> Scope {
        let mut control_deps = Vec::with_capacity(self.control_deps.len() + ops.len());
        control_deps.extend(self.control_deps.iter().cloned());
        control_deps.extend(ops.iter().cloned());
        Scope {
            control_deps,
            ..self.clone()
        }
    }

    /// Derived scope placing operations on `device`; an empty string clears it.
    pub fn with_device(&self, device: &str) -> Scope {
        Scope {
            device: device.to_string(),
            ..self.clone()
        }
    }

    /// Hands out the graph and retires the whole scope tree. Fails with the
    /// sticky error if construction failed, and with
    /// [`Error::ScopeFinalized`] on every later use.
    pub fn finalize(&self) -> Result<Graph> {
        let mut state = self.shared.state.borrow_mut();
        if let Some(first) = &state.error {
            return Err((**first).clone());
        }
        if state.finalized {
            return Err(Error::ScopeFinalized);
        }
        state.finalized = true;
        log::debug!("finalized graph {:?}", self.shared.graph.id());
        Ok(self.shared.graph.clone())
    }

    /// Registers `func` (and an optional gradient) into the scope's graph.
    /// Failures are returned directly and do not poison the scope.
    pub fn register_func(&self, func: &Func, gradient: Option<&Func>) -> Result<()> {
        if self.shared.state.borrow().finalized {
            return Err(Error::ScopeFinalized);
        }
        self.shared.graph.register_func(func, gradient)
    }

    /// Attaches `tags` to `value`.
    pub fn tag(&self, value: &Output, tags: &[VarTag]) {
        self.shared.state.borrow_mut().tags.tag(value, tags);
    }

    /// Values carrying any of `tags` (default [`VarTag::Trainable`]), grouped
    /// by tag in the requested order and in tagging order within a tag.
    pub fn params(&self, tags: &[VarTag]) -> Vec<Output> {
        self.shared.state.borrow().tags.params(tags)
    }

    /// Like [`Scope::params`] but for callers that cannot work without parameters.
    ///
    /// # Panics
    ///
    /// Panics when no value carries any of the requested tags.
    pub fn params_required(&self, tags: &[VarTag]) -> Vec<Output> {
        let params = self.params(tags);
        if params.is_empty() {
            panic!("no matching parameters found for tags: {tags:?}");
        }
        params
    }
}
