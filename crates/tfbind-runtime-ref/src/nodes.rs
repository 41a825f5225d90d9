//! Node storage shared by graphs and instantiated function bodies.

use crate::infer::{infer_outputs, InferInput, InputInfo};
use std::collections::{BTreeMap, HashMap};
use tfbind::defs::{AttrValue, FunctionEntry, InputDef, NodeDef, TensorRef};
use tfbind::runtime::{OutputInfo, RuntimeError, RuntimeResult};

/// Functions registered in a graph, keyed by name.
pub(crate) type Library = BTreeMap<String, FunctionEntry>;

/// One output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Port {
    pub node: usize,
    pub index: usize,
}

impl Port {
    pub fn new(node: usize, index: usize) -> Self {
        Port { node, index }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeInput {
    Single(Port),
    List(Vec<Port>),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    pub op_type: String,
    pub device: String,
    pub inputs: Vec<NodeInput>,
    pub control_inputs: Vec<usize>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub outputs: Vec<OutputInfo>,
}

impl Node {
    /// Every input port, lists flattened in order.
    pub fn input_ports(&self) -> Vec<Port> {
        let mut ports = Vec::new();
        for input in &self.inputs {
            match input {
                NodeInput::Single(port) => ports.push(*port),
                NodeInput::List(list) => ports.extend_from_slice(list),
            }
        }
        ports
    }

    pub fn single_input(&self, i: usize) -> RuntimeResult<Port> {
        match self.inputs.get(i) {
            Some(NodeInput::Single(port)) => Ok(*port),
            _ => Err(RuntimeError::internal(format!(
                "{} ({}) has no single input {i}",
                self.name, self.op_type
            ))),
        }
    }

    pub fn list_input(&self, i: usize) -> RuntimeResult<&[Port]> {
        match self.inputs.get(i) {
            Some(NodeInput::List(list)) => Ok(list),
            _ => Err(RuntimeError::internal(format!(
                "{} ({}) has no list input {i}",
                self.name, self.op_type
            ))),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Operations whose first input is written rather than read.
    pub fn mutates_first_input(&self) -> bool {
        matches!(self.op_type.as_str(), "Assign" | "AssignAdd" | "AssignSub")
    }
}

/// A node waiting to be validated and appended.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeProto {
    pub name: String,
    pub op_type: String,
    pub device: String,
    pub inputs: Vec<NodeInput>,
    pub control_inputs: Vec<usize>,
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Append-only list of nodes with unique names. Inputs always refer to
/// earlier nodes, so index order is a topological order.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeSet {
    nodes: Vec<Node>,
    by_name: HashMap<String, usize>,
}

impl NodeSet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> RuntimeResult<&Node> {
        self.nodes
            .get(index)
            .ok_or_else(|| RuntimeError::not_found(format!("no operation with id {index}")))
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn output_info(&self, port: Port) -> RuntimeResult<&OutputInfo> {
        let node = self.node(port.node)?;
        node.outputs.get(port.index).ok_or_else(|| {
            RuntimeError::out_of_range(format!(
                "{} has {} outputs, {} requested",
                node.name,
                node.outputs.len(),
                port.index
            ))
        })
    }

    /// First unused name of the form `base`, `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.by_name.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Validates `proto`, infers its outputs and appends it.
    pub fn add(&mut self, proto: NodeProto, library: &Library) -> RuntimeResult<usize> {
        if proto.name.is_empty() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} operation needs a name",
                proto.op_type
            )));
        }
        if self.by_name.contains_key(&proto.name) {
            return Err(RuntimeError::already_exists(format!(
                "Node '{}' already exists in the graph",
                proto.name
            )));
        }
        let mut infer_inputs = Vec::with_capacity(proto.inputs.len());
        for input in &proto.inputs {
            infer_inputs.push(match input {
                NodeInput::Single(port) => InferInput::Single(self.input_info(*port)?),
                NodeInput::List(list) => InferInput::List(
                    list.iter()
                        .map(|port| self.input_info(*port))
                        .collect::<RuntimeResult<Vec<_>>>()?,
                ),
            });
        }
        if let Some(&bad) = proto.control_inputs.iter().find(|&&c| c >= self.nodes.len()) {
            return Err(RuntimeError::invalid_argument(format!(
                "control input {bad} of {} does not exist",
                proto.name
            )));
        }
        let outputs = infer_outputs(&proto.op_type, &proto.attrs, &infer_inputs, library)
            .map_err(|err| {
                RuntimeError::new(
                    err.code,
                    format!("{} ({}): {}", proto.name, proto.op_type, err.message),
                )
            })?;
        let index = self.nodes.len();
        self.by_name.insert(proto.name.clone(), index);
        self.nodes.push(Node {
            name: proto.name,
            op_type: proto.op_type,
            device: proto.device,
            inputs: proto.inputs,
            control_inputs: proto.control_inputs,
            attrs: proto.attrs,
            outputs,
        });
        Ok(index)
    }

    fn input_info(&self, port: Port) -> RuntimeResult<InputInfo<'_>> {
        let producer = self.nodes.get(port.node).ok_or_else(|| {
            RuntimeError::invalid_argument(format!("input operation {} does not exist", port.node))
        })?;
        let output = producer.outputs.get(port.index).ok_or_else(|| {
            RuntimeError::out_of_range(format!(
                "{} has {} outputs, input index {} is out of range",
                producer.name,
                producer.outputs.len(),
                port.index
            ))
        })?;
        Ok(InputInfo { output, producer })
    }

    pub fn tensor_ref(&self, port: Port) -> TensorRef {
        TensorRef::new(self.nodes[port.node].name.clone(), port.index)
    }

    /// Serializable form of one node.
    pub fn node_def(&self, node: &Node) -> NodeDef {
        NodeDef {
            name: node.name.clone(),
            op: node.op_type.clone(),
            inputs: node
                .inputs
                .iter()
                .map(|input| match input {
                    NodeInput::Single(port) => InputDef::Single(self.tensor_ref(*port)),
                    NodeInput::List(list) => {
                        InputDef::List(list.iter().map(|p| self.tensor_ref(*p)).collect())
                    }
                })
                .collect(),
            control_inputs: node
                .control_inputs
                .iter()
                .map(|&c| self.nodes[c].name.clone())
                .collect(),
            device: node.device.clone(),
            attrs: node.attrs.clone(),
        }
    }

    /// Appends a serialized node, resolving input names through `rename`
    /// (which maps a serialized node name to the name it received here).
    pub fn add_node_def(
        &mut self,
        def: &NodeDef,
        rename: &dyn Fn(&str) -> String,
        library: &Library,
    ) -> RuntimeResult<usize> {
        let resolve = |tensor: &TensorRef| -> RuntimeResult<Port> {
            let name = rename(&tensor.node);
            self.find(&name).map(|n| Port::new(n, tensor.index)).ok_or_else(|| {
                RuntimeError::invalid_argument(format!(
                    "node '{}' has an input from unknown node '{}'",
                    def.name, tensor.node
                ))
            })
        };
        let inputs = def
            .inputs
            .iter()
            .map(|input| match input {
                InputDef::Single(t) => Ok(NodeInput::Single(resolve(t)?)),
                InputDef::List(list) => Ok(NodeInput::List(
                    list.iter().map(&resolve).collect::<RuntimeResult<Vec<_>>>()?,
                )),
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        let control_inputs = def
            .control_inputs
            .iter()
            .map(|name| {
                self.find(&rename(name)).ok_or_else(|| {
                    RuntimeError::invalid_argument(format!(
                        "node '{}' has a control input from unknown node '{name}'",
                        def.name
                    ))
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        self.add(
            NodeProto {
                name: rename(&def.name),
                op_type: def.op.clone(),
                device: def.device.clone(),
                inputs,
                control_inputs,
                attrs: def.attrs.clone(),
            },
            library,
        )
    }
}
