//! Demand-driven executor for graphs and function bodies.
//!
//! A run marks the nodes needed for the fetches and targets (stopping at fed
//! outputs), then evaluates them in index order, which is topological.

use crate::function::{instantiate, Body};
use crate::kernels::{self, BinaryOp, ReduceKind, UnaryOp};
use crate::nodes::{Library, Node, NodeSet, Port};
use crate::value::{Lanes, Value};
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::rc::Rc;
use tfbind::defs::AttrValue;
use tfbind::runtime::{RuntimeError, RuntimeResult};
use tfbind::DType;

/// Variable values of a session, keyed by `VariableV2` node index.
pub(crate) type VariableStore = HashMap<usize, Value>;

pub(crate) struct Executor<'a> {
    library: &'a Library,
    rng: &'a mut StdRng,
    bodies: HashMap<String, Rc<Body>>,
}

fn required_nodes(
    nodes: &NodeSet,
    feeds: &HashMap<Port, Value>,
    fetches: &[Port],
    targets: &[usize],
) -> Vec<bool> {
    let mut required = vec![false; nodes.len()];
    let mut stack: Vec<usize> = fetches
        .iter()
        .filter(|port| !feeds.contains_key(port))
        .map(|port| port.node)
        .chain(targets.iter().copied())
        .collect();
    while let Some(index) = stack.pop() {
        if std::mem::replace(&mut required[index], true) {
            continue;
        }
        let node = &nodes.nodes()[index];
        let ports = node.input_ports();
        let skip = usize::from(node.mutates_first_input());
        for port in ports.into_iter().skip(skip) {
            if !feeds.contains_key(&port) && !required[port.node] {
                stack.push(port.node);
            }
        }
        stack.extend(
            node.control_inputs
                .iter()
                .copied()
                .filter(|&c| !required[c]),
        );
    }
    required
}

struct Frame<'f> {
    values: Vec<Option<Vec<Value>>>,
    feeds: &'f HashMap<Port, Value>,
}

impl Frame<'_> {
    fn get(&self, port: Port) -> RuntimeResult<&Value> {
        if let Some(value) = self.feeds.get(&port) {
            return Ok(value);
        }
        self.values
            .get(port.node)
            .and_then(Option::as_ref)
            .and_then(|outputs| outputs.get(port.index))
            .ok_or_else(|| {
                RuntimeError::internal(format!(
                    "value {}:{} was not computed",
                    port.node, port.index
                ))
            })
    }
}

fn bool_attr(node: &Node, name: &str) -> bool {
    node.attr(name).and_then(AttrValue::as_bool).unwrap_or(false)
}

fn dims_from(value: &Value, what: &str) -> RuntimeResult<Vec<usize>> {
    value
        .index_list(what)?
        .into_iter()
        .map(|d| {
            usize::try_from(d).map_err(|_| {
                RuntimeError::invalid_argument(format!("{what} has a negative dimension {d}"))
            })
        })
        .collect()
}

fn node_dtype(node: &Node, attr: &str) -> RuntimeResult<DType> {
    node.attr(attr).and_then(AttrValue::as_type).ok_or_else(|| {
        RuntimeError::internal(format!("{} has no type attribute '{attr}'", node.name))
    })
}

fn func_attr<'n>(node: &'n Node, attr: &str) -> RuntimeResult<&'n str> {
    match node.attr(attr) {
        Some(AttrValue::Func(name)) => Ok(name),
        _ => Err(RuntimeError::internal(format!(
            "{} has no function attribute '{attr}'",
            node.name
        ))),
    }
}

impl<'a> Executor<'a> {
    pub fn new(library: &'a Library, rng: &'a mut StdRng) -> Self {
        Executor {
            library,
            rng,
            bodies: HashMap::new(),
        }
    }

    /// Evaluates `fetches` and runs `targets`. Without a variable store,
    /// variables cannot be read or assigned.
    pub fn run(
        &mut self,
        nodes: &NodeSet,
        feeds: &HashMap<Port, Value>,
        fetches: &[Port],
        targets: &[usize],
        mut variables: Option<&mut VariableStore>,
    ) -> RuntimeResult<Vec<Value>> {
        let required = required_nodes(nodes, feeds, fetches, targets);
        let mut frame = Frame {
            values: vec![None; nodes.len()],
            feeds,
        };
        for (index, node) in nodes.nodes().iter().enumerate() {
            if !required[index] {
                continue;
            }
            log::trace!("evaluating {} ({})", node.name, node.op_type);
            let outputs = self
                .eval(index, node, &frame, variables.as_deref_mut())
                .map_err(|err| {
                    RuntimeError::new(
                        err.code,
                        format!("{} ({}): {}", node.name, node.op_type, err.message),
                    )
                })?;
            frame.values[index] = Some(outputs);
        }
        fetches.iter().map(|&port| frame.get(port).cloned()).collect()
    }

    fn body(&mut self, name: &str) -> RuntimeResult<Rc<Body>> {
        if let Some(body) = self.bodies.get(name) {
            return Ok(Rc::clone(body));
        }
        let entry = self
            .library
            .get(name)
            .ok_or_else(|| RuntimeError::not_found(format!("function '{name}' is not registered")))?;
        let body = Rc::new(instantiate(&entry.def, self.library)?);
        self.bodies.insert(name.to_string(), Rc::clone(&body));
        Ok(body)
    }

    /// Runs a library function on `args`.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        let body = self.body(name)?;
        if args.len() != body.args.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "function '{name}' takes {} arguments, given {}",
                body.args.len(),
                args.len()
            )));
        }
        let mut feeds = HashMap::with_capacity(args.len());
        for (&arg, value) in body.args.iter().zip(args) {
            let expected = body.nodes.output_info(Port::new(arg, 0))?.dtype;
            if value.dtype != expected {
                return Err(RuntimeError::invalid_argument(format!(
                    "function '{name}' expects {expected} for argument {}, got {}",
                    body.nodes.nodes()[arg].name,
                    value.dtype
                )));
            }
            feeds.insert(Port::new(arg, 0), value);
        }
        self.run(&body.nodes, &feeds, &body.rets, &[], None)
    }

    fn eval(
        &mut self,
        index: usize,
        node: &Node,
        frame: &Frame<'_>,
        variables: Option<&mut VariableStore>,
    ) -> RuntimeResult<Vec<Value>> {
        let input = |i: usize| -> RuntimeResult<&Value> { frame.get(node.single_input(i)?) };
        let op_type = node.op_type.as_str();

        if let Some(op) = UnaryOp::from_op_type(op_type) {
            return Ok(vec![kernels::unary(op, input(0)?)?]);
        }
        if let Some(op) = BinaryOp::from_op_type(op_type) {
            return Ok(vec![kernels::binary(op, input(0)?, input(1)?)?]);
        }
        if let Some(kind) = ReduceKind::from_op_type(op_type) {
            let axes = input(1)?.index_list("reduction axes")?;
            let keep_dims = bool_attr(node, "keep_dims");
            return Ok(vec![kernels::reduce(kind, input(0)?, &axes, keep_dims)?]);
        }

        let value = match op_type {
            "Placeholder" => {
                return Err(RuntimeError::invalid_argument(format!(
                    "You must feed a value for placeholder tensor '{}' with dtype {}",
                    node.name,
                    node.outputs[0].dtype.name()
                )))
            }
            "_Arg" => {
                return Err(RuntimeError::internal(format!(
                    "function argument {} is not bound",
                    node.name
                )))
            }
            "Const" => {
                let tensor = node
                    .attr("value")
                    .and_then(AttrValue::as_tensor)
                    .ok_or_else(|| RuntimeError::internal("constant without value"))?;
                Value::from_tensor(tensor)?
            }
            "Identity" => input(0)?.clone(),
            "CheckNumerics" => {
                let x = input(0)?;
                if let Lanes::Float(values) = &x.lanes {
                    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                        let message = node.attr("message").and_then(AttrValue::as_str).unwrap_or("");
                        let kind = if bad.is_nan() { "NaN" } else { "Inf" };
                        return Err(RuntimeError::invalid_argument(format!(
                            "{message} : Tensor had {kind} values"
                        )));
                    }
                }
                x.clone()
            }
            "ZerosLike" => {
                let x = input(0)?;
                Value::filled(x.dtype, &x.dims, 0.0)
            }
            "OnesLike" => {
                let x = input(0)?;
                Value::filled(x.dtype, &x.dims, 1.0)
            }
            "Cast" => kernels::cast(input(0)?, node_dtype(node, "DstT")?)?,
            "Reshape" => {
                let x = input(0)?;
                let requested = input(1)?.index_list("reshape target")?;
                kernels::reshape(x, kernels::resolve_reshape(x.len(), &requested)?)?
            }
            "Pack" => {
                let values = node
                    .list_input(0)?
                    .iter()
                    .map(|&port| frame.get(port))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                kernels::pack(&values)?
            }
            "MatMul" => kernels::matmul(
                input(0)?,
                input(1)?,
                bool_attr(node, "transpose_a"),
                bool_attr(node, "transpose_b"),
            )?,
            "BatchMatMulV3" => {
                let x = input(0)?;
                let out_type = node.outputs[0].dtype;
                kernels::batch_matmul(x, input(1)?, out_type)?
            }
            "L2Loss" => kernels::l2_loss(input(0)?)?,
            "Empty" => {
                let dims = dims_from(input(0)?, "shape")?;
                Value::filled(node_dtype(node, "dtype")?, &dims, 0.0)
            }
            "RandomUniform" => {
                let dims = dims_from(input(0)?, "shape")?;
                kernels::random_uniform(self.rng, node_dtype(node, "dtype")?, dims)?
            }
            "TruncatedNormal" => {
                let dims = dims_from(input(0)?, "shape")?;
                kernels::truncated_normal(self.rng, node_dtype(node, "dtype")?, dims)?
            }
            "VariableV2" => {
                let store = variables.ok_or_else(|| {
                    RuntimeError::unimplemented("variables are not supported inside functions")
                })?;
                store.get(&index).cloned().ok_or_else(|| {
                    RuntimeError::failed_precondition(format!(
                        "Attempting to use uninitialized value {}",
                        node.name
                    ))
                })?
            }
            "Assign" | "AssignAdd" | "AssignSub" => {
                let store = variables.ok_or_else(|| {
                    RuntimeError::unimplemented("variables are not supported inside functions")
                })?;
                let var = node.single_input(0)?.node;
                let value = input(1)?;
                let updated = match op_type {
                    "Assign" => {
                        let declared = &node.outputs[0].shape;
                        if bool_attr(node, "validate_shape")
                            && declared.is_fully_specified()
                            && declared.known_dims().ok().as_deref() != Some(value.dims.as_slice())
                        {
                            return Err(RuntimeError::invalid_argument(format!(
                                "Assign requires shapes of both tensors to match. lhs shape= {declared} rhs shape= {:?}",
                                value.dims
                            )));
                        }
                        value.clone()
                    }
                    _ => {
                        let current = store.get(&var).ok_or_else(|| {
                            RuntimeError::failed_precondition(format!(
                                "Attempting to use uninitialized value {}",
                                node.name
                            ))
                        })?;
                        let op = if op_type == "AssignAdd" {
                            BinaryOp::Add
                        } else {
                            BinaryOp::Sub
                        };
                        let next = kernels::binary(op, current, value)?;
                        if next.dims != current.dims {
                            return Err(RuntimeError::invalid_argument(format!(
                                "{op_type} cannot change the variable shape {:?} to {:?}",
                                current.dims, next.dims
                            )));
                        }
                        next
                    }
                };
                store.insert(var, updated.clone());
                updated
            }
            "NoOp" => return Ok(Vec::new()),
            "_SumToShapeOf" => kernels::sum_to_shape(input(0)?, &input(1)?.dims)?,
            "_ReshapeLike" => kernels::reshape(input(0)?, input(1)?.dims.clone())?,
            "_ExpandReduction" => {
                let axes = input(2)?.index_list("reduction axes")?;
                let scale = bool_attr(node, "scale");
                kernels::expand_reduction(input(0)?, &input(1)?.dims, &axes, scale)?
            }
            "While" => {
                let cond = func_attr(node, "cond")?;
                let body = func_attr(node, "body")?;
                let mut values = self.list_values(node, frame, 0)?;
                let mut iterations = 0usize;
                loop {
                    let verdict = self.call(cond, values.clone())?;
                    if !verdict[0].truthy()? {
                        break;
                    }
                    values = self.call(body, values)?;
                    iterations += 1;
                }
                log::trace!("{} finished after {iterations} iterations", node.name);
                return Ok(values);
            }
            "For" => {
                let body = func_attr(node, "body")?;
                let bound = |i: usize| -> RuntimeResult<i64> {
                    input(i)?
                        .index_list("loop bound")?
                        .first()
                        .copied()
                        .ok_or_else(|| RuntimeError::invalid_argument("empty loop bound"))
                };
                let (start, limit, delta) = (bound(0)?, bound(1)?, bound(2)?);
                if delta == 0 {
                    return Err(RuntimeError::invalid_argument("For loop delta must not be 0"));
                }
                let mut values = self.list_values(node, frame, 3)?;
                let mut i = start;
                while (delta > 0 && i < limit) || (delta < 0 && i > limit) {
                    let mut args = Vec::with_capacity(values.len() + 1);
                    args.push(Value::scalar(DType::Int32, i as f64));
                    args.extend(values);
                    values = self.call(body, args)?;
                    i += delta;
                }
                return Ok(values);
            }
            "If" => {
                let branch = if input(0)?.truthy()? {
                    func_attr(node, "then_branch")?
                } else {
                    func_attr(node, "else_branch")?
                };
                let values = self.list_values(node, frame, 1)?;
                return self.call(branch, values);
            }
            name => {
                let args = node
                    .input_ports()
                    .into_iter()
                    .map(|port| frame.get(port).cloned())
                    .collect::<RuntimeResult<Vec<_>>>()?;
                return self.call(name, args);
            }
        };
        Ok(vec![value])
    }

    fn list_values(&self, node: &Node, frame: &Frame<'_>, i: usize) -> RuntimeResult<Vec<Value>> {
        node.list_input(i)?
            .iter()
            .map(|&port| frame.get(port).cloned())
            .collect()
    }
}
