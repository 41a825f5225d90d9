//! Reverse-mode symbolic differentiation over graph nodes.
//!
//! Gradient nodes are appended to the same graph under a name prefix. Only
//! floating point values are differentiated; integer and boolean inputs
//! receive no gradient.

use crate::nodes::{Library, NodeInput, NodeProto, NodeSet, Port};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use tfbind::defs::AttrValue;
use tfbind::runtime::{RuntimeError, RuntimeResult};
use tfbind::DType;

struct GradBuilder<'g> {
    nodes: &'g mut NodeSet,
    library: &'g Library,
    prefix: String,
}

impl GradBuilder<'_> {
    fn op(
        &mut self,
        op_type: &str,
        inputs: &[Port],
        attrs: Vec<(&str, AttrValue)>,
    ) -> RuntimeResult<Port> {
        let name = self.nodes.unique_name(&format!("{}/{op_type}", self.prefix));
        let proto = NodeProto {
            name,
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|&p| NodeInput::Single(p)).collect(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        };
        let index = self.nodes.add(proto, self.library)?;
        Ok(Port::new(index, 0))
    }

    fn unary(&mut self, op_type: &str, x: Port) -> RuntimeResult<Port> {
        self.op(op_type, &[x], Vec::new())
    }

    fn binary(&mut self, op_type: &str, x: Port, y: Port) -> RuntimeResult<Port> {
        self.op(op_type, &[x, y], Vec::new())
    }

    fn dtype(&self, port: Port) -> RuntimeResult<DType> {
        Ok(self.nodes.output_info(port)?.dtype)
    }

    /// Scalar constant with the dtype of `like`.
    fn constant(&mut self, like: Port, value: f64) -> RuntimeResult<Port> {
        let dtype = self.dtype(like)?;
        let tensor = Value::scalar(dtype, value).to_tensor()?;
        self.op(
            "Const",
            &[],
            vec![("dtype", AttrValue::Type(dtype)), ("value", AttrValue::Tensor(tensor))],
        )
    }

    fn sum_to(&mut self, grad: Port, like: Port) -> RuntimeResult<Port> {
        self.binary("_SumToShapeOf", grad, like)
    }

    /// Adds up every contribution to one output.
    fn accumulate(&mut self, grads: &[Port]) -> RuntimeResult<Option<Port>> {
        let mut iter = grads.iter().copied();
        let Some(mut total) = iter.next() else {
            return Ok(None);
        };
        for grad in iter {
            total = self.binary("AddV2", total, grad)?;
        }
        Ok(Some(total))
    }

    /// Gradients with respect to each (flattened) input of `node` given the
    /// gradient `dy` of its only output.
    fn input_grads(&mut self, node_index: usize, dy: Port) -> RuntimeResult<Vec<Option<Port>>> {
        let node = self.nodes.nodes()[node_index].clone();
        let x = |i: usize| node.single_input(i);
        let out = Port::new(node_index, 0);
        let grads = match node.op_type.as_str() {
            "Identity" | "CheckNumerics" => vec![Some(dy)],
            "Neg" => vec![Some(self.unary("Neg", dy)?)],
            "Abs" => {
                let sign = self.unary("Sign", x(0)?)?;
                vec![Some(self.binary("Mul", dy, sign)?)]
            }
            "Add" | "AddV2" => {
                let (a, b) = (x(0)?, x(1)?);
                vec![Some(self.sum_to(dy, a)?), Some(self.sum_to(dy, b)?)]
            }
            "Sub" => {
                let (a, b) = (x(0)?, x(1)?);
                let neg = self.unary("Neg", dy)?;
                vec![Some(self.sum_to(dy, a)?), Some(self.sum_to(neg, b)?)]
            }
            "Mul" => {
                let (a, b) = (x(0)?, x(1)?);
                let da = self.binary("Mul", dy, b)?;
                let db = self.binary("Mul", a, dy)?;
                vec![Some(self.sum_to(da, a)?), Some(self.sum_to(db, b)?)]
            }
            "DivNoNan" => {
                let (a, b) = (x(0)?, x(1)?);
                let da = self.binary("DivNoNan", dy, b)?;
                let num = self.binary("Mul", dy, a)?;
                let den = self.unary("Square", b)?;
                let db = self.binary("DivNoNan", num, den)?;
                let db = self.unary("Neg", db)?;
                vec![Some(self.sum_to(da, a)?), Some(self.sum_to(db, b)?)]
            }
            "Square" => {
                let two = self.constant(dy, 2.0)?;
                let scaled = self.binary("Mul", x(0)?, two)?;
                vec![Some(self.binary("Mul", dy, scaled)?)]
            }
            "Sqrt" => {
                let half = self.constant(dy, 0.5)?;
                let scaled = self.binary("Mul", dy, half)?;
                vec![Some(self.binary("DivNoNan", scaled, out)?)]
            }
            "Rsqrt" => {
                let coeff = self.constant(dy, -0.5)?;
                let sq = self.unary("Square", out)?;
                let cube = self.binary("Mul", out, sq)?;
                let scaled = self.binary("Mul", coeff, cube)?;
                vec![Some(self.binary("Mul", dy, scaled)?)]
            }
            "Exp" => vec![Some(self.binary("Mul", dy, out)?)],
            "Tanh" => {
                let one = self.constant(dy, 1.0)?;
                let sq = self.unary("Square", out)?;
                let slope = self.binary("Sub", one, sq)?;
                vec![Some(self.binary("Mul", dy, slope)?)]
            }
            "Sigmoid" => {
                let one = self.constant(dy, 1.0)?;
                let rest = self.binary("Sub", one, out)?;
                let slope = self.binary("Mul", out, rest)?;
                vec![Some(self.binary("Mul", dy, slope)?)]
            }
            "Sum" | "Mean" => {
                let scale = node.op_type == "Mean";
                let g = self.op(
                    "_ExpandReduction",
                    &[dy, x(0)?, x(1)?],
                    vec![("scale", AttrValue::Bool(scale))],
                )?;
                vec![Some(g), None]
            }
            "Reshape" => vec![Some(self.binary("_ReshapeLike", dy, x(0)?)?), None],
            "L2Loss" => vec![Some(self.binary("Mul", x(0)?, dy)?)],
            "Cast" => {
                let src = self.dtype(x(0)?)?;
                if src.is_float() && self.dtype(dy)?.is_float() {
                    vec![Some(self.op("Cast", &[dy], vec![("DstT", AttrValue::Type(src))])?)]
                } else {
                    vec![None]
                }
            }
            "MatMul" => {
                let (a, b) = (x(0)?, x(1)?);
                let flag = |name: &str| {
                    node.attr(name)
                        .and_then(AttrValue::as_bool)
                        .unwrap_or(false)
                };
                let (ta, tb) = (flag("transpose_a"), flag("transpose_b"));
                let mut mm = |l: Port, r: Port, tl: bool, tr: bool| {
                    self.op(
                        "MatMul",
                        &[l, r],
                        vec![
                            ("transpose_a", AttrValue::Bool(tl)),
                            ("transpose_b", AttrValue::Bool(tr)),
                        ],
                    )
                };
                let (da, db) = match (ta, tb) {
                    (false, false) => (mm(dy, b, false, true)?, mm(a, dy, true, false)?),
                    (false, true) => (mm(dy, b, false, false)?, mm(dy, a, true, false)?),
                    (true, false) => (mm(b, dy, false, true)?, mm(a, dy, false, false)?),
                    (true, true) => (mm(b, dy, true, true)?, mm(dy, a, true, true)?),
                };
                vec![Some(da), Some(db)]
            }
            "ZerosLike" | "OnesLike" | "Sign" | "Less" | "Greater" => {
                vec![None; node.input_ports().len()]
            }
            other => {
                return Err(RuntimeError::unimplemented(format!(
                    "no gradient defined for op type {other} ({})",
                    node.name
                )))
            }
        };
        Ok(grads)
    }
}

/// Appends nodes computing `d(sum(ys))/dx` for each of `xs` and returns their
/// outputs. `dx` overrides the initial gradient of each `y` (default ones).
pub(crate) fn add_gradients(
    nodes: &mut NodeSet,
    library: &Library,
    prefix: &str,
    ys: &[Port],
    xs: &[Port],
    dx: Option<&[Port]>,
) -> RuntimeResult<Vec<Port>> {
    if let Some(dx) = dx {
        if dx.len() != ys.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} initial gradients given for {} outputs",
                dx.len(),
                ys.len()
            )));
        }
    }
    for &port in ys.iter().chain(xs).chain(dx.unwrap_or(&[])) {
        nodes.output_info(port)?;
    }
    let count = nodes.len();

    let mut from_x = vec![false; count];
    for x in xs {
        from_x[x.node] = true;
    }
    for (index, node) in nodes.nodes().iter().enumerate() {
        if !from_x[index] && node.input_ports().iter().any(|p| from_x[p.node]) {
            from_x[index] = true;
        }
    }
    let mut to_y = vec![false; count];
    let mut stack: Vec<usize> = ys.iter().map(|p| p.node).collect();
    while let Some(index) = stack.pop() {
        if std::mem::replace(&mut to_y[index], true) {
            continue;
        }
        stack.extend(nodes.nodes()[index].input_ports().iter().map(|p| p.node));
    }
    let relevant: Vec<bool> = (0..count).map(|i| from_x[i] && to_y[i]).collect();

    let prefix = if prefix.is_empty() { "gradients" } else { prefix };
    let mut builder = GradBuilder {
        nodes,
        library,
        prefix: prefix.to_string(),
    };

    let mut pending: HashMap<Port, Vec<Port>> = HashMap::new();
    for (i, &y) in ys.iter().enumerate() {
        let seed = match dx {
            Some(dx) => dx[i],
            None => builder.unary("OnesLike", y)?,
        };
        pending.entry(y).or_default().push(seed);
    }

    for index in (0..count).rev() {
        if !relevant[index] {
            continue;
        }
        let node = builder.nodes.nodes()[index].clone();
        let inputs = node.input_ports();
        if !inputs.iter().any(|p| relevant[p.node]) {
            continue;
        }
        let grads = pending.get(&Port::new(index, 0)).cloned().unwrap_or_default();
        let Some(dy) = builder.accumulate(&grads)? else {
            continue;
        };
        if node.outputs.len() != 1 {
            return Err(RuntimeError::unimplemented(format!(
                "no gradient defined for multi-output op {} ({})",
                node.name, node.op_type
            )));
        }
        let grads = builder.input_grads(index, dy)?;
        for (port, grad) in inputs.into_iter().zip(grads) {
            let Some(grad) = grad else { continue };
            if relevant[port.node] && builder.dtype(port)?.is_float() {
                pending.entry(port).or_default().push(grad);
            }
        }
    }

    let mut result = Vec::with_capacity(xs.len());
    for &x in xs {
        let grads = pending.get(&x).cloned().unwrap_or_default();
        let grad = match builder.accumulate(&grads)? {
            Some(grad) => grad,
            None => builder.unary("ZerosLike", x)?,
        };
        result.push(grad);
    }
    log::debug!(
        "added gradients under {prefix} for {} outputs and {} inputs",
        ys.len(),
        xs.len()
    );
    Ok(result)
}
