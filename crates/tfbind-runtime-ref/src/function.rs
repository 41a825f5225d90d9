//! Extracting graphs into function definitions and instantiating them again
//! for execution.

use crate::nodes::{Library, NodeInput, NodeProto, NodeSet, Port};
use std::collections::{BTreeMap, HashMap, HashSet};
use tfbind::defs::{ArgDef, AttrValue, FunctionDef, InputDef, NodeDef, OpDef, TensorRef};
use tfbind::runtime::{FunctionCapture, RuntimeError, RuntimeResult};

/// Lower-case identifier made of `[a-z0-9_]`, never starting with a digit.
pub(crate) fn normalize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "arg_");
    }
    out
}

fn claim(base: String, used: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 0;
    while !used.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{base}_{n}");
    }
    candidate
}

/// Builds a [`FunctionDef`] from `capture`.
///
/// Inputs must be outputs of `Placeholder` nodes of the captured set; they
/// become arguments named after the normalized node names. Every other
/// captured node becomes part of the body and may only reference captured
/// nodes.
pub(crate) fn capture_function(
    nodes: &NodeSet,
    capture: &FunctionCapture,
    hash_names: bool,
) -> RuntimeResult<FunctionDef> {
    if capture.name.is_empty() {
        return Err(RuntimeError::invalid_argument("function name must not be empty"));
    }
    let selected: Vec<usize> = match &capture.operations {
        Some(ops) => {
            let mut ids: Vec<usize> = ops.iter().map(|op| op.0 as usize).collect();
            ids.sort_unstable();
            ids.dedup();
            for &id in &ids {
                nodes.node(id)?;
            }
            ids
        }
        None => (0..nodes.len()).collect(),
    };
    let in_set: HashSet<usize> = selected.iter().copied().collect();

    let mut arg_of: HashMap<usize, String> = HashMap::new();
    let mut used: HashSet<String> = selected
        .iter()
        .map(|&i| nodes.nodes()[i].name.clone())
        .collect();
    let mut input_args = Vec::with_capacity(capture.inputs.len());
    for input in &capture.inputs {
        let index = input.op.0 as usize;
        let node = nodes.node(index)?;
        if !in_set.contains(&index) || node.op_type != "Placeholder" || input.index != 0 {
            return Err(RuntimeError::invalid_argument(format!(
                "function input {}:{} must be the output of a captured Placeholder",
                node.name, input.index
            )));
        }
        if arg_of.contains_key(&index) {
            return Err(RuntimeError::invalid_argument(format!(
                "{} is listed twice as a function input",
                node.name
            )));
        }
        used.remove(&node.name);
        let arg_name = claim(normalize_name(&node.name), &mut used);
        let info = &node.outputs[0];
        input_args.push(ArgDef {
            name: arg_name.clone(),
            dtype: info.dtype,
            shape: info.shape.clone(),
        });
        arg_of.insert(index, arg_name);
    }

    let tensor_ref = |port: Port, user: &str| -> RuntimeResult<TensorRef> {
        if let Some(arg) = arg_of.get(&port.node) {
            return Ok(TensorRef::new(arg.clone(), 0));
        }
        if !in_set.contains(&port.node) {
            return Err(RuntimeError::invalid_argument(format!(
                "{user} uses {} which is not part of the function",
                nodes.nodes()[port.node].name
            )));
        }
        Ok(nodes.tensor_ref(port))
    };

    let mut body = Vec::with_capacity(selected.len());
    for &index in &selected {
        if arg_of.contains_key(&index) {
            continue;
        }
        let node = &nodes.nodes()[index];
        if node.op_type == "Placeholder" {
            return Err(RuntimeError::invalid_argument(format!(
                "placeholder {} is not a function input",
                node.name
            )));
        }
        let inputs = node
            .inputs
            .iter()
            .map(|input| match input {
                NodeInput::Single(port) => Ok(InputDef::Single(tensor_ref(*port, &node.name)?)),
                NodeInput::List(list) => Ok(InputDef::List(
                    list.iter()
                        .map(|port| tensor_ref(*port, &node.name))
                        .collect::<RuntimeResult<Vec<_>>>()?,
                )),
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        let mut control_inputs = Vec::new();
        for &c in &node.control_inputs {
            if arg_of.contains_key(&c) {
                continue;
            }
            if !in_set.contains(&c) {
                return Err(RuntimeError::invalid_argument(format!(
                    "{} depends on {} which is not part of the function",
                    node.name,
                    nodes.nodes()[c].name
                )));
            }
            control_inputs.push(nodes.nodes()[c].name.clone());
        }
        body.push(NodeDef {
            name: node.name.clone(),
            op: node.op_type.clone(),
            inputs,
            control_inputs,
            device: node.device.clone(),
            attrs: node.attrs.clone(),
        });
    }

    let mut output_names = HashSet::new();
    let mut output_args = Vec::with_capacity(capture.outputs.len());
    let mut ret = BTreeMap::new();
    for (i, output) in capture.outputs.iter().enumerate() {
        let port = Port::new(output.op.0 as usize, output.index);
        let info = nodes.output_info(port)?;
        let base = match &capture.output_names {
            Some(names) => names
                .get(i)
                .cloned()
                .ok_or_else(|| RuntimeError::invalid_argument("fewer output names than outputs"))?,
            None => {
                let node = normalize_name(&nodes.nodes()[port.node].name);
                if port.index == 0 {
                    node
                } else {
                    format!("{node}_{}", port.index)
                }
            }
        };
        let name = if capture.output_names.is_some() {
            if !output_names.insert(base.clone()) {
                return Err(RuntimeError::invalid_argument(format!(
                    "duplicate output name '{base}'"
                )));
            }
            base
        } else {
            claim(base, &mut output_names)
        };
        ret.insert(name.clone(), tensor_ref(port, &name)?);
        output_args.push(ArgDef {
            name,
            dtype: info.dtype,
            shape: info.shape.clone(),
        });
    }

    let mut def = FunctionDef {
        signature: OpDef {
            name: capture.name.clone(),
            input_args,
            output_args,
            summary: String::new(),
            description: capture.description.clone(),
        },
        attrs: BTreeMap::new(),
        nodes: body,
        ret,
    };
    if capture.append_hash_to_name && hash_names {
        let bytes = def
            .to_bytes()
            .map_err(|err| RuntimeError::internal(err.to_string()))?;
        let digest = blake3::hash(&bytes).to_hex();
        def.signature.name = format!("{}_{}", capture.name, &digest.as_str()[..16]);
    }
    Ok(def)
}

/// A function body ready to run: one `_Arg` node per input, then the body.
#[derive(Debug)]
pub(crate) struct Body {
    pub nodes: NodeSet,
    pub args: Vec<usize>,
    pub rets: Vec<Port>,
}

pub(crate) fn instantiate(def: &FunctionDef, library: &Library) -> RuntimeResult<Body> {
    let mut nodes = NodeSet::default();
    let mut args = Vec::with_capacity(def.signature.input_args.len());
    for (i, arg) in def.signature.input_args.iter().enumerate() {
        let mut attrs = BTreeMap::new();
        attrs.insert("T".to_string(), AttrValue::Type(arg.dtype));
        attrs.insert("index".to_string(), AttrValue::Int(i as i64));
        attrs.insert("shape".to_string(), AttrValue::Shape(arg.shape.clone()));
        args.push(nodes.add(
            NodeProto {
                name: arg.name.clone(),
                op_type: "_Arg".to_string(),
                attrs,
                ..Default::default()
            },
            library,
        )?);
    }
    let same = |name: &str| name.to_string();
    for node in &def.nodes {
        nodes.add_node_def(node, &same, library).map_err(|err| {
            RuntimeError::new(
                err.code,
                format!("in function '{}': {}", def.name(), err.message),
            )
        })?;
    }
    let rets = def
        .signature
        .output_args
        .iter()
        .map(|arg| {
            let tensor = def.ret.get(&arg.name).ok_or_else(|| {
                RuntimeError::invalid_argument(format!(
                    "function '{}' does not return output '{}'",
                    def.name(),
                    arg.name
                ))
            })?;
            let node = nodes.find(&tensor.node).ok_or_else(|| {
                RuntimeError::invalid_argument(format!(
                    "function '{}' returns unknown tensor {tensor}",
                    def.name()
                ))
            })?;
            let port = Port::new(node, tensor.index);
            nodes.output_info(port)?;
            Ok(port)
        })
        .collect::<RuntimeResult<Vec<_>>>()?;
    Ok(Body { nodes, args, rets })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("Scope/Neg_1"), "scope_neg_1");
        assert_eq!(normalize_name("1x"), "arg_1x");
        assert_eq!(normalize_name(""), "arg_");
        let mut used = HashSet::new();
        assert_eq!(claim("x".into(), &mut used), "x");
        assert_eq!(claim("x".into(), &mut used), "x_1");
    }
}
