//! Op registry: input validation plus output type and shape inference.
//!
//! Every operation the reference runtime can execute is listed here. Types
//! must match exactly; shapes are propagated as far as they are known, using
//! the values of `Const` inputs for axes and target shapes.

use crate::kernels::{normalize_axes, resolve_reshape, BinaryOp, ReduceKind, UnaryOp};
use crate::nodes::{Library, Node};
use std::collections::BTreeMap;
use tfbind::defs::{AttrValue, FunctionDef};
use tfbind::runtime::{OutputInfo, RuntimeError, RuntimeResult};
use tfbind::{DType, Shape, Tensor};

/// Type and producer of one input.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InputInfo<'a> {
    pub output: &'a OutputInfo,
    pub producer: &'a Node,
}

impl<'a> InputInfo<'a> {
    pub fn dtype(&self) -> DType {
        self.output.dtype
    }

    pub fn shape(&self) -> &'a Shape {
        &self.output.shape
    }

    /// Value of a `Const` producer.
    pub fn constant(&self) -> Option<&'a Tensor> {
        if self.producer.op_type == "Const" {
            self.producer.attr("value").and_then(AttrValue::as_tensor)
        } else {
            None
        }
    }

    /// Integer elements of a constant scalar or vector input.
    fn constant_ints(&self) -> Option<Vec<i64>> {
        let tensor = self.constant()?;
        match tensor.dtype() {
            DType::Int32 => tensor
                .to_vec::<i32>()
                .ok()
                .map(|v| v.into_iter().map(i64::from).collect()),
            DType::Int64 => tensor.to_vec::<i64>().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum InferInput<'a> {
    Single(InputInfo<'a>),
    List(Vec<InputInfo<'a>>),
}

fn invalid(message: impl Into<String>) -> RuntimeError {
    RuntimeError::invalid_argument(message)
}

fn out(dtype: DType, shape: Shape) -> OutputInfo {
    OutputInfo { dtype, shape }
}

fn expect_arity(inputs: &[InferInput<'_>], n: usize) -> RuntimeResult<()> {
    if inputs.len() != n {
        return Err(invalid(format!("expects {n} inputs, got {}", inputs.len())));
    }
    Ok(())
}

fn single<'a>(inputs: &[InferInput<'a>], i: usize) -> RuntimeResult<InputInfo<'a>> {
    match inputs.get(i) {
        Some(InferInput::Single(info)) => Ok(*info),
        Some(InferInput::List(_)) => Err(invalid(format!("input {i} must be a single tensor"))),
        None => Err(invalid(format!("missing input {i}"))),
    }
}

fn list<'a, 'b>(inputs: &'b [InferInput<'a>], i: usize) -> RuntimeResult<&'b [InputInfo<'a>]> {
    match inputs.get(i) {
        Some(InferInput::List(list)) => Ok(list),
        Some(InferInput::Single(_)) => Err(invalid(format!("input {i} must be a list"))),
        None => Err(invalid(format!("missing input {i}"))),
    }
}

fn attr_type(attrs: &BTreeMap<String, AttrValue>, name: &str) -> RuntimeResult<DType> {
    attrs
        .get(name)
        .and_then(AttrValue::as_type)
        .ok_or_else(|| invalid(format!("missing type attribute '{name}'")))
}

fn attr_types<'a>(attrs: &'a BTreeMap<String, AttrValue>, name: &str) -> RuntimeResult<&'a [DType]> {
    attrs
        .get(name)
        .and_then(AttrValue::as_type_list)
        .ok_or_else(|| invalid(format!("missing type list attribute '{name}'")))
}

fn attr_bool(attrs: &BTreeMap<String, AttrValue>, name: &str) -> bool {
    attrs.get(name).and_then(AttrValue::as_bool).unwrap_or(false)
}

fn attr_func<'l>(
    attrs: &BTreeMap<String, AttrValue>,
    name: &str,
    library: &'l Library,
) -> RuntimeResult<&'l FunctionDef> {
    let func = match attrs.get(name) {
        Some(AttrValue::Func(func)) => func,
        _ => return Err(invalid(format!("missing function attribute '{name}'"))),
    };
    library
        .get(func)
        .map(|entry| &entry.def)
        .ok_or_else(|| RuntimeError::not_found(format!("function '{func}' is not registered")))
}

fn same_dtype(op_type: &str, a: InputInfo<'_>, b: InputInfo<'_>) -> RuntimeResult<DType> {
    if a.dtype() != b.dtype() {
        return Err(invalid(format!(
            "{op_type} expects inputs of the same type, got {} and {}",
            a.dtype(),
            b.dtype()
        )));
    }
    Ok(a.dtype())
}

fn require_float(op_type: &str, dtype: DType) -> RuntimeResult<()> {
    if !dtype.is_float() {
        return Err(invalid(format!(
            "{op_type} expects a floating point input, got {dtype}"
        )));
    }
    Ok(())
}

fn require_index_type(what: &str, dtype: DType) -> RuntimeResult<()> {
    if !matches!(dtype, DType::Int32 | DType::Int64) {
        return Err(invalid(format!("{what} must be int32 or int64, got {dtype}")));
    }
    Ok(())
}

/// Broadcast of two partially known shapes.
pub(crate) fn broadcast_shapes(a: &Shape, b: &Shape) -> RuntimeResult<Shape> {
    let (Some(a_dims), Some(b_dims)) = (a.dims(), b.dims()) else {
        return Ok(Shape::unknown());
    };
    let rank = a_dims.len().max(b_dims.len());
    let at = |dims: &[i64], i: usize| {
        if i < rank - dims.len() {
            1
        } else {
            dims[i - (rank - dims.len())]
        }
    };
    let mut dims = Vec::with_capacity(rank);
    for i in 0..rank {
        let (x, y) = (at(a_dims, i), at(b_dims, i));
        dims.push(match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (-1, y) => y,
            (x, -1) => x,
            _ => return Err(invalid(format!("Incompatible shapes: {a} vs. {b}"))),
        });
    }
    Ok(Shape::new(dims))
}

/// Shape produced by a shape-valued input: exact for constants, rank only
/// when the length of the shape vector is known.
fn shape_from_input(input: InputInfo<'_>) -> Shape {
    if let Some(dims) = input.constant_ints() {
        if input.shape().rank() == Some(1) {
            return Shape::new(dims);
        }
    }
    match input.shape().dims() {
        Some([n]) if *n >= 0 => Shape::new(vec![-1; *n as usize]),
        _ => Shape::unknown(),
    }
}

fn reduction_shape(x: &Shape, axes: InputInfo<'_>, keep_dims: bool) -> RuntimeResult<Shape> {
    let Some(dims) = x.dims() else {
        return Ok(Shape::unknown());
    };
    let Some(requested) = axes.constant_ints() else {
        return Ok(if keep_dims {
            Shape::new(vec![-1; dims.len()])
        } else {
            Shape::unknown()
        });
    };
    let axes = normalize_axes(&requested, dims.len())?;
    let out: Vec<i64> = dims
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| {
            if axes.contains(&i) {
                keep_dims.then_some(1)
            } else {
                Some(d)
            }
        })
        .collect();
    Ok(Shape::new(out))
}

fn reshape_shape(x: &Shape, target: InputInfo<'_>) -> RuntimeResult<Shape> {
    let requested = shape_from_input(target);
    let Some(req) = requested.dims() else {
        return Ok(requested);
    };
    match (x.num_elements(), req.iter().filter(|&&d| d == -1).count()) {
        (Ok(total), n) if n <= 1 => {
            let dims = resolve_reshape(total, req)?;
            Ok(Shape::from_usize(&dims))
        }
        _ => Ok(requested),
    }
}

fn matmul_shape(a: &Shape, b: &Shape, ta: bool, tb: bool) -> RuntimeResult<Shape> {
    for shape in [a, b] {
        if shape.rank().is_some_and(|r| r != 2) {
            return Err(invalid(format!("MatMul expects rank-2 operands, got {shape}")));
        }
    }
    let (m, k1) = if ta {
        (a.size(1), a.size(0))
    } else {
        (a.size(0), a.size(1))
    };
    let (k2, n) = if tb {
        (b.size(1), b.size(0))
    } else {
        (b.size(0), b.size(1))
    };
    if k1 >= 0 && k2 >= 0 && k1 != k2 {
        return Err(invalid(format!(
            "Matrix size-incompatible: In[0]: {a}, In[1]: {b}"
        )));
    }
    Ok(Shape::new(vec![m, n]))
}

fn batch_matmul_shape(x: &Shape, y: &Shape) -> RuntimeResult<Shape> {
    let (Some(xd), Some(yd)) = (x.dims(), y.dims()) else {
        return Ok(Shape::unknown());
    };
    if xd.len() < 2 || yd.len() < 2 {
        return Err(invalid(format!(
            "BatchMatMul expects operands of rank >= 2, got {x} and {y}"
        )));
    }
    let (xb, xm) = xd.split_at(xd.len() - 2);
    let (yb, ym) = yd.split_at(yd.len() - 2);
    if xm[1] >= 0 && ym[0] >= 0 && xm[1] != ym[0] {
        return Err(invalid(format!(
            "Matrix size-incompatible: In[0]: {x}, In[1]: {y}"
        )));
    }
    let batch = broadcast_shapes(&Shape::new(xb.to_vec()), &Shape::new(yb.to_vec()))?;
    let mut dims = batch.to_vec().map_err(|e| invalid(format!("{e:#}")))?;
    dims.extend([xm[0], ym[1]]);
    Ok(Shape::new(dims))
}

fn pack_shape(values: &[InputInfo<'_>], axis: i64) -> RuntimeResult<(DType, Shape)> {
    let first = values
        .first()
        .ok_or_else(|| invalid("Pack needs at least one value"))?;
    if axis != 0 {
        return Err(RuntimeError::unimplemented("Pack supports axis 0 only"));
    }
    let mut shape = first.shape().clone();
    for value in &values[1..] {
        if value.dtype() != first.dtype() {
            return Err(invalid(format!(
                "Pack expects values of one type, got {} and {}",
                first.dtype(),
                value.dtype()
            )));
        }
        shape = shape.merge(value.shape()).ok_or_else(|| {
            invalid(format!(
                "Pack expects values of one shape, got {shape} and {}",
                value.shape()
            ))
        })?;
    }
    let shape = match shape.dims() {
        Some(dims) => {
            let mut packed = vec![values.len() as i64];
            packed.extend_from_slice(dims);
            Shape::new(packed)
        }
        None => Shape::unknown(),
    };
    Ok((first.dtype(), shape))
}

fn check_call_args(
    what: &str,
    def: &FunctionDef,
    types: &[DType],
) -> RuntimeResult<()> {
    let expected: Vec<DType> = def.signature.input_args.iter().map(|a| a.dtype).collect();
    if expected != types {
        return Err(invalid(format!(
            "{what} '{}' takes {:?}, given {:?}",
            def.name(),
            expected,
            types
        )));
    }
    Ok(())
}

fn function_outputs(def: &FunctionDef) -> Vec<DType> {
    def.signature.output_args.iter().map(|a| a.dtype).collect()
}

/// Output shapes of a loop: the input shapes when the body preserves them.
fn loop_outputs(inputs: &[InputInfo<'_>], body: &FunctionDef, skip: usize) -> Vec<OutputInfo> {
    inputs
        .iter()
        .zip(&body.signature.output_args)
        .zip(body.signature.input_args.iter().skip(skip))
        .map(|((input, result), arg)| {
            let shape = if result.shape == *input.shape() && arg.shape == *input.shape() {
                input.shape().clone()
            } else {
                Shape::unknown()
            };
            out(input.dtype(), shape)
        })
        .collect()
}

/// Infers the outputs of `op_type` applied to `inputs`, failing when the
/// inputs or attributes do not fit the op.
pub(crate) fn infer_outputs(
    op_type: &str,
    attrs: &BTreeMap<String, AttrValue>,
    inputs: &[InferInput<'_>],
    library: &Library,
) -> RuntimeResult<Vec<OutputInfo>> {
    if let Some(op) = UnaryOp::from_op_type(op_type) {
        expect_arity(inputs, 1)?;
        let x = single(inputs, 0)?;
        if op.float_only() {
            require_float(op_type, x.dtype())?;
        } else if x.dtype() == DType::Bool {
            return Err(invalid(format!("{op_type} is not defined for bool")));
        }
        return Ok(vec![out(x.dtype(), x.shape().clone())]);
    }
    if let Some(op) = BinaryOp::from_op_type(op_type) {
        expect_arity(inputs, 2)?;
        let (x, y) = (single(inputs, 0)?, single(inputs, 1)?);
        let dtype = same_dtype(op_type, x, y)?;
        if dtype == DType::Bool {
            return Err(invalid(format!("{op_type} is not defined for bool")));
        }
        let shape = broadcast_shapes(x.shape(), y.shape())?;
        let dtype = if op.is_comparison() { DType::Bool } else { dtype };
        return Ok(vec![out(dtype, shape)]);
    }
    if ReduceKind::from_op_type(op_type).is_some() {
        expect_arity(inputs, 2)?;
        let (x, axes) = (single(inputs, 0)?, single(inputs, 1)?);
        require_index_type("reduction axes", axes.dtype())?;
        if x.dtype() == DType::Bool {
            return Err(invalid(format!("{op_type} is not defined for bool")));
        }
        let shape = reduction_shape(x.shape(), axes, attr_bool(attrs, "keep_dims"))?;
        return Ok(vec![out(x.dtype(), shape)]);
    }

    match op_type {
        "Placeholder" => {
            expect_arity(inputs, 0)?;
            let shape = attrs
                .get("shape")
                .and_then(AttrValue::as_shape)
                .cloned()
                .unwrap_or_default();
            Ok(vec![out(attr_type(attrs, "dtype")?, shape)])
        }
        "_Arg" => {
            expect_arity(inputs, 0)?;
            let shape = attrs
                .get("shape")
                .and_then(AttrValue::as_shape)
                .cloned()
                .unwrap_or_default();
            Ok(vec![out(attr_type(attrs, "T")?, shape)])
        }
        "Const" => {
            expect_arity(inputs, 0)?;
            let value = attrs
                .get("value")
                .and_then(AttrValue::as_tensor)
                .ok_or_else(|| invalid("missing tensor attribute 'value'"))?;
            if let Some(dtype) = attrs.get("dtype").and_then(AttrValue::as_type) {
                if dtype != value.dtype() {
                    return Err(invalid(format!(
                        "dtype attribute {dtype} does not match value of type {}",
                        value.dtype()
                    )));
                }
            }
            Ok(vec![out(value.dtype(), value.shape())])
        }
        "Identity" | "ZerosLike" | "OnesLike" => {
            expect_arity(inputs, 1)?;
            let x = single(inputs, 0)?;
            Ok(vec![out(x.dtype(), x.shape().clone())])
        }
        "CheckNumerics" => {
            expect_arity(inputs, 1)?;
            let x = single(inputs, 0)?;
            require_float(op_type, x.dtype())?;
            Ok(vec![out(x.dtype(), x.shape().clone())])
        }
        "Cast" => {
            expect_arity(inputs, 1)?;
            let x = single(inputs, 0)?;
            Ok(vec![out(attr_type(attrs, "DstT")?, x.shape().clone())])
        }
        "Reshape" => {
            expect_arity(inputs, 2)?;
            let (x, shape) = (single(inputs, 0)?, single(inputs, 1)?);
            require_index_type("reshape target", shape.dtype())?;
            Ok(vec![out(x.dtype(), reshape_shape(x.shape(), shape)?)])
        }
        "Pack" => {
            expect_arity(inputs, 1)?;
            let values = list(inputs, 0)?;
            if let Some(n) = attrs.get("N").and_then(AttrValue::as_int) {
                if n as usize != values.len() {
                    return Err(invalid(format!(
                        "attribute N={n} does not match {} values",
                        values.len()
                    )));
                }
            }
            let axis = attrs.get("axis").and_then(AttrValue::as_int).unwrap_or(0);
            let (dtype, shape) = pack_shape(values, axis)?;
            Ok(vec![out(dtype, shape)])
        }
        "MatMul" => {
            expect_arity(inputs, 2)?;
            let (a, b) = (single(inputs, 0)?, single(inputs, 1)?);
            let dtype = same_dtype(op_type, a, b)?;
            require_float(op_type, dtype)?;
            let shape = matmul_shape(
                a.shape(),
                b.shape(),
                attr_bool(attrs, "transpose_a"),
                attr_bool(attrs, "transpose_b"),
            )?;
            Ok(vec![out(dtype, shape)])
        }
        "BatchMatMulV3" => {
            expect_arity(inputs, 2)?;
            let (x, y) = (single(inputs, 0)?, single(inputs, 1)?);
            let dtype = same_dtype(op_type, x, y)?;
            require_float(op_type, dtype)?;
            if attr_bool(attrs, "adj_x") || attr_bool(attrs, "adj_y") {
                return Err(RuntimeError::unimplemented(
                    "BatchMatMulV3 with adjoint operands",
                ));
            }
            let out_type = attr_type(attrs, "Tout").unwrap_or(dtype);
            Ok(vec![out(out_type, batch_matmul_shape(x.shape(), y.shape())?)])
        }
        "L2Loss" => {
            expect_arity(inputs, 1)?;
            let x = single(inputs, 0)?;
            require_float(op_type, x.dtype())?;
            Ok(vec![out(x.dtype(), Shape::scalar())])
        }
        "Empty" | "RandomUniform" | "TruncatedNormal" => {
            expect_arity(inputs, 1)?;
            let shape = single(inputs, 0)?;
            require_index_type("shape", shape.dtype())?;
            let dtype = attr_type(attrs, "dtype")?;
            if op_type != "Empty" {
                require_float(op_type, dtype)?;
            }
            Ok(vec![out(dtype, shape_from_input(shape))])
        }
        "VariableV2" => {
            expect_arity(inputs, 0)?;
            let shape = attrs
                .get("shape")
                .and_then(AttrValue::as_shape)
                .cloned()
                .ok_or_else(|| invalid("missing shape attribute 'shape'"))?;
            Ok(vec![out(attr_type(attrs, "dtype")?, shape)])
        }
        "Assign" | "AssignAdd" | "AssignSub" => {
            expect_arity(inputs, 2)?;
            let (var, value) = (single(inputs, 0)?, single(inputs, 1)?);
            if var.producer.op_type != "VariableV2" {
                return Err(invalid(format!(
                    "{op_type} needs a variable as its first input, got {} ({})",
                    var.producer.name, var.producer.op_type
                )));
            }
            let dtype = same_dtype(op_type, var, value)?;
            let validate = op_type != "Assign" || attr_bool(attrs, "validate_shape");
            if validate && var.shape().merge(value.shape()).is_none() {
                return Err(invalid(format!(
                    "{op_type} expects a value of shape {}, got {}",
                    var.shape(),
                    value.shape()
                )));
            }
            Ok(vec![out(dtype, var.shape().clone())])
        }
        "NoOp" => {
            expect_arity(inputs, 0)?;
            Ok(Vec::new())
        }
        "_SumToShapeOf" | "_ReshapeLike" => {
            expect_arity(inputs, 2)?;
            let (grad, like) = (single(inputs, 0)?, single(inputs, 1)?);
            Ok(vec![out(grad.dtype(), like.shape().clone())])
        }
        "_ExpandReduction" => {
            expect_arity(inputs, 3)?;
            let (grad, like, axes) = (single(inputs, 0)?, single(inputs, 1)?, single(inputs, 2)?);
            require_index_type("reduction axes", axes.dtype())?;
            Ok(vec![out(grad.dtype(), like.shape().clone())])
        }
        "While" => {
            expect_arity(inputs, 1)?;
            let values = list(inputs, 0)?;
            let types: Vec<DType> = values.iter().map(InputInfo::dtype).collect();
            if attr_types(attrs, "T")? != types.as_slice() {
                return Err(invalid("attribute T does not match the loop values"));
            }
            let cond = attr_func(attrs, "cond", library)?;
            let body = attr_func(attrs, "body", library)?;
            check_call_args("condition", cond, &types)?;
            check_call_args("body", body, &types)?;
            if function_outputs(body) != types {
                return Err(invalid(format!(
                    "body '{}' must return the loop value types {types:?}",
                    body.name()
                )));
            }
            if cond.signature.output_args.len() != 1 {
                return Err(invalid(format!(
                    "condition '{}' must return one value",
                    cond.name()
                )));
            }
            Ok(loop_outputs(values, body, 0))
        }
        "For" => {
            expect_arity(inputs, 4)?;
            for i in 0..3 {
                let bound = single(inputs, i)?;
                if bound.dtype() != DType::Int32 {
                    return Err(invalid(format!(
                        "For bounds must be int32, input {i} is {}",
                        bound.dtype()
                    )));
                }
            }
            let values = list(inputs, 3)?;
            let types: Vec<DType> = values.iter().map(InputInfo::dtype).collect();
            if attr_types(attrs, "T")? != types.as_slice() {
                return Err(invalid("attribute T does not match the loop values"));
            }
            let body = attr_func(attrs, "body", library)?;
            let mut arg_types = vec![DType::Int32];
            arg_types.extend_from_slice(&types);
            check_call_args("body", body, &arg_types)?;
            if function_outputs(body) != types {
                return Err(invalid(format!(
                    "body '{}' must return the loop value types {types:?}",
                    body.name()
                )));
            }
            Ok(loop_outputs(values, body, 1))
        }
        "If" => {
            expect_arity(inputs, 2)?;
            let cond = single(inputs, 0)?;
            if cond.shape().rank().is_some_and(|r| r != 0) {
                return Err(invalid(format!(
                    "If condition must be a scalar, got shape {}",
                    cond.shape()
                )));
            }
            let values = list(inputs, 1)?;
            let types: Vec<DType> = values.iter().map(InputInfo::dtype).collect();
            if attr_types(attrs, "Tin")? != types.as_slice() {
                return Err(invalid("attribute Tin does not match the inputs"));
            }
            let out_types = attr_types(attrs, "Tout")?;
            let then_branch = attr_func(attrs, "then_branch", library)?;
            let else_branch = attr_func(attrs, "else_branch", library)?;
            for branch in [then_branch, else_branch] {
                check_call_args("branch", branch, &types)?;
                if function_outputs(branch) != out_types {
                    return Err(invalid(format!(
                        "branch '{}' must return {out_types:?}",
                        branch.name()
                    )));
                }
            }
            Ok(then_branch
                .signature
                .output_args
                .iter()
                .zip(&else_branch.signature.output_args)
                .map(|(a, b)| {
                    let shape = if a.shape == b.shape {
                        a.shape.clone()
                    } else {
                        Shape::unknown()
                    };
                    out(a.dtype, shape)
                })
                .collect())
        }
        _ => {
            let Some(entry) = library.get(op_type) else {
                return Err(RuntimeError::not_found(format!(
                    "Op type not registered '{op_type}'"
                )));
            };
            let types = inputs
                .iter()
                .map(|input| match input {
                    InferInput::Single(info) => Ok(info.dtype()),
                    InferInput::List(_) => {
                        Err(invalid("function arguments must be single tensors"))
                    }
                })
                .collect::<RuntimeResult<Vec<_>>>()?;
            check_call_args("function", &entry.def, &types)?;
            Ok(entry
                .def
                .signature
                .output_args
                .iter()
                .map(|arg| out(arg.dtype, arg.shape.clone()))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting_with_unknown_axes() {
        let a = Shape::new(vec![-1, 3]);
        let b = Shape::new(vec![3]);
        assert_eq!(broadcast_shapes(&a, &b).unwrap(), Shape::new(vec![-1, 3]));
        let c = Shape::new(vec![2, 1]);
        assert_eq!(broadcast_shapes(&a, &c).unwrap(), Shape::new(vec![2, 3]));
        assert!(broadcast_shapes(&Shape::new(vec![2]), &Shape::new(vec![3])).is_err());
        assert_eq!(
            broadcast_shapes(&Shape::unknown(), &b).unwrap(),
            Shape::unknown()
        );
    }

    #[test]
    fn matmul_shapes() {
        let a = Shape::new(vec![4, 3]);
        let b = Shape::new(vec![3, 5]);
        assert_eq!(
            matmul_shape(&a, &b, false, false).unwrap(),
            Shape::new(vec![4, 5])
        );
        assert!(matmul_shape(&a, &a, false, false).is_err());
        assert_eq!(
            matmul_shape(&a, &a, true, false).unwrap(),
            Shape::new(vec![3, 3])
        );
    }
}
