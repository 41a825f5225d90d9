mod common;

use tfbind::defs::AttrValue;
use tfbind::ops::{self, FuncOutputs};
use tfbind::{DType, Error, Func, OpSpec, Scope, Tensor};

/// Graph with `y = -x` over an int8 placeholder named `x`.
fn negation_graph(runtime: &std::sync::Arc<dyn tfbind::Runtime>) -> anyhow::Result<Func> {
    let scope = Scope::new(runtime.clone())?;
    let x = scope
        .add_operation(OpSpec::new("Placeholder").name("x").attr("dtype", DType::Int8))?
        .output(0);
    let y = scope
        .add_operation(OpSpec::new("Neg").name("neg").input(&x))?
        .output(0);
    let graph = scope.finalize()?;
    Ok(graph.to_func("negate", &[x], &[y], Some(&["y1".to_string()][..]), "TestFunc1")?)
}

#[test]
fn captured_function_runs_in_another_graph() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = negation_graph(&runtime)?;
    assert!(func.name().starts_with("negate_"), "{}", func.name());

    let sig = func.signature()?;
    assert_eq!(sig.name, func.name());
    assert_eq!(sig.input_args.len(), 1);
    assert_eq!(sig.input_args[0].name, "x");
    assert_eq!(sig.input_args[0].dtype, DType::Int8);
    assert_eq!(sig.output_args.len(), 1);
    assert_eq!(sig.output_args[0].name, "y1");
    assert_eq!(sig.output_args[0].dtype, DType::Int8);
    assert_eq!(sig.summary, "");
    assert_eq!(sig.description, "TestFunc1");

    let scope = Scope::new(runtime)?;
    scope.register_func(&func, None)?;
    let seven = ops::scalar(&scope, 7i8)?;
    let out = ops::call(&scope, &func, &[seven])?;
    assert_eq!(out.len(), 1);
    let graph = scope.finalize()?;
    let session = common::session(&graph);
    let value = common::fetch(&session, &out)[0].scalar_value::<i8>()?;
    assert_eq!(value, -7);
    Ok(())
}

#[test]
fn registered_copy_outlives_the_source_function() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = negation_graph(&runtime)?;
    let name = func.name().to_string();

    let scope = Scope::new(runtime)?;
    scope.register_func(&func, None)?;
    let seven = ops::scalar(&scope, 7i8)?;
    let out = ops::call(&scope, &func, &[seven])?;
    func.delete();
    let graph = scope.finalize()?;

    let listed = graph.functions()?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name(), name);
    let sig = listed[0].signature()?;
    assert_eq!(sig.input_args.len(), 1);
    assert_eq!(sig.output_args.len(), 1);
    assert_eq!(sig.input_args[0].dtype, DType::Int8);

    // Dropping one listed handle leaves the graph's copy alone.
    drop(listed);
    assert_eq!(graph.functions()?.len(), 1);
    let session = common::session(&graph);
    assert_eq!(common::fetch(&session, &out)[0].scalar_value::<i8>()?, -7);
    Ok(())
}

#[test]
fn export_import_export_is_byte_identical() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = negation_graph(&runtime)?;
    let bytes = func.to_bytes()?;
    let mut written = Vec::new();
    assert_eq!(func.write_to(&mut written)?, bytes.len());
    assert_eq!(written, bytes);

    let imported = Func::import(runtime.clone(), &bytes)?;
    assert_eq!(imported.name(), func.name());
    assert_eq!(imported.to_bytes()?, bytes);

    assert!(Func::import(runtime, &[]).is_err());
    Ok(())
}

#[test]
fn function_attributes() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = negation_graph(&runtime)?;

    assert!(func.attr("missing").is_err());
    func.set_attr("empty", &[])?;
    assert_eq!(func.attr("empty")?, None);
    func.set_attr("blob", b"\x01\x02")?;
    assert_eq!(func.attr("blob")?, Some(vec![1, 2]));

    func.set_attr_value("flag", &AttrValue::Bool(true))?;
    assert_eq!(func.attr_value("flag")?, Some(AttrValue::Bool(true)));
    Ok(())
}

#[test]
fn output_names_must_match_outputs() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::placeholder(&scope, DType::Float, None)?;
    let y = ops::square(&scope, &x)?;
    let graph = scope.finalize()?;
    let names = vec!["a".to_string(), "b".to_string()];
    let err = graph.to_func("sq", &[x], &[y], Some(names.as_slice()), "").unwrap_err();
    assert!(
        matches!(err, Error::OutputNamesMismatch { outputs: 1, names: 2 }),
        "{err}"
    );
    Ok(())
}

#[test]
fn call_returns_every_output() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = ops::build_func(&runtime, "add_pow", &[DType::Float, DType::Float], |s, x| {
        let sum = ops::add(s, &x[0], &x[1])?;
        let power = ops::cast(s, &ops::pow(s, &x[0], &x[1])?, DType::Int32)?;
        Ok(FuncOutputs::new(vec![sum, power]).with_description("sum and power"))
    })?;
    assert_eq!(func.signature()?.description, "sum and power");

    let scope = Scope::new(runtime)?;
    scope.register_func(&func, None)?;
    let a = ops::scalar(&scope, 3.0f32)?;
    let b = ops::scalar(&scope, 3.0f32)?;
    let out = ops::call(&scope, &func, &[a, b])?;
    assert_eq!(out[0].dtype(), Some(DType::Float));
    assert_eq!(out[1].dtype(), Some(DType::Int32));

    let session = common::session(&scope.finalize()?);
    let values = common::fetch(&session, &out);
    assert_eq!(values[0].scalar_value::<f32>()?, 6.0);
    assert_eq!(values[1].scalar_value::<i32>()?, 27);
    Ok(())
}

#[test]
fn unregistered_function_fails_the_call() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = ops::build_func(&runtime, "ident", &[DType::Float], |s, x| {
        Ok(FuncOutputs::new(vec![ops::identity(s, &x[0])?]))
    })?;
    let scope = Scope::new(runtime)?;
    let x = ops::scalar(&scope, 1.0f32)?;
    assert!(ops::call(&scope, &func, &[x]).is_err());
    assert!(scope.err().is_some());
    Ok(())
}

#[test]
fn build_failures_are_reported_with_the_function_name() {
    let runtime = common::runtime();
    let err = ops::build_func(&runtime, "broken", &[DType::Float, DType::Int32], |s, x| {
        Ok(FuncOutputs::new(vec![ops::add(s, &x[0], &x[1])?]))
    })
    .unwrap_err();
    match err {
        Error::BuildFunc { name, .. } => assert_eq!(name, "broken"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn functions_travel_with_exported_graphs() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let func = negation_graph(&runtime)?;
    let scope = Scope::new(runtime.clone())?;
    scope.register_func(&func, None)?;
    // Registering the same function again is harmless.
    scope.register_func(&func, None)?;
    let graph = scope.finalize()?;
    let names: Vec<String> = graph
        .functions()?
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names, vec![func.name().to_string()]);

    let copy = tfbind::Graph::new(runtime)?;
    copy.import(&graph.export()?, "")?;
    assert_eq!(copy.functions()?.len(), 1);
    Ok(())
}

#[test]
fn for_loop_accumulates_the_counter() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let body = ops::build_func(&runtime, "for_body", &[DType::Int32, DType::Double], |s, x| {
        let i = ops::cast(s, &x[0], DType::Double)?;
        Ok(FuncOutputs::new(vec![ops::add(s, &x[1], &i)?]))
    })?;

    let scope = Scope::new(runtime)?;
    scope.register_func(&body, None)?;
    let start = ops::scalar(&scope, 3i32)?;
    let limit = ops::scalar(&scope, 9i32)?;
    let delta = ops::scalar(&scope, 5i32)?;
    let init = ops::scalar(&scope, 0.5f64)?;
    let out = ops::for_loop(&scope, &start, &limit, &delta, &[init], &body)?;

    let session = common::session(&scope.finalize()?);
    assert_eq!(common::fetch(&session, &out)[0].scalar_value::<f64>()?, 11.5);
    Ok(())
}

#[test]
fn while_loop_counts_iterations() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let dtypes = [DType::Float, DType::Float, DType::Int64];
    let (cond, body) = ops::build_func_pair(
        &runtime,
        ("while_cond", "while_body"),
        &dtypes,
        |s, x| {
            let gap = ops::sub(s, &x[1], &x[0])?;
            let flat = ops::reshape(s, &gap, &ops::vector(s, &[-1i32])?)?;
            let largest = ops::max(s, &flat, &ops::scalar(s, 0i32)?, false)?;
            Ok(FuncOutputs::new(vec![ops::less(s, &largest, &ops::scalar(s, 0.0f32)?)?]))
        },
        |s, x| {
            let grown = ops::mul(s, &x[1], &ops::scalar(s, 1.01f32)?)?;
            let counter = ops::add(s, &x[2], &ops::scalar(s, 1i64)?)?;
            Ok(FuncOutputs::new(vec![x[0].clone(), grown, counter]))
        },
    )?;
    let cond_sig = cond.signature()?;
    let body_sig = body.signature()?;
    let arg_types = |sig: &tfbind::defs::OpDef| -> Vec<DType> {
        sig.input_args.iter().map(|a| a.dtype).collect()
    };
    assert_eq!(arg_types(&cond_sig), dtypes.to_vec());
    assert_eq!(arg_types(&body_sig), dtypes.to_vec());
    assert_eq!(cond_sig.output_args[0].dtype, DType::Bool);

    let scope = Scope::new(runtime)?;
    scope.register_func(&cond, None)?;
    scope.register_func(&body, None)?;
    let limit = ops::scalar(&scope, 100.0f32)?;
    let values = ops::vector(&scope, &[1.0f32, -2.0])?;
    let counter = ops::scalar(&scope, 0i64)?;
    let out = ops::while_loop(&scope, &[limit, values, counter], &cond, &body)?;
    assert_eq!(out.len(), 3);

    let session = common::session(&scope.finalize()?);
    let fetched = common::fetch(&session, &out[2..]);
    assert_eq!(fetched[0].scalar_value::<i64>()?, 463);
    Ok(())
}

#[test]
fn if_selects_a_branch() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let (double, negate) = ops::build_func_pair(
        &runtime,
        ("double", "negate"),
        &[DType::Float],
        |s, x| Ok(FuncOutputs::new(vec![ops::add(s, &x[0], &x[0])?])),
        |s, x| Ok(FuncOutputs::new(vec![ops::neg(s, &x[0])?])),
    )?;

    let scope = Scope::new(runtime)?;
    scope.register_func(&double, None)?;
    scope.register_func(&negate, None)?;
    let x = ops::scalar(&scope, 4.0f32)?;
    let yes = ops::constant(&scope, Tensor::scalar(true))?;
    let no = ops::constant(&scope, Tensor::scalar(false))?;
    let taken = ops::if_then_else(&scope, &yes, &[x.clone()], &double, &negate, &[DType::Float])?;
    let skipped = ops::if_then_else(&scope, &no, &[x], &double, &negate, &[DType::Float])?;

    let session = common::session(&scope.finalize()?);
    let values = common::fetch(&session, &[taken[0].clone(), skipped[0].clone()]);
    assert_eq!(values[0].scalar_value::<f32>()?, 8.0);
    assert_eq!(values[1].scalar_value::<f32>()?, -4.0);
    Ok(())
}
