mod common;

use tfbind::ops::{self, layer, FuncOutputs};
use tfbind::{DType, Error, OpSpec, Scope, VarTag};

#[test]
fn generated_names_follow_namespaces() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let a = ops::scalar(&scope, 1.0f32)?;
    let b = ops::scalar(&scope, 2.0f32)?;
    assert_eq!(a.op.name(), "Const_1");
    assert_eq!(b.op.name(), "Const_2");

    let layer = scope.sub_scope("layer");
    let c = ops::scalar(&layer, 3.0f32)?;
    assert_eq!(c.op.name(), "layer/Const_1");
    let nested = layer.sub_scope("inner");
    assert_eq!(ops::add(&nested, &a, &c)?.op.name(), "layer/inner/AddV2_1");

    let again = scope.sub_scope("layer");
    assert_eq!(again.namespace(), "layer_1");
    assert_eq!(scope.sub_scope("layer").namespace(), "layer_2");

    let named = scope.add_operation(OpSpec::new("Identity").name("picked").input(&a))?;
    assert_eq!(named.name(), "picked");
    Ok(())
}

#[test]
fn failures_poison_the_whole_tree() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let child = scope.sub_scope("child");
    let x = ops::scalar(&scope, 1.5f32)?;
    let n = ops::scalar(&child, 2i32)?;

    let err = ops::add(&child, &x, &n).unwrap_err();
    assert!(matches!(err, Error::AddOperation { .. }), "{err}");
    assert!(scope.err().is_some());

    let later = ops::scalar(&scope, 0.0f32).unwrap_err();
    assert!(matches!(later, Error::Poisoned(_)), "{later}");
    let sibling = scope.sub_scope("other");
    assert!(matches!(ops::scalar(&sibling, 0i32), Err(Error::Poisoned(_))));

    match scope.finalize() {
        Err(Error::AddOperation { op_type, .. }) => assert_eq!(op_type, "AddV2"),
        other => panic!("unexpected finalize result: {other:?}"),
    }
    Ok(())
}

#[test]
fn finalize_retires_the_scope() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let scope = Scope::new(runtime.clone())?;
    ops::scalar(&scope, 4i64)?;
    let graph = scope.finalize()?;
    assert_eq!(graph.operations()?.len(), 1);

    assert!(matches!(scope.finalize(), Err(Error::ScopeFinalized)));
    assert!(matches!(ops::scalar(&scope, 1i64), Err(Error::ScopeFinalized)));

    let func = ops::build_func(&runtime, "ident", &[DType::Int64], |s, x| {
        Ok(FuncOutputs::new(vec![ops::identity(s, &x[0])?]))
    })?;
    assert!(matches!(
        scope.register_func(&func, None),
        Err(Error::ScopeFinalized)
    ));
    assert!(scope.err().is_none());
    Ok(())
}

#[test]
fn rejected_arguments_after_finalize_do_not_poison() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let x = ops::placeholder(&scope, DType::Float, None)?;
    scope.finalize()?;

    let err = layer::linear(&scope, &x, 2, &[]).unwrap_err();
    assert!(matches!(err, Error::ScopeFinalized), "{err}");
    assert!(scope.err().is_none());
    assert!(matches!(ops::scalar(&scope, 1.0f32), Err(Error::ScopeFinalized)));
    assert!(matches!(scope.init_op(), Err(Error::ScopeFinalized)));
    Ok(())
}

#[test]
fn rejected_arguments_on_a_failed_scope_report_the_first_error() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let unknown = ops::placeholder(&scope, DType::Float, None)?;
    let x = ops::scalar(&scope, 1.5f32)?;
    let n = ops::scalar(&scope, 2i32)?;
    ops::add(&scope, &x, &n).unwrap_err();

    match layer::linear(&scope, &unknown, 2, &[]) {
        Err(Error::Poisoned(first)) => {
            assert!(matches!(*first, Error::AddOperation { .. }), "{first}")
        }
        other => panic!("expected the sticky error, got {other:?}"),
    }
    let recorded = scope.err().expect("sticky error");
    assert!(matches!(*recorded, Error::AddOperation { .. }), "{recorded}");
    Ok(())
}

#[test]
fn device_and_control_dependencies_are_attached() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let first = ops::no_op(&scope)?;
    let gated = scope.with_control_dependencies(&[first.clone()]);
    let on_cpu = gated.with_device("/device:CPU:0");
    let value = ops::scalar(&on_cpu, 1.0f64)?;
    assert_eq!(value.op.device(), "/device:CPU:0");
    assert_eq!(value.op.control_inputs()?, vec![first.clone()]);

    let sub = on_cpu.sub_scope("sub");
    assert_eq!(sub.device(), "/device:CPU:0");
    assert_eq!(sub.control_dependencies().len(), 1);

    let cleared = on_cpu.with_device("");
    let plain = ops::scalar(&cleared, 2.0f64)?;
    assert_eq!(plain.op.device(), "");
    assert!(ops::scalar(&scope, 3.0f64)?.op.control_inputs()?.is_empty());
    Ok(())
}

#[test]
fn params_group_by_requested_tag() -> anyhow::Result<()> {
    let scope = Scope::new(common::runtime())?;
    let a = ops::scalar(&scope, 1.0f32)?;
    let b = ops::scalar(&scope, 2.0f32)?;
    let c = ops::scalar(&scope, 3.0f32)?;
    scope.tag(&a, &[VarTag::Trainable]);
    scope.tag(&b, &[VarTag::Trainable, VarTag::DecayL1]);
    scope.tag(&c, &[VarTag::DecayL1]);

    assert_eq!(scope.params(&[]), vec![a.clone(), b.clone()]);
    assert_eq!(
        scope.params(&[VarTag::DecayL1, VarTag::Trainable]),
        vec![b.clone(), c.clone(), a, b]
    );
    assert!(scope.params(&[VarTag::DecayL2]).is_empty());
    Ok(())
}

#[test]
#[should_panic(expected = "no matching parameters")]
fn params_required_panics_without_matches() {
    let scope = Scope::new(common::runtime()).unwrap();
    scope.params_required(&[VarTag::Trainable]);
}
