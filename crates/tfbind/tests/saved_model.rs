mod common;

use std::collections::BTreeMap;
use tfbind::defs::SignatureDef;
use tfbind::ops;
use tfbind::saved_model::tensor_info;
use tfbind::{
    list_saved_model_details, DType, Error, SavedModel, SavedModelBuilder, Scope, SessionOptions,
    Shape, Tensor,
};

#[test]
fn saved_model_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let runtime = common::runtime();

    let scope = Scope::new(runtime.clone())?;
    let x = ops::placeholder(&scope, DType::Float, Some(Shape::new(vec![2])))?;
    let v = ops::variable(&scope, Shape::new(vec![2]), DType::Float)?;
    let start = ops::assign(&scope, &v, &ops::vector(&scope, &[1.0f32, 2.0])?)?;
    let bump = ops::assign_add(&scope, &v, &ops::vector(&scope, &[1.0f32, 1.0])?)?;
    let y = ops::mul(&scope, &x, &v)?;
    let graph = scope.finalize()?;

    let session = common::session(&graph);
    session.run(&[], &[], &[start.op, bump.op])?;

    let signature = SignatureDef {
        method_name: "predict".to_string(),
        inputs: BTreeMap::from([("x".to_string(), tensor_info(&x)?)]),
        outputs: BTreeMap::from([("y".to_string(), tensor_info(&y)?)]),
    };
    SavedModelBuilder::new(&session)
        .add_meta_graph(
            &["serve"],
            BTreeMap::from([("serving_default".to_string(), signature)]),
        )
        .add_meta_graph(&["train", "gpu"], BTreeMap::new())
        .save(dir.path())?;

    let details = list_saved_model_details(dir.path())?;
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].tags, vec!["serve".to_string()]);
    assert!(details[0].signatures.contains_key("serving_default"));
    assert_eq!(details[1].tags.len(), 2);

    let model = SavedModel::load(runtime.clone(), dir.path(), &["serve"], &SessionOptions::default())?;
    let sig = &model.signatures["serving_default"];
    assert_eq!(sig.inputs["x"].dtype, DType::Float);
    let input = model.signature_tensor(&sig.inputs["x"])?;
    let output = model.signature_tensor(&sig.outputs["y"])?;
    let out = model
        .session
        .run(&[(input, Tensor::vector(&[10.0f32, 100.0]))], &[output], &[])?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![20.0, 300.0]);

    // Tag order does not matter.
    SavedModel::load(runtime, dir.path(), &["gpu", "train"], &SessionOptions::default())?;
    Ok(())
}

#[test]
fn loading_reports_unknown_tags() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let runtime = common::runtime();
    let scope = Scope::new(runtime.clone())?;
    ops::scalar(&scope, 1i32)?;
    let graph = scope.finalize()?;
    let session = common::session(&graph);
    SavedModelBuilder::new(&session)
        .add_meta_graph(&["serve"], BTreeMap::new())
        .save(dir.path())?;

    let err = SavedModel::load(runtime.clone(), dir.path(), &["missing"], &SessionOptions::default())
        .err()
        .expect("unknown tags must fail");
    assert!(err.to_string().contains("list_saved_model_details"), "{err}");

    let err = SavedModel::load(runtime.clone(), dir.path(), &[], &SessionOptions::default())
        .err()
        .expect("empty tags must fail");
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

    let empty = tempfile::tempdir()?;
    assert!(SavedModel::load(runtime, empty.path(), &["serve"], &SessionOptions::default()).is_err());
    assert!(list_saved_model_details(empty.path()).is_err());
    Ok(())
}

#[test]
fn builder_needs_a_meta_graph() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let graph = tfbind::Graph::new(common::runtime())?;
    let session = common::session(&graph);
    assert!(SavedModelBuilder::new(&session).save(dir.path()).is_err());
    Ok(())
}
