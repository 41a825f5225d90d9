mod common;

use std::collections::HashMap;
use std::io::Cursor;
use tfbind::io::safetensors::{write_safetensors, SafeTensorLoader};
use tfbind::runtime::registry::{create_runtime, default_runtime, has_runtime, list_runtimes};
use tfbind::{CastWorker, DType, Error, Graph, OpSpec, Tensor};

#[test]
fn ref_runtime_is_registered_by_name() {
    tfbind_runtime_ref::register_ref_runtime();

    assert!(has_runtime("ref"));
    assert!(list_runtimes().contains(&"ref".to_string()));
    let runtime = create_runtime("ref").expect("ref runtime registered");
    assert_eq!(runtime.runtime_name(), "ref");
    assert!(runtime.version().starts_with("ref-"));
    assert!(default_runtime().is_ok());

    assert!(!has_runtime("nonexistent"));
    assert!(create_runtime("nonexistent").is_none());
}

#[test]
fn cast_worker_converts_between_dtypes() -> anyhow::Result<()> {
    let mut worker = CastWorker::new(common::runtime())?;
    let floats = Tensor::vector(&[1.5f32, -2.7, 3.0]);

    let ints = worker.cast(&floats, DType::Int32)?;
    assert_eq!(ints.to_vec::<i32>()?, vec![1, -2, 3]);
    let doubles = worker.cast(&ints, DType::Double)?;
    assert_eq!(doubles.to_vec::<f64>()?, vec![1.0, -2.0, 3.0]);
    // A second conversion of the same pair reuses the pipeline.
    let again = worker.cast(&Tensor::vector(&[7.9f32]), DType::Int32)?;
    assert_eq!(again.to_vec::<i32>()?, vec![7]);

    let same = worker.cast(&floats, DType::Float)?;
    assert_eq!(same, floats);
    Ok(())
}

#[test]
fn graph_import_applies_prefix() -> anyhow::Result<()> {
    let runtime = common::runtime();
    let source = Graph::new(runtime.clone())?;
    let c = source.add_operation(
        OpSpec::new("Const")
            .name("c")
            .attr("dtype", DType::Int64)
            .attr("value", Tensor::scalar(3i64)),
    )?;
    source.add_operation(OpSpec::new("Neg").name("n").input(c.output(0)))?;
    let bytes = source.export()?;

    let target = Graph::new(runtime)?;
    target.import(&bytes, "copy")?;
    let neg = target
        .operation_by_name("copy/n")?
        .expect("imported operation");
    assert_eq!(neg.op_type(), "Neg");
    let session = common::session(&target);
    assert_eq!(common::fetch(&session, &[neg.output(0)])[0].scalar_value::<i64>()?, -3);

    // Outputs of another graph are rejected before reaching the runtime.
    let foreign = source.operation_by_name("c")?.expect("source operation");
    let err = target
        .add_operation(OpSpec::new("Identity").name("id").input(foreign.output(0)))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    Ok(())
}

#[test]
fn safetensors_file_round_trip() -> anyhow::Result<()> {
    let mut tensors = HashMap::new();
    tensors.insert("weight".to_string(), Tensor::from_slice(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0])?);
    tensors.insert("step".to_string(), Tensor::scalar(12i64));

    let mut file = tempfile::tempfile()?;
    write_safetensors(&mut file, &tensors, None)?;
    let mut bytes = Vec::new();
    {
        use std::io::{Read, Seek, SeekFrom};
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;
    }

    let mut loader = SafeTensorLoader::new(Cursor::new(bytes))?;
    assert_eq!(loader.names(), &["step".to_string(), "weight".to_string()]);
    let (dtype, shape) = loader.info("weight")?;
    assert_eq!(dtype, DType::Float);
    assert_eq!(shape, tfbind::Shape::new(vec![2, 2]));
    assert_eq!(loader.load_tensor("weight")?, tensors["weight"]);
    assert_eq!(loader.load_tensor("step")?.scalar_value::<i64>()?, 12);
    assert!(loader.load_tensor("missing").is_err());
    Ok(())
}
