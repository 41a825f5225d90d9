#![allow(dead_code)]

use std::sync::Arc;
use tfbind::{Output, Runtime, Session, SessionOptions, Tensor};
use tfbind_runtime_ref::RefRuntime;

pub fn runtime() -> Arc<dyn Runtime> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(RefRuntime::new())
}

pub fn session(graph: &tfbind::Graph) -> Session {
    Session::new(graph, &SessionOptions::default()).expect("failed to create session")
}

/// Runs `outputs` without feeds and returns the tensors.
pub fn fetch(session: &Session, outputs: &[Output]) -> Vec<Tensor> {
    session.run(&[], outputs, &[]).expect("session run failed")
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "element {i}: {a} differs from {e} by more than {tol}"
        );
    }
}
