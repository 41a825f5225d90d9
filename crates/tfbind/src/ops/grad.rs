use super::Scope;
use crate::error::Result;
use crate::graph::Output;

/// Symbolic gradients of `sum(ys)` with respect to each of `xs`, computed by
/// the runtime under a fresh `gradients` namespace.
pub fn gradients(scope: &Scope, ys: &[Output], xs: &[Output]) -> Result<Vec<Output>> {
    scope.check_usable()?;
    let sub = scope.sub_scope("gradients");
    scope
        .graph()
        .add_gradients(sub.namespace(), ys, xs, None)
        .map_err(|err| scope.fail(err))
}
