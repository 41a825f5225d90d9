//! Host tensor dtype conversion through the runtime's `Cast` kernel.

use crate::error::Result;
use crate::graph::{Graph, OpSpec, Output};
use crate::runtime::{Runtime, SessionOptions};
use crate::session::Session;
use crate::tensor::{DType, Tensor};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns a private graph and session and grows one cast pipeline per
/// `(from, to)` dtype pair on first use.
pub struct CastWorker {
    graph: Graph,
    session: Option<Session>,
    pipelines: HashMap<(DType, DType), (Output, Output)>,
}

impl CastWorker {
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<Self> {
        Ok(CastWorker {
            graph: Graph::new(runtime)?,
            session: None,
            pipelines: HashMap::new(),
        })
    }

    /// Converts `tensor` to `dtype`; returns a copy when it already has that dtype.
    pub fn cast(&mut self, tensor: &Tensor, dtype: DType) -> Result<Tensor> {
        if tensor.dtype() == dtype {
            return Ok(tensor.clone());
        }
        let key = (tensor.dtype(), dtype);
        let (input, output) = match self.pipelines.get(&key) {
            Some(pipeline) => pipeline.clone(),
            None => {
                let pipeline = self.add_pipeline(key)?;
                self.pipelines.insert(key, pipeline.clone());
                pipeline
            }
        };
        let session = match &mut self.session {
            Some(session) => session,
            slot => slot.insert(Session::new(&self.graph, &SessionOptions::default())?),
        };
        let mut fetched = session.run(&[(input, tensor.clone())], &[output], &[])?;
        Ok(fetched.remove(0))
    }

    fn add_pipeline(&self, (from, to): (DType, DType)) -> Result<(Output, Output)> {
        let input_name = format!("castInp_{}_{}", from.tag(), to.tag());
        let input = self.graph.add_operation(
            OpSpec::new("Placeholder")
                .name(&input_name)
                .attr("dtype", from),
        )?;
        let output_name = format!("castOut_{}_{}", from.tag(), to.tag());
        let output = self.graph.add_operation(
            OpSpec::new("Cast")
                .name(&output_name)
                .input(input.output(0))
                .attr("DstT", to),
        )?;
        log::debug!("cast pipeline {} -> {}", from.name(), to.name());
        Ok((input.output(0), output.output(0)))
    }
}
