//! Sessions execute a graph on the runtime.

use crate::error::{Result, RuntimeResultExt};
use crate::graph::{Graph, Operation, Output};
use crate::runtime::{SessionId, SessionOptions};
use crate::tensor::Tensor;
use std::fmt;

/// Runtime session over one graph. Closed on drop if not closed explicitly.
pub struct Session {
    graph: Graph,
    id: Option<SessionId>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl Session {
    pub fn new(graph: &Graph, options: &SessionOptions) -> Result<Self> {
        let id = graph
            .runtime()
            .new_session(graph.id(), options)
            .context(|| "failed to create session".to_string())?;
        Ok(Session {
            graph: graph.clone(),
            id: Some(id),
        })
    }

    pub(crate) fn from_raw(graph: Graph, id: SessionId) -> Self {
        Session {
            graph,
            id: Some(id),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn live_id(&self) -> Result<SessionId> {
        self.id.ok_or_else(|| {
            crate::error::Error::InvalidArgument("session is already closed".to_string())
        })
    }

    /// Feeds `feeds`, evaluates `fetches` and runs `targets` for their side
    /// effects. Returns one tensor per fetch, in order.
    pub fn run(
        &self,
        feeds: &[(Output, Tensor)],
        fetches: &[Output],
        targets: &[Operation],
    ) -> Result<Vec<Tensor>> {
        let id = self.live_id()?;
        let feeds = feeds
            .iter()
            .map(|(output, tensor)| Ok((output.to_ref(&self.graph)?, tensor.clone())))
            .collect::<Result<Vec<_>>>()?;
        let fetch_refs = self.graph.output_refs(fetches)?;
        let target_ids = targets.iter().map(Operation::id).collect::<Vec<_>>();
        log::debug!(
            "session run: {} feeds, {} fetches, {} targets",
            feeds.len(),
            fetch_refs.len(),
            target_ids.len()
        );
        self.graph
            .runtime()
            .session_run(id, &feeds, &fetch_refs, &target_ids)
            .context(|| "session run failed".to_string())
    }

    /// Closes the session. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            self.graph
                .runtime()
                .close_session(id)
                .context(|| "failed to close session".to_string())?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("{err}");
        }
    }
}
