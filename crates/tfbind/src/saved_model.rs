//! Loading and writing saved model directories.
//!
//! A saved model directory holds one [`SavedModelDef`] file: tagged meta
//! graphs with their signatures plus the values of every variable.

use crate::defs::{GraphDef, MetaGraphDef, SavedModelDef, SignatureDef, TensorInfo, SAVED_MODEL_FILENAME};
use crate::error::{Error, Result};
use crate::graph::{Graph, Output};
use crate::runtime::{Runtime, RuntimeErrorCode, SessionOptions};
use crate::session::Session;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// A loaded model: a session with restored variables over a fresh graph.
pub struct SavedModel {
    pub session: Session,
    pub graph: Graph,
    pub signatures: BTreeMap<String, SignatureDef>,
}

impl SavedModel {
    /// Loads the meta graph identified by `tags` from `export_dir`.
    /// Tag sets can be listed with [`list_saved_model_details`].
    pub fn load(
        runtime: Arc<dyn Runtime>,
        export_dir: impl AsRef<Path>,
        tags: &[&str],
        options: &SessionOptions,
    ) -> Result<SavedModel> {
        if tags.is_empty() {
            return Err(Error::InvalidArgument(
                "empty tags are not allowed; use list_saved_model_details() to list tags per graph"
                    .to_string(),
            ));
        }
        let export_dir = export_dir.as_ref();
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let loaded = runtime
            .load_saved_model(export_dir, &tags, options)
            .map_err(|mut err| {
                if err.code == RuntimeErrorCode::NotFound {
                    err.message
                        .push_str("; use list_saved_model_details() to inspect available tag-sets");
                }
                Error::runtime(
                    format!("failed to load saved model from {}", export_dir.display()),
                    err,
                )
            })?;
        let graph = Graph::from_raw(Arc::clone(&runtime), loaded.graph);
        let session = Session::from_raw(graph.clone(), loaded.session);
        log::debug!(
            "loaded saved model {} with tags {:?}",
            export_dir.display(),
            tags
        );
        Ok(SavedModel {
            session,
            graph,
            signatures: loaded.meta_graph.signature_defs,
        })
    }

    /// Resolves a tensor of a signature to a graph output.
    pub fn signature_tensor(&self, info: &TensorInfo) -> Result<Output> {
        resolve_tensor(&self.graph, &info.name)
    }
}

fn resolve_tensor(graph: &Graph, name: &str) -> Result<Output> {
    let tensor = crate::defs::TensorRef::parse(name)
        .ok_or_else(|| Error::InvalidArgument(format!("malformed tensor name {name:?}")))?;
    let op = graph
        .operation_by_name(&tensor.node)?
        .ok_or_else(|| Error::InvalidArgument(format!("no operation named {:?}", tensor.node)))?;
    Ok(op.output(tensor.index))
}

/// Tags and signatures of one meta graph.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaGraphDetails {
    pub tags: Vec<String>,
    pub signatures: BTreeMap<String, SignatureDef>,
}

/// Lists the tag sets and signatures stored in `export_dir`.
pub fn list_saved_model_details(export_dir: impl AsRef<Path>) -> Result<Vec<MetaGraphDetails>> {
    let bytes = fs::read(export_dir.as_ref().join(SAVED_MODEL_FILENAME))?;
    let model = SavedModelDef::from_bytes(&bytes)?;
    Ok(model
        .meta_graphs
        .into_iter()
        .map(|meta| MetaGraphDetails {
            tags: meta.tags,
            signatures: meta.signature_defs,
        })
        .collect())
}

/// Builds a signature entry from a graph output.
pub fn tensor_info(output: &Output) -> Result<TensorInfo> {
    let dtype = output.dtype().ok_or_else(|| {
        Error::InvalidArgument(format!("{} has no output type", output.tensor_name()))
    })?;
    Ok(TensorInfo {
        name: output.tensor_name(),
        dtype,
        shape: output.shape(),
    })
}

/// Writes the graph of a session together with its current variable values.
pub struct SavedModelBuilder<'s> {
    session: &'s Session,
    meta_graphs: Vec<(Vec<String>, BTreeMap<String, SignatureDef>)>,
}

impl<'s> SavedModelBuilder<'s> {
    pub fn new(session: &'s Session) -> Self {
        SavedModelBuilder {
            session,
            meta_graphs: Vec::new(),
        }
    }

    /// Adds a meta graph for the session's graph under `tags`.
    pub fn add_meta_graph(
        mut self,
        tags: &[&str],
        signatures: BTreeMap<String, SignatureDef>,
    ) -> Self {
        self.meta_graphs
            .push((tags.iter().map(|t| t.to_string()).collect(), signatures));
        self
    }

    /// Saves into `export_dir`, creating it if needed. Every variable must be
    /// initialized in the session.
    pub fn save(self, export_dir: impl AsRef<Path>) -> Result<()> {
        if self.meta_graphs.is_empty() {
            return Err(Error::InvalidArgument(
                "a saved model needs at least one meta graph".to_string(),
            ));
        }
        let graph = self.session.graph();
        let graph_def = GraphDef::from_bytes(&graph.export()?)?;

        let variables: Vec<Output> = graph
            .operations()?
            .into_iter()
            .filter(|op| op.op_type() == "VariableV2")
            .map(|op| op.output(0))
            .collect();
        let values = if variables.is_empty() {
            Vec::new()
        } else {
            self.session.run(&[], &variables, &[])?
        };
        let variables = variables
            .iter()
            .zip(values)
            .map(|(var, value)| (var.op.name().to_string(), value))
            .collect();

        let model = SavedModelDef {
            meta_graphs: self
                .meta_graphs
                .into_iter()
                .map(|(tags, signature_defs)| MetaGraphDef {
                    tags,
                    graph_def: graph_def.clone(),
                    signature_defs,
                })
                .collect(),
            variables,
        };
        let export_dir = export_dir.as_ref();
        fs::create_dir_all(export_dir)?;
        fs::write(export_dir.join(SAVED_MODEL_FILENAME), model.to_bytes()?)?;
        log::debug!("saved model to {}", export_dir.display());
        Ok(())
    }
}
