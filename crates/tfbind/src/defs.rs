//! Serialized definitions exchanged with the runtime: nodes, functions,
//! graphs and saved models.
//!
//! All containers use ordered maps so encoding is deterministic and an
//! export/import/export cycle reproduces identical bytes.

use crate::tensor::{DType, Shape, Tensor};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// File name of the serialized [`SavedModelDef`] inside a saved model directory.
pub const SAVED_MODEL_FILENAME: &str = "saved_model.bin";

/// Function attribute naming the gradient function of a function.
pub const GRADIENT_ATTR: &str = "_gradient";

#[derive(Debug, Error)]
pub enum DefSerdeError {
    #[error("empty {0} buffer")]
    Empty(&'static str),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DefSerdeError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, DefSerdeError> {
    if bytes.is_empty() {
        return Err(DefSerdeError::Empty(what));
    }
    Ok(bincode::deserialize(bytes)?)
}

/// Typed operation attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f32),
    Bool(bool),
    Type(DType),
    Shape(Shape),
    Tensor(Tensor),
    /// Reference to a function in the graph's library.
    Func(String),
    ListInt(Vec<i64>),
    ListFloat(Vec<f32>),
    ListType(Vec<DType>),
    ListShape(Vec<Shape>),
    ListString(Vec<String>),
}

impl AttrValue {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DefSerdeError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DefSerdeError> {
        decode("attribute", bytes)
    }

    pub fn as_type(&self) -> Option<DType> {
        match self {
            AttrValue::Type(dtype) => Some(*dtype),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&Shape> {
        match self {
            AttrValue::Shape(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(v) | AttrValue::Func(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            AttrValue::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_type_list(&self) -> Option<&[DType]> {
        match self {
            AttrValue::ListType(v) => Some(v),
            _ => None,
        }
    }
}

impl From<DType> for AttrValue {
    fn from(value: DType) -> Self {
        AttrValue::Type(value)
    }
}

impl From<Shape> for AttrValue {
    fn from(value: Shape) -> Self {
        AttrValue::Shape(value)
    }
}

impl From<Tensor> for AttrValue {
    fn from(value: Tensor) -> Self {
        AttrValue::Tensor(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f32> for AttrValue {
    fn from(value: f32) -> Self {
        AttrValue::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<Vec<DType>> for AttrValue {
    fn from(value: Vec<DType>) -> Self {
        AttrValue::ListType(value)
    }
}

/// Reference to one output of a named node (`"node:index"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorRef {
    pub node: String,
    pub index: usize,
}

impl TensorRef {
    pub fn new(node: impl Into<String>, index: usize) -> Self {
        TensorRef {
            node: node.into(),
            index,
        }
    }

    /// Parses `"node:index"`; a bare node name refers to output 0.
    pub fn parse(text: &str) -> Option<Self> {
        match text.rsplit_once(':') {
            Some((node, index)) => Some(TensorRef::new(node, index.parse().ok()?)),
            None if !text.is_empty() => Some(TensorRef::new(text, 0)),
            None => None,
        }
    }
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// A node input is either one tensor or a list of tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputDef {
    Single(TensorRef),
    List(Vec<TensorRef>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    pub inputs: Vec<InputDef>,
    pub control_inputs: Vec<String>,
    pub device: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Named, typed argument of an [`OpDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDef {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
}

/// Signature of a function: name, typed arguments and documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDef {
    pub name: String,
    pub input_args: Vec<ArgDef>,
    pub output_args: Vec<ArgDef>,
    pub summary: String,
    pub description: String,
}

/// Transmissible form of a function.
///
/// Body nodes reference function inputs by argument name (`"x:0"`), and `ret`
/// maps every output argument to the body tensor it returns. Attributes are
/// opaque serialized blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub signature: OpDef,
    pub attrs: BTreeMap<String, Vec<u8>>,
    pub nodes: Vec<NodeDef>,
    pub ret: BTreeMap<String, TensorRef>,
}

impl FunctionDef {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DefSerdeError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DefSerdeError> {
        decode("function definition", bytes)
    }
}

/// Library entry of a graph: a function and the name of its gradient function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub def: FunctionDef,
    pub gradient: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: Vec<NodeDef>,
    pub library: Vec<FunctionEntry>,
}

impl GraphDef {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DefSerdeError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DefSerdeError> {
        decode("graph definition", bytes)
    }
}

/// Tensor exposed by a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Graph tensor in `"node:index"` form.
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignatureDef {
    pub method_name: String,
    pub inputs: BTreeMap<String, TensorInfo>,
    pub outputs: BTreeMap<String, TensorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaGraphDef {
    pub tags: Vec<String>,
    pub graph_def: GraphDef,
    pub signature_defs: BTreeMap<String, SignatureDef>,
}

/// Contents of a saved model directory: tagged graphs plus variable values
/// keyed by variable node name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedModelDef {
    pub meta_graphs: Vec<MetaGraphDef>,
    pub variables: BTreeMap<String, Tensor>,
}

impl SavedModelDef {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DefSerdeError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DefSerdeError> {
        decode("saved model", bytes)
    }

    /// Finds the meta graph carrying exactly the given set of tags.
    pub fn meta_graph(&self, tags: &[String]) -> Option<&MetaGraphDef> {
        self.meta_graphs.iter().find(|meta| {
            meta.tags.len() == tags.len() && tags.iter().all(|t| meta.tags.contains(t))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_ref_parsing() {
        assert_eq!(TensorRef::parse("a/b:2"), Some(TensorRef::new("a/b", 2)));
        assert_eq!(TensorRef::parse("x"), Some(TensorRef::new("x", 0)));
        assert_eq!(TensorRef::parse("x:y"), None);
        assert_eq!(TensorRef::new("n", 1).to_string(), "n:1");
    }

    #[test]
    fn empty_buffers_are_rejected() {
        assert!(matches!(
            FunctionDef::from_bytes(&[]),
            Err(DefSerdeError::Empty(_))
        ));
        assert!(AttrValue::from_bytes(&[]).is_err());
    }

    #[test]
    fn attr_values_decode_to_the_same_variant() {
        let value = AttrValue::ListType(vec![DType::Float, DType::Int64]);
        let bytes = value.to_bytes().unwrap();
        assert_eq!(AttrValue::from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn meta_graph_lookup_ignores_tag_order() {
        let meta = MetaGraphDef {
            tags: vec!["serve".into(), "gpu".into()],
            graph_def: GraphDef::default(),
            signature_defs: BTreeMap::new(),
        };
        let model = SavedModelDef {
            meta_graphs: vec![meta],
            variables: BTreeMap::new(),
        };
        assert!(model
            .meta_graph(&["gpu".to_string(), "serve".to_string()])
            .is_some());
        assert!(model.meta_graph(&["serve".to_string()]).is_none());
    }
}
