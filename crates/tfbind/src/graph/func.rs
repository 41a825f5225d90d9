use crate::defs::{AttrValue, FunctionDef, OpDef, GRADIENT_ATTR};
use crate::error::{Result, RuntimeResultExt};
use crate::runtime::{FuncId, Runtime};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Handle to a runtime function: a captured subgraph that can be registered
/// into graphs and invoked there as an operation whose type is the function
/// name.
///
/// Dropping (or [`Func::delete`]) releases the handle; copies already
/// registered into graphs stay valid.
pub struct Func {
    runtime: Arc<dyn Runtime>,
    id: FuncId,
    name: String,
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Func {
    fn drop(&mut self) {
        self.runtime.delete_function(self.id);
    }
}

impl Func {
    pub(crate) fn from_raw(runtime: Arc<dyn Runtime>, id: FuncId) -> Result<Self> {
        match runtime.function_name(id) {
            Ok(name) => Ok(Func { runtime, id, name }),
            Err(err) => {
                runtime.delete_function(id);
                Err(crate::error::Error::runtime("failed to read function name", err))
            }
        }
    }

    /// Recreates a function from the bytes produced by [`Func::to_bytes`].
    pub fn import(runtime: Arc<dyn Runtime>, bytes: &[u8]) -> Result<Self> {
        let id = runtime
            .function_from_bytes(bytes)
            .context(|| "failed to import function".to_string())?;
        let func = Func::from_raw(runtime, id)?;
        log::debug!("imported function {}", func.name);
        Ok(func)
    }

    pub(crate) fn id(&self) -> FuncId {
        self.id
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Final function name, including any hash suffix added at capture.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Releases the handle.
    pub fn delete(self) {}

    /// Serialized `FunctionDef`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.runtime
            .function_to_bytes(self.id)
            .context(|| format!("failed to export function {:?}", self.name))
    }

    /// Writes the serialized form and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Parsed definition, obtained by exporting and decoding.
    pub fn definition(&self) -> Result<FunctionDef> {
        Ok(FunctionDef::from_bytes(&self.to_bytes()?)?)
    }

    /// Name, typed arguments and documentation of the function.
    pub fn signature(&self) -> Result<OpDef> {
        Ok(self.definition()?.signature)
    }

    /// Stores an opaque serialized attribute. An empty value is still sent
    /// to the runtime.
    pub fn set_attr(&self, name: &str, value: &[u8]) -> Result<()> {
        self.runtime
            .function_set_attr(self.id, name, value)
            .context(|| format!("failed to set attribute {name:?} on {:?}", self.name))
    }

    /// Reads an attribute; a zero-length value reads as `None`.
    pub fn attr(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .runtime
            .function_get_attr(self.id, name)
            .context(|| format!("failed to get attribute {name:?} of {:?}", self.name))?;
        Ok((!value.is_empty()).then_some(value))
    }

    pub fn set_attr_value(&self, name: &str, value: &AttrValue) -> Result<()> {
        self.set_attr(name, &value.to_bytes()?)
    }

    pub fn attr_value(&self, name: &str) -> Result<Option<AttrValue>> {
        match self.attr(name)? {
            Some(bytes) => Ok(Some(AttrValue::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Associates a gradient function by name.
    pub fn set_gradient(&self, gradient: &Func) -> Result<()> {
        self.set_attr_value(GRADIENT_ATTR, &AttrValue::Func(gradient.name().to_string()))
    }
}
