//! Enumerates the scalar element types understood by the runtime boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical dtype identifier shared between host tensors, attributes and wire defs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE-754 float.
    Float,
    /// 64-bit IEEE-754 float.
    Double,
    Int32,
    Uint8,
    Int16,
    Int8,
    Int64,
    Bool,
    /// 16-bit bfloat16.
    BFloat16,
    Uint16,
    /// 16-bit IEEE-754 half precision.
    Half,
    Uint32,
    Uint64,
}

impl DType {
    pub const ALL: [DType; 13] = [
        DType::Float,
        DType::Double,
        DType::Int32,
        DType::Uint8,
        DType::Int16,
        DType::Int8,
        DType::Int64,
        DType::Bool,
        DType::BFloat16,
        DType::Uint16,
        DType::Half,
        DType::Uint32,
        DType::Uint64,
    ];

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::Uint8 => 1,
            DType::Int16 | DType::Uint16 | DType::Half | DType::BFloat16 => 2,
            DType::Float | DType::Int32 | DType::Uint32 => 4,
            DType::Double | DType::Int64 | DType::Uint64 => 8,
        }
    }

    /// Stable numeric tag matching the runtime's enum values.
    pub fn tag(self) -> u32 {
        match self {
            DType::Float => 1,
            DType::Double => 2,
            DType::Int32 => 3,
            DType::Uint8 => 4,
            DType::Int16 => 5,
            DType::Int8 => 6,
            DType::Int64 => 9,
            DType::Bool => 10,
            DType::BFloat16 => 14,
            DType::Uint16 => 17,
            DType::Half => 19,
            DType::Uint32 => 22,
            DType::Uint64 => 23,
        }
    }

    /// Reconstructs a `DType` from its numeric tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        DType::ALL.into_iter().find(|dtype| dtype.tag() == tag)
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DType::Float | DType::Double | DType::Half | DType::BFloat16
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::Uint8
                | DType::Uint16
                | DType::Uint32
                | DType::Uint64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            DType::Uint8 | DType::Uint16 | DType::Uint32 | DType::Uint64
        )
    }

    /// Lower-case name as used by numpy-like tooling (`"float32"`, `"int8"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            DType::Float => "float32",
            DType::Double => "float64",
            DType::Int32 => "int32",
            DType::Uint8 => "uint8",
            DType::Int16 => "int16",
            DType::Int8 => "int8",
            DType::Int64 => "int64",
            DType::Bool => "bool",
            DType::BFloat16 => "bfloat16",
            DType::Uint16 => "uint16",
            DType::Half => "float16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
        }
    }

    /// Parses the names produced by [`DType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        DType::ALL.into_iter().find(|dtype| dtype.name() == name)
    }

    /// Dtype code used in safetensors headers (`"F32"`, `"BF16"`, ...).
    pub fn safetensors_code(self) -> &'static str {
        match self {
            DType::Float => "F32",
            DType::Double => "F64",
            DType::Int32 => "I32",
            DType::Uint8 => "U8",
            DType::Int16 => "I16",
            DType::Int8 => "I8",
            DType::Int64 => "I64",
            DType::Bool => "BOOL",
            DType::BFloat16 => "BF16",
            DType::Uint16 => "U16",
            DType::Half => "F16",
            DType::Uint32 => "U32",
            DType::Uint64 => "U64",
        }
    }

    pub fn from_safetensors_code(code: &str) -> Option<Self> {
        DType::ALL
            .into_iter()
            .find(|dtype| dtype.safetensors_code() == code)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let upper = match self {
            DType::Float => "DT_FLOAT",
            DType::Double => "DT_DOUBLE",
            DType::Int32 => "DT_INT32",
            DType::Uint8 => "DT_UINT8",
            DType::Int16 => "DT_INT16",
            DType::Int8 => "DT_INT8",
            DType::Int64 => "DT_INT64",
            DType::Bool => "DT_BOOL",
            DType::BFloat16 => "DT_BFLOAT16",
            DType::Uint16 => "DT_UINT16",
            DType::Half => "DT_HALF",
            DType::Uint32 => "DT_UINT32",
            DType::Uint64 => "DT_UINT64",
        };
        f.write_str(upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_and_names_are_reversible() {
        for dtype in DType::ALL {
            assert_eq!(DType::from_tag(dtype.tag()), Some(dtype));
            assert_eq!(DType::from_name(dtype.name()), Some(dtype));
            assert_eq!(
                DType::from_safetensors_code(dtype.safetensors_code()),
                Some(dtype)
            );
        }
        assert_eq!(DType::from_tag(7), None);
    }

    #[test]
    fn display_uses_runtime_enum_names() {
        assert_eq!(DType::Int8.to_string(), "DT_INT8");
        assert_eq!(DType::Half.to_string(), "DT_HALF");
    }
}
