//! File formats for exchanging tensors.

pub mod safetensors;
