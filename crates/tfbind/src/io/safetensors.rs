//! Reader and writer for the safetensors interchange format: an 8-byte
//! little-endian header length, a JSON dictionary of
//! `{name: {dtype, shape, data_offsets}}`, then the raw tensor bytes.

use crate::tensor::{DType, Shape, Tensor};
use anyhow::{anyhow, bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom, Write};

const METADATA_KEY: &str = "__metadata__";
/// Upper bound for the JSON header, guarding against corrupt length prefixes.
const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SafeTensorEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [u64; 2],
}

/// Streams tensors out of a safetensors file.
pub struct SafeTensorLoader<R> {
    reader: R,
    entries: HashMap<String, SafeTensorEntry>,
    metadata: BTreeMap<String, String>,
    /// Tensor names sorted by data offset.
    names: Vec<String>,
    data_start: u64,
}

impl<R: Read + Seek> SafeTensorLoader<R> {
    /// Parses the header; tensor data is read on demand.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut len_bytes = [0u8; 8];
        reader
            .read_exact(&mut len_bytes)
            .context("failed to read safetensors header length")?;
        let header_len = u64::from_le_bytes(len_bytes);
        ensure!(
            header_len <= MAX_HEADER_LEN,
            "safetensors header length {} is implausible",
            header_len
        );
        let mut header = vec![0u8; header_len as usize];
        reader
            .read_exact(&mut header)
            .context("failed to read safetensors header")?;
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&header).context("malformed safetensors header")?;

        let mut entries = HashMap::with_capacity(raw.len());
        let mut metadata = BTreeMap::new();
        for (name, value) in raw {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value).context("malformed __metadata__")?;
                continue;
            }
            let entry: SafeTensorEntry = serde_json::from_value(value)
                .with_context(|| format!("malformed header entry for tensor {name:?}"))?;
            ensure!(
                entry.data_offsets[0] <= entry.data_offsets[1],
                "tensor {:?} has inverted data offsets",
                name
            );
            entries.insert(name, entry);
        }

        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort_by_key(|name| (entries[name].data_offsets[0], name.clone()));
        Ok(SafeTensorLoader {
            reader,
            entries,
            metadata,
            names,
            data_start: 8 + header_len,
        })
    }

    /// Tensor names in the order that reads the file front to back.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn entry(&self, name: &str) -> Result<&SafeTensorEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| anyhow!("safe tensor name {:?} not found", name))
    }

    /// Dtype and shape of a tensor without reading its data.
    pub fn info(&self, name: &str) -> Result<(DType, Shape)> {
        let entry = self.entry(name)?;
        let dtype = DType::from_safetensors_code(&entry.dtype).ok_or_else(|| {
            anyhow!("unknown dtype {:?} for safe tensor {:?}", entry.dtype, name)
        })?;
        Ok((dtype, Shape::from_usize(&entry.shape)))
    }

    pub fn load_tensor(&mut self, name: &str) -> Result<Tensor> {
        let (dtype, _) = self.info(name)?;
        let entry = self.entry(name)?.clone();
        let [begin, end] = entry.data_offsets;
        self.reader
            .seek(SeekFrom::Start(self.data_start + begin))
            .with_context(|| format!("failed to seek to safe tensor {name:?}"))?;
        let mut data = vec![0u8; (end - begin) as usize];
        self.reader
            .read_exact(&mut data)
            .with_context(|| format!("failed to read safe tensor {name:?}"))?;
        Tensor::from_bytes(dtype, entry.shape, data)
            .with_context(|| format!("failed to read safe tensor {name:?}"))
    }
}

/// Writes `tensors` in safetensors format.
///
/// With `names` the tensors are written in that order and unnamed tensors are
/// skipped; otherwise every tensor is written in alphabetical order.
pub fn write_safetensors<W: Write>(
    writer: &mut W,
    tensors: &HashMap<String, Tensor>,
    names: Option<&[&str]>,
) -> Result<()> {
    let names: Vec<&str> = match names {
        Some(names) => names.to_vec(),
        None => {
            let mut all: Vec<&str> = tensors.keys().map(String::as_str).collect();
            all.sort_unstable();
            all
        }
    };

    let mut header = serde_json::Map::new();
    let mut offset = 0u64;
    let mut ordered = Vec::with_capacity(names.len());
    for name in names {
        let Some(tensor) = tensors.get(name) else {
            bail!("tensor {:?} not found for writing as safe tensor", name);
        };
        let len = tensor.data().len() as u64;
        let entry = SafeTensorEntry {
            dtype: tensor.dtype().safetensors_code().to_string(),
            shape: tensor.dims().to_vec(),
            data_offsets: [offset, offset + len],
        };
        header.insert(name.to_string(), serde_json::to_value(entry)?);
        offset += len;
        ordered.push(tensor);
    }

    let mut json = serde_json::to_vec(&header)?;
    let padded = (json.len() + 7) & !7;
    json.resize(padded, b' ');
    writer.write_all(&(padded as u64).to_le_bytes())?;
    writer.write_all(&json)?;
    for tensor in ordered {
        writer.write_all(tensor.data())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::bf16;
    use std::io::Cursor;

    #[test]
    fn writes_in_requested_order() {
        let mut tensors = HashMap::new();
        tensors.insert("bool".to_string(), Tensor::scalar(true));
        tensors.insert(
            "u16".to_string(),
            Tensor::from_slice(&[2, 2], &[123u16, 321, 456, 654]).unwrap(),
        );
        let bf: Vec<bf16> = [321.0f32, 32.1, 3.21].iter().map(|&v| bf16::from_f32(v)).collect();
        tensors.insert("bf16".to_string(), Tensor::vector(&bf));

        let order = ["bool", "u16", "bf16"];
        let mut buf = Vec::new();
        write_safetensors(&mut buf, &tensors, Some(&order)).unwrap();
        let header_len = u64::from_le_bytes(buf[..8].try_into().unwrap());
        assert_eq!(header_len % 8, 0);

        let mut loader = SafeTensorLoader::new(Cursor::new(buf)).unwrap();
        assert_eq!(loader.names(), &["bool", "u16", "bf16"]);
        for name in order {
            let (dtype, shape) = loader.info(name).unwrap();
            assert_eq!(dtype, tensors[name].dtype());
            assert_eq!(shape, tensors[name].shape());
            assert_eq!(&loader.load_tensor(name).unwrap(), &tensors[name]);
        }
    }

    #[test]
    fn reads_handwritten_file_with_metadata() {
        let header = br#"{"__metadata__":{"format":"pt"},"x":{"dtype":"I8","shape":[3,1],"data_offsets":[0,3]}}"#;
        let mut buf = (header.len() as u64).to_le_bytes().to_vec();
        buf.extend_from_slice(header);
        buf.extend_from_slice(&[123, 55, 17]);

        let mut loader = SafeTensorLoader::new(Cursor::new(buf)).unwrap();
        assert_eq!(loader.names(), &["x"]);
        assert_eq!(loader.metadata().get("format").map(String::as_str), Some("pt"));
        let (dtype, shape) = loader.info("x").unwrap();
        assert_eq!(dtype, DType::Int8);
        assert_eq!(shape.to_string(), "[3, 1]");
        let x = loader.load_tensor("x").unwrap();
        assert_eq!(x.to_vec::<i8>().unwrap(), vec![123, 55, 17]);
        assert!(loader.info("y").is_err());
    }

    #[test]
    fn unknown_names_fail_to_write() {
        let tensors = HashMap::new();
        let mut buf = Vec::new();
        assert!(write_safetensors(&mut buf, &tensors, Some(&["missing"])).is_err());
    }
}
