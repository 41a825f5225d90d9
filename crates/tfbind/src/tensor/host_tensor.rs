//! Host-resident tensors exchanged with sessions, attributes and file codecs.

use super::{dtype::DType, shape::Shape};
use anyhow::{bail, ensure, Result};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Scalar types that can be stored in a [`Tensor`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decodes one element; `bytes` holds exactly `DTYPE.size_in_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_element!(f32, DType::Float);
impl_element!(f64, DType::Double);
impl_element!(i8, DType::Int8);
impl_element!(i16, DType::Int16);
impl_element!(i32, DType::Int32);
impl_element!(i64, DType::Int64);
impl_element!(u8, DType::Uint8);
impl_element!(u16, DType::Uint16);
impl_element!(u32, DType::Uint32);
impl_element!(u64, DType::Uint64);
impl_element!(f16, DType::Half);
impl_element!(bf16, DType::BFloat16);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Dense host tensor with a fully known shape and little-endian payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    dtype: DType,
    dims: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Wraps raw little-endian bytes, validating the length against the shape.
    pub fn from_bytes(dtype: DType, dims: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let expected = dims.iter().product::<usize>() * dtype.size_in_bytes();
        ensure!(
            data.len() == expected,
            "tensor payload of {} bytes does not match {} {:?} ({} bytes)",
            data.len(),
            dtype.name(),
            dims,
            expected
        );
        Ok(Tensor { dtype, dims, data })
    }

    pub fn from_slice<T: Element>(dims: &[usize], values: &[T]) -> Result<Self> {
        let count: usize = dims.iter().product();
        if count != values.len() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                values.len(),
                dims
            );
        }
        let mut data = Vec::with_capacity(count * T::DTYPE.size_in_bytes());
        for value in values {
            value.write_le(&mut data);
        }
        Ok(Tensor {
            dtype: T::DTYPE,
            dims: dims.to_vec(),
            data,
        })
    }

    pub fn scalar<T: Element>(value: T) -> Self {
        let mut data = Vec::with_capacity(T::DTYPE.size_in_bytes());
        value.write_le(&mut data);
        Tensor {
            dtype: T::DTYPE,
            dims: Vec::new(),
            data,
        }
    }

    pub fn vector<T: Element>(values: &[T]) -> Self {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
        for value in values {
            value.write_le(&mut data);
        }
        Tensor {
            dtype: T::DTYPE,
            dims: vec![values.len()],
            data,
        }
    }

    /// Zero-filled tensor; every dtype encodes zero as all-zero bytes.
    pub fn zeros(dtype: DType, dims: &[usize]) -> Self {
        let count: usize = dims.iter().product();
        Tensor {
            dtype,
            dims: dims.to_vec(),
            data: vec![0; count * dtype.size_in_bytes()],
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn shape(&self) -> Shape {
        Shape::from_usize(&self.dims)
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns a tensor sharing the payload but carrying new dimensions.
    pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
        ensure!(
            dims.iter().product::<usize>() == self.num_elements(),
            "cannot reshape {:?} into {:?}",
            self.dims,
            dims
        );
        Ok(Tensor {
            dtype: self.dtype,
            dims: dims.to_vec(),
            data: self.data.clone(),
        })
    }

    /// Decodes every element as `T`, failing on a dtype mismatch.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        ensure!(
            self.dtype == T::DTYPE,
            "tensor holds {} values, requested {}",
            self.dtype.name(),
            T::DTYPE.name()
        );
        let width = self.dtype.size_in_bytes();
        Ok(self.data.chunks_exact(width).map(T::read_le).collect())
    }

    /// Reads the single value of a rank-0 or one-element tensor.
    pub fn scalar_value<T: Element>(&self) -> Result<T> {
        ensure!(
            self.num_elements() == 1,
            "expected a single element, tensor has shape {:?}",
            self.dims
        );
        let values = self.to_vec::<T>()?;
        Ok(values[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_survive_byte_encoding() {
        let t = Tensor::from_slice(&[2, 2], &[1.5f32, -2.0, 3.25, 0.0]).unwrap();
        assert_eq!(t.dtype(), DType::Float);
        assert_eq!(t.data().len(), 16);
        assert_eq!(t.to_vec::<f32>().unwrap(), vec![1.5, -2.0, 3.25, 0.0]);
        assert!(t.to_vec::<i32>().is_err());
    }

    #[test]
    fn half_precision_elements() {
        let values = [f16::from_f32(0.5), f16::from_f32(-4.0)];
        let t = Tensor::vector(&values);
        assert_eq!(t.dtype(), DType::Half);
        assert_eq!(t.to_vec::<f16>().unwrap(), values.to_vec());
        let b = Tensor::scalar(bf16::from_f32(2.0));
        assert_eq!(b.scalar_value::<bf16>().unwrap().to_f32(), 2.0);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(Tensor::from_slice(&[3], &[1i64, 2]).is_err());
        assert!(Tensor::from_bytes(DType::Int32, vec![2], vec![0; 7]).is_err());
        let t = Tensor::vector(&[true, false, true]);
        assert!(t.reshape(&[3, 1]).is_ok());
        assert!(t.reshape(&[2]).is_err());
    }
}
