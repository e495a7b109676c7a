/// Dtype-tagged decoding of raw little-endian host buffers.
use crate::error::{AttributeError, AttributeResult};
use half::f16;
use std::fmt;
use std::str::FromStr;

/// Element type declared alongside a binary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Uint8,
    Uint16,
    Uint32,
    Float32,
    /// IEEE-754 half precision, widened to f32 on decode.
    Float16,
}

impl DType {
    /// Size of one encoded element in bytes.
    pub fn width(self) -> usize {
        match self {
            DType::Uint8 => 1,
            DType::Uint16 | DType::Float16 => 2,
            DType::Uint32 | DType::Float32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float16)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Float32 => "float32",
            DType::Float16 => "float16",
        }
    }
}

impl FromStr for DType {
    type Err = AttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uint8" | "u8" => Ok(DType::Uint8),
            "uint16" | "u16" => Ok(DType::Uint16),
            "uint32" | "u32" => Ok(DType::Uint32),
            "float32" | "f32" => Ok(DType::Float32),
            "float16" | "f16" => Ok(DType::Float16),
            _ => Err(AttributeError::UnsupportedDType(s.to_string())),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded typed view over a host buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
}

impl TypedBuffer {
    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::U8(v) => v.len(),
            TypedBuffer::U16(v) => v.len(),
            TypedBuffer::U32(v) => v.len(),
            TypedBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode `bytes` as a packed little-endian array of `dtype` elements.
/// Float16 input is widened to f32, keeping subnormals, infinities and NaN.
pub fn decode(bytes: &[u8], dtype: DType) -> AttributeResult<TypedBuffer> {
    let width = dtype.width();
    if bytes.len() % width != 0 {
        return Err(AttributeError::MisalignedBuffer {
            len: bytes.len(),
            width,
        });
    }

    let buffer = match dtype {
        DType::Uint8 => TypedBuffer::U8(bytes.to_vec()),
        DType::Uint16 => TypedBuffer::U16(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        DType::Uint32 => TypedBuffer::U32(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::Float32 => TypedBuffer::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::Float16 => TypedBuffer::F32(
            bytes
                .chunks_exact(2)
                .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
                .collect(),
        ),
    };

    Ok(buffer)
}

/// Parse the declared dtype string and decode in one step.
pub fn decode_declared(bytes: &[u8], dtype: &str) -> AttributeResult<TypedBuffer> {
    decode(bytes, dtype.parse()?)
}
