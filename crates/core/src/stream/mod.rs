use serde::{Deserialize, Serialize};

use crate::{Result, SignalPipeError};

/// Element type of a stream. Samples are stored in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl SampleType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            SampleType::Char | SampleType::UChar => 1,
            SampleType::Short | SampleType::UShort => 2,
            SampleType::Int | SampleType::UInt | SampleType::Float => 4,
            SampleType::Long | SampleType::ULong | SampleType::Double => 8,
        }
    }

    /// Converts `value` to this type and back, so that thresholds compare the
    /// way they would in the stream's own representation.
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            SampleType::Char => value as i8 as f64,
            SampleType::UChar => value as u8 as f64,
            SampleType::Short => value as i16 as f64,
            SampleType::UShort => value as u16 as f64,
            SampleType::Int => value as i32 as f64,
            SampleType::UInt => value as u32 as f64,
            SampleType::Long => value as i64 as f64,
            SampleType::ULong => value as u64 as f64,
            SampleType::Float => value as f32 as f64,
            SampleType::Double => value,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        macro_rules! read {
            ($ty:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw) as f64
            }};
        }

        match self {
            SampleType::Char => read!(i8),
            SampleType::UChar => read!(u8),
            SampleType::Short => read!(i16),
            SampleType::UShort => read!(u16),
            SampleType::Int => read!(i32),
            SampleType::UInt => read!(u32),
            SampleType::Long => read!(i64),
            SampleType::ULong => read!(u64),
            SampleType::Float => read!(f32),
            SampleType::Double => read!(f64),
        }
    }

    fn encode(self, value: f64, out: &mut [u8]) {
        match self {
            SampleType::Char => out.copy_from_slice(&(value as i8).to_ne_bytes()),
            SampleType::UChar => out.copy_from_slice(&(value as u8).to_ne_bytes()),
            SampleType::Short => out.copy_from_slice(&(value as i16).to_ne_bytes()),
            SampleType::UShort => out.copy_from_slice(&(value as u16).to_ne_bytes()),
            SampleType::Int => out.copy_from_slice(&(value as i32).to_ne_bytes()),
            SampleType::UInt => out.copy_from_slice(&(value as u32).to_ne_bytes()),
            SampleType::Long => out.copy_from_slice(&(value as i64).to_ne_bytes()),
            SampleType::ULong => out.copy_from_slice(&(value as u64).to_ne_bytes()),
            SampleType::Float => out.copy_from_slice(&(value as f32).to_ne_bytes()),
            SampleType::Double => out.copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

/// Layout of a stream independent of how many samples it holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamShape {
    pub dim: usize,
    pub sample_type: SampleType,
    pub sample_rate: f64,
}

impl StreamShape {
    pub fn new(dim: usize, sample_type: SampleType, sample_rate: f64) -> Self {
        Self {
            dim,
            sample_type,
            sample_rate,
        }
    }

    /// Bytes per element.
    pub fn byte(&self) -> usize {
        self.sample_type.size()
    }

    /// Bytes per sample, i.e. one element for every dimension.
    pub fn sample_bytes(&self) -> usize {
        self.dim * self.byte()
    }
}

/// Buffer of `num` samples x `dim` dimensions x `byte`-sized elements at a
/// given sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    shape: StreamShape,
    num: usize,
    data: Vec<u8>,
}

impl Stream {
    /// Creates an empty stream.
    pub fn new(shape: StreamShape) -> Self {
        Self {
            shape,
            num: 0,
            data: Vec::new(),
        }
    }

    /// Creates a stream holding `num` zeroed samples.
    pub fn zeroed(shape: StreamShape, num: usize) -> Self {
        Self {
            shape,
            num,
            data: vec![0; num * shape.sample_bytes()],
        }
    }

    /// Creates a stream from interleaved values, converting them to the
    /// shape's sample type.
    pub fn from_values(shape: StreamShape, values: &[f64]) -> Result<Self> {
        if shape.dim == 0 {
            return Err(SignalPipeError::InvalidInput("stream needs at least one dimension"));
        }
        if values.len() % shape.dim != 0 {
            return Err(SignalPipeError::InvalidInput(
                "value count is not a multiple of the stream dimension",
            ));
        }

        let mut stream = Self::zeroed(shape, values.len() / shape.dim);
        let byte = shape.byte();
        for (chunk, value) in stream.data.chunks_exact_mut(byte).zip(values) {
            shape.sample_type.encode(*value, chunk);
        }
        Ok(stream)
    }

    /// Convenience constructor for the common interleaved `f32` case.
    pub fn from_f32(dim: usize, sample_rate: f64, values: &[f32]) -> Result<Self> {
        let values: Vec<f64> = values.iter().map(|v| *v as f64).collect();
        Self::from_values(
            StreamShape::new(dim, SampleType::Float, sample_rate),
            &values,
        )
    }

    pub fn shape(&self) -> StreamShape {
        self.shape
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn dim(&self) -> usize {
        self.shape.dim
    }

    pub fn byte(&self) -> usize {
        self.shape.byte()
    }

    pub fn sample_type(&self) -> SampleType {
        self.shape.sample_type
    }

    pub fn sample_rate(&self) -> f64 {
        self.shape.sample_rate
    }

    /// Duration covered by the stream in seconds.
    pub fn duration(&self) -> f64 {
        if self.shape.sample_rate > 0.0 {
            self.num as f64 / self.shape.sample_rate
        } else {
            0.0
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Resizes to `num` samples. New samples are zero.
    pub fn resize(&mut self, num: usize) {
        self.num = num;
        self.data.resize(num * self.shape.sample_bytes(), 0);
    }

    /// Sets every element to zero without changing the sample count.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    /// Makes `self` an exact copy of `other`, reusing the allocation.
    pub fn copy_from(&mut self, other: &Stream) {
        self.shape = other.shape;
        self.num = other.num;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    /// Raw bytes of sample `index` (all dimensions).
    pub fn sample(&self, index: usize) -> &[u8] {
        let size = self.shape.sample_bytes();
        &self.data[index * size..(index + 1) * size]
    }

    /// Element `dim` of sample `index` as `f64`.
    pub fn value(&self, index: usize, dim: usize) -> f64 {
        let byte = self.shape.byte();
        let offset = (index * self.shape.dim + dim) * byte;
        self.shape
            .sample_type
            .decode(&self.data[offset..offset + byte])
    }

    /// Overwrites element `dim` of sample `index`.
    pub fn set_value(&mut self, index: usize, dim: usize, value: f64) {
        let byte = self.shape.byte();
        let offset = (index * self.shape.dim + dim) * byte;
        self.shape
            .sample_type
            .encode(value, &mut self.data[offset..offset + byte]);
    }

    /// All elements as interleaved `f64` values.
    pub fn to_values(&self) -> Vec<f64> {
        let byte = self.shape.byte();
        self.data
            .chunks_exact(byte)
            .map(|chunk| self.shape.sample_type.decode(chunk))
            .collect()
    }
}
