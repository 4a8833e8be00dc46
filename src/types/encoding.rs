//! Binary encoding and decoding traits for fixed-layout records.
//!
//! Used for the executable image header. Every multi-byte integer is written
//! little-endian, matching the byte order of the emulated address space, so an
//! image header read with [`Decode`] and a `u64` read by the processor agree
//! bit for bit.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - Arrays `[T; N]`: elements back to back, no length prefix
//!
//! There are no variable-length types here on purpose: a record's encoded size
//! is known statically, which is what lets the loader validate the total file
//! size before trusting any header field.

use vproc_derive::Error;

/// Sink for writing encoded bytes.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counts encoded bytes without storing them.
#[derive(Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Types that can be serialized to the binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Returns the encoded size in bytes.
    fn encoded_len(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }

    /// Serializes into a new buffer with exact capacity.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before the record was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Bytes remained after the record was decoded.
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// Types that can be deserialized from the binary format.
pub trait Decode: Sized {
    /// Decodes a value from the front of `input`, advancing it past the
    /// consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span all of `data`.
    fn from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::TrailingBytes(input.len()));
        }
        Ok(value)
    }
}

/// Splits `n` bytes off the front of `input`.
pub fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(take(input, 1)?[0])
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = take(input, std::mem::size_of::<$t>())?;
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    Ok(<$t>::from_le_bytes(raw))
                }
            }
        )*
    };
}

impl_int!(u64);

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode + Copy + Default, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut array = [T::default(); N];
        for slot in array.iter_mut() {
            *slot = T::decode(input)?;
        }
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        assert!(counter.is_empty());
        counter.write(&[1, 2, 3]);
        counter.write(&[4, 5]);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn to_bytes_has_exact_capacity() {
        let bytes = [7u64, 8, 9].to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(
            0x0102_0304_0506_0708u64.to_bytes(),
            vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(u64::MAX.to_bytes(), vec![0xFF; 8]);
    }

    #[test]
    fn decode_advances_input() {
        let data = [0x34, 0x12, 0, 0, 0, 0, 0, 0, 0xAA];
        let mut input = &data[..];
        assert_eq!(u64::decode(&mut input).unwrap(), 0x1234);
        assert_eq!(input, &[0xAA]);
        assert_eq!(u64::decode(&mut input), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn decode_truncated_input() {
        assert_eq!(u64::from_slice(&[1, 2, 3]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn from_slice_rejects_trailing_bytes() {
        assert_eq!(u64::from_slice(&[1; 9]), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn byte_array_decodes_in_order() {
        let arr = <[u8; 4]>::from_slice(b"ABCD").unwrap();
        assert_eq!(&arr, b"ABCD");
    }
}
