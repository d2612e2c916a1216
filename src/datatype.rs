//! Describing fixed-size data
//!
//! A transfer of fixed-layout data moves a whole number of elements whose wire size is known to
//! both ends in advance. The `Equivalence` trait ties a Rust type to such a wire layout: a fixed
//! number of bytes and a checked conversion in each direction. Implementations are provided for
//! the primitive types, `bool`, `char`, arrays and tuples of equivalent types, and (with the
//! `complex` feature) complex numbers. User structs can derive it with the `derive` feature.
//!
//! A `Buffer` is a contiguous run of equivalent elements that can be sent, a `BufferMut` one that
//! can be received into. Both are implemented for single values, slices and vectors.
//!
//! Values whose size is not known up front go through the serialized paths of
//! [`point_to_point`](../point_to_point/index.html) instead.

use std::mem;

use conv::ConvUtil;

use crate::error::{Error, ErrorKind, Result};
use crate::Count;

/// Datatype traits
pub mod traits {
    pub use super::{Buffer, BufferMut, Equivalence};
}

/// A type with a fixed-size wire representation.
///
/// `encode` is handed a slice of at least `SIZE` bytes and writes the first `SIZE` of them.
/// `decode` reads the first `SIZE` bytes of its argument and fails if they do not form a valid
/// value.
///
/// # Examples
///
/// See `demos/struct.rs`
pub trait Equivalence: Sized {
    /// Number of bytes one value occupies on the wire.
    const SIZE: usize;

    /// Write the wire representation of `self` into `out`.
    fn encode(&self, out: &mut [u8]);

    /// Read a value from its wire representation.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

macro_rules! equivalent_primitive {
    ($($t:ty),*) => {
        $(
        impl Equivalence for $t {
            const SIZE: usize = mem::size_of::<$t>();

            fn encode(&self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Result<Self> {
                let mut raw = [0u8; mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                Ok(<$t>::from_le_bytes(raw))
            }
        }
        )*
    }
}

equivalent_primitive!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

impl Equivalence for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            x => Err(Error::InvalidBool(x)),
        }
    }
}

impl Equivalence for char {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut [u8]) {
        u32::from(*self).encode(out);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = u32::decode(bytes)?;
        char::from_u32(raw).ok_or(Error::InvalidChar(raw))
    }
}

impl Equivalence for () {
    const SIZE: usize = 0;

    fn encode(&self, _out: &mut [u8]) {}

    fn decode(_bytes: &[u8]) -> Result<Self> {
        Ok(())
    }
}

impl<T: Equivalence, const N: usize> Equivalence for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn encode(&self, out: &mut [u8]) {
        for (i, item) in self.iter().enumerate() {
            item.encode(&mut out[i * T::SIZE..]);
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let items = (0..N)
            .map(|i| T::decode(&bytes[i * T::SIZE..]))
            .collect::<Result<Vec<T>>>()?;
        items.try_into().map_err(|_| Error::Layout {
            len: bytes.len(),
            size: Self::SIZE,
        })
    }
}

macro_rules! equivalent_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Equivalence),+> Equivalence for ($($name,)+) {
            const SIZE: usize = 0 $(+ $name::SIZE)+;

            #[allow(unused_assignments)]
            fn encode(&self, out: &mut [u8]) {
                let mut offset = 0;
                $(
                self.$idx.encode(&mut out[offset..]);
                offset += $name::SIZE;
                )+
            }

            #[allow(unused_assignments)]
            fn decode(bytes: &[u8]) -> Result<Self> {
                let mut offset = 0;
                Ok(($(
                    {
                        let value = $name::decode(&bytes[offset..])?;
                        offset += $name::SIZE;
                        value
                    },
                )+))
            }
        }
    }
}

equivalent_tuple!(A: 0);
equivalent_tuple!(A: 0, B: 1);
equivalent_tuple!(A: 0, B: 1, C: 2);
equivalent_tuple!(A: 0, B: 1, C: 2, D: 3);

#[cfg(feature = "complex")]
impl<T: Equivalence> Equivalence for num_complex::Complex<T> {
    const SIZE: usize = 2 * T::SIZE;

    fn encode(&self, out: &mut [u8]) {
        self.re.encode(out);
        self.im.encode(&mut out[T::SIZE..]);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(num_complex::Complex::new(
            T::decode(bytes)?,
            T::decode(&bytes[T::SIZE..])?,
        ))
    }
}

/// Convert an element count to the wire count type.
pub(crate) fn count_of(n: usize) -> Result<Count> {
    n.value_as::<Count>()
        .map_err(|_| Error::transport("count", ErrorKind::Count))
}

/// Number of `T` elements contained in a message of `len` bytes.
pub(crate) fn elements_in<T: Equivalence>(len: usize) -> Result<usize> {
    match T::SIZE {
        0 if len == 0 => Ok(0),
        size if size > 0 && len % size == 0 => Ok(len / size),
        size => Err(Error::Layout { len, size }),
    }
}

/// Encode a run of equivalent elements back to back.
pub fn encode_elements<T: Equivalence>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0; values.len() * T::SIZE];
    for (i, value) in values.iter().enumerate() {
        value.encode(&mut out[i * T::SIZE..]);
    }
    out
}

/// Decode a message holding any number of equivalent elements.
pub fn decode_elements<T: Equivalence>(bytes: &[u8]) -> Result<Vec<T>> {
    let count = elements_in::<T>(bytes.len())?;
    (0..count)
        .map(|i| T::decode(&bytes[i * T::SIZE..]))
        .collect()
}

/// A contiguous run of equivalent elements that can be sent.
pub trait Buffer {
    /// Element type
    type Item: Equivalence;

    /// Number of elements in the buffer
    fn count(&self) -> usize;

    /// Wire representation of all elements
    fn to_bytes(&self) -> Vec<u8>;
}

/// A contiguous run of equivalent elements that can be received into.
pub trait BufferMut: Buffer {
    /// Number of elements the buffer can take
    fn capacity(&self) -> usize {
        self.count()
    }

    /// Overwrite the leading elements with the contents of a message.
    ///
    /// Returns the number of elements written. Fails if the message is not a whole number of
    /// elements or holds more than `capacity()` of them; nothing is written in that case.
    fn decode_from(&mut self, bytes: &[u8]) -> Result<usize>;
}

impl<T: Equivalence> Buffer for T {
    type Item = T;

    fn count(&self) -> usize {
        1
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; T::SIZE];
        self.encode(&mut out);
        out
    }
}

impl<T: Equivalence> BufferMut for T {
    fn decode_from(&mut self, bytes: &[u8]) -> Result<usize> {
        match elements_in::<T>(bytes.len())? {
            0 => Ok(0),
            1 => {
                *self = T::decode(bytes)?;
                Ok(1)
            }
            received => Err(Error::Overflow {
                routine: "receive_into",
                received,
                capacity: 1,
            }),
        }
    }
}

impl<T: Equivalence> Buffer for [T] {
    type Item = T;

    fn count(&self) -> usize {
        self.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        encode_elements(self)
    }
}

impl<T: Equivalence> BufferMut for [T] {
    fn decode_from(&mut self, bytes: &[u8]) -> Result<usize> {
        let received = elements_in::<T>(bytes.len())?;
        if received > self.len() {
            return Err(Error::Overflow {
                routine: "receive_into",
                received,
                capacity: self.len(),
            });
        }
        let values = decode_elements::<T>(bytes)?;
        for (slot, value) in self.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(received)
    }
}

impl<T: Equivalence> Buffer for Vec<T> {
    type Item = T;

    fn count(&self) -> usize {
        self.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        encode_elements(self)
    }
}

impl<T: Equivalence> BufferMut for Vec<T> {
    fn decode_from(&mut self, bytes: &[u8]) -> Result<usize> {
        self[..].decode_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut out = [0u8; 4];
        0x0102_0304u32.encode(&mut out);
        assert_eq!(out, [4, 3, 2, 1]);
        assert_eq!(i16::decode(&[0xfe, 0xff]).unwrap(), -2);
    }

    #[test]
    fn bool_rejects_invalid_bytes() {
        assert!(bool::decode(&[1]).unwrap());
        assert!(!bool::decode(&[0]).unwrap());
        assert!(matches!(bool::decode(&[0xff]), Err(Error::InvalidBool(0xff))));
    }

    #[test]
    fn char_rejects_surrogates() {
        let mut out = [0u8; 4];
        0xd800u32.encode(&mut out);
        assert!(matches!(char::decode(&out), Err(Error::InvalidChar(0xd800))));
    }

    #[test]
    fn composite_sizes_add_up() {
        assert_eq!(<[f64; 3]>::SIZE, 24);
        assert_eq!(<(u8, i32, [u16; 2])>::SIZE, 9);
        assert_eq!(<()>::SIZE, 0);

        let value = (7u8, -3i32, [1u16, 2]);
        let bytes = value.to_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(<(u8, i32, [u16; 2])>::decode(&bytes).unwrap(), value);
    }

    #[test]
    fn slices_decode_a_prefix() {
        let mut dest = [0i32; 4];
        let written = dest[..].decode_from(&encode_elements(&[5i32, 6])).unwrap();
        assert_eq!(written, 2);
        assert_eq!(dest, [5, 6, 0, 0]);
    }

    #[test]
    fn slices_refuse_more_than_capacity() {
        let mut dest = [9i32; 2];
        let err = dest[..]
            .decode_from(&encode_elements(&[1i32, 2, 3]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Overflow {
                received: 3,
                capacity: 2,
                ..
            }
        ));
        assert_eq!(dest, [9, 9]);
    }

    #[test]
    fn partial_elements_are_a_layout_error() {
        assert!(matches!(
            decode_elements::<u32>(&[1, 2, 3]),
            Err(Error::Layout { len: 3, size: 4 })
        ));
        assert!(decode_elements::<()>(&[]).unwrap().is_empty());
    }

    #[cfg(feature = "complex")]
    #[test]
    fn complex_numbers_are_two_components() {
        let z = num_complex::Complex::new(1.5f32, -2.0);
        assert_eq!(num_complex::Complex::<f32>::SIZE, 8);
        assert_eq!(num_complex::Complex::<f32>::decode(&z.to_bytes()).unwrap(), z);
    }
}
