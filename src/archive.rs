//! Packed archives for serialized messages
//!
//! Values that do not have a fixed wire layout are serialized with MessagePack before they are
//! handed to the transport. An array archive is the element count followed by the elements, so
//! that a receiver with bounded room can take a prefix and detect the overflow.

use conv::ConvUtil;
use rmp_serde::Deserializer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Serialize a single value.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Deserialize a single value.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Serialize `values` as an array archive.
pub fn pack_array<T: Serialize>(values: &[T]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let len = values
        .len()
        .value_as::<u64>()
        .map_err(|_| Error::transport("pack_array", ErrorKind::Count))?;
    rmp_serde::encode::write(&mut out, &len)?;
    for value in values {
        rmp_serde::encode::write(&mut out, value)?;
    }
    Ok(out)
}

/// Deserialize an array archive into the front of `out`.
///
/// Returns the number of elements received. If the archive holds more elements than `out`, the
/// first `out.len()` elements are still stored and an `Error::Overflow` is returned.
pub fn unpack_array_into<T: DeserializeOwned>(bytes: &[u8], out: &mut [T]) -> Result<usize> {
    let mut de = Deserializer::new(bytes);
    let received = u64::deserialize(&mut de)?
        .value_as::<usize>()
        .map_err(|_| Error::transport("unpack_array", ErrorKind::Count))?;
    for slot in out.iter_mut().take(received) {
        *slot = T::deserialize(&mut de)?;
    }
    if received > out.len() {
        return Err(Error::Overflow {
            routine: "receive_serialized_array",
            received,
            capacity: out.len(),
        });
    }
    Ok(received)
}

/// Length of the archive `pack` would produce for `value`.
pub fn packed_len<T: Serialize + ?Sized>(value: &T) -> Result<usize> {
    pack(value).map(|bytes| bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_values_survive_packing() {
        let value = (String::from("ring"), vec![1u32, 2, 3], Some(-4i64));
        let bytes = pack(&value).unwrap();
        assert_eq!(unpack::<(String, Vec<u32>, Option<i64>)>(&bytes).unwrap(), value);
        assert_eq!(packed_len(&value).unwrap(), bytes.len());
    }

    #[test]
    fn arrays_fill_a_prefix() {
        let bytes = pack_array(&["a".to_string(), "bb".to_string()]).unwrap();
        let mut out = vec![String::from("x"); 3];
        assert_eq!(unpack_array_into(&bytes, &mut out).unwrap(), 2);
        assert_eq!(out, ["a", "bb", "x"]);
    }

    #[test]
    fn arrays_report_overflow_after_storing_the_prefix() {
        let bytes = pack_array(&[1u8, 2, 3, 4]).unwrap();
        let mut out = [0u8; 3];
        let err = unpack_array_into(&bytes, &mut out).unwrap_err();
        assert!(matches!(
            err,
            Error::Overflow {
                received: 4,
                capacity: 3,
                ..
            }
        ));
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    #[cfg(target_pointer_width = "32")]
    fn counts_beyond_the_address_space_are_rejected() {
        let mut bytes = Vec::new();
        rmp_serde::encode::write(&mut bytes, &u64::MAX).unwrap();
        let mut out = [0u8; 1];
        let err = unpack_array_into(&bytes, &mut out).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Count));
    }

    #[test]
    fn array_counts_are_stored_as_u64() {
        let bytes = pack_array(&[9u8; 300]).unwrap();
        let mut de = Deserializer::new(&bytes[..]);
        assert_eq!(u64::deserialize(&mut de).unwrap(), 300);
    }

    #[test]
    fn truncated_archives_fail_to_decode() {
        let bytes = pack(&vec![7u64; 16]).unwrap();
        assert!(matches!(
            unpack::<Vec<u64>>(&bytes[..bytes.len() - 1]),
            Err(Error::Decode(_))
        ));
    }
}
