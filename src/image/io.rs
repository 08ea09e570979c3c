//! Low-level byte order and safe reading utilities for memory image parsing.
//!
//! Windows kernel structures on every architecture this crate supports are little-endian,
//! so only little-endian decoding is provided. All functions are bounds-checked and return
//! [`crate::Error::OutOfBounds`] instead of panicking on short buffers.
//!
//! # Key Components
//!
//! - [`crate::image::io::ImageIO`] - Trait for primitive types decodable from raw bytes
//! - [`crate::image::io::read_le`] - Read a value from the start of a buffer
//! - [`crate::image::io::read_le_at`] - Read a value at an offset and advance the offset
//! - [`crate::image::io::read_le_sized`] - Read a 1, 2, 4 or 8 byte unsigned value
//!
//! # Usage Examples
//!
//! ```rust
//! use apcscope::image::io::{read_le, read_le_at};
//!
//! let data = [0x10, 0x00, 0x00, 0x00, 0x05, 0x00];
//! let first: u32 = read_le(&data)?;
//! assert_eq!(first, 0x10);
//!
//! let mut offset = 4;
//! let second: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(second, 5);
//! assert_eq!(offset, 6);
//! # Ok::<(), apcscope::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be decoded from a little-endian byte buffer.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait ImageIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_image_io {
    ($($ty:ident),*) => {
        $(impl ImageIO for $ty {
            type Bytes = [u8; std::mem::size_of::<$ty>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                $ty::from_le_bytes(bytes)
            }
        })*
    };
}

impl_image_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: ImageIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`.
///
/// The offset is advanced by the number of bytes read.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: ImageIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads an unsigned little-endian value of `size` bytes (1, 2, 4 or 8), widened to `u64`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] for short buffers and [`crate::Error::NotSupported`]
/// for any other size.
pub fn read_le_sized(data: &[u8], size: usize) -> Result<u64> {
    match size {
        1 => read_le::<u8>(data).map(u64::from),
        2 => read_le::<u16>(data).map(u64::from),
        4 => read_le::<u32>(data).map(u64::from),
        8 => read_le::<u64>(data),
        _ => Err(crate::Error::NotSupported),
    }
}

/// Sign-extends the low `size` bytes of `value`.
pub fn sign_extend(value: u64, size: usize) -> i64 {
    match size {
        1 => i64::from(value as u8 as i8),
        2 => i64::from(value as u16 as i16),
        4 => i64::from(value as u32 as i32),
        _ => value as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_types() {
        assert_eq!(read_le::<u8>(&TEST_BUFFER).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&TEST_BUFFER).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&TEST_BUFFER).unwrap(), 0x04030201);
        assert_eq!(read_le::<u64>(&TEST_BUFFER).unwrap(), 0x0807060504030201);
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
    }

    #[test]
    fn read_le_at_sequential() {
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0201);
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0403);
        assert_eq!(read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap(), 0x08070605);
        assert_eq!(offset, 8);
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn read_errors() {
        assert!(matches!(read_le::<u64>(&[0x01, 0x02]), Err(OutOfBounds)));

        let mut offset = usize::MAX;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
    }

    #[test]
    fn sized() {
        assert_eq!(read_le_sized(&TEST_BUFFER, 1).unwrap(), 0x01);
        assert_eq!(read_le_sized(&TEST_BUFFER, 4).unwrap(), 0x04030201);
        assert!(read_le_sized(&TEST_BUFFER, 3).is_err());
        assert!(read_le_sized(&TEST_BUFFER[..2], 4).is_err());
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xFF, 1), -1);
        assert_eq!(sign_extend(0x7F, 1), 127);
        assert_eq!(sign_extend(0xFFFE, 2), -2);
        assert_eq!(sign_extend(0xFFFF_FFFF, 4), -1);
        assert_eq!(sign_extend(0x10, 8), 16);
    }
}
