//! Memory image access and virtual address translation.
//!
//! This module provides the read-only input side of the library: where the bytes of an
//! acquired memory image come from, and how a kernel virtual address is turned into a
//! position inside those bytes. Nothing in here knows about Windows structures; that is
//! the job of [`crate::symbols`] and [`crate::object`].
//!
//! # Architecture
//!
//! Access is split into two layers:
//!
//! - A [`Backend`] owns the raw bytes of the image. [`Memory`] holds a buffer that is
//!   already loaded, [`Physical`] memory-maps a file from disk.
//! - A [`Layer`] is a virtual address space on top of a backend. Every read made by the
//!   scanner goes through a layer, and every failure to translate or read is reported as
//!   [`crate::Error::Unreadable`].
//!
//! Two layers are provided:
//!
//! - [`SegmentedLayer`] - An explicit list of virtual ranges mapped onto backend offsets.
//!   Suitable for pre-extracted kernel regions, synthetic images and tests.
//! - [`Amd64Layer`] - x86-64 4-level paging, walking the page tables stored in the image
//!   starting from a directory table base (CR3).
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use apcscope::image::{Amd64Layer, Layer, Physical};
//!
//! let physical = Physical::new("memory.raw")?;
//! let layer = Amd64Layer::new(physical, 0x1ad000);
//!
//! let value = layer.read_u64(0xfffff805_12345678)?;
//! println!("value: {:#x}", value);
//! # Ok::<(), apcscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! Backends are `Send + Sync` and layers only ever borrow them immutably, so one image
//! can be shared across any number of readers.

pub mod io;

mod amd64;
mod backend;
mod segmented;

pub use amd64::{Amd64Layer, PteFlags};
pub use backend::{Memory, Physical};
pub use segmented::{Segment, SegmentedLayer};

use crate::Result;

/// Backend trait for image data sources.
///
/// This trait abstracts over the source of image data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the backend holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A virtual address space over a memory image.
///
/// Implementations translate virtual addresses into backend offsets. Reads are all-or-nothing:
/// if any byte of the requested range cannot be translated the whole read fails with
/// [`crate::Error::Unreadable`] and the buffer content is unspecified.
///
/// The trait is object safe; the scanner works with `&dyn Layer` so the address space can be
/// chosen at runtime.
pub trait Layer: Send + Sync {
    /// Fills `buffer` with the bytes starting at the virtual `address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Unreadable`] if any part of the range is unmapped.
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()>;

    /// Returns `true` if `len` bytes starting at `address` can be read.
    fn is_valid(&self, address: u64, len: usize) -> bool;

    /// Reads a byte at `address`.
    fn read_u8(&self, address: u64) -> Result<u8> {
        let mut buffer = [0_u8; 1];
        self.read(address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Reads a little-endian `u16` at `address`.
    fn read_u16(&self, address: u64) -> Result<u16> {
        let mut buffer = [0_u8; 2];
        self.read(address, &mut buffer)?;
        io::read_le(&buffer)
    }

    /// Reads a little-endian `u32` at `address`.
    fn read_u32(&self, address: u64) -> Result<u32> {
        let mut buffer = [0_u8; 4];
        self.read(address, &mut buffer)?;
        io::read_le(&buffer)
    }

    /// Reads a little-endian `u64` at `address`.
    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buffer = [0_u8; 8];
        self.read(address, &mut buffer)?;
        io::read_le(&buffer)
    }

    /// Reads a pointer of `size` bytes (4 or 8) at `address`, zero-extended to `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] for any other pointer size.
    fn read_pointer(&self, address: u64, size: usize) -> Result<u64> {
        match size {
            4 => self.read_u32(address).map(u64::from),
            8 => self.read_u64(address),
            _ => Err(crate::Error::NotSupported),
        }
    }
}

impl<L: Layer + ?Sized> Layer for &L {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        (**self).read(address, buffer)
    }

    fn is_valid(&self, address: u64, len: usize) -> bool {
        (**self).is_valid(address, len)
    }
}

impl<L: Layer + ?Sized> Layer for Box<L> {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        (**self).read(address, buffer)
    }

    fn is_valid(&self, address: u64, len: usize) -> bool {
        (**self).is_valid(address, len)
    }
}

/// Returns `true` if `address` is a canonical 48-bit x86-64 address.
///
/// Bits 63 through 47 must all be copies of bit 47.
pub fn is_canonical(address: u64) -> bool {
    let upper = address >> 47;
    upper == 0 || upper == 0x1_ffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical() {
        assert!(is_canonical(0));
        assert!(is_canonical(0x0000_7fff_ffff_ffff));
        assert!(is_canonical(0xffff_8000_0000_0000));
        assert!(is_canonical(0xffff_f800_0100_0000));
        assert!(!is_canonical(0x0000_8000_0000_0000));
        assert!(!is_canonical(0xdead_beef_0000_0000));
    }

    #[test]
    fn layer_helpers() {
        let data = vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xAA, 0xBB, 0xCC, 0xDD,
        ];
        let mut layer = SegmentedLayer::new(Memory::new(data));
        layer.add_segment(0x1000, 0, 12).unwrap();

        assert_eq!(layer.read_u8(0x1000).unwrap(), 0x01);
        assert_eq!(layer.read_u16(0x1000).unwrap(), 0x0201);
        assert_eq!(layer.read_u32(0x1008).unwrap(), 0xDDCCBBAA);
        assert_eq!(layer.read_u64(0x1000).unwrap(), 0x0807060504030201);
        assert_eq!(layer.read_pointer(0x1008, 4).unwrap(), 0xDDCCBBAA);
        assert_eq!(layer.read_pointer(0x1000, 8).unwrap(), 0x0807060504030201);
        assert!(matches!(
            layer.read_pointer(0x1000, 2),
            Err(crate::Error::NotSupported)
        ));
        assert!(layer.read_u64(0x1008).is_err());

        let by_ref: &dyn Layer = &layer;
        assert_eq!(by_ref.read_u8(0x100B).unwrap(), 0xDD);

        let boxed: Box<dyn Layer> = Box::new(layer);
        assert!(boxed.is_valid(0x1000, 12));
        assert!(!boxed.is_valid(0x1000, 13));
    }
}
