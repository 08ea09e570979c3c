//! Byte sources for memory images.
//!
//! [`Memory`] owns a buffer that was produced in-process (a decompressed capture, a test
//! fixture). [`Physical`] maps a raw capture from disk read-only: captures routinely run to
//! tens of gigabytes, and a scan touches only the pages holding page tables and the objects
//! on the kernel lists, so only those get paged in.
//!
//! Both expose their bytes through [`Backend`]; offsets are positions in the capture file,
//! which for a raw dump equal physical addresses.
//!
//! ```rust,no_run
//! use apcscope::image::{Backend, Physical};
//!
//! let physical = Physical::new("memory.raw")?;
//! let first_page = physical.data_slice(0, 0x1000)?;
//! println!("{} bytes, starts with {:02x?}", physical.len(), &first_page[..8]);
//! # Ok::<(), apcscope::Error>(())
//! ```

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error, Result};

fn checked_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or(Error::OutOfBounds)?;
    data.get(offset..end).ok_or(Error::OutOfBounds)
}

/// An image held in memory.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Takes ownership of `data`.
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl From<Vec<u8>> for Memory {
    fn from(data: Vec<u8>) -> Self {
        Memory::new(data)
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        checked_slice(&self.data, offset, len)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// An image file mapped read-only from disk.
#[derive(Debug)]
pub struct Physical {
    map: Mmap,
}

impl Physical {
    /// Maps the capture at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be opened,
    /// [`crate::Error::Empty`] for a zero-length file and [`crate::Error::Error`] if the
    /// mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;

        if file.metadata()?.len() == 0 {
            return Err(Error::Empty);
        }

        // The capture is never written while mapped; truncation by another process is not
        // guarded against.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|error| Error::Error(format!("cannot map {}: {}", path.display(), error)))?;
        log::debug!("Mapped {} ({} bytes)", path.display(), map.len());

        Ok(Physical { map })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        checked_slice(&self.map, offset, len)
    }

    fn data(&self) -> &[u8] {
        &self.map
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn memory() {
        let mut data = vec![0_u8; 0x2000];
        data[0x1000..0x1008].copy_from_slice(&0xffff_f800_0000_0100_u64.to_le_bytes());
        let memory = Memory::from(data);

        assert_eq!(memory.len(), 0x2000);
        assert_eq!(
            memory.data_slice(0x1000, 8).unwrap(),
            &0xffff_f800_0000_0100_u64.to_le_bytes()
        );
        assert_eq!(memory.data_slice(0x2000, 0).unwrap().len(), 0);
        assert!(matches!(memory.data_slice(0x1ffc, 8), Err(Error::OutOfBounds)));
        assert!(matches!(memory.data_slice(usize::MAX, 2), Err(Error::OutOfBounds)));
        assert!(Memory::default().is_empty());
    }

    #[test]
    fn physical() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x50, 0x41, 0x47, 0x45, 0xDD, 0x36, 0x34, 0x00])
            .unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();

        assert_eq!(physical.len(), 8);
        assert_eq!(&physical.data()[..4], b"PAGE");
        assert_eq!(physical.data_slice(4, 2).unwrap(), &[0xDD, 0x36]);
        assert!(physical.data_slice(4, 5).is_err());
    }

    #[test]
    fn physical_errors() {
        match Physical::new("/nonexistent/memory.raw") {
            Err(Error::FileError(error)) => {
                assert_eq!(error.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected FileError, got {other:?}"),
        }

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(Physical::new(empty.path()), Err(Error::Empty)));
    }
}
