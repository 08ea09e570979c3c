//! Explicit virtual-range to backend-offset mapping.
//!
//! [`SegmentedLayer`] is the simplest address space: a sorted list of non-overlapping
//! [`Segment`]s, each mapping a contiguous virtual range onto a contiguous range of the
//! backend. Reads may span adjacent segments as long as no gap is crossed.

use super::{Backend, Layer};
use crate::{Error, Result};

/// One contiguous mapping from virtual addresses to backend offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First virtual address covered by this segment
    pub virtual_address: u64,
    /// Backend offset of `virtual_address`
    pub offset: usize,
    /// Number of bytes covered
    pub length: usize,
}

impl Segment {
    /// Returns the first virtual address past the end of this segment.
    pub fn end(&self) -> u64 {
        self.virtual_address.saturating_add(self.length as u64)
    }

    /// Returns `true` if `address` lies within this segment.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.virtual_address && address < self.end()
    }
}

/// A virtual address space made from explicit segments over a [`Backend`].
///
/// # Examples
///
/// ```rust
/// use apcscope::image::{Layer, Memory, SegmentedLayer};
///
/// let mut layer = SegmentedLayer::new(Memory::new(vec![0x41; 0x2000]));
/// layer.add_segment(0xfffff800_00000000, 0, 0x1000)?;
///
/// assert_eq!(layer.read_u8(0xfffff800_00000010)?, 0x41);
/// assert!(!layer.is_valid(0xfffff800_00001000, 1));
/// # Ok::<(), apcscope::Error>(())
/// ```
pub struct SegmentedLayer {
    backend: Box<dyn Backend>,
    segments: Vec<Segment>,
}

impl SegmentedLayer {
    /// Creates a layer with no mappings over `backend`.
    pub fn new(backend: impl Backend + 'static) -> Self {
        SegmentedLayer {
            backend: Box::new(backend),
            segments: Vec::new(),
        }
    }

    /// Creates a layer mapping the whole backend at virtual address `base`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] for an empty backend.
    pub fn flat(backend: impl Backend + 'static, base: u64) -> Result<Self> {
        let len = backend.len();
        if len == 0 {
            return Err(Error::Empty);
        }

        let mut layer = Self::new(backend);
        layer.add_segment(base, 0, len)?;
        Ok(layer)
    }

    /// Maps `length` bytes at backend `offset` to `virtual_address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the backend range does not exist and
    /// [`crate::Error::Malformed`] if the segment is empty, wraps the address space or
    /// overlaps an existing segment.
    pub fn add_segment(
        &mut self,
        virtual_address: u64,
        offset: usize,
        length: usize,
    ) -> Result<()> {
        if length == 0 {
            return Err(malformed_error!("Empty segment at {:#x}", virtual_address));
        }
        if virtual_address.checked_add(length as u64).is_none() {
            return Err(malformed_error!(
                "Segment at {:#x} wraps the address space",
                virtual_address
            ));
        }
        self.backend.data_slice(offset, length)?;

        let segment = Segment {
            virtual_address,
            offset,
            length,
        };

        let index = self
            .segments
            .partition_point(|existing| existing.virtual_address < virtual_address);
        let overlaps_previous = index > 0 && self.segments[index - 1].end() > virtual_address;
        let overlaps_next = self
            .segments
            .get(index)
            .is_some_and(|next| next.virtual_address < segment.end());
        if overlaps_previous || overlaps_next {
            return Err(malformed_error!(
                "Segment {:#x}..{:#x} overlaps an existing mapping",
                virtual_address,
                segment.end()
            ));
        }

        self.segments.insert(index, segment);
        Ok(())
    }

    /// Returns the mapped segments sorted by virtual address.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Translates a virtual address into a backend offset.
    ///
    /// Returns the offset together with the number of bytes that remain in the segment.
    pub fn translate(&self, address: u64) -> Option<(usize, usize)> {
        let index = self
            .segments
            .partition_point(|segment| segment.virtual_address <= address);
        let segment = self.segments.get(index.checked_sub(1)?)?;
        if !segment.contains(address) {
            return None;
        }

        let delta = (address - segment.virtual_address) as usize;
        Some((segment.offset + delta, segment.length - delta))
    }
}

impl Layer for SegmentedLayer {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let len = buffer.len();
        let unreadable = || Error::Unreadable { address, len };

        let mut done = 0_usize;
        while done < len {
            let current = address
                .checked_add(done as u64)
                .ok_or_else(unreadable)?;
            let (offset, available) = self.translate(current).ok_or_else(unreadable)?;
            let chunk = available.min(len - done);
            let bytes = self
                .backend
                .data_slice(offset, chunk)
                .map_err(|_| unreadable())?;
            buffer[done..done + chunk].copy_from_slice(bytes);
            done += chunk;
        }

        Ok(())
    }

    fn is_valid(&self, address: u64, len: usize) -> bool {
        let mut done = 0_usize;
        while done < len {
            let Some(current) = address.checked_add(done as u64) else {
                return false;
            };
            let Some((_, available)) = self.translate(current) else {
                return false;
            };
            done += available.min(len - done);
        }
        true
    }
}
