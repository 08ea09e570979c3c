//! x86-64 4-level paging.
//!
//! [`Amd64Layer`] translates 48-bit virtual addresses the way the MMU does, starting from a
//! directory table base (the `CR3` value of the process whose address space is analyzed,
//! usually the `System` process for kernel memory) and walking PML4, PDPT, PD and PT
//! entries stored in the physical image.
//!
//! ```text
//! 63-48: Sign extension of bit 47
//! 47-39: PML4 index
//! 38-30: PDPT index (1 GiB pages stop here)
//! 29-21: PD index   (2 MiB pages stop here)
//! 20-12: PT index
//! 11-0:  Page offset
//! ```
//!
//! Windows keeps pages that were trimmed from a working set but not yet repurposed in
//! *transition*: the hardware present bit is clear, but the frame still holds the data. Such
//! PTEs are treated as valid. Prototype PTEs and paged-out memory cannot be resolved
//! without the page file and are reported as unreadable.

use bitflags::bitflags;

use super::{io::read_le, is_canonical, Backend, Layer};
use crate::{Error, Result};

const PAGE_SIZE: u64 = 0x1000;
const LARGE_PAGE_SIZE: u64 = 0x20_0000;
const HUGE_PAGE_SIZE: u64 = 0x4000_0000;

const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;
const LARGE_ADDRESS_MASK: u64 = 0x000F_FFFF_FFE0_0000;
const HUGE_ADDRESS_MASK: u64 = 0x000F_FFFF_C000_0000;

bitflags! {
    /// Page table entry bits relevant for translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// Page is present in memory
        const PRESENT = 1 << 0;
        /// Page is writable
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode
        const USER = 1 << 2;
        /// Page has been accessed
        const ACCESSED = 1 << 5;
        /// Page has been written to
        const DIRTY = 1 << 6;
        /// Large page (1 GiB in a PDPTE, 2 MiB in a PDE)
        const LARGE_PAGE = 1 << 7;
        /// Not flushed on CR3 switch
        const GLOBAL = 1 << 8;
        /// Windows: entry refers to a prototype PTE
        const PROTOTYPE = 1 << 10;
        /// Windows: page is in transition, frame still valid
        const TRANSITION = 1 << 11;
        /// No execute
        const NO_EXECUTE = 1 << 63;
    }
}

/// A virtual address space translated through x86-64 page tables.
pub struct Amd64Layer {
    physical: Box<dyn Backend>,
    dtb: u64,
}

impl Amd64Layer {
    /// Creates a layer over a physical memory image.
    ///
    /// # Arguments
    ///
    /// * `physical` - Backend holding the raw physical memory, offset 0 = physical address 0
    /// * `dtb` - Directory table base (CR3); the low 12 bits are ignored
    pub fn new(physical: impl Backend + 'static, dtb: u64) -> Self {
        Amd64Layer {
            physical: Box::new(physical),
            dtb,
        }
    }

    /// Returns the directory table base this layer translates with.
    pub fn dtb(&self) -> u64 {
        self.dtb
    }

    fn entry(&self, table: u64, index: u64) -> Option<PteFlags> {
        let address = (table & ADDRESS_MASK).checked_add(index * 8)?;
        let bytes = self
            .physical
            .data_slice(usize::try_from(address).ok()?, 8)
            .ok()?;
        read_le::<u64>(bytes).ok().map(PteFlags::from_bits_retain)
    }

    /// Translates a virtual address into a physical address.
    ///
    /// Returns the physical address together with the number of bytes left in the page it
    /// lies in, or `None` if the address is non-canonical or not mapped.
    pub fn translate(&self, address: u64) -> Option<(u64, u64)> {
        if !is_canonical(address) {
            return None;
        }

        let pml4e = self.entry(self.dtb, (address >> 39) & 0x1ff)?;
        if !pml4e.contains(PteFlags::PRESENT) {
            return None;
        }

        let pdpte = self.entry(pml4e.bits(), (address >> 30) & 0x1ff)?;
        if !pdpte.contains(PteFlags::PRESENT) {
            return None;
        }
        if pdpte.contains(PteFlags::LARGE_PAGE) {
            let offset = address & (HUGE_PAGE_SIZE - 1);
            return Some((
                (pdpte.bits() & HUGE_ADDRESS_MASK) | offset,
                HUGE_PAGE_SIZE - offset,
            ));
        }

        let pde = self.entry(pdpte.bits(), (address >> 21) & 0x1ff)?;
        if !pde.contains(PteFlags::PRESENT) {
            return None;
        }
        if pde.contains(PteFlags::LARGE_PAGE) {
            let offset = address & (LARGE_PAGE_SIZE - 1);
            return Some((
                (pde.bits() & LARGE_ADDRESS_MASK) | offset,
                LARGE_PAGE_SIZE - offset,
            ));
        }

        let pte = self.entry(pde.bits(), (address >> 12) & 0x1ff)?;
        let in_transition =
            pte.contains(PteFlags::TRANSITION) && !pte.contains(PteFlags::PROTOTYPE);
        if !pte.contains(PteFlags::PRESENT) && !in_transition {
            return None;
        }

        let offset = address & (PAGE_SIZE - 1);
        Some(((pte.bits() & ADDRESS_MASK) | offset, PAGE_SIZE - offset))
    }

    fn physical_slice(&self, physical: u64, len: usize) -> Option<&[u8]> {
        self.physical
            .data_slice(usize::try_from(physical).ok()?, len)
            .ok()
    }
}

impl Layer for Amd64Layer {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let len = buffer.len();
        let unreadable = || Error::Unreadable { address, len };

        let mut done = 0_usize;
        while done < len {
            let current = address.checked_add(done as u64).ok_or_else(unreadable)?;
            let (physical, available) = self.translate(current).ok_or_else(unreadable)?;
            let chunk = (len - done).min(usize::try_from(available).unwrap_or(usize::MAX));
            let bytes = self
                .physical_slice(physical, chunk)
                .ok_or_else(unreadable)?;
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
            let Some((physical, available)) = self.translate(current) else {
                return false;
            };
            let chunk = (len - done).min(usize::try_from(available).unwrap_or(usize::MAX));
            if self.physical_slice(physical, chunk).is_none() {
                return false;
            }
            done += chunk;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Memory;

    const DTB: u64 = 0x1000;
    const BASE: u64 = 0xffff_f800_0000_0000;

    fn indices(address: u64) -> [u64; 4] {
        [
            (address >> 39) & 0x1ff,
            (address >> 30) & 0x1ff,
            (address >> 21) & 0x1ff,
            (address >> 12) & 0x1ff,
        ]
    }

    fn put(data: &mut [u8], physical: u64, value: u64) {
        let at = physical as usize;
        data[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// PML4 at 0x1000, PDPT at 0x2000, PD at 0x3000, PT at 0x4000.
    ///
    /// BASE          -> 0x6000 (present)
    /// BASE + 0x1000 -> 0x9000 (present, not adjacent)
    /// BASE + 0x2000 -> not present
    /// BASE + 0x3000 -> 0x7000 (transition)
    /// BASE + 0x4000 -> 0x8000 (transition + prototype)
    /// BASE + 2 MiB  -> large page at physical 0
    fn sample() -> Amd64Layer {
        let mut data = vec![0_u8; 0xA000];
        let present = PteFlags::PRESENT.bits();
        let [p4, p3, p2, p1] = indices(BASE);

        put(&mut data, 0x1000 + p4 * 8, 0x2000 | present);
        put(&mut data, 0x2000 + p3 * 8, 0x3000 | present);
        put(&mut data, 0x3000 + p2 * 8, 0x4000 | present);
        put(&mut data, 0x3000 + (p2 + 1) * 8, present | PteFlags::LARGE_PAGE.bits());

        put(&mut data, 0x4000 + p1 * 8, 0x6000 | present | PteFlags::NO_EXECUTE.bits());
        put(&mut data, 0x4000 + (p1 + 1) * 8, 0x9000 | present);
        put(
            &mut data,
            0x4000 + (p1 + 3) * 8,
            0x7000 | PteFlags::TRANSITION.bits(),
        );
        put(
            &mut data,
            0x4000 + (p1 + 4) * 8,
            0x8000 | PteFlags::TRANSITION.bits() | PteFlags::PROTOTYPE.bits(),
        );

        put(&mut data, 0x6ff8, 0x1122_3344_5566_7788);
        data[0x9000..0x9008].copy_from_slice(&[0xAA; 8]);
        data[0x7010] = 0x42;

        Amd64Layer::new(Memory::new(data), DTB)
    }

    #[test]
    fn translate_small_pages() {
        let layer = sample();

        assert_eq!(layer.dtb(), DTB);
        assert_eq!(layer.translate(BASE + 0x10), Some((0x6010, 0xff0)));
        assert_eq!(layer.translate(BASE + 0x1000), Some((0x9000, 0x1000)));
        assert_eq!(layer.translate(BASE + 0x2000), None);
        assert_eq!(layer.read_u64(BASE + 0xff8).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn read_across_pages() {
        let layer = sample();

        let mut buffer = [0_u8; 12];
        layer.read(BASE + 0xffc, &mut buffer).unwrap();
        assert_eq!(&buffer[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&buffer[4..], &[0xAA; 8]);
        assert!(layer.is_valid(BASE + 0xffc, 12));

        let err = layer.read(BASE + 0x1ffc, &mut buffer).unwrap_err();
        assert!(matches!(err, Error::Unreadable { address, len: 12 } if address == BASE + 0x1ffc));
        assert!(!layer.is_valid(BASE + 0x1ffc, 12));
    }

    #[test]
    fn transition_pages() {
        let layer = sample();

        assert_eq!(layer.read_u8(BASE + 0x3010).unwrap(), 0x42);
        assert!(layer.translate(BASE + 0x4000).is_none());
    }

    #[test]
    fn large_page() {
        let layer = sample();

        let address = BASE + LARGE_PAGE_SIZE + 0x7010;
        assert_eq!(
            layer.translate(address),
            Some((0x7010, LARGE_PAGE_SIZE - 0x7010))
        );
        assert_eq!(layer.read_u8(address).unwrap(), 0x42);
        assert!(!layer.is_valid(BASE + LARGE_PAGE_SIZE + 0xA000, 1));
    }

    #[test]
    fn unmapped() {
        let layer = sample();

        assert!(layer.translate(0x0000_8000_0000_0000).is_none());
        assert!(layer.translate(0x0000_0000_0040_0000).is_none());
        assert!(layer.read_u64(0xdead_beef_0000_0000).is_err());
    }
}
