// udmp-walker contributors - October 19 2026
//! This module builds the virtual address space of the dumped process: a map
//! from the virtual address ranges captured in the dump to where their bytes
//! live in the file.
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{Result, UdmpError};
use crate::streams::{Memory64List, MemoryList};

/// The highest address a 32-bit process can have memory at.
const MAX_32BIT_ADDRESS: u64 = 0xffff_ffff;

/// Whether the dumped process is 32-bit or 64-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    ThirtyTwoBit,
    SixtyFourBit,
}

impl Bitness {
    /// The size of a pointer in the dumped process.
    pub fn pointer_size(&self) -> usize {
        match self {
            Self::ThirtyTwoBit => 4,
            Self::SixtyFourBit => 8,
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, Self::SixtyFourBit)
    }
}

/// A range of virtual memory that has its content in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::len_without_is_empty)]
pub struct Region {
    /// Range over the start/end address of the region.
    pub range: Range<u64>,
    /// Where the first byte of the region is in the file.
    pub rva: u64,
}

impl Region {
    /// Build a [`Region`] making sure its end doesn't overflow.
    fn new(start: u64, size: u64, rva: u64) -> Result<Self> {
        let end = start.checked_add(size).ok_or_else(|| {
            UdmpError::AddressSpace(format!("region {start:#x} of {size:#x} bytes overflows"))
        })?;

        Ok(Self {
            range: start..end,
            rva,
        })
    }

    pub fn start_addr(&self) -> u64 {
        self.range.start
    }

    /// Get the end address of the region. The range is not inclusive, so this
    /// points right after the last byte.
    pub fn end_addr(&self) -> u64 {
        self.range.end
    }

    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// The result of translating a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// Where the byte at the virtual address is in the file.
    pub rva: u64,
    /// How many contiguous bytes are available from there until the end of
    /// the region.
    pub available: u64,
}

/// The virtual address space of the dumped process. It is built once from
/// either the memory64 list or the memory list and never changes after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    bitness: Bitness,
    /// Map a start address to its [`Region`]. Regions never overlap.
    regions: BTreeMap<u64, Region>,
}

impl AddressSpace {
    /// Build the address space out of the memory lists found in the dump. The
    /// memory64 list wins if both are present.
    pub fn new(memory: Option<&MemoryList>, memory64: Option<&Memory64List>) -> Result<Self> {
        match (memory64, memory) {
            (Some(memory64), _) => Self::from_memory64_list(memory64),
            (None, Some(memory)) => Self::from_memory_list(memory),
            (None, None) => Err(UdmpError::AddressSpace(
                "the dump has neither a memory list nor a memory64 list".into(),
            )),
        }
    }

    /// Build the address space from a memory64 list. The data of every range
    /// is stored right after the one of the previous range, starting at the
    /// list's base RVA.
    pub fn from_memory64_list(memory64: &Memory64List) -> Result<Self> {
        let mut space = Self {
            bitness: Bitness::SixtyFourBit,
            regions: BTreeMap::new(),
        };

        // Grab the starting offset.
        let mut rva = memory64.base_rva;
        for descriptor in &memory64.ranges {
            let region = Region::new(descriptor.start_of_memory_range, descriptor.data_size, rva)?;
            space.insert(region)?;

            // Bump the offset by the size of this region to find where the next
            // one is at.
            rva = rva
                .checked_add(descriptor.data_size)
                .ok_or(UdmpError::Overflow("memory64 list rva"))?;
        }

        Ok(space)
    }

    /// Build the address space from a memory list. Every range carries its own
    /// location in the file.
    pub fn from_memory_list(memory: &MemoryList) -> Result<Self> {
        // A 32-bit list can still describe a 64-bit process if any of its
        // addresses is too high.
        let bitness = if memory
            .ranges
            .iter()
            .any(|d| d.start_of_memory_range > MAX_32BIT_ADDRESS)
        {
            Bitness::SixtyFourBit
        } else {
            Bitness::ThirtyTwoBit
        };

        let mut space = Self {
            bitness,
            regions: BTreeMap::new(),
        };

        for descriptor in &memory.ranges {
            let region = Region::new(
                descriptor.start_of_memory_range,
                descriptor.memory.data_size.into(),
                descriptor.memory.rva.into(),
            )?;
            space.insert(region)?;
        }

        Ok(space)
    }

    /// Insert a [`Region`] making sure it doesn't overlap with its neighbors.
    fn insert(&mut self, region: Region) -> Result<()> {
        // Empty regions can't contain any address, so they don't need to be
        // tracked.
        if region.range.is_empty() {
            log::debug!("skipping empty region at {:#x}", region.range.start);
            return Ok(());
        }

        // The closest region that starts at or before this one..
        let previous = self.regions.range(..=region.range.start).next_back();
        // ..and the closest one that starts after it.
        let next = self.regions.range(region.range.start + 1..).next();
        let overlapping = previous
            .filter(|(_, p)| p.range.end > region.range.start)
            .or_else(|| next.filter(|(_, n)| n.range.start < region.range.end));

        if let Some((_, other)) = overlapping {
            return Err(UdmpError::AddressSpace(format!(
                "region {:#x}-{:#x} overlaps with {:#x}-{:#x}",
                region.range.start, region.range.end, other.range.start, other.range.end
            )));
        }

        self.regions.insert(region.range.start, region);

        Ok(())
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    /// Iterate over the regions ordered by start address.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Find the [`Region`] that contains `address`.
    pub fn region(&self, address: u64) -> Option<&Region> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.range.contains(&address))
    }

    /// Translate a virtual address into a file offset. Returns [`None`] if
    /// the address isn't mapped.
    pub fn translate(&self, address: u64) -> Option<Translation> {
        let region = self.region(address)?;
        let delta = address - region.range.start;

        Some(Translation {
            rva: region.rva + delta,
            available: region.range.end - address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{LocationDescriptor32, MemoryDescriptor, MemoryDescriptor64};

    fn memory_list(ranges: &[(u64, u32, u32)]) -> MemoryList {
        MemoryList {
            ranges: ranges
                .iter()
                .map(|&(start, data_size, rva)| MemoryDescriptor {
                    start_of_memory_range: start,
                    memory: LocationDescriptor32 { data_size, rva },
                })
                .collect(),
        }
    }

    fn memory64_list(base_rva: u64, ranges: &[(u64, u64)]) -> Memory64List {
        Memory64List {
            base_rva,
            ranges: ranges
                .iter()
                .map(|&(start, data_size)| MemoryDescriptor64 {
                    start_of_memory_range: start,
                    data_size,
                })
                .collect(),
        }
    }

    #[test]
    fn memory64_offsets_are_a_running_sum() {
        let list = memory64_list(
            0x1000,
            &[(0x7ff0_0000_0000, 0x100), (0x1000, 0x20), (0x5000, 0x3000)],
        );
        let space = AddressSpace::from_memory64_list(&list).unwrap();
        assert_eq!(space.bitness(), Bitness::SixtyFourBit);

        // Regions come out ordered by address, not by list order.
        let regions = space.regions().collect::<Vec<_>>();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].range, 0x1000..0x1020);
        assert_eq!(regions[0].rva, 0x1100);
        assert_eq!(regions[1].range, 0x5000..0x8000);
        assert_eq!(regions[1].rva, 0x1120);
        assert_eq!(regions[2].range, 0x7ff0_0000_0000..0x7ff0_0000_0100);
        assert_eq!(regions[2].rva, 0x1000);
    }

    #[test]
    fn translate() {
        let list = memory_list(&[(0x1000, 0x100, 0x400), (0x2000, 0x10, 0x800)]);
        let space = AddressSpace::from_memory_list(&list).unwrap();

        for address in [0x1000, 0x1001, 0x10ff, 0x2000, 0x200f] {
            let region = space.region(address).unwrap();
            let translation = space.translate(address).unwrap();
            assert_eq!(translation.rva - region.rva, address - region.range.start);
            assert_eq!(translation.available, region.range.end - address);
        }

        assert_eq!(
            space.translate(0x10ff),
            Some(Translation {
                rva: 0x4ff,
                available: 1
            })
        );

        // Right before, right after, in between regions.
        for address in [0, 0xfff, 0x1100, 0x1fff, 0x2010, u64::MAX] {
            assert_eq!(space.translate(address), None);
        }
    }

    #[test]
    fn overlaps_are_rejected() {
        // Same start.
        let list = memory_list(&[(0x1000, 0x100, 0x400), (0x1000, 0x10, 0x800)]);
        assert!(matches!(
            AddressSpace::from_memory_list(&list),
            Err(UdmpError::AddressSpace(_))
        ));

        // Tail of the previous region.
        let list = memory_list(&[(0x1000, 0x100, 0x400), (0x10ff, 0x10, 0x800)]);
        assert!(matches!(
            AddressSpace::from_memory_list(&list),
            Err(UdmpError::AddressSpace(_))
        ));

        // Head of the next region.
        let list = memory64_list(0x400, &[(0x2000, 0x100), (0x1f00, 0x101)]);
        assert!(matches!(
            AddressSpace::from_memory64_list(&list),
            Err(UdmpError::AddressSpace(_))
        ));

        // Swallowing a smaller region.
        let list = memory64_list(0x400, &[(0x2010, 0x10), (0x2000, 0x100)]);
        assert!(matches!(
            AddressSpace::from_memory64_list(&list),
            Err(UdmpError::AddressSpace(_))
        ));

        // Adjacent regions are fine.
        let list = memory64_list(0x400, &[(0x2000, 0x100), (0x2100, 0x100)]);
        assert_eq!(
            AddressSpace::from_memory64_list(&list)
                .unwrap()
                .regions()
                .count(),
            2
        );
    }

    #[test]
    fn malformed_regions() {
        let list = memory64_list(0x400, &[(u64::MAX - 1, 0x10)]);
        assert!(matches!(
            AddressSpace::from_memory64_list(&list),
            Err(UdmpError::AddressSpace(_))
        ));

        // Empty regions are ignored, even if they sit inside another one.
        let list = memory_list(&[(0x1000, 0x100, 0x400), (0x1010, 0, 0x800)]);
        let space = AddressSpace::from_memory_list(&list).unwrap();
        assert_eq!(space.regions().count(), 1);

        assert!(matches!(
            AddressSpace::new(None, None),
            Err(UdmpError::AddressSpace(_))
        ));
    }

    #[test]
    fn bitness() {
        let low = memory_list(&[(0x1000, 0x100, 0x400), (0xffff_f000, 0x1000, 0x800)]);
        assert_eq!(
            AddressSpace::new(Some(&low), None).unwrap().bitness(),
            Bitness::ThirtyTwoBit
        );

        let high = memory_list(&[(0x1000, 0x100, 0x400), (0x1_0000_0000, 0x10, 0x800)]);
        assert_eq!(
            AddressSpace::new(Some(&high), None).unwrap().bitness(),
            Bitness::SixtyFourBit
        );

        // The memory64 list always means 64-bit, whatever the memory list says.
        let memory64 = memory64_list(0x400, &[(0x1000, 0x10)]);
        let space = AddressSpace::new(Some(&low), Some(&memory64)).unwrap();
        assert_eq!(space.bitness(), Bitness::SixtyFourBit);
        assert_eq!(space.translate(0x1000).unwrap().rva, 0x400);

        assert_eq!(Bitness::ThirtyTwoBit.pointer_size(), 4);
        assert_eq!(Bitness::SixtyFourBit.pointer_size(), 8);
    }
}
