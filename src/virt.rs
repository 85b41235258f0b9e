// udmp-walker contributors - October 19 2026
//! This module implements a cursor over the virtual address space of the
//! dumped process. Every read gets translated into a read of the dump file.
use std::cmp::min;

use crate::error::{Result, UdmpError};
use crate::map::Reader;
use crate::structs::read_bytes_at;
use crate::vaspace::{AddressSpace, Bitness, Region};

/// A cursor over the [`AddressSpace`]. Reads never cross the end of the
/// region the cursor is in, even if another region starts right after it.
pub struct VirtReader<'a, R> {
    space: &'a AddressSpace,
    reader: &'a mut R,
    /// The virtual address the cursor is at.
    position: u64,
    /// The region `position` is in; `None` until the first seek.
    region: Option<&'a Region>,
}

impl<'a, R> VirtReader<'a, R>
where
    R: Reader,
{
    pub fn new(space: &'a AddressSpace, reader: &'a mut R) -> Self {
        Self {
            space,
            reader,
            position: 0,
            region: None,
        }
    }

    pub fn bitness(&self) -> Bitness {
        self.space.bitness()
    }

    /// Move the cursor to `address`. This fails if no region contains it.
    pub fn seek(&mut self, address: u64) -> Result<()> {
        let region = self
            .space
            .region(address)
            .ok_or(UdmpError::UnmappedAddress(address))?;

        self.position = address;
        self.region = Some(region);

        Ok(())
    }

    /// Get the virtual address the cursor is at.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the end address of the region the cursor is in; `position()` if
    /// the cursor hasn't been placed yet.
    pub fn region_end(&self) -> u64 {
        self.region.map_or(self.position, Region::end_addr)
    }

    /// How many bytes can be read before hitting the end of the current
    /// region.
    pub fn remaining(&self) -> u64 {
        self.region_end() - self.position
    }

    /// Read up to `len` bytes from the current position. Fewer bytes are
    /// returned if the region ends before; an empty buffer means the cursor
    /// sits at the end of its region.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let Some(region) = self.region else {
            return Err(UdmpError::UnmappedAddress(self.position));
        };

        // Clamp the read to what is left in the region.
        let len = min(len as u64, self.remaining()) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        // `position` is in the region, so this can't underflow.
        let rva = region
            .rva
            .checked_add(self.position - region.range.start)
            .ok_or(UdmpError::Overflow("region rva"))?;

        let buffer = read_bytes_at(&mut *self.reader, rva, len)?;
        self.position += len as u64;

        Ok(buffer)
    }

    /// Read exactly `len` bytes from the current position. Hitting the end of
    /// the region before is an error.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let address = self.position;
        let buffer = self.read(len)?;
        if buffer.len() != len {
            return Err(UdmpError::ShortRead {
                address,
                wanted: len,
                available: buffer.len(),
            });
        }

        Ok(buffer)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let buffer = self.read_exact(2)?;

        Ok(u16::from_le_bytes([buffer[0], buffer[1]]))
    }

    /// Read a pointer; its size depends on the bitness of the process.
    pub fn read_pointer(&mut self) -> Result<u64> {
        let buffer = self.read_exact(self.bitness().pointer_size())?;
        let mut raw = [0; 8];
        raw[..buffer.len()].copy_from_slice(&buffer);

        Ok(u64::from_le_bytes(raw))
    }

    /// Seek to `address` and read a pointer there.
    pub fn read_pointer_at(&mut self, address: u64) -> Result<u64> {
        self.seek(address)?;

        self.read_pointer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Cursor;
    use crate::streams::{Memory64List, MemoryList};
    use crate::structs::{LocationDescriptor32, MemoryDescriptor, MemoryDescriptor64};

    /// A file where the byte at offset `n` is `n`, with two adjacent regions:
    /// 0x1000..0x1010 backed by 0x10..0x20 and 0x1010..0x1020 backed by
    /// 0x40..0x50.
    fn setup() -> (Vec<u8>, AddressSpace) {
        let file = (0..=255u8).collect::<Vec<_>>();
        let list = MemoryList {
            ranges: vec![
                MemoryDescriptor {
                    start_of_memory_range: 0x1000,
                    memory: LocationDescriptor32 {
                        data_size: 0x10,
                        rva: 0x10,
                    },
                },
                MemoryDescriptor {
                    start_of_memory_range: 0x1010,
                    memory: LocationDescriptor32 {
                        data_size: 0x10,
                        rva: 0x40,
                    },
                },
            ],
        };

        (file, AddressSpace::from_memory_list(&list).unwrap())
    }

    #[test]
    fn seek_and_read() {
        let (file, space) = setup();
        let mut cursor = Cursor::new(&file);
        let mut reader = VirtReader::new(&space, &mut cursor);

        reader.seek(0x1004).unwrap();
        assert_eq!(reader.position(), 0x1004);
        assert_eq!(reader.region_end(), 0x1010);
        assert_eq!(reader.read(4).unwrap(), [0x14, 0x15, 0x16, 0x17]);
        assert_eq!(reader.position(), 0x1008);
        assert_eq!(reader.remaining(), 8);

        reader.seek(0x1012).unwrap();
        assert_eq!(reader.read_u16().unwrap(), 0x4342);
    }

    #[test]
    fn reads_are_clamped_to_the_region() {
        let (file, space) = setup();
        let mut cursor = Cursor::new(&file);
        let mut reader = VirtReader::new(&space, &mut cursor);

        // Even though 0x1010 is mapped, the read stops at the region boundary.
        reader.seek(0x100c).unwrap();
        assert_eq!(reader.read(0x100).unwrap(), [0x1c, 0x1d, 0x1e, 0x1f]);
        assert_eq!(reader.position(), 0x1010);
        assert!(reader.read(1).unwrap().is_empty());

        reader.seek(0x100e).unwrap();
        assert!(matches!(
            reader.read_exact(4),
            Err(UdmpError::ShortRead {
                address: 0x100e,
                wanted: 4,
                available: 2
            })
        ));
    }

    #[test]
    fn unmapped() {
        let (file, space) = setup();
        let mut cursor = Cursor::new(&file);
        let mut reader = VirtReader::new(&space, &mut cursor);

        // Nothing has been seeked yet.
        assert!(matches!(reader.read(1), Err(UdmpError::UnmappedAddress(0))));
        assert!(matches!(
            reader.seek(0x1020),
            Err(UdmpError::UnmappedAddress(0x1020))
        ));
        assert!(matches!(
            reader.seek(0xfff),
            Err(UdmpError::UnmappedAddress(0xfff))
        ));
    }

    #[test]
    fn truncated_file() {
        // The region claims more bytes than the file has.
        let file = vec![0xaa; 0x18];
        let list = Memory64List {
            base_rva: 0x10,
            ranges: vec![MemoryDescriptor64 {
                start_of_memory_range: 0x7ff0_0000,
                data_size: 0x100,
            }],
        };
        let space = AddressSpace::from_memory64_list(&list).unwrap();
        let mut cursor = Cursor::new(&file);
        let mut reader = VirtReader::new(&space, &mut cursor);

        reader.seek(0x7ff0_0000).unwrap();
        assert_eq!(reader.read_pointer().unwrap(), 0xaaaa_aaaa_aaaa_aaaa);
        assert!(matches!(
            reader.read(0x10),
            Err(UdmpError::TruncatedRead {
                rva: 0x18,
                wanted: 0x10
            })
        ));
    }

    #[test]
    fn pointers() {
        let (file, space) = setup();
        let mut cursor = Cursor::new(&file);
        let mut reader = VirtReader::new(&space, &mut cursor);

        assert_eq!(reader.bitness(), Bitness::ThirtyTwoBit);
        assert_eq!(reader.read_pointer_at(0x1000).unwrap(), 0x1312_1110);
        assert_eq!(reader.read_u8().unwrap(), 0x14);
    }
}
