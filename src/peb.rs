// udmp-walker contributors - October 19 2026
//! This module walks the process environment block of the dumped process:
//! TEB -> PEB -> `RTL_USER_PROCESS_PARAMETERS` -> strings, standard handles
//! and environment block. Every pointer is a virtual address that gets
//! resolved through a [`VirtReader`].
use std::fmt;

use crate::error::{Result, UdmpError};
use crate::map::Reader;
use crate::structs::utf16_string_from_slice;
use crate::vaspace::Bitness;
use crate::virt::VirtReader;

/// Offsets of the fields we read in the TEB, PEB, `UNICODE_STRING` and
/// `RTL_USER_PROCESS_PARAMETERS` structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
    /// `TEB.ProcessEnvironmentBlock`.
    pub peb: u64,
    /// `PEB.BeingDebugged`.
    pub being_debugged: u64,
    /// `PEB.ImageBaseAddress`.
    pub image_base_address: u64,
    /// `PEB.ProcessParameters`.
    pub process_parameters: u64,
    pub standard_input: u64,
    pub standard_output: u64,
    pub standard_error: u64,
    pub current_directory: u64,
    pub dll_path: u64,
    pub image_path: u64,
    pub command_line: u64,
    pub environment: u64,
    pub window_title: u64,
    /// `UNICODE_STRING.Buffer`.
    pub unicode_string_buffer: u64,
}

pub const OFFSETS_32BIT: Offsets = Offsets {
    peb: 0x30,
    being_debugged: 0x2,
    image_base_address: 0x8,
    process_parameters: 0x10,
    standard_input: 0x18,
    standard_output: 0x1c,
    standard_error: 0x20,
    current_directory: 0x24,
    dll_path: 0x30,
    image_path: 0x38,
    command_line: 0x40,
    environment: 0x48,
    window_title: 0x70,
    unicode_string_buffer: 0x4,
};

pub const OFFSETS_64BIT: Offsets = Offsets {
    peb: 0x60,
    being_debugged: 0x2,
    image_base_address: 0x10,
    process_parameters: 0x20,
    standard_input: 0x20,
    standard_output: 0x28,
    standard_error: 0x30,
    current_directory: 0x38,
    dll_path: 0x50,
    image_path: 0x60,
    command_line: 0x70,
    environment: 0x80,
    window_title: 0xb0,
    unicode_string_buffer: 0x8,
};

impl Offsets {
    /// Get the offsets for a process of a given bitness.
    pub fn for_bitness(bitness: Bitness) -> &'static Self {
        match bitness {
            Bitness::ThirtyTwoBit => &OFFSETS_32BIT,
            Bitness::SixtyFourBit => &OFFSETS_64BIT,
        }
    }
}

/// An environment variable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

impl EnvironmentVariable {
    /// Split a `NAME=VALUE` entry on its first `=`. The `=` a name can start
    /// with (think `=C:=C:\Windows`) is part of the name. An entry without `=`
    /// has an empty value.
    fn from_entry(entry: &str) -> Self {
        let search_from = usize::from(entry.starts_with('='));
        match entry[search_from..].find('=') {
            Some(idx) => Self {
                name: entry[..search_from + idx].to_string(),
                value: entry[search_from + idx + 1..].to_string(),
            },
            None => Self {
                name: entry.to_string(),
                value: String::new(),
            },
        }
    }
}

impl fmt::Display for EnvironmentVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// What we know about the process from its PEB.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessEnvironment {
    pub peb_address: u64,
    pub being_debugged: bool,
    pub image_base_address: u64,
    pub image_path: String,
    pub command_line: String,
    pub window_title: String,
    pub dll_path: String,
    pub current_directory: String,
    pub standard_input: u64,
    pub standard_output: u64,
    pub standard_error: u64,
    pub environment_variables: Vec<EnvironmentVariable>,
}

impl fmt::Display for ProcessEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PEB:               {:016x}", self.peb_address)?;
        writeln!(f, "BeingDebugged:     {}", self.being_debugged)?;
        writeln!(f, "ImageBaseAddress:  {:016x}", self.image_base_address)?;
        writeln!(f, "ImagePath:         {}", self.image_path)?;
        writeln!(f, "CommandLine:       {}", self.command_line)?;
        writeln!(f, "WindowTitle:       {}", self.window_title)?;
        writeln!(f, "DllPath:           {}", self.dll_path)?;
        writeln!(f, "CurrentDirectory:  {}", self.current_directory)?;
        writeln!(
            f,
            "StdIn/Out/Err:     {:x} {:x} {:x}",
            self.standard_input, self.standard_output, self.standard_error
        )?;
        write!(
            f,
            "Environment:       {} variables",
            self.environment_variables.len()
        )
    }
}

/// Read a `UNICODE_STRING` at `address`. A zero length means an empty string
/// and the buffer pointer isn't looked at.
pub fn read_unicode_string<R: Reader>(
    reader: &mut VirtReader<R>,
    offsets: &Offsets,
    address: u64,
) -> Result<String> {
    // Read its length in bytes..
    reader.seek(address)?;
    let length = reader.read_u16()?;
    if length == 0 {
        return Ok(String::new());
    }

    // ..then chase the buffer pointer..
    let buffer_address = reader.read_pointer_at(field(address, offsets.unicode_string_buffer)?)?;

    // ..and read the characters.
    reader.seek(buffer_address)?;
    let buffer = reader.read_exact(length.into())?;

    utf16_string_from_slice(&buffer)
}

/// Parse an environment block: `NAME=VALUE` UTF16 entries each terminated by a
/// NUL, the block itself being terminated by an empty entry. Entries that
/// aren't terminated before the end of `block` are dropped.
pub fn parse_environment_block(block: &[u8]) -> Result<Vec<EnvironmentVariable>> {
    let units = block
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect::<Vec<_>>();

    let mut variables = Vec::new();
    let mut rest = units.as_slice();
    while let Some(len) = rest.iter().position(|&unit| unit == 0) {
        // An empty entry is the end of the block.
        if len == 0 {
            break;
        }

        let entry = String::from_utf16(&rest[..len])?;
        variables.push(EnvironmentVariable::from_entry(&entry));

        // Move past the entry and its terminator.
        rest = &rest[len + 1..];
    }

    Ok(variables)
}

/// Read the environment block at `address`. The block can't be bigger than
/// what is left in the region it starts in.
pub fn read_environment_block<R: Reader>(
    reader: &mut VirtReader<R>,
    address: u64,
) -> Result<Vec<EnvironmentVariable>> {
    reader.seek(address)?;
    let remaining = usize::try_from(reader.remaining())
        .map_err(|_| UdmpError::Overflow("environment block size"))?;
    let block = reader.read(remaining)?;

    parse_environment_block(&block)
}

/// Compute the address of a field.
fn field(base: u64, offset: u64) -> Result<u64> {
    base.checked_add(offset)
        .ok_or(UdmpError::Overflow("field address"))
}

/// Walk the PEB starting from the TEB of a thread. Any failure aborts the
/// whole walk; a [`ProcessEnvironment`] is only returned if every field could
/// be read.
pub fn walk<R: Reader>(reader: &mut VirtReader<R>, teb: u64) -> Result<ProcessEnvironment> {
    let offsets = Offsets::for_bitness(reader.bitness());

    // Find the PEB off the TEB.
    let peb_address = reader.read_pointer_at(field(teb, offsets.peb)?)?;
    log::debug!("PEB is at {peb_address:#x}");

    reader.seek(field(peb_address, offsets.being_debugged)?)?;
    let being_debugged = reader.read_u8()? != 0;
    let image_base_address = reader.read_pointer_at(field(peb_address, offsets.image_base_address)?)?;
    let process_parameters =
        reader.read_pointer_at(field(peb_address, offsets.process_parameters)?)?;
    log::debug!("ProcessParameters are at {process_parameters:#x}");

    // Grab the strings..
    let mut read_string = |offset: u64| -> Result<String> {
        read_unicode_string(&mut *reader, offsets, field(process_parameters, offset)?)
    };
    let image_path = read_string(offsets.image_path)?;
    let command_line = read_string(offsets.command_line)?;
    let window_title = read_string(offsets.window_title)?;
    let dll_path = read_string(offsets.dll_path)?;
    let current_directory = read_string(offsets.current_directory)?;

    // ..the standard handles..
    let standard_input = reader.read_pointer_at(field(process_parameters, offsets.standard_input)?)?;
    let standard_output =
        reader.read_pointer_at(field(process_parameters, offsets.standard_output)?)?;
    let standard_error = reader.read_pointer_at(field(process_parameters, offsets.standard_error)?)?;

    // ..and the environment variables.
    let environment = reader.read_pointer_at(field(process_parameters, offsets.environment)?)?;
    let environment_variables = read_environment_block(reader, environment)?;

    Ok(ProcessEnvironment {
        peb_address,
        being_debugged,
        image_base_address,
        image_path,
        command_line,
        window_title,
        dll_path,
        current_directory,
        standard_input,
        standard_output,
        standard_error,
        environment_variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Cursor;
    use crate::streams::Memory64List;
    use crate::structs::MemoryDescriptor64;
    use crate::vaspace::AddressSpace;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn var(name: &str, value: &str) -> EnvironmentVariable {
        EnvironmentVariable {
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn environment_block() {
        let block = utf16("A=1\0B=22\0\0");
        assert_eq!(
            parse_environment_block(&block).unwrap(),
            [var("A", "1"), var("B", "22")]
        );

        // Everything after the terminating empty entry is ignored.
        let block = utf16("A=1\0\0B=22\0\0");
        assert_eq!(parse_environment_block(&block).unwrap(), [var("A", "1")]);

        // Entries without a terminator are dropped.
        let block = utf16("A=1\0B=2");
        assert_eq!(parse_environment_block(&block).unwrap(), [var("A", "1")]);

        assert!(parse_environment_block(&[]).unwrap().is_empty());
    }

    #[test]
    fn environment_entries() {
        let block = utf16("=C:=C:\\Windows\0PATH=a=b\0EMPTY=\0NOVALUE\0é=ü\0\0");
        assert_eq!(
            parse_environment_block(&block).unwrap(),
            [
                var("=C:", "C:\\Windows"),
                var("PATH", "a=b"),
                var("EMPTY", ""),
                var("NOVALUE", ""),
                var("é", "ü"),
            ]
        );
    }

    #[test]
    fn offsets() {
        assert_eq!(Offsets::for_bitness(Bitness::ThirtyTwoBit).peb, 0x30);
        assert_eq!(Offsets::for_bitness(Bitness::SixtyFourBit).peb, 0x60);
        assert_eq!(
            Offsets::for_bitness(Bitness::SixtyFourBit).unicode_string_buffer,
            Bitness::SixtyFourBit.pointer_size() as u64
        );
        assert_eq!(
            Offsets::for_bitness(Bitness::ThirtyTwoBit).unicode_string_buffer,
            Bitness::ThirtyTwoBit.pointer_size() as u64
        );
    }

    /// Map `memory` at 0x10000 (file offset 0).
    fn map_memory(memory: &[u8]) -> AddressSpace {
        AddressSpace::from_memory64_list(&Memory64List {
            base_rva: 0,
            ranges: vec![MemoryDescriptor64 {
                start_of_memory_range: 0x10000,
                data_size: memory.len() as u64,
            }],
        })
        .unwrap()
    }

    #[test]
    fn empty_unicode_string_is_not_dereferenced() {
        // Length 0 and a bogus buffer pointer.
        let mut memory = vec![0; 0x10];
        memory[8..].copy_from_slice(&0xdead_beef_dead_beefu64.to_le_bytes());
        let space = map_memory(&memory);
        let mut cursor = Cursor::new(&memory);
        let mut reader = VirtReader::new(&space, &mut cursor);

        assert_eq!(
            read_unicode_string(&mut reader, &OFFSETS_64BIT, 0x10000).unwrap(),
            ""
        );
    }

    #[test]
    fn unicode_string() {
        let text = utf16("notepad.exe");
        let mut memory = vec![0; 0x10];
        memory[..2].copy_from_slice(&(text.len() as u16).to_le_bytes());
        memory[2..4].copy_from_slice(&(text.len() as u16).to_le_bytes());
        memory[8..].copy_from_slice(&0x10010u64.to_le_bytes());
        memory.extend(&text);
        let space = map_memory(&memory);
        let mut cursor = Cursor::new(&memory);
        let mut reader = VirtReader::new(&space, &mut cursor);

        assert_eq!(
            read_unicode_string(&mut reader, &OFFSETS_64BIT, 0x10000).unwrap(),
            "notepad.exe"
        );

        // The buffer points outside of the dump.
        memory[8..0x10].copy_from_slice(&0x20000u64.to_le_bytes());
        let mut cursor = Cursor::new(&memory);
        let mut reader = VirtReader::new(&space, &mut cursor);
        assert!(matches!(
            read_unicode_string(&mut reader, &OFFSETS_64BIT, 0x10000),
            Err(UdmpError::UnmappedAddress(0x20000))
        ));
    }

    #[test]
    fn environment_block_is_bounded_by_its_region() {
        // The block isn't terminated before the end of the region.
        let mut memory = utf16("A=1\0B=22\0C=3");
        let space = map_memory(&memory);
        let mut cursor = Cursor::new(&memory);
        let mut reader = VirtReader::new(&space, &mut cursor);
        assert_eq!(
            read_environment_block(&mut reader, 0x10000).unwrap(),
            [var("A", "1"), var("B", "22")]
        );

        // Starting in the middle of the block.
        memory = utf16("A=1\0B=22\0\0");
        let space = map_memory(&memory);
        let mut cursor = Cursor::new(&memory);
        let mut reader = VirtReader::new(&space, &mut cursor);
        assert_eq!(
            read_environment_block(&mut reader, 0x10008).unwrap(),
            [var("B", "22")]
        );
    }
}
