// udmp-walker contributors - October 19 2026
//! Helpers to synthesize minidumps with `test_assembler`.
#![allow(dead_code)]

use test_assembler::{Endian, Section};

pub const SIGNATURE: u32 = 0x504d_444d;

pub const THREAD_LIST: u32 = 3;
pub const MODULE_LIST: u32 = 4;
pub const MEMORY_LIST: u32 = 5;
pub const EXCEPTION: u32 = 6;
pub const SYSTEM_INFO: u32 = 7;
pub const MEMORY64_LIST: u32 = 9;
pub const THREAD_EX_LIST: u32 = 8;
pub const COMMENT_A: u32 = 10;
pub const FUNCTION_TABLE: u32 = 13;
pub const THREAD_INFO_LIST: u32 = 17;

pub const ARCH_X86: u16 = 0;
pub const ARCH_X64: u16 = 9;
pub const ARCH_X86_ON_WIN64: u16 = 10;

pub const CONTEXT_X86_SIZE: usize = 0x2cc;
pub const CONTEXT_X64_SIZE: usize = 0x4d0;

pub fn section() -> Section {
    Section::with_endian(Endian::Little)
}

pub fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Lay out a header, a stream directory with one entry per stream, the
/// streams and then `blobs` (memory contents, strings, contexts, ...).
pub fn assemble(streams: Vec<(u32, Section)>, blobs: Vec<Section>) -> Vec<u8> {
    assemble_with_signature(SIGNATURE, streams, blobs)
}

pub fn assemble_with_signature(
    signature: u32,
    streams: Vec<(u32, Section)>,
    blobs: Vec<Section>,
) -> Vec<u8> {
    let mut dump = section()
        .D32(signature)
        .D16(0xa793)
        .D16(0)
        .D32(streams.len() as u32)
        .D32(0x20)
        .D32(0)
        .D32(0x6502_1f3a)
        .D64(0);
    dump.start().set_const(0);

    for (stream_type, stream) in &streams {
        dump = dump
            .D32(*stream_type)
            .D32(&stream.final_size())
            .D32(&stream.start());
    }

    for (_, stream) in streams {
        let start = stream.start();
        dump = dump.mark(&start).append_section(stream);
    }

    for blob in blobs {
        let start = blob.start();
        dump = dump.mark(&start).append_section(blob);
    }

    dump.get_contents().unwrap()
}

pub fn system_info(arch: u16) -> Section {
    section()
        .D16(arch)
        .D16(6)
        .D16(0x5507)
        .D8(8)
        .D8(1)
        .D32(10)
        .D32(0)
        .D32(19045)
        .D32(2)
        // No service pack.
        .D32(0)
        .D16(0x100)
        .D16(0)
}

/// A context blob filled with `byte`.
pub fn context(size: usize, byte: u8) -> Section {
    section().append_bytes(&vec![byte; size])
}

pub struct ThreadDesc<'a> {
    pub id: u32,
    pub teb: u64,
    pub context: Option<&'a Section>,
}

pub fn thread_list(threads: &[ThreadDesc]) -> Section {
    let mut list = section().D32(threads.len() as u32);
    for thread in threads {
        list = list
            .D32(thread.id)
            .D32(0)
            .D32(0x20)
            .D32(0)
            .D64(thread.teb)
            // Stack.
            .D64(0)
            .D32(0)
            .D32(0);

        list = match thread.context {
            Some(ctx) => list.D32(&ctx.final_size()).D32(&ctx.start()),
            None => list.D32(0).D32(0),
        };
    }

    list
}

/// A module list with a single module; the name goes in a blob.
pub fn module_list(base: u64, size: u32, name: &str) -> (Section, Section) {
    let name = utf16(name);
    let string = section().D32(name.len() as u32).append_bytes(&name);
    let list = section()
        .D32(1)
        .D64(base)
        .D32(size)
        .D32(0xdead)
        .D32(0x6502_1f3a)
        .D32(&string.start())
        // Version info.
        .append_bytes(&[0; 13 * 4])
        // CV and misc records.
        .D32(0)
        .D32(0)
        .D32(0)
        .D32(0)
        // Reserved.
        .D64(0)
        .D64(0);

    (list, string)
}

/// A memory64 list; the contents of every region are laid out back to back
/// in a single blob.
pub fn memory64_list(regions: &[(u64, Vec<u8>)]) -> (Section, Section) {
    let mut blob = section();
    let mut list = section().D64(regions.len() as u64).D64(&blob.start());
    for (address, bytes) in regions {
        list = list.D64(*address).D64(bytes.len() as u64);
        blob = blob.append_bytes(bytes);
    }

    (list, blob)
}

/// A memory list; every region gets its own blob.
pub fn memory_list(regions: &[(u64, Vec<u8>)]) -> (Section, Vec<Section>) {
    let mut list = section().D32(regions.len() as u32);
    let mut blobs = Vec::new();
    for (address, bytes) in regions {
        let blob = section().append_bytes(bytes);
        list = list
            .D64(*address)
            .D32(bytes.len() as u32)
            .D32(&blob.start());
        blobs.push(blob);
    }

    (list, blobs)
}

pub fn comment_a(text: &str) -> Section {
    section().append_bytes(text.as_bytes()).D8(0)
}

/// Where the fields of the TEB, PEB and process parameters are for a given
/// pointer size.
pub struct Layout {
    pub pointer_size: usize,
    pub peb: usize,
    pub image_base_address: usize,
    pub process_parameters: usize,
    pub standard_input: usize,
    pub standard_output: usize,
    pub standard_error: usize,
    pub current_directory: usize,
    pub dll_path: usize,
    pub image_path: usize,
    pub command_line: usize,
    pub environment: usize,
    pub window_title: usize,
    pub buffer: usize,
}

pub const LAYOUT_32: Layout = Layout {
    pointer_size: 4,
    peb: 0x30,
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
    buffer: 0x4,
};

pub const LAYOUT_64: Layout = Layout {
    pointer_size: 8,
    peb: 0x60,
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
    buffer: 0x8,
};

pub const TEB: u64 = 0x7ff5_0000;
pub const PEB: u64 = 0x7ff6_0000;
pub const PARAMETERS: u64 = 0x2000_0000;
pub const ENVIRONMENT: u64 = 0x3000_0000;
pub const IMAGE_BASE: u64 = 0x40_0000;
/// Nothing is mapped there.
pub const UNMAPPED: u64 = 0xdead_0000;

pub const CURRENT_DIRECTORY: &str = "C:\\Windows\\";
pub const DLL_PATH: &str = "C:\\Windows\\system32";
pub const IMAGE_PATH: &str = "C:\\Windows\\notepad.exe";
pub const COMMAND_LINE: &str = "notepad.exe hello.txt";
pub const ENVIRONMENT_BLOCK: &str = "A=1\0B=22\0\0";

fn put_pointer(buffer: &mut [u8], offset: usize, value: u64, pointer_size: usize) {
    buffer[offset..offset + pointer_size].copy_from_slice(&value.to_le_bytes()[..pointer_size]);
}

/// Build the memory of a process: a TEB, a PEB, its process parameters and an
/// environment block. The window title is empty and its buffer points to
/// unmapped memory.
pub fn process_memory(layout: &Layout) -> Vec<(u64, Vec<u8>)> {
    let ps = layout.pointer_size;
    let mut teb_bytes = vec![0; 0x100];
    put_pointer(&mut teb_bytes, layout.peb, PEB, ps);

    let mut peb_bytes = vec![0; 0x100];
    peb_bytes[2] = 1;
    put_pointer(&mut peb_bytes, layout.image_base_address, IMAGE_BASE, ps);
    put_pointer(&mut peb_bytes, layout.process_parameters, PARAMETERS, ps);

    let mut parameters = vec![0; 0x400];
    put_pointer(&mut parameters, layout.standard_input, 4, ps);
    put_pointer(&mut parameters, layout.standard_output, 8, ps);
    put_pointer(&mut parameters, layout.standard_error, 0xc, ps);
    put_pointer(&mut parameters, layout.environment, ENVIRONMENT, ps);

    let strings = [
        (layout.current_directory, CURRENT_DIRECTORY),
        (layout.dll_path, DLL_PATH),
        (layout.image_path, IMAGE_PATH),
        (layout.command_line, COMMAND_LINE),
        (layout.window_title, ""),
    ];

    let mut next = 0x200;
    for (offset, string) in strings {
        let bytes = utf16(string);
        let len = bytes.len() as u16;
        parameters[offset..offset + 2].copy_from_slice(&len.to_le_bytes());
        parameters[offset + 2..offset + 4].copy_from_slice(&(len + 2).to_le_bytes());
        if bytes.is_empty() {
            put_pointer(&mut parameters, offset + layout.buffer, UNMAPPED, ps);
            continue;
        }

        put_pointer(
            &mut parameters,
            offset + layout.buffer,
            PARAMETERS + next as u64,
            ps,
        );
        parameters[next..next + bytes.len()].copy_from_slice(&bytes);
        next += (bytes.len() + 2 + 7) & !7;
    }

    vec![
        (TEB, teb_bytes),
        (PEB, peb_bytes),
        (PARAMETERS, parameters),
        (ENVIRONMENT, utf16(ENVIRONMENT_BLOCK)),
    ]
}
