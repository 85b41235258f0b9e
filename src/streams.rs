// udmp-walker contributors - October 19 2026
//! This module implements the decoders for the fixed-layout streams: thread,
//! module and memory lists, system info, exception, etc. None of them have any
//! addressing logic; they read records off the file at the location the
//! stream directory gave them.
use std::{fmt, mem, ops};

use crate::error::{Result, UdmpError};
use crate::map::Reader;
use crate::structs::*;
use crate::udmp_parser::ThreadContext;

/// A DLL loaded in the virtual address space.
#[allow(clippy::len_without_is_empty)]
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// The range of where the module is loaded in memory at.
    pub range: ops::Range<u64>,
    /// PE checksum of the module.
    pub checksum: u32,
    /// Timestamp.
    pub time_date_stamp: u32,
    /// The module path on the file system of the dumped machine.
    pub path: String,
    pub version_info: FixedFileInfo,
    pub cv_record: Vec<u8>,
    pub misc_record: Vec<u8>,
}

impl Module {
    /// Get the file name of the module; the path uses the conventions of the
    /// dumped machine, not the ones of the host.
    pub fn file_name(&self) -> &str {
        self.path.rsplit(['\\', '/']).next().unwrap_or(&self.path)
    }

    /// Get the address of where the module was loaded at.
    pub fn start_addr(&self) -> u64 {
        self.range.start
    }

    /// Get the address of where the last byte of the module was loaded at.
    pub fn end_addr(&self) -> u64 {
        self.range.end.saturating_sub(1)
    }

    /// Get the length of the range of memory the module was loaded at.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x} {:016x} {:08x} {:08x} {}",
            self.range.start, self.range.end, self.checksum, self.time_date_stamp, self.path
        )
    }
}

/// A module that was loaded at some point but wasn't anymore when the dump
/// was generated.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct UnloadedModule {
    pub range: ops::Range<u64>,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub name: String,
}

/// A thread that was running when the dump was generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    /// The thread ID.
    pub id: u32,
    /// The suspend count counter cf [Freezing and Suspending Threads](https://learn.microsoft.com/en-us/windows-hardware/drivers/debugger/controlling-processes-and-threads).
    pub suspend_count: u32,
    /// The priority class cf [Priority Class](https://learn.microsoft.com/en-us/windows/win32/procthread/scheduling-priorities).
    pub priority_class: u32,
    /// Thread priority cf [Priority level](https://learn.microsoft.com/en-us/windows/win32/procthread/scheduling-priorities).
    pub priority: u32,
    /// The thread environment block address.
    pub teb: u64,
    /// The stack of the thread.
    pub stack: MemoryDescriptor,
    /// Where the thread context is stored in the file.
    pub context_location: LocationDescriptor32,
    /// The decoded thread context. It is filled once the whole directory has
    /// been parsed, and only for the architectures we know about.
    pub(crate) context: Option<ThreadContext>,
}

impl Thread {
    /// Build a new [`Thread`] instance; its context is decoded later.
    fn new(entry: ThreadEntry) -> Self {
        Self {
            id: entry.thread_id,
            suspend_count: entry.suspend_count,
            priority_class: entry.priority_class,
            priority: entry.priority,
            teb: entry.teb,
            stack: entry.stack,
            context_location: entry.thread_context,
            context: None,
        }
    }

    /// Get a reference to the [`ThreadContext`] if it was decoded.
    pub fn context(&self) -> Option<&ThreadContext> {
        self.context.as_ref()
    }
}

/// An entry of the extended thread list: a thread and the backing store of
/// its register stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadEx {
    pub thread: Thread,
    pub backing_store: MemoryDescriptor,
}

/// What the thread info list knows about a thread.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread_id: u32,
    pub dump_flags: u32,
    pub dump_error: u32,
    pub exit_status: u32,
    pub create_time: u64,
    pub exit_time: u64,
    pub kernel_time: u64,
    pub user_time: u64,
    pub start_address: u64,
    pub affinity: u64,
}

impl From<ThreadInfoEntry> for ThreadInfo {
    fn from(entry: ThreadInfoEntry) -> Self {
        Self {
            thread_id: entry.thread_id,
            dump_flags: entry.dump_flags,
            dump_error: entry.dump_error,
            exit_status: entry.exit_status,
            create_time: entry.create_time,
            exit_time: entry.exit_time,
            kernel_time: entry.kernel_time,
            user_time: entry.user_time,
            start_address: entry.start_address,
            affinity: entry.affinity,
        }
    }
}

/// The memory list; every range knows where its data is in the file.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MemoryList {
    pub ranges: Vec<MemoryDescriptor>,
}

/// The memory64 list; the data of the ranges is stored back to back starting
/// at `base_rva`.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Memory64List {
    pub base_rva: u64,
    pub ranges: Vec<MemoryDescriptor64>,
}

/// The system info stream and its service pack string.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub stream: SystemInfoStream,
    pub csd_version: String,
}

impl SystemInfo {
    /// Stringify the processor architecture.
    pub fn arch_as_str(&self) -> &str {
        match self.stream.processor_arch {
            ARCH_X86 => "x86",
            ARCH_X64 => "x64",
            ARCH_X86_ON_WIN64 => "x86 on Win64",
            5 => "ARM",
            6 => "IA64",
            12 => "ARM64",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stream;
        writeln!(f, "== System Info ==")?;
        writeln!(
            f,
            "ProcessorArchitecture: {} ({})",
            self.arch_as_str(),
            s.processor_arch
        )?;
        writeln!(f, "ProcessorLevel:        {}", s.processor_level)?;
        writeln!(f, "ProcessorRevision:     {:04x}", s.processor_revision)?;
        writeln!(f, "NumberOfProcessors:    {}", s.number_of_processors)?;
        writeln!(f, "ProductType:           {}", s.product_type)?;
        writeln!(
            f,
            "Version:               {}.{}.{}",
            s.major_version, s.minor_version, s.build_number
        )?;
        writeln!(f, "PlatformId:            {}", s.platform_id)?;
        writeln!(f, "CSDVersion:            {}", self.csd_version)
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimes {
    pub create_time: u32,
    pub user_time: u32,
    pub kernel_time: u32,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorPowerInfo {
    pub max_mhz: u32,
    pub current_mhz: u32,
    pub mhz_limit: u32,
    pub max_idle_state: u32,
    pub current_idle_state: u32,
}

/// The misc info stream. Its fields are only present if the matching flag
/// is turned on.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MiscInformation {
    pub process_id: Option<u32>,
    pub process_times: Option<ProcessTimes>,
    pub processor_power: Option<ProcessorPowerInfo>,
}

/// A handle that was opened by the process.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub handle: u64,
    pub type_name: Option<String>,
    pub object_name: Option<String>,
    pub attributes: u32,
    pub granted_access: u32,
    pub handle_count: u32,
    pub pointer_count: u32,
}

/// Make sure a stream made of a header and `count` entries of `entry_size`
/// bytes fits in the location the directory gave us.
fn ensure_fits(
    location: LocationDescriptor32,
    header_size: usize,
    count: u64,
    entry_size: usize,
) -> Result<()> {
    let needed = count
        .checked_mul(entry_size as u64)
        .and_then(|n| n.checked_add(header_size as u64))
        .ok_or(UdmpError::Overflow("stream size"))?;

    if needed > location.data_size.into() {
        return Err(UdmpError::InvalidData(format!(
            "stream at {:#x} needs {:#x} bytes but is only {:#x} bytes long",
            location.rva, needed, location.data_size
        )));
    }

    Ok(())
}

/// Read the bytes a [`LocationDescriptor32`] points to.
fn read_location(reader: &mut impl Reader, location: LocationDescriptor32) -> Result<Vec<u8>> {
    if location.data_size == 0 {
        return Ok(Vec::new());
    }

    read_bytes_at(reader, location.rva.into(), location.data_size as usize)
}

/// Read a `MINIDUMP_STRING`: a 32-bit length in bytes followed by the UTF16
/// characters.
pub fn read_minidump_string(reader: &mut impl Reader, rva: u64) -> Result<String> {
    // Read its length..
    let length = read_struct_at::<u32>(reader, rva)?;

    // ..and the characters that follow.
    let buffer = read_bytes_at(reader, rva + 4, length as usize)?;

    utf16_string_from_slice(&buffer)
}

/// Read an optional `MINIDUMP_STRING`; a zero RVA means there is none.
fn read_optional_minidump_string(reader: &mut impl Reader, rva: u32) -> Result<Option<String>> {
    match rva {
        0 => Ok(None),
        rva => read_minidump_string(reader, rva.into()).map(Some),
    }
}

/// Parse the thread list. The contexts are decoded later, once we know the
/// architecture.
pub fn parse_thread_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<Thread>> {
    // Read the thread list.
    let thread_list = read_struct_at::<ThreadList>(reader, location.rva.into())?;
    ensure_fits(
        location,
        mem::size_of::<ThreadList>(),
        thread_list.number_of_threads.into(),
        mem::size_of::<ThreadEntry>(),
    )?;

    // Iterate through every entries and keep them in file order; the first
    // one is the one we use to find the PEB.
    (0..thread_list.number_of_threads)
        .map(|_| read_struct::<ThreadEntry>(reader).map(Thread::new))
        .collect()
}

/// Parse the extended thread list. Its entries are thread list entries
/// followed by a backing store descriptor; their contexts are never decoded.
pub fn parse_thread_ex_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<ThreadEx>> {
    let thread_list = read_struct_at::<ThreadList>(reader, location.rva.into())?;
    ensure_fits(
        location,
        mem::size_of::<ThreadList>(),
        thread_list.number_of_threads.into(),
        mem::size_of::<ThreadExEntry>(),
    )?;

    (0..thread_list.number_of_threads)
        .map(|_| {
            let entry = read_struct::<ThreadExEntry>(reader)?;
            Ok(ThreadEx {
                thread: Thread::new(entry.thread),
                backing_store: entry.backing_store,
            })
        })
        .collect()
}

/// Parse the thread info list; the entries are `size_of_entry` apart and may
/// be bigger than what we know how to decode.
pub fn parse_thread_info_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<ThreadInfo>> {
    let list = read_struct_at::<ThreadInfoListStream>(reader, location.rva.into())?;
    let size_of_entry = list.size_of_entry as usize;
    if size_of_entry < mem::size_of::<ThreadInfoEntry>() {
        return Err(UdmpError::InvalidData(format!(
            "thread info entries are too small ({size_of_entry})"
        )));
    }

    let size_of_header = list.size_of_header as usize;
    if size_of_header < mem::size_of::<ThreadInfoListStream>() {
        return Err(UdmpError::InvalidData(format!(
            "thread info list header is too small ({size_of_header})"
        )));
    }

    ensure_fits(
        location,
        size_of_header,
        list.number_of_entries.into(),
        size_of_entry,
    )?;

    let first_entry = u64::from(location.rva) + size_of_header as u64;
    (0..u64::from(list.number_of_entries))
        .map(|idx| {
            read_struct_at::<ThreadInfoEntry>(reader, first_entry + idx * size_of_entry as u64)
                .map(ThreadInfo::from)
        })
        .collect()
}

/// Parse the module list.
pub fn parse_module_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<Module>> {
    // Read the module list.
    let module_list = read_struct_at::<ModuleList>(reader, location.rva.into())?;
    ensure_fits(
        location,
        mem::size_of::<ModuleList>(),
        module_list.number_of_modules.into(),
        mem::size_of::<ModuleEntry>(),
    )?;

    // Grab the entries first, the names / records are stored elsewhere.
    let entries = (0..module_list.number_of_modules)
        .map(|_| read_struct::<ModuleEntry>(reader))
        .collect::<Result<Vec<_>>>()?;

    let mut modules = Vec::with_capacity(entries.len());
    for entry in entries {
        let base_of_image = entry.base_of_image;
        let end = base_of_image
            .checked_add(entry.size_of_image.into())
            .ok_or(UdmpError::Overflow("module range"))?;

        // Grab the CV / misc records and the name.
        let cv_record = read_location(reader, entry.cv_record)?;
        let misc_record = read_location(reader, entry.misc_record)?;
        let path = read_minidump_string(reader, entry.module_name_rva.into())?;

        modules.push(Module {
            range: base_of_image..end,
            checksum: entry.checksum,
            time_date_stamp: entry.time_date_stamp,
            path,
            version_info: entry.version_info,
            cv_record,
            misc_record,
        });
    }

    Ok(modules)
}

/// Parse the memory list.
pub fn parse_memory_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<MemoryList> {
    let number_of_ranges = read_struct_at::<u32>(reader, location.rva.into())?;
    ensure_fits(
        location,
        mem::size_of::<u32>(),
        number_of_ranges.into(),
        mem::size_of::<MemoryDescriptor>(),
    )?;

    let ranges = (0..number_of_ranges)
        .map(|_| read_struct::<MemoryDescriptor>(reader))
        .collect::<Result<_>>()?;

    Ok(MemoryList { ranges })
}

/// Parse the memory64 list. We don't compute any file offset here; the
/// address space does it when it gets built.
pub fn parse_memory64_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Memory64List> {
    // Read the memory64 list stream.
    let mem_list = read_struct_at::<Memory64ListStream>(reader, location.rva.into())?;
    ensure_fits(
        location,
        mem::size_of::<Memory64ListStream>(),
        mem_list.number_of_memory_ranges,
        mem::size_of::<MemoryDescriptor64>(),
    )?;

    let ranges = (0..mem_list.number_of_memory_ranges)
        .map(|_| read_struct::<MemoryDescriptor64>(reader))
        .collect::<Result<_>>()?;

    Ok(Memory64List {
        base_rva: mem_list.base_rva,
        ranges,
    })
}

/// Parse the system info stream; this is how we know the architecture.
pub fn parse_system_info(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<SystemInfo> {
    // Read the stream info.
    let stream = read_struct_at::<SystemInfoStream>(reader, location.rva.into())?;

    // The service pack string is optional.
    let csd_version = read_optional_minidump_string(reader, stream.csd_version_rva)?;

    Ok(SystemInfo {
        stream,
        csd_version: csd_version.unwrap_or_default(),
    })
}

/// Parse the exception stream.
pub fn parse_exception(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<ExceptionStream> {
    read_struct_at::<ExceptionStream>(reader, location.rva.into())
}

/// Parse the memory info list stream.
pub fn parse_memory_info_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<MemoryInfo>> {
    // Read the memory info list stream.
    let mem_info_list = read_struct_at::<MemoryInfoListStream>(reader, location.rva.into())?;

    // Ensure that each entry is at least as big as what we expected.
    let mem_info_size = mem::size_of::<MemoryInfo>();
    let size_of_entry = mem_info_list.size_of_entry as usize;
    if size_of_entry < mem_info_size {
        return Err(UdmpError::InvalidData(format!(
            "MemoryInfo's size ({}) doesn't match the dump ({})",
            mem_info_size, size_of_entry
        )));
    }

    let size_of_header = mem_info_list.size_of_header as usize;
    ensure_fits(
        location,
        size_of_header,
        mem_info_list.number_of_entries,
        size_of_entry,
    )?;

    // Iterate through every entries; they are `size_of_entry` apart.
    let first_entry = u64::from(location.rva) + size_of_header as u64;
    (0..mem_info_list.number_of_entries)
        .map(|idx| read_struct_at::<MemoryInfo>(reader, first_entry + idx * size_of_entry as u64))
        .collect()
}

/// Read the text that makes up a comment stream, dropping the NUL terminator
/// if there's one.
pub fn parse_comment_a(reader: &mut impl Reader, location: LocationDescriptor32) -> Result<String> {
    let bytes = read_location(reader, location)?;
    let text = bytes.split(|&b| b == 0).next().unwrap_or_default();

    Ok(String::from_utf8_lossy(text).into_owned())
}

/// Same as [`parse_comment_a`] but for UTF16 comments.
pub fn parse_comment_w(reader: &mut impl Reader, location: LocationDescriptor32) -> Result<String> {
    let bytes = read_location(reader, location)?;
    let text_len = bytes
        .chunks_exact(2)
        .position(|c| c == [0, 0])
        .map_or(bytes.len() & !1, |idx| idx * 2);

    utf16_string_from_slice(&bytes[..text_len])
}

/// Parse the misc info stream. Newer versions of the structure append fields
/// at the end, `size_of_info` tells us which one we have.
pub fn parse_misc_info(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<MiscInformation> {
    let rva = location.rva.into();
    let misc_info = read_struct_at::<MiscInfo>(reader, rva)?;

    let process_id = (misc_info.flags1 & MISC1_PROCESS_ID != 0).then_some(misc_info.process_id);
    let process_times = (misc_info.flags1 & MISC1_PROCESS_TIMES != 0).then_some(ProcessTimes {
        create_time: misc_info.process_create_time,
        user_time: misc_info.process_user_time,
        kernel_time: misc_info.process_kernel_time,
    });

    let v2_size = mem::size_of::<MiscInfo2>();
    let has_v2 =
        misc_info.size_of_info as usize >= v2_size && location.data_size as usize >= v2_size;
    let processor_power = if has_v2 && (misc_info.flags1 & MISC1_PROCESSOR_POWER_INFO) != 0 {
        let misc_info2 = read_struct_at::<MiscInfo2>(reader, rva)?;
        Some(ProcessorPowerInfo {
            max_mhz: misc_info2.processor_max_mhz,
            current_mhz: misc_info2.processor_current_mhz,
            mhz_limit: misc_info2.processor_mhz_limit,
            max_idle_state: misc_info2.processor_max_idle_state,
            current_idle_state: misc_info2.processor_current_idle_state,
        })
    } else {
        None
    };

    Ok(MiscInformation {
        process_id,
        process_times,
        processor_power,
    })
}

/// Parse the unloaded module list.
pub fn parse_unloaded_module_list(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<UnloadedModule>> {
    let list = read_struct_at::<UnloadedModuleListStream>(reader, location.rva.into())?;
    let size_of_entry = list.size_of_entry as usize;
    if size_of_entry < mem::size_of::<UnloadedModuleEntry>() {
        return Err(UdmpError::InvalidData(format!(
            "unloaded module entries are too small ({size_of_entry})"
        )));
    }

    let size_of_header = list.size_of_header as usize;
    ensure_fits(
        location,
        size_of_header,
        list.number_of_entries.into(),
        size_of_entry,
    )?;

    let first_entry = u64::from(location.rva) + size_of_header as u64;
    let mut modules = Vec::with_capacity(list.number_of_entries as usize);
    for idx in 0..u64::from(list.number_of_entries) {
        let entry =
            read_struct_at::<UnloadedModuleEntry>(reader, first_entry + idx * size_of_entry as u64)?;
        let base_of_image = entry.base_of_image;
        let end = base_of_image
            .checked_add(entry.size_of_image.into())
            .ok_or(UdmpError::Overflow("unloaded module range"))?;

        modules.push(UnloadedModule {
            range: base_of_image..end,
            checksum: entry.checksum,
            time_date_stamp: entry.time_date_stamp,
            name: read_minidump_string(reader, entry.module_name_rva.into())?,
        });
    }

    Ok(modules)
}

/// Parse the handle data stream.
pub fn parse_handle_data(
    reader: &mut impl Reader,
    location: LocationDescriptor32,
) -> Result<Vec<Handle>> {
    let stream = read_struct_at::<HandleDataStream>(reader, location.rva.into())?;
    let size_of_descriptor = stream.size_of_descriptor as usize;
    if size_of_descriptor < mem::size_of::<HandleDescriptor>() {
        return Err(UdmpError::InvalidData(format!(
            "handle descriptors are too small ({size_of_descriptor})"
        )));
    }

    let size_of_header = stream.size_of_header as usize;
    ensure_fits(
        location,
        size_of_header,
        stream.number_of_descriptors.into(),
        size_of_descriptor,
    )?;

    let first_descriptor = u64::from(location.rva) + size_of_header as u64;
    (0..u64::from(stream.number_of_descriptors))
        .map(|idx| {
            let descriptor = read_struct_at::<HandleDescriptor>(
                reader,
                first_descriptor + idx * size_of_descriptor as u64,
            )?;

            Ok(Handle {
                handle: descriptor.handle,
                type_name: read_optional_minidump_string(reader, descriptor.type_name_rva)?,
                object_name: read_optional_minidump_string(reader, descriptor.object_name_rva)?,
                attributes: descriptor.attributes,
                granted_access: descriptor.granted_access,
                handle_count: descriptor.handle_count,
                pointer_count: descriptor.pointer_count,
            })
        })
        .collect()
}
