// udmp-walker contributors - October 19 2026
//! This module is where the parsing logic is implemented. The
//! [`UserDumpParser`] can memory map a file by default but users can also build
//! an instance from a slice or any other [`Reader`] they got from somewhere
//! else.
//!
//! Parsing happens in a fixed order: header, stream directory, thread
//! contexts, address space and finally the PEB. Only the header and the stream
//! directory are mandatory; every other step is best-effort and reports what
//! went wrong through [`Diagnostic`]s.
use std::{fmt, mem, ops, path};

use log::{debug, warn};

use crate::error::{Result, UdmpError};
use crate::map::{file_reader, Cursor, FileReader, MappedFileReader, Reader};
use crate::peb::{self, ProcessEnvironment};
use crate::streams::*;
use crate::structs::*;
use crate::vaspace::{AddressSpace, Region};
use crate::virt::VirtReader;

/// A [`ThreadContext`] stores the thread contexts for the architecture that are
/// supported by the library.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadContext {
    /// The Intel x86 thread context.
    X86(Box<ThreadContextX86>),
    /// The Intel x64 thread context.
    X64(Box<ThreadContextX64>),
}

/// Display the [`ThreadContext`] like WinDbg would.
impl fmt::Display for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86(ctx) => ctx.fmt(f),
            Self::X64(ctx) => ctx.fmt(f),
        }
    }
}

/// Architectures supported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// Intel x86, or a 32-bit process running on a 64-bit Windows.
    X86,
    /// Intel x64.
    X64,
}

impl Arch {
    /// Get the [`Arch`] from the processor architecture of the system info
    /// stream. Returns [`None`] for architectures we can't decode contexts of.
    pub fn from_processor_arch(processor_arch: u16) -> Option<Self> {
        match processor_arch {
            ARCH_X86 | ARCH_X86_ON_WIN64 => Some(Self::X86),
            ARCH_X64 => Some(Self::X64),
            _ => None,
        }
    }
}

/// A stream directory entry whose stream type we know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    pub stream_type: StreamType,
    pub location: LocationDescriptor32,
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} @{:x} Size: {}",
            self.stream_type, self.location.rva, self.location.data_size
        )
    }
}

/// Something that went wrong while parsing, but that didn't prevent the rest
/// of the dump from being parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A directory entry has a stream type we don't know about; this is also
    /// how user-defined streams show up.
    UnknownStream {
        stream_type: u32,
        location: LocationDescriptor32,
    },
    /// A directory entry has a stream type we know but don't decode.
    UnsupportedStream {
        stream_type: StreamType,
        location: LocationDescriptor32,
    },
    /// A stream couldn't be decoded.
    Stream {
        stream_type: StreamType,
        reason: String,
    },
    /// The thread context of a thread couldn't be decoded.
    ThreadContext { thread_id: u32, reason: String },
    /// The memory lists couldn't be turned into an address space.
    AddressSpace(String),
    /// The PEB couldn't be walked.
    ProcessEnvironment(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStream {
                stream_type,
                location,
            } => {
                let kind = if *stream_type > LAST_RESERVED_STREAM {
                    "user"
                } else {
                    "unknown"
                };
                write!(
                    f,
                    "{kind} stream {stream_type:#x} @{:x} Size: {}",
                    location.rva, location.data_size
                )
            }
            Self::UnsupportedStream {
                stream_type,
                location,
            } => write!(
                f,
                "{stream_type:?} @{:x} Size: {} is not decoded",
                location.rva, location.data_size
            ),
            Self::Stream {
                stream_type,
                reason,
            } => write!(f, "{stream_type:?} couldn't be decoded: {reason}"),
            Self::ThreadContext { thread_id, reason } => {
                write!(f, "the context of TID {thread_id} couldn't be decoded: {reason}")
            }
            Self::AddressSpace(reason) => write!(f, "no address space: {reason}"),
            Self::ProcessEnvironment(reason) => write!(f, "no PEB: {reason}"),
        }
    }
}

/// This stores everything fished out of a Windows minidump file. Two parses of
/// the same bytes give two equal [`UserDump`]s.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UserDump {
    pub header: Header,
    /// The directory entries with a known stream type, in file order.
    pub directories: Vec<Directory>,
    pub system_info: Option<SystemInfo>,
    pub exception: Option<ExceptionStream>,
    /// The threads in the order of the thread list.
    pub threads: Vec<Thread>,
    /// The extended thread list; their contexts are not decoded.
    pub threads_ex: Option<Vec<ThreadEx>>,
    pub thread_info: Option<Vec<ThreadInfo>>,
    pub modules: Vec<Module>,
    pub unloaded_modules: Option<Vec<UnloadedModule>>,
    pub memory_list: Option<MemoryList>,
    pub memory64_list: Option<Memory64List>,
    pub memory_info: Option<Vec<MemoryInfo>>,
    pub misc_info: Option<MiscInformation>,
    pub handles: Option<Vec<Handle>>,
    pub comment_a: Option<String>,
    pub comment_w: Option<String>,
    /// The virtual address space of the process, if the memory lists allowed
    /// to build one.
    pub address_space: Option<AddressSpace>,
    /// What we could find out from the PEB.
    pub peb: Option<ProcessEnvironment>,
    /// The non-fatal issues encountered while parsing.
    pub diagnostics: Vec<Diagnostic>,
}

impl UserDump {
    /// Get the architecture of the dumped machine.
    pub fn arch(&self) -> Option<Arch> {
        self.system_info
            .as_ref()
            .and_then(|s| Arch::from_processor_arch(s.stream.processor_arch))
    }

    /// Is the architeture X64?
    pub fn is_arch_x64(&self) -> bool {
        matches!(self.arch(), Some(Arch::X64))
    }

    /// Is the architecture X86?
    pub fn is_arch_x86(&self) -> bool {
        matches!(self.arch(), Some(Arch::X86))
    }

    /// The thread id of the foreground thread, if the dump has an exception
    /// stream.
    pub fn foreground_tid(&self) -> Option<u32> {
        self.exception.as_ref().map(|e| e.thread_id)
    }

    /// Find a [`Module`] that includes `address` in its range.
    pub fn get_module(&self, address: u64) -> Option<&Module> {
        self.modules
            .iter()
            .find(|module| module.range.contains(&address))
    }

    /// Find a [`Thread`] with a specific TID.
    pub fn get_thread(&self, id: u32) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == id)
    }

    /// Find the memory [`Region`] that includes `address`.
    pub fn get_region(&self, address: u64) -> Option<&Region> {
        self.address_space.as_ref()?.region(address)
    }
}

/// Render a summary of the dump: header, system info, directories, modules
/// and memory ranges.
impl fmt::Display for UserDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== Minidump File ==")?;
        write!(f, "{}", self.header)?;
        if let Some(system_info) = &self.system_info {
            write!(f, "{system_info}")?;
        }

        writeln!(f, "== Directories ==")?;
        for directory in &self.directories {
            writeln!(f, "{directory}")?;
        }

        writeln!(f, "== Modules ==")?;
        for module in &self.modules {
            writeln!(f, "{module}")?;
        }

        if let Some(memory_list) = &self.memory_list {
            writeln!(f, "== Memory ==")?;
            for range in &memory_list.ranges {
                writeln!(
                    f,
                    "{:016x} {:016x} @{:x}",
                    range.start_of_memory_range, range.memory.data_size, range.memory.rva
                )?;
            }
        }

        if let Some(memory64_list) = &self.memory64_list {
            writeln!(f, "== Memory64 ==")?;
            for range in &memory64_list.ranges {
                writeln!(
                    f,
                    "{:016x} {:016x}",
                    range.start_of_memory_range, range.data_size
                )?;
            }
        }

        for diagnostic in &self.diagnostics {
            writeln!(f, "! {diagnostic}")?;
        }

        Ok(())
    }
}

/// The parser: it owns the byte source and what got parsed out of it. It
/// derefs to the [`UserDump`].
#[derive(Debug)]
pub struct UserDumpParser<R> {
    dump: UserDump,
    /// This is where we hold the backing data, so that the address space can
    /// still be read after parsing.
    reader: R,
}

impl UserDumpParser<MappedFileReader> {
    /// Create an instance from a filepath. This memory maps the file and parses
    /// it.
    pub fn new<P: AsRef<path::Path>>(path: P) -> Result<Self> {
        Self::with_reader(MappedFileReader::new(path)?)
    }
}

impl UserDumpParser<FileReader> {
    /// Create an instance from a filepath, reading the file instead of memory
    /// mapping it.
    pub fn with_file<P: AsRef<path::Path>>(path: P) -> Result<Self> {
        Self::with_reader(file_reader(path)?)
    }
}

impl<'a> UserDumpParser<Cursor<'a>> {
    /// Create an instance from something that dereference to a slice of bytes.
    pub fn with_slice(slice: &'a impl ops::Deref<Target = [u8]>) -> Result<Self> {
        Self::with_reader(Cursor::new(&**slice))
    }
}

impl<R> UserDumpParser<R>
where
    R: Reader,
{
    /// Parse a dump out of `reader`.
    pub fn with_reader(mut reader: R) -> Result<Self> {
        let dump = parse(&mut reader)?;

        Ok(Self { dump, reader })
    }

    /// Get a reference to the parsed [`UserDump`].
    pub fn dump(&self) -> &UserDump {
        &self.dump
    }

    /// Drop the byte source and keep the [`UserDump`].
    pub fn into_dump(self) -> UserDump {
        self.dump
    }

    /// Get a cursor over the virtual address space of the process; [`None`]
    /// if the dump has no usable memory list.
    pub fn virt_reader(&mut self) -> Option<VirtReader<'_, R>> {
        let space = self.dump.address_space.as_ref()?;

        Some(VirtReader::new(space, &mut self.reader))
    }

    /// Read up to `len` bytes of virtual memory at `address`. Fewer bytes are
    /// returned if the region `address` is in ends before.
    pub fn read_virtual(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut reader = self
            .virt_reader()
            .ok_or(UdmpError::UnmappedAddress(address))?;
        reader.seek(address)?;

        reader.read(len)
    }
}

impl<R> ops::Deref for UserDumpParser<R> {
    type Target = UserDump;

    fn deref(&self) -> &Self::Target {
        &self.dump
    }
}

/// Read and validate the header.
fn parse_header(reader: &mut impl Reader) -> Result<Header> {
    // Read the header.
    let hdr = read_struct_at::<Header>(reader, 0)?;

    // If we don't see the expected signature, bail.
    if hdr.signature != EXPECTED_DUMP_SIGNATURE {
        return Err(UdmpError::ContainerFormat(format!(
            "Header signature {:x} is unexpected",
            hdr.signature
        )));
    }

    Ok(hdr)
}

/// Decode the stream a directory entry points to and store it in the dump.
/// Streams of a type we've already seen replace the previous one.
fn parse_stream(
    dump: &mut UserDump,
    reader: &mut impl Reader,
    directory: &Directory,
) -> Result<()> {
    let location = directory.location;
    match directory.stream_type {
        StreamType::Unused | StreamType::Reserved0 | StreamType::Reserved1 => {
            // Reserved, nothing is supposed to be in there.
            debug!("Skipping reserved stream {:?}", directory.stream_type);
        }
        StreamType::ThreadList => dump.threads = parse_thread_list(reader, location)?,
        StreamType::ModuleList => dump.modules = parse_module_list(reader, location)?,
        StreamType::MemoryList => dump.memory_list = Some(parse_memory_list(reader, location)?),
        StreamType::Memory64List => {
            dump.memory64_list = Some(parse_memory64_list(reader, location)?)
        }
        StreamType::SystemInfo => dump.system_info = Some(parse_system_info(reader, location)?),
        StreamType::Exception => dump.exception = Some(parse_exception(reader, location)?),
        StreamType::MemoryInfoList => {
            dump.memory_info = Some(parse_memory_info_list(reader, location)?)
        }
        StreamType::CommentA => dump.comment_a = Some(parse_comment_a(reader, location)?),
        StreamType::CommentW => dump.comment_w = Some(parse_comment_w(reader, location)?),
        StreamType::MiscInfo => dump.misc_info = Some(parse_misc_info(reader, location)?),
        StreamType::UnloadedModuleList => {
            dump.unloaded_modules = Some(parse_unloaded_module_list(reader, location)?)
        }
        StreamType::HandleData => dump.handles = Some(parse_handle_data(reader, location)?),
        StreamType::ThreadExList => {
            dump.threads_ex = Some(parse_thread_ex_list(reader, location)?)
        }
        StreamType::ThreadInfoList => {
            dump.thread_info = Some(parse_thread_info_list(reader, location)?)
        }
        StreamType::FunctionTable
        | StreamType::HandleOperationList
        | StreamType::Token
        | StreamType::JavaScriptData
        | StreamType::SystemMemoryInfo
        | StreamType::ProcessVmCounters
        | StreamType::IptTrace
        | StreamType::ThreadNames
        | StreamType::CeNull
        | StreamType::CeSystemInfo
        | StreamType::CeException
        | StreamType::CeModuleList
        | StreamType::CeProcessList
        | StreamType::CeThreadList
        | StreamType::CeThreadContextList
        | StreamType::CeThreadCallStackList
        | StreamType::CeMemoryVirtualList
        | StreamType::CeMemoryPhysicalList
        | StreamType::CeBucketParameters
        | StreamType::CeProcessModuleMap
        | StreamType::CeDiagnosisList
        | StreamType::LastReserved => {
            return Err(UdmpError::UnsupportedStream(directory.stream_type))
        }
    };

    Ok(())
}

/// Walk the stream directory and decode every stream we know about.
fn parse_directories(dump: &mut UserDump, reader: &mut impl Reader) -> Result<()> {
    let directory_rva = u64::from(dump.header.stream_directory_rva);
    let directory_size = mem::size_of::<RawDirectory>() as u64;

    // Iterate through every entries.
    for idx in 0..u64::from(dump.header.number_of_streams) {
        // Read the directory. Failing to do so is fatal.
        let raw = read_struct_at::<RawDirectory>(reader, directory_rva + idx * directory_size)?;
        let location = raw.location;

        // If we don't know this stream type, keep track of it and move on.
        let stream_type = match StreamType::try_from(raw.stream_type) {
            Ok(stream_type) => stream_type,
            Err(_) => {
                if raw.stream_type > LAST_RESERVED_STREAM {
                    debug!("Found user stream type {:x}", raw.stream_type);
                } else {
                    debug!("Found unknown stream type {:x}", raw.stream_type);
                }

                dump.diagnostics.push(Diagnostic::UnknownStream {
                    stream_type: raw.stream_type,
                    location,
                });
                continue;
            }
        };

        debug!(
            "Found {:?} @{:x} Size: {}",
            stream_type, location.rva, location.data_size
        );
        let directory = Directory {
            stream_type,
            location,
        };
        dump.directories.push(directory);

        // Parse the streams we support. A stream that can't be decoded
        // doesn't prevent us from decoding the other ones.
        match parse_stream(dump, reader, &directory) {
            Ok(()) => {}
            Err(UdmpError::UnsupportedStream(stream_type)) => {
                debug!("Parsing of {stream_type:?} is not implemented");
                dump.diagnostics.push(Diagnostic::UnsupportedStream {
                    stream_type,
                    location,
                });
            }
            Err(e) => {
                warn!("Failed to parse {stream_type:?}: {e}");
                dump.diagnostics.push(Diagnostic::Stream {
                    stream_type,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Read a context structure at `location`, making sure the dump has stored
/// enough bytes for it.
fn read_context<T: Pod>(reader: &mut impl Reader, location: LocationDescriptor32) -> Result<T> {
    let wanted = mem::size_of::<T>();
    if (location.data_size as usize) < wanted {
        return Err(UdmpError::InvalidData(format!(
            "the context is {:#x} bytes but {:#x} are needed",
            location.data_size, wanted
        )));
    }

    read_struct_at::<T>(reader, location.rva.into())
}

/// Decode the context stored at `location` according to the architecture.
/// Returns [`None`] for architectures we don't support.
fn decode_context(
    reader: &mut impl Reader,
    arch: Option<Arch>,
    location: LocationDescriptor32,
) -> Result<Option<ThreadContext>> {
    Ok(match arch {
        Some(Arch::X64) => Some(ThreadContext::X64(Box::new(read_context(
            reader, location,
        )?))),
        Some(Arch::X86) => Some(ThreadContext::X86(Box::new(read_context(
            reader, location,
        )?))),
        None => None,
    })
}

/// Decode the context of every thread; this needs the system info stream to
/// know which layout to use. A context that can't be decoded doesn't prevent
/// the other ones from being decoded.
fn parse_thread_contexts(dump: &mut UserDump, reader: &mut impl Reader) {
    let Some(system_info) = &dump.system_info else {
        debug!("No system info stream, skipping thread contexts");
        return;
    };

    let arch = Arch::from_processor_arch(system_info.stream.processor_arch);
    if arch.is_none() {
        debug!(
            "Unsupported architecture {:x}, skipping thread contexts",
            system_info.stream.processor_arch
        );
    }

    for thread in &mut dump.threads {
        match decode_context(reader, arch, thread.context_location) {
            Ok(context) => thread.context = context,
            Err(e) => {
                warn!("Failed to decode the context of TID {}: {e}", thread.id);
                dump.diagnostics.push(Diagnostic::ThreadContext {
                    thread_id: thread.id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Build the address space out of the memory lists, if there's any.
fn build_address_space(dump: &mut UserDump) {
    if dump.memory_list.is_none() && dump.memory64_list.is_none() {
        debug!("No memory list, the address space is unavailable");
        return;
    }

    match AddressSpace::new(dump.memory_list.as_ref(), dump.memory64_list.as_ref()) {
        Ok(space) => {
            debug!(
                "Built a {:?} address space with {} regions",
                space.bitness(),
                space.regions().count()
            );
            dump.address_space = Some(space);
        }
        Err(e) => {
            warn!("Failed to build the address space: {e}");
            dump.diagnostics.push(Diagnostic::AddressSpace(e.to_string()));
        }
    }
}

/// Walk the PEB off the first thread's TEB.
fn parse_peb(dump: &mut UserDump, reader: &mut impl Reader) {
    let Some(space) = &dump.address_space else {
        return;
    };

    let Some(thread) = dump.threads.first() else {
        debug!("No thread, can't find the PEB");
        return;
    };

    let mut virt_reader = VirtReader::new(space, reader);
    match peb::walk(&mut virt_reader, thread.teb) {
        Ok(peb) => dump.peb = Some(peb),
        Err(e) => {
            warn!("Failed to walk the PEB: {e}");
            dump.diagnostics.push(Diagnostic::ProcessEnvironment(e.to_string()));
        }
    }
}

/// Parse a whole dump. Only a bad header or stream directory makes this fail.
pub fn parse(reader: &mut impl Reader) -> Result<UserDump> {
    let mut dump = UserDump {
        header: parse_header(reader)?,
        ..Default::default()
    };

    parse_directories(&mut dump, reader)?;
    parse_thread_contexts(&mut dump, reader);
    build_address_space(&mut dump);
    parse_peb(&mut dump, reader);

    Ok(dump)
}

#[cfg(test)]
mod tests {
    use core::fmt::Debug;

    use super::*;

    #[test]
    fn assert_traits() {
        fn assert_traits_<T: Send + Sync + Debug>() {}
        assert_traits_::<UserDump>();
        assert_traits_::<UserDumpParser<Cursor>>();
    }

    #[test]
    fn arch() {
        assert_eq!(Arch::from_processor_arch(ARCH_X64), Some(Arch::X64));
        assert_eq!(Arch::from_processor_arch(ARCH_X86), Some(Arch::X86));
        assert_eq!(Arch::from_processor_arch(ARCH_X86_ON_WIN64), Some(Arch::X86));
        // ARM64.
        assert_eq!(Arch::from_processor_arch(12), None);
    }

    #[test]
    fn contexts_need_enough_room() {
        let bytes = vec![0x41; mem::size_of::<ThreadContextX64>()];
        let mut cursor = Cursor::new(&bytes);
        let location = LocationDescriptor32 {
            data_size: mem::size_of::<ThreadContextX86>() as u32,
            rva: 0,
        };

        assert!(matches!(
            decode_context(&mut cursor, Some(Arch::X86), location),
            Ok(Some(ThreadContext::X86(ctx))) if ctx.eax == 0x4141_4141
        ));
        assert!(matches!(
            decode_context(&mut cursor, Some(Arch::X64), location),
            Err(UdmpError::InvalidData(_))
        ));
        assert!(matches!(
            decode_context(&mut cursor, None, location),
            Ok(None)
        ));
    }
}
