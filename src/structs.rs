// udmp-walker contributors - October 19 2026
//! This is where all the raw Windows user-dump structures are stored in.
use std::io::Read;
use std::{fmt, io, mem, slice};

use crate::error::{Result, UdmpError};
use crate::map::Reader;

pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

pub const EXPECTED_DUMP_SIGNATURE: u32 = 0x504d_444d;

pub const WOW64_MAXIMUM_SUPPORTED_EXTENSION: usize = 512;

pub const WOW64_SIZE_OF_80387_REGISTERS: usize = 80;

pub const ARCH_X86: u16 = 0;
pub const ARCH_X64: u16 = 9;
pub const ARCH_X86_ON_WIN64: u16 = 10;

/// Stream types above this value are user-defined streams.
pub const LAST_RESERVED_STREAM: u32 = 0xffff;

pub const MISC1_PROCESS_ID: u32 = 1;
pub const MISC1_PROCESS_TIMES: u32 = 2;
pub const MISC1_PROCESSOR_POWER_INFO: u32 = 4;

/// The stream types a directory entry can be tagged with; see
/// [MINIDUMP_STREAM_TYPE](https://learn.microsoft.com/en-us/windows/win32/api/minidumpapiset/ne-minidumpapiset-minidump_stream_type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Unused,
    Reserved0,
    Reserved1,
    ThreadList,
    ModuleList,
    MemoryList,
    Exception,
    SystemInfo,
    ThreadExList,
    Memory64List,
    CommentA,
    CommentW,
    HandleData,
    FunctionTable,
    UnloadedModuleList,
    MiscInfo,
    MemoryInfoList,
    ThreadInfoList,
    HandleOperationList,
    Token,
    JavaScriptData,
    SystemMemoryInfo,
    ProcessVmCounters,
    IptTrace,
    ThreadNames,
    CeNull,
    CeSystemInfo,
    CeException,
    CeModuleList,
    CeProcessList,
    CeThreadList,
    CeThreadContextList,
    CeThreadCallStackList,
    CeMemoryVirtualList,
    CeMemoryPhysicalList,
    CeBucketParameters,
    CeProcessModuleMap,
    CeDiagnosisList,
    LastReserved,
}

impl TryFrom<u32> for StreamType {
    type Error = UdmpError;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::Unused,
            1 => Self::Reserved0,
            2 => Self::Reserved1,
            3 => Self::ThreadList,
            4 => Self::ModuleList,
            5 => Self::MemoryList,
            6 => Self::Exception,
            7 => Self::SystemInfo,
            8 => Self::ThreadExList,
            9 => Self::Memory64List,
            10 => Self::CommentA,
            11 => Self::CommentW,
            12 => Self::HandleData,
            13 => Self::FunctionTable,
            14 => Self::UnloadedModuleList,
            15 => Self::MiscInfo,
            16 => Self::MemoryInfoList,
            17 => Self::ThreadInfoList,
            18 => Self::HandleOperationList,
            19 => Self::Token,
            20 => Self::JavaScriptData,
            21 => Self::SystemMemoryInfo,
            22 => Self::ProcessVmCounters,
            23 => Self::IptTrace,
            24 => Self::ThreadNames,
            0x8000 => Self::CeNull,
            0x8001 => Self::CeSystemInfo,
            0x8002 => Self::CeException,
            0x8003 => Self::CeModuleList,
            0x8004 => Self::CeProcessList,
            0x8005 => Self::CeThreadList,
            0x8006 => Self::CeThreadContextList,
            0x8007 => Self::CeThreadCallStackList,
            0x8008 => Self::CeMemoryVirtualList,
            0x8009 => Self::CeMemoryPhysicalList,
            0x800a => Self::CeBucketParameters,
            0x800b => Self::CeProcessModuleMap,
            0x800c => Self::CeDiagnosisList,
            LAST_RESERVED_STREAM => Self::LastReserved,
            _ => return Err(UdmpError::UnknownStream(value)),
        })
    }
}

/// Marker for the plain-old-data structures that can be read straight off
/// the dump.
///
/// # Safety
///
/// Every bit pattern has to be a valid value of the implementing type.
pub unsafe trait Pod: Sized {}

macro_rules! impl_pod {
    ($($ty:ty),*) => {
        $(unsafe impl Pod for $ty {})*
    };
}

impl_pod!(
    u8,
    u16,
    u32,
    u64,
    Header,
    LocationDescriptor32,
    RawDirectory,
    SystemInfoStream,
    ExceptionRecord,
    ExceptionStream,
    MemoryInfo,
    MemoryInfoListStream,
    Memory64ListStream,
    MemoryDescriptor64,
    ThreadList,
    MemoryDescriptor,
    ThreadEntry,
    ThreadExEntry,
    ThreadInfoListStream,
    ThreadInfoEntry,
    ModuleList,
    FixedFileInfo,
    ModuleEntry,
    MiscInfo,
    MiscInfo2,
    UnloadedModuleListStream,
    UnloadedModuleEntry,
    HandleDataStream,
    HandleDescriptor,
    FloatingSaveArea32,
    ThreadContextX86,
    ThreadContextX64
);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub signature: u32,
    pub version: u16,
    pub implementation_version: u16,
    pub number_of_streams: u32,
    pub stream_directory_rva: u32,
    pub checksum: u32,
    pub timedatestamp: u32,
    pub flags: u64,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== Header ==")?;
        writeln!(f, "Signature:          {:08x}", self.signature)?;
        writeln!(
            f,
            "Version:            {:04x} ({:04x})",
            self.version, self.implementation_version
        )?;
        writeln!(f, "NumberOfStreams:    {}", self.number_of_streams)?;
        writeln!(f, "StreamDirectoryRva: {:08x}", self.stream_directory_rva)?;
        writeln!(f, "TimeDateStamp:      {:08x}", self.timedatestamp)?;
        writeln!(f, "Flags:              {:016x}", self.flags)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct LocationDescriptor32 {
    pub data_size: u32,
    pub rva: u32,
}

/// A directory entry the way it is stored in the file; the stream type isn't
/// validated yet.
#[derive(Debug, Default)]
#[repr(C)]
pub struct RawDirectory {
    pub stream_type: u32,
    pub location: LocationDescriptor32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct SystemInfoStream {
    pub processor_arch: u16,
    pub processor_level: u16,
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    pub platform_id: u32,
    pub csd_version_rva: u32,
    pub suite_mask: u16,
    pub reserverd2: u16,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct ExceptionRecord {
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_record: u64,
    pub exception_address: u64,
    pub number_parameters: u32,
    pub unused_alignment: u32,
    pub exception_information: [u64; EXCEPTION_MAXIMUM_PARAMETERS],
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct ExceptionStream {
    pub thread_id: u32,
    pub alignment: u32,
    pub exception_record: ExceptionRecord,
    pub thread_context: LocationDescriptor32,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct MemoryInfo {
    pub base_address: u64,
    pub allocation_base: u64,
    pub allocation_protect: u32,
    pub alignment1: u32,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
    pub type_: u32,
    pub alignment2: u32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct MemoryInfoListStream {
    pub size_of_header: u32,
    pub size_of_entry: u32,
    pub number_of_entries: u64,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct Memory64ListStream {
    pub number_of_memory_ranges: u64,
    pub base_rva: u64,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MemoryDescriptor64 {
    pub start_of_memory_range: u64,
    pub data_size: u64,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct ThreadList {
    pub number_of_threads: u32,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MemoryDescriptor {
    pub start_of_memory_range: u64,
    pub memory: LocationDescriptor32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct ThreadEntry {
    pub thread_id: u32,
    pub suspend_count: u32,
    pub priority_class: u32,
    pub priority: u32,
    pub teb: u64,
    pub stack: MemoryDescriptor,
    pub thread_context: LocationDescriptor32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct ThreadExEntry {
    pub thread: ThreadEntry,
    pub backing_store: MemoryDescriptor,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct ThreadInfoListStream {
    pub size_of_header: u32,
    pub size_of_entry: u32,
    pub number_of_entries: u32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct ThreadInfoEntry {
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

#[derive(Default, Debug)]
#[repr(C)]
pub struct ModuleList {
    pub number_of_modules: u32,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FixedFileInfo {
    pub signature: u32,
    pub struc_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

#[derive(Default, Debug)]
#[repr(packed(1))]
pub struct ModuleEntry {
    pub base_of_image: u64,
    pub size_of_image: u32,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub module_name_rva: u32,
    pub version_info: FixedFileInfo,
    pub cv_record: LocationDescriptor32,
    pub misc_record: LocationDescriptor32,
    _reserved0: u64,
    _reserved1: u64,
}

/// `MINIDUMP_MISC_INFO`.
#[derive(Default, Debug)]
#[repr(C)]
pub struct MiscInfo {
    pub size_of_info: u32,
    pub flags1: u32,
    pub process_id: u32,
    pub process_create_time: u32,
    pub process_user_time: u32,
    pub process_kernel_time: u32,
}

/// `MINIDUMP_MISC_INFO_2`; the first fields are a [`MiscInfo`].
#[derive(Default, Debug)]
#[repr(C)]
pub struct MiscInfo2 {
    pub base: MiscInfo,
    pub processor_max_mhz: u32,
    pub processor_current_mhz: u32,
    pub processor_mhz_limit: u32,
    pub processor_max_idle_state: u32,
    pub processor_current_idle_state: u32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct UnloadedModuleListStream {
    pub size_of_header: u32,
    pub size_of_entry: u32,
    pub number_of_entries: u32,
}

#[derive(Default, Debug)]
#[repr(packed(1))]
pub struct UnloadedModuleEntry {
    pub base_of_image: u64,
    pub size_of_image: u32,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub module_name_rva: u32,
}

#[derive(Default, Debug)]
#[repr(C)]
pub struct HandleDataStream {
    pub size_of_header: u32,
    pub size_of_descriptor: u32,
    pub number_of_descriptors: u32,
    pub reserved: u32,
}

/// `MINIDUMP_HANDLE_DESCRIPTOR`; `MINIDUMP_HANDLE_DESCRIPTOR_2` appends an
/// object info RVA we don't decode.
#[derive(Default, Debug)]
#[repr(C)]
pub struct HandleDescriptor {
    pub handle: u64,
    pub type_name_rva: u32,
    pub object_name_rva: u32,
    pub attributes: u32,
    pub granted_access: u32,
    pub handle_count: u32,
    pub pointer_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[repr(C)]
pub struct FloatingSaveArea32 {
    pub control_word: u32,
    pub status_word: u32,
    pub tag_word: u32,
    pub error_offset: u32,
    pub error_selector: u32,
    pub data_offset: u32,
    pub data_selector: u32,
    pub register_area: [u8; WOW64_SIZE_OF_80387_REGISTERS],
    pub cr0_npx_state: u32,
}

impl Default for FloatingSaveArea32 {
    fn default() -> Self {
        // SAFETY: All zero values are fine for every types used by
        // [`FloatingSaveArea32`].
        unsafe { std::mem::zeroed() }
    }
}

/// The context of an Intel X86 thread (`WOW64_CONTEXT`).
#[derive(Debug, Clone, PartialEq)]
#[repr(C)]
pub struct ThreadContextX86 {
    pub context_flags: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
    pub float_save: FloatingSaveArea32,
    pub seg_gs: u32,
    pub seg_fs: u32,
    pub seg_es: u32,
    pub seg_ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ebp: u32,
    pub eip: u32,
    pub seg_cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub seg_ss: u32,
    pub extended_registers: [u8; WOW64_MAXIMUM_SUPPORTED_EXTENSION],
}

impl fmt::Display for ThreadContextX86 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "eax={:08x} ebx={:08x} ecx={:08x} edx={:08x} esi={:08x} edi={:08x}",
            self.eax, self.ebx, self.ecx, self.edx, self.esi, self.edi
        )?;
        writeln!(
            f,
            "eip={:08x} esp={:08x} ebp={:08x}",
            self.eip, self.esp, self.ebp
        )?;
        write!(
            f,
            "cs={:04x}  ss={:04x}  ds={:04x}  es={:04x}  fs={:04x} gs={:04x}              efl={:08x}",
            self.seg_cs,
            self.seg_ss,
            self.seg_ds,
            self.seg_es,
            self.seg_fs,
            self.seg_gs,
            self.eflags
        )
    }
}

impl Default for ThreadContextX86 {
    fn default() -> Self {
        // SAFETY: All zero values are fine for every types used by
        // [`ThreadContextX86`].
        unsafe { std::mem::zeroed() }
    }
}

/// The context of an Intel X64 thread (`CONTEXT` on AMD64).
#[derive(Debug, Clone, PartialEq)]
#[repr(C)]
pub struct ThreadContextX64 {
    pub p1_home: u64,
    pub p2_home: u64,
    pub p3_home: u64,
    pub p4_home: u64,
    pub p5_home: u64,
    pub p6_home: u64,
    pub context_flags: u32,
    pub mxcsr: u32,
    pub seg_cs: u16,
    pub seg_ds: u16,
    pub seg_es: u16,
    pub seg_fs: u16,
    pub seg_gs: u16,
    pub seg_ss: u16,
    pub eflags: u32,
    pub dr0: u64,
    pub dr1: u64,
    pub dr2: u64,
    pub dr3: u64,
    pub dr6: u64,
    pub dr7: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub control_word: u16,
    pub status_word: u16,
    pub tag_word: u8,
    pub reserved1: u8,
    pub error_opcode: u16,
    pub error_offset: u32,
    pub error_selector: u16,
    pub reserved2: u16,
    pub data_offset: u32,
    pub data_selector: u16,
    pub reserved3: u16,
    pub mxcsr2: u32,
    pub mxcsr_mask: u32,
    pub float_registers: [u128; 8],
    pub xmm0: u128,
    pub xmm1: u128,
    pub xmm2: u128,
    pub xmm3: u128,
    pub xmm4: u128,
    pub xmm5: u128,
    pub xmm6: u128,
    pub xmm7: u128,
    pub xmm8: u128,
    pub xmm9: u128,
    pub xmm10: u128,
    pub xmm11: u128,
    pub xmm12: u128,
    pub xmm13: u128,
    pub xmm14: u128,
    pub xmm15: u128,
    pub padding: [u8; 0x60],
    pub vector_registers: [u128; 26],
    pub vector_control: u64,
    pub debug_control: u64,
    pub last_branch_to_rip: u64,
    pub last_branch_from_rip: u64,
    pub last_exception_to_rip: u64,
    pub last_exception_from_rip: u64,
}

impl fmt::Display for ThreadContextX64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rax={:016x} rbx={:016x} rcx={:016x}",
            self.rax, self.rbx, self.rcx
        )?;
        writeln!(
            f,
            "rdx={:016x} rsi={:016x} rdi={:016x}",
            self.rdx, self.rsi, self.rdi
        )?;
        writeln!(
            f,
            "rip={:016x} rsp={:016x} rbp={:016x}",
            self.rip, self.rsp, self.rbp
        )?;
        writeln!(
            f,
            " r8={:016x}  r9={:016x} r10={:016x}",
            self.r8, self.r9, self.r10
        )?;
        writeln!(
            f,
            "r11={:016x} r12={:016x} r13={:016x}",
            self.r11, self.r12, self.r13
        )?;
        writeln!(f, "r14={:016x} r15={:016x}", self.r14, self.r15)?;
        writeln!(f, "cs={:04x}  ss={:04x}  ds={:04x}  es={:04x}  fs={:04x} gs={:04x}              efl={:08x}",
        self.seg_cs, self.seg_ss, self.seg_ds, self.seg_es, self.seg_fs, self.seg_gs,
        self.eflags)?;
        writeln!(
            f,
            "fpcw={:04x}    fpsw={:04x}    fptw={:04x}",
            self.control_word, self.status_word, self.tag_word
        )?;
        for (i, pair) in self.float_registers.chunks(2).enumerate() {
            writeln!(
                f,
                "  st{}={:032x}       st{}={:032x}",
                i * 2,
                pair[0],
                i * 2 + 1,
                pair[1]
            )?;
        }
        let xmms = [
            self.xmm0, self.xmm1, self.xmm2, self.xmm3, self.xmm4, self.xmm5, self.xmm6, self.xmm7,
            self.xmm8, self.xmm9, self.xmm10, self.xmm11, self.xmm12, self.xmm13, self.xmm14,
            self.xmm15,
        ];
        for (i, pair) in xmms.chunks(2).enumerate() {
            let (lo, hi) = (format!("xmm{}", i * 2), format!("xmm{}", i * 2 + 1));
            write!(f, "{:>5}={:032x}     {:>5}={:032x}", lo, pair[0], hi, pair[1])?;
            if i != 7 {
                writeln!(f)?;
            }
        }

        Ok(())
    }
}

impl Default for ThreadContextX64 {
    fn default() -> Self {
        // SAFETY: All zero values are fine for every types used by
        // [`ThreadContextX64`].
        unsafe { std::mem::zeroed() }
    }
}

/// Peek for a `T` from the reader.
pub fn peek_struct<T: Pod>(reader: &mut impl Reader) -> Result<T> {
    let mut s = mem::MaybeUninit::<T>::uninit();
    let size_of_s = mem::size_of::<T>();
    // SAFETY: The slice covers exactly the storage of `s`, and every byte of
    // it gets written by `read_exact` before `assume_init`.
    let slice_over_s = unsafe { slice::from_raw_parts_mut(s.as_mut_ptr() as *mut u8, size_of_s) };

    let pos = reader.stream_position()?;
    reader.read_exact(slice_over_s).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => UdmpError::TruncatedRead {
            rva: pos,
            wanted: size_of_s,
        },
        _ => e.into(),
    })?;
    reader.seek(io::SeekFrom::Start(pos))?;

    // SAFETY: `T` is `Pod` so any bit pattern is valid, and it has been fully
    // initialized above.
    Ok(unsafe { s.assume_init() })
}

/// Read a `T` from the reader.
pub fn read_struct<T: Pod>(reader: &mut impl Reader) -> Result<T> {
    let s = peek_struct(reader)?;
    let size_of_s = mem::size_of::<T>();

    reader.seek(io::SeekFrom::Current(size_of_s as i64))?;

    Ok(s)
}

/// Read a `T` at a specific file offset.
pub fn read_struct_at<T: Pod>(reader: &mut impl Reader, rva: u64) -> Result<T> {
    reader.seek(io::SeekFrom::Start(rva))?;

    read_struct(reader)
}

/// Read `len` bytes at a specific file offset.
pub fn read_bytes_at(reader: &mut impl Reader, rva: u64, len: usize) -> Result<Vec<u8>> {
    reader.seek(io::SeekFrom::Start(rva))?;
    // The length can come straight from the file, so only allocate what is
    // actually there.
    let mut buffer = Vec::new();
    (&mut *reader).take(len as u64).read_to_end(&mut buffer)?;
    if buffer.len() != len {
        return Err(UdmpError::TruncatedRead { rva, wanted: len });
    }

    Ok(buffer)
}

/// Convert a slice of byte into an UTF16 Rust string.
pub fn utf16_string_from_slice(slice: &[u8]) -> Result<String> {
    // Every code point is 2 bytes, so we expect the length to be a multiple of
    // 2.
    if (slice.len() % 2) != 0 {
        return Err(UdmpError::InvalidData(format!(
            "UTF16 buffer of {} bytes isn't % 2",
            slice.len()
        )));
    }

    // Iterate over chunks of 2 bytes to yield u16's.
    let units = slice
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect::<Vec<_>>();

    Ok(String::from_utf16(&units)?)
}
