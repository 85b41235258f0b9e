// udmp-walker contributors - October 19 2026
//! A parser for Windows user-mode minidumps.
//!
//! On top of decoding the streams a minidump is made of (threads and their
//! contexts, modules, memory lists, system info, exception, ...), it rebuilds
//! the virtual address space of the dumped process and walks its PEB to
//! recover the command line, the image path, the environment, etc.
//!
//! ```no_run
//! use udmp_walker::UserDumpParser;
//!
//! let mut parser = UserDumpParser::new("user.dmp").unwrap();
//! if let Some(peb) = &parser.peb {
//!     println!("{}", peb.command_line);
//! }
//!
//! let bytes = parser.read_virtual(0x7ff0_0000, 0x10).unwrap();
//! println!("{bytes:x?}");
//! ```
mod error;
pub use error::{Result, UdmpError};

mod map;
pub use map::{file_reader, Cursor, FileReader, MappedFileReader, Reader};

mod structs;
pub use structs::*;

mod streams;
pub use streams::*;

mod vaspace;
pub use vaspace::{AddressSpace, Bitness, Region, Translation};

mod virt;
pub use virt::VirtReader;

mod peb;
pub use peb::{
    parse_environment_block, read_environment_block, read_unicode_string, walk,
    EnvironmentVariable, Offsets, ProcessEnvironment, OFFSETS_32BIT, OFFSETS_64BIT,
};

mod udmp_parser;
pub use udmp_parser::*;
