// udmp-walker contributors - October 19 2026
//! This module implements the byte sources the parser can read a dump from:
//! anything that is [`Read`] + [`Seek`] (a [`fs::File`], an [`io::Cursor`]
//! over a slice, etc.), and a memory mapped file ([`MappedFileReader`]).
use std::io::{Read, Seek};
use std::{fmt, fs, io, path};

use memmap2::Mmap;

/// A byte source the parser can seek / read from. The whole parsing logic only
/// ever uses one cursor over it at a time.
pub trait Reader: Read + Seek {}

impl<T> Reader for T where T: Read + Seek {}

/// A cursor over a slice of bytes. This is what [`crate::UserDumpParser::with_slice`]
/// parses from.
pub type Cursor<'a> = io::Cursor<&'a [u8]>;

/// A memory mapped dump file. The mapping is owned by the instance and
/// released when it gets dropped.
pub struct MappedFileReader {
    cursor: io::Cursor<Mmap>,
}

impl MappedFileReader {
    /// Create a new [`MappedFileReader`] from a path. This memory maps the
    /// file read-only.
    pub fn new<P>(path: P) -> io::Result<Self>
    where
        P: AsRef<path::Path>,
    {
        // Open the file..
        let file = fs::File::open(path)?;

        // ..and memory map it.
        // SAFETY: The mapping is read-only and the parser has exclusive access
        // to the dump for its whole lifetime; nobody is expected to truncate
        // or write to the file while it is being parsed.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self {
            cursor: io::Cursor::new(mmap),
        })
    }

    /// Get the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }
}

impl fmt::Debug for MappedFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFileReader")
            .field("len", &self.as_slice().len())
            .field("position", &self.cursor.position())
            .finish()
    }
}

impl Read for MappedFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MappedFileReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// A dump file read through the file system, for the cases where memory
/// mapping isn't desirable.
pub type FileReader = io::BufReader<fs::File>;

/// Open a dump file for buffered reads.
pub fn file_reader<P>(path: P) -> io::Result<FileReader>
where
    P: AsRef<path::Path>,
{
    Ok(io::BufReader::new(fs::File::open(path)?))
}
