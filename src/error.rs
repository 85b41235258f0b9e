// udmp-walker contributors - October 19 2026
//! This module defines the errors the parser can return.
use std::{io, string};

use thiserror::Error;

use crate::structs::StreamType;

pub type Result<T> = std::result::Result<T, UdmpError>;

#[derive(Debug, Error)]
pub enum UdmpError {
    #[error("invalid minidump header: {0}")]
    ContainerFormat(String),
    #[error("stream {0:?} is recognized but not decoded")]
    UnsupportedStream(StreamType),
    #[error("stream type {0:#x} is unknown")]
    UnknownStream(u32),
    #[error("invalid address space: {0}")]
    AddressSpace(String),
    #[error("virtual address {0:#x} is not backed by any memory region")]
    UnmappedAddress(u64),
    #[error("the dump ends before {wanted:#x} bytes could be read at offset {rva:#x}")]
    TruncatedRead { rva: u64, wanted: usize },
    #[error("only {available:#x} bytes out of {wanted:#x} are mapped at {address:#x}")]
    ShortRead {
        address: u64,
        wanted: usize,
        available: usize,
    },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("overflow: {0}")]
    Overflow(&'static str),
    #[error("utf16: {0}")]
    Utf16(#[from] string::FromUtf16Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}
