use std::io;

use thiserror::Error;

/// Errors produced while parsing or extracting a firmware image.
///
/// Magic and chain errors abort the walk of the whole image; key recovery
/// and decoding errors are isolated to the section that produced them so a
/// multi-target image can still yield partial results. Checksum mismatches
/// are deliberately not represented here, they are diagnostics reported
/// through the extraction summary and observer.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("invalid magic at offset {offset:#x}: got {found:#010x}, expected {expected:#010x}")]
    InvalidMagic {
        offset:   u64,
        found:    u32,
        expected: u32,
    },

    #[error("truncated input at offset {offset:#x}: need {needed} bytes, {available} available")]
    TruncatedInput {
        offset:    u64,
        needed:    u64,
        available: u64,
    },

    #[error("malformed key blob: {reason}")]
    MalformedKeyBlob { reason: String },

    #[error("archive nested deeper than {max} levels")]
    ArchiveTooDeep { max: usize },

    #[error("entry filename escapes the output directory: {name}")]
    UnsafePath { name: String },

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FirmwareError>;
