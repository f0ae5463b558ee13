//! Fixed-layout header records of the firmware container format.
//!
//! All integers are big-endian. A container header occupies 0x400 bytes on
//! disk even though the decoded fields cover only the first part; the
//! remainder holds the signature and key blob regions plus reserved space.
//! Entry headers inside a decoded payload occupy 0x40 bytes.

use zerocopy::{
    byteorder::big_endian::U32, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

use crate::error::{FirmwareError, Result};

/// Size of a [`ContainerHeader`] on disk.
pub const CONTAINER_HEADER_LEN: usize = 0x400;
/// Size of an [`EntryHeader`] inside a decoded payload.
pub const ENTRY_HEADER_LEN: usize = 0x40;

/// Magic of every container header.
pub const CONTAINER_MAGIC: u32 = 0x10122003;
/// Magic of every archive entry header.
pub const ENTRY_MAGIC: u32 = 0xDEAD_AFFE;

/// `target` value marking a header as a pure index node with no payload of
/// its own; the actual sections follow as a chain of sibling headers.
pub const TARGET_NESTED: u32 = 0x10;

/// Firmware versions with a low word above this carry RSA/AES encrypted
/// sections instead of XOR-obfuscated ones.
pub const ENCRYPTED_VERSION_CUTOFF: u32 = 0x0650;

pub const NEGATIVE_LIST_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 256;
pub const KEY_BLOB_LEN: usize = 256;

/// On-disk layout of a container header.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct RawContainerHeader {
    pub magic:         U32,
    pub target:        U32,
    pub variant:       U32,
    pub version:       U32,
    pub length:        U32,
    pub base:          U32,
    pub checksum:      U32,
    pub kind:          U32,
    pub negative_list: [u8; NEGATIVE_LIST_LEN],
    pub reserved0:     [u8; 12],
    pub signature:     [u8; SIGNATURE_LEN],
    pub reserved1:     [u8; 256],
    pub key_blob:      [u8; KEY_BLOB_LEN],
    pub reserved2:     [u8; 180],
}

/// On-disk layout of an archive entry header.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct RawEntryHeader {
    pub magic:          U32,
    pub offset_to_next: U32,
    pub filename:       [u8; 32],
    pub file_length:    U32,
    pub reserved:       [u8; 20],
}

/// A decoded container header.
///
/// Immutable value record; `offset` is the absolute position at which the
/// header was found, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic:         u32,
    pub target:        u32,
    pub variant:       u32,
    pub version:       u32,
    pub length:        u32,
    pub base:          u32,
    pub checksum:      u32,
    pub kind:          u32,
    pub negative_list: [u8; NEGATIVE_LIST_LEN],
    pub key_blob:      [u8; KEY_BLOB_LEN],
    pub offset:        u64,
}

impl ContainerHeader {
    /// Decodes a container header from the start of `bytes`.
    ///
    /// The magic is not validated here so that raw regions remain readable
    /// for inspection; callers that walk the container chain check it.
    pub fn parse(bytes: &[u8], offset: u64) -> Result<Self> {
        let (raw, _) = RawContainerHeader::ref_from_prefix(bytes).map_err(|_| {
            FirmwareError::TruncatedInput {
                offset,
                needed: CONTAINER_HEADER_LEN as u64,
                available: bytes.len() as u64,
            }
        })?;
        Ok(Self {
            magic: raw.magic.get(),
            target: raw.target.get(),
            variant: raw.variant.get(),
            version: raw.version.get(),
            length: raw.length.get(),
            base: raw.base.get(),
            checksum: raw.checksum.get(),
            kind: raw.kind.get(),
            negative_list: raw.negative_list,
            key_blob: raw.key_blob,
            offset,
        })
    }

    /// Whether this header is a pure index node over a chain of siblings.
    pub fn is_nested(&self) -> bool {
        self.target == TARGET_NESTED
    }

    /// Whether the firmware version implies RSA/AES encrypted payloads.
    pub fn is_encrypted(&self) -> bool {
        (self.version & 0xFFFF) > ENCRYPTED_VERSION_CUTOFF
    }

    /// Whether the key blob carries key material (all-zero means the
    /// payload is merely XOR-obfuscated).
    pub fn has_key_blob(&self) -> bool {
        self.key_blob.iter().any(|&b| b != 0)
    }

    /// Absolute offset of the first payload byte. The payload follows the
    /// full 0x400-byte header.
    pub fn payload_start(&self) -> u64 {
        self.offset + CONTAINER_HEADER_LEN as u64
    }

    /// Absolute offset one past the last payload byte.
    pub fn payload_end(&self) -> u64 {
        self.payload_start() + u64::from(self.length)
    }
}

/// A decoded archive entry header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic:          u32,
    pub offset_to_next: u32,
    pub filename:       String,
    pub file_length:    u32,
}

impl EntryHeader {
    /// Decodes an entry header from the start of `bytes`. The magic is not
    /// validated here; a missing entry magic is how raw single-file
    /// payloads are recognized.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (raw, _) = RawEntryHeader::ref_from_prefix(bytes).map_err(|_| {
            FirmwareError::TruncatedInput {
                offset: 0,
                needed: ENTRY_HEADER_LEN as u64,
                available: bytes.len() as u64,
            }
        })?;
        let name_len = memchr::memchr(0, &raw.filename).unwrap_or(raw.filename.len());
        Ok(Self {
            magic: raw.magic.get(),
            offset_to_next: raw.offset_to_next.get(),
            filename: String::from_utf8_lossy(&raw.filename[..name_len]).into_owned(),
            file_length: raw.file_length.get(),
        })
    }

    /// Terminator records close an entry sequence and are never emitted.
    pub fn is_terminator(&self) -> bool {
        self.file_length == 0
    }
}
