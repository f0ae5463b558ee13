//! Parser and extractor for Bosch camera firmware images.
//!
//! A firmware image is a chain of fixed 0x400-byte container headers, each
//! owning a payload that is either XOR-obfuscated or AES-CBC encrypted
//! under an RSA-wrapped per-section key. Decoded payloads hold a sequence
//! of length-prefixed file entries (possibly with nested `RomFS`
//! sub-archives) or a single raw file.
//!
//! [`Firmware`] is the entry point: it owns the byte source, walks the
//! header chain once, and extracts every data-bearing section through a
//! caller-supplied [`Sink`] and [`ExtractObserver`].

pub mod archive;
pub mod checksum;
pub mod crypto;
pub mod error;
pub mod firmware;
pub mod header;
pub mod stream;
pub mod walker;

pub use archive::{DirectorySink, ExtractObserver, NullObserver, Sink, MAX_ARCHIVE_DEPTH};
pub use checksum::checksum32;
pub use crypto::RsaPublicKey;
pub use error::{FirmwareError, Result};
pub use firmware::{ChecksumStatus, ExtractSummary, Firmware, SectionReport};
pub use header::{ContainerHeader, EntryHeader};
