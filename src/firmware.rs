//! Top-level parse session over one firmware image.
//!
//! The session owns the byte source (a read-only memory map or an owned
//! buffer) for its entire lifetime; bounded views and transform readers
//! borrow from it and never outlive it. Headers are walked once at open;
//! extraction then processes each data-bearing section independently.

use std::{fs::File, path::{Path, PathBuf}};

use memmap2::Mmap;
use rayon::prelude::*;

use crate::{
    archive::{extract_archive, ExtractObserver, Sink},
    checksum::checksum32,
    crypto::{resolve_transform, RsaPublicKey},
    error::{FirmwareError, Result},
    header::ContainerHeader,
    stream::SectionReader,
    walker,
};

enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Source::Mapped(map) => map,
            Source::Owned(buf) => buf,
        }
    }
}

/// Checksum outcome for one section. Mismatches are diagnostics, never
/// fatal: the format's root headers legitimately carry checksum 0 and the
/// authoritative sums live on subheaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Ok,
    Mismatch { declared: u32, actual: u32 },
    /// Root header with a zero checksum; nothing to verify.
    Skipped,
}

/// Result of extracting one data-bearing section.
#[derive(Debug)]
pub struct SectionReport {
    pub target:              u32,
    pub offset:              u64,
    pub files:               u64,
    pub checksum:            ChecksumStatus,
    /// The version field and the key blob disagree about encryption: a
    /// version above the cutoff with an all-zero blob, or the reverse.
    /// The blob decides the transform; this only flags the inconsistency.
    pub encryption_mismatch: bool,
    /// Failure isolated to this section; siblings are unaffected.
    pub error:               Option<FirmwareError>,
}

/// Summary of a whole extraction pass.
#[derive(Debug)]
pub struct ExtractSummary {
    pub files_written: u64,
    pub sections:      Vec<SectionReport>,
}

impl ExtractSummary {
    pub fn has_errors(&self) -> bool {
        self.sections.iter().any(|s| s.error.is_some())
    }

    pub fn checksum_mismatches(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| matches!(s.checksum, ChecksumStatus::Mismatch { .. }))
            .count()
    }
}

/// A parsed firmware image.
pub struct Firmware {
    source:      Source,
    headers:     Vec<ContainerHeader>,
    rsa:         RsaPublicKey,
    source_name: Option<String>,
}

impl Firmware {
    /// Maps `path` read-only and walks its container chain.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // read-only map; the source is never mutated during the walk
        let map = unsafe { Mmap::map(&file)? };
        let headers = walker::walk(&map)?;
        let source_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(Self {
            source: Source::Mapped(map),
            headers,
            rsa: RsaPublicKey::vendor(),
            source_name,
        })
    }

    /// Parses an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let headers = walker::walk(&bytes)?;
        Ok(Self {
            source: Source::Owned(bytes),
            headers,
            rsa: RsaPublicKey::vendor(),
            source_name: None,
        })
    }

    /// Replaces the RSA public key used for key recovery. Firmware signed
    /// with a key other than the built-in vendor key needs this.
    pub fn with_rsa_key(mut self, rsa: RsaPublicKey) -> Self {
        self.rsa = rsa;
        self
    }

    /// The ordered header list, root first: the authoritative map of the
    /// container.
    pub fn headers(&self) -> &[ContainerHeader] {
        &self.headers
    }

    /// Headers that own a payload (everything except nested index nodes).
    pub fn data_headers(&self) -> impl Iterator<Item = &ContainerHeader> {
        self.headers.iter().filter(|h| !h.is_nested())
    }

    /// Extracts every data-bearing section through `sink`.
    ///
    /// With more than one section, each goes into a subdirectory named by
    /// its target value in hex; a single raw image extracts flat. Key
    /// recovery and decoding failures are isolated per section. Sections
    /// share nothing but the read-only source, so they can run on worker
    /// threads; within a section extraction is strictly sequential.
    pub fn extract(
        &self,
        sink: &dyn Sink,
        observer: &dyn ExtractObserver,
        parallel: bool,
    ) -> ExtractSummary {
        let targets: Vec<&ContainerHeader> = self.data_headers().collect();
        let multi = targets.len() > 1;

        let sections: Vec<SectionReport> = if parallel {
            targets
                .par_iter()
                .map(|header| self.extract_section(header, multi, sink, observer))
                .collect()
        } else {
            targets
                .iter()
                .map(|header| self.extract_section(header, multi, sink, observer))
                .collect()
        };

        ExtractSummary {
            files_written: sections.iter().map(|s| s.files).sum(),
            sections,
        }
    }

    /// Name used when a section turns out to be a single raw file.
    fn fallback_name(&self) -> String {
        match &self.source_name {
            Some(stem) => format!("{stem}.bin"),
            None => "firmware.bin".into(),
        }
    }

    fn extract_section(
        &self,
        header: &ContainerHeader,
        multi: bool,
        sink: &dyn Sink,
        observer: &dyn ExtractObserver,
    ) -> SectionReport {
        let dest = if multi {
            PathBuf::from(format!("{:x}", header.target))
        } else {
            PathBuf::new()
        };
        let mut report = SectionReport {
            target:              header.target,
            offset:              header.offset,
            files:               0,
            checksum:            ChecksumStatus::Skipped,
            encryption_mismatch: header.is_encrypted() != header.has_key_blob(),
            error:               None,
        };
        match self.run_section(header, &dest, sink, observer, &mut report) {
            Ok(files) => report.files = files,
            Err(err) => report.error = Some(err),
        }
        report
    }

    fn run_section(
        &self,
        header: &ContainerHeader,
        dest: &Path,
        sink: &dyn Sink,
        observer: &dyn ExtractObserver,
        report: &mut SectionReport,
    ) -> Result<u64> {
        let source = self.source.bytes();
        let start = header.payload_start();
        let length = u64::from(header.length);

        let transform = resolve_transform(header, &self.rsa)?;
        let mut reader = SectionReader::bounded(source, start, length, transform)?;

        // the checksum covers the stored payload bytes, before any
        // transform; the root's zero checksum is informative only
        let payload = &source[start as usize..(start + length) as usize];
        let actual = checksum32(payload);
        report.checksum = if header.offset == 0 && header.checksum == 0 {
            ChecksumStatus::Skipped
        } else if actual == header.checksum {
            ChecksumStatus::Ok
        } else {
            observer.on_checksum_mismatch(header.target, header.checksum, actual);
            ChecksumStatus::Mismatch { declared: header.checksum, actual }
        };

        extract_archive(&mut reader, dest, &self.fallback_name(), sink, observer)
    }
}
