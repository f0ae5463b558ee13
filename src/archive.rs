//! Archive extraction from a decoded section stream.
//!
//! A section payload is either a sequence of 0x40-byte entry headers, each
//! followed by its padded file contents and closed by a zero-length
//! terminator record, or a single raw file with no entry table at all (the
//! two are told apart by the entry magic in the first 0x40 bytes).
//!
//! Entries whose filename starts with `RomFS` embed a nested archive of
//! the same shape and are descended into recursively, into a `RomFS`
//! subdirectory of the current destination.
//!
//! File writing is a collaborator behind the [`Sink`] trait; progress goes
//! through an explicit [`ExtractObserver`] so extraction stays
//! deterministic and testable.

use std::{
    fs, io,
    io::{Cursor, Read},
    path::{Component, Path, PathBuf},
};

use crate::{
    error::{FirmwareError, Result},
    header::{EntryHeader, ENTRY_HEADER_LEN, ENTRY_MAGIC},
};

/// Recursion fail-safe. The format itself does not bound nesting; real
/// images show a single level.
pub const MAX_ARCHIVE_DEPTH: usize = 8;

/// Filename prefix marking an entry as a nested sub-archive.
pub const ROMFS_PREFIX: &str = "RomFS";

/// Receiver for extracted files. Paths are relative to the extraction
/// root; intermediate directories are the sink's concern.
pub trait Sink: Sync {
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Writes extracted files into a directory tree on disk.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Sink for DirectorySink {
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)
    }
}

/// Progress and diagnostics observer passed into extraction.
pub trait ExtractObserver: Sync {
    /// Called once per extracted entry.
    fn on_entry(&self, _name: &str, _length: u32) {}
    /// Called when a section's payload checksum does not match its header.
    /// Never fatal; extraction proceeds.
    fn on_checksum_mismatch(&self, _target: u32, _declared: u32, _actual: u32) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl ExtractObserver for NullObserver {}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Validates an entry filename and joins it onto `dest`. Entry names are
/// attacker-controlled: absolute paths and parent components are refused.
fn entry_path(dest: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    let unsafe_component = rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if name.is_empty() || rel.is_absolute() || unsafe_component {
        return Err(FirmwareError::UnsafePath { name: name.into() });
    }
    Ok(dest.join(rel))
}

/// Extracts one decoded section stream into `dest` (relative to the sink
/// root). Returns the number of files written.
///
/// `fallback_name` names the output when the stream turns out to be a
/// single raw file without an entry table.
pub fn extract_archive<R: Read>(
    reader: &mut R,
    dest: &Path,
    fallback_name: &str,
    sink: &dyn Sink,
    observer: &dyn ExtractObserver,
) -> Result<u64> {
    extract_inner(reader, dest, fallback_name, sink, observer, 0)
}

fn extract_inner(
    reader: &mut dyn Read,
    dest: &Path,
    fallback_name: &str,
    sink: &dyn Sink,
    observer: &dyn ExtractObserver,
    depth: usize,
) -> Result<u64> {
    if depth >= MAX_ARCHIVE_DEPTH {
        return Err(FirmwareError::ArchiveTooDeep { max: MAX_ARCHIVE_DEPTH });
    }

    let mut head = [0u8; ENTRY_HEADER_LEN];
    let got = read_full(reader, &mut head)?;
    let pos = got as u64;

    if got == ENTRY_HEADER_LEN {
        let first = EntryHeader::parse(&head)?;
        if first.magic == ENTRY_MAGIC {
            return extract_entries(first, reader, pos, dest, sink, observer, depth);
        }
    }

    // no entry table: the whole stream is one raw file
    let mut contents = head[..got].to_vec();
    reader.read_to_end(&mut contents)?;
    let path = entry_path(dest, fallback_name)?;
    sink.write_file(&path, &contents)?;
    observer.on_entry(fallback_name, contents.len() as u32);
    Ok(1)
}

fn extract_entries(
    first: EntryHeader,
    reader: &mut dyn Read,
    mut pos: u64,
    dest: &Path,
    sink: &dyn Sink,
    observer: &dyn ExtractObserver,
    depth: usize,
) -> Result<u64> {
    let mut entry = first;
    let mut written = 0u64;
    loop {
        if entry.is_terminator() {
            break;
        }

        // the padded region between this header and the next
        let padded = u64::from(entry.offset_to_next)
            .checked_sub(ENTRY_HEADER_LEN as u64)
            .filter(|&p| p >= u64::from(entry.file_length))
            .ok_or(FirmwareError::TruncatedInput {
                offset:    pos - ENTRY_HEADER_LEN as u64,
                needed:    ENTRY_HEADER_LEN as u64 + u64::from(entry.file_length),
                available: u64::from(entry.offset_to_next),
            })?;

        let mut region = vec![0u8; padded as usize];
        let got = read_full(reader, &mut region)?;
        if (got as u64) < padded {
            return Err(FirmwareError::TruncatedInput {
                offset:    pos,
                needed:    padded,
                available: got as u64,
            });
        }
        pos += padded;

        let contents = &region[..entry.file_length as usize];
        let path = entry_path(dest, &entry.filename)?;
        sink.write_file(&path, contents)?;
        observer.on_entry(&entry.filename, entry.file_length);
        written += 1;

        if entry.filename.starts_with(ROMFS_PREFIX) {
            written += extract_inner(
                &mut Cursor::new(contents),
                &dest.join(ROMFS_PREFIX),
                &entry.filename,
                sink,
                observer,
                depth + 1,
            )?;
        }

        let mut head = [0u8; ENTRY_HEADER_LEN];
        let got = read_full(reader, &mut head)?;
        if got == 0 {
            // stream consumed exactly; sections may omit the terminator
            break;
        }
        if got < ENTRY_HEADER_LEN {
            return Err(FirmwareError::TruncatedInput {
                offset:    pos,
                needed:    ENTRY_HEADER_LEN as u64,
                available: got as u64,
            });
        }
        entry = EntryHeader::parse(&head)?;
        if entry.magic != ENTRY_MAGIC {
            return Err(FirmwareError::InvalidMagic {
                offset:   pos,
                found:    entry.magic,
                expected: ENTRY_MAGIC,
            });
        }
        pos += ENTRY_HEADER_LEN as u64;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Mutex};

    use zerocopy::{byteorder::big_endian::U32, IntoBytes};

    use super::*;
    use crate::header::RawEntryHeader;

    #[derive(Default)]
    struct MemorySink {
        files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    }

    impl Sink for MemorySink {
        fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }
    }

    fn entry(name: &str, contents: &[u8]) -> Vec<u8> {
        let padded = contents.len().div_ceil(16) * 16;
        let mut filename = [0u8; 32];
        filename[..name.len()].copy_from_slice(name.as_bytes());
        let raw = RawEntryHeader {
            magic:          U32::new(ENTRY_MAGIC),
            offset_to_next: U32::new((ENTRY_HEADER_LEN + padded) as u32),
            filename,
            file_length:    U32::new(contents.len() as u32),
            reserved:       [0; 20],
        };
        let mut out = raw.as_bytes().to_vec();
        out.extend_from_slice(contents);
        out.resize(ENTRY_HEADER_LEN + padded, 0);
        out
    }

    fn terminator() -> Vec<u8> {
        let raw = RawEntryHeader {
            magic:          U32::new(ENTRY_MAGIC),
            offset_to_next: U32::new(ENTRY_HEADER_LEN as u32),
            filename:       [0; 32],
            file_length:    U32::new(0),
            reserved:       [0; 20],
        };
        raw.as_bytes().to_vec()
    }

    fn extract(stream: &[u8]) -> (Result<u64>, BTreeMap<PathBuf, Vec<u8>>) {
        let sink = MemorySink::default();
        let result = extract_archive(
            &mut Cursor::new(stream),
            Path::new(""),
            "fallback.bin",
            &sink,
            &NullObserver,
        );
        let files = sink.files.into_inner().unwrap();
        (result, files)
    }

    #[test]
    fn single_entry_and_terminator() {
        let mut stream = entry("a.bin", &[0x55; 0x10]);
        stream.extend_from_slice(&terminator());
        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files.len(), 1);
        assert_eq!(files[Path::new("a.bin")], vec![0x55; 0x10]);
    }

    #[test]
    fn padding_is_not_emitted() {
        let mut stream = entry("a.bin", b"seven b");
        stream.extend_from_slice(&terminator());
        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files[Path::new("a.bin")], b"seven b");
    }

    #[test]
    fn relative_directories_are_kept() {
        let mut stream = entry("etc/config/net.cfg", b"cfg");
        stream.extend_from_slice(&terminator());
        let (_, files) = extract(&stream);
        assert!(files.contains_key(Path::new("etc/config/net.cfg")));
    }

    #[test]
    fn stream_without_entry_magic_is_a_raw_file() {
        let stream = vec![0x13u8; 100];
        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files[Path::new("fallback.bin")], vec![0x13; 100]);
    }

    #[test]
    fn short_stream_is_a_raw_file() {
        let stream = vec![0xAAu8; 7];
        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files[Path::new("fallback.bin")], vec![0xAA; 7]);
    }

    #[test]
    fn romfs_entry_recurses_into_subdirectory() {
        let mut inner = entry("bin/busybox", b"ELF!");
        inner.extend_from_slice(&terminator());
        let mut stream = entry("RomFS.bin", &inner);
        stream.extend_from_slice(&terminator());

        let (result, files) = extract(&stream);
        // the RomFS blob itself plus the nested file
        assert_eq!(result.unwrap(), 2);
        assert_eq!(files[Path::new("RomFS.bin")], inner);
        assert_eq!(files[Path::new("RomFS/bin/busybox")], b"ELF!");
    }

    #[test]
    fn non_romfs_name_never_recurses() {
        let mut inner = entry("bin/busybox", b"ELF!");
        inner.extend_from_slice(&terminator());
        let mut stream = entry("NotRom.bin", &inner);
        stream.extend_from_slice(&terminator());

        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files.len(), 1);
        assert!(files.contains_key(Path::new("NotRom.bin")));
    }

    #[test]
    fn recursion_depth_is_capped() {
        let mut stream = entry("leaf.bin", b"x");
        stream.extend_from_slice(&terminator());
        for _ in 0..MAX_ARCHIVE_DEPTH {
            let mut outer = entry("RomFS.bin", &stream);
            outer.extend_from_slice(&terminator());
            stream = outer;
        }
        let (result, _) = extract(&stream);
        assert!(matches!(
            result,
            Err(FirmwareError::ArchiveTooDeep { max: MAX_ARCHIVE_DEPTH })
        ));
    }

    #[test]
    fn parent_components_are_refused() {
        let mut stream = entry("../escape.bin", b"nope");
        stream.extend_from_slice(&terminator());
        let (result, files) = extract(&stream);
        assert!(matches!(result, Err(FirmwareError::UnsafePath { .. })));
        assert!(files.is_empty());
    }

    #[test]
    fn bad_magic_mid_stream_is_fatal() {
        let mut stream = entry("a.bin", &[1; 16]);
        stream.extend_from_slice(&[0xFFu8; ENTRY_HEADER_LEN]);
        let (result, _) = extract(&stream);
        assert!(matches!(result, Err(FirmwareError::InvalidMagic { .. })));
    }

    #[test]
    fn missing_terminator_at_exact_end_is_accepted() {
        let stream = entry("a.bin", &[7; 32]);
        let (result, files) = extract(&stream);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(files[Path::new("a.bin")], vec![7; 32]);
    }

    #[test]
    fn declared_length_beyond_padded_region_is_rejected() {
        let mut stream = entry("a.bin", &[1; 16]);
        // corrupt offset_to_next down to the bare header size
        stream[4..8].copy_from_slice(&(ENTRY_HEADER_LEN as u32).to_be_bytes());
        let (result, _) = extract(&stream);
        assert!(matches!(result, Err(FirmwareError::TruncatedInput { .. })));
    }
}
