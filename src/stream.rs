//! Bounded byte windows and the lazy payload transforms applied to them.
//!
//! A section's payload is exposed as a [`SectionReader`]: a read-only
//! window over the source image combined with one of a closed set of
//! transforms. The transform is applied as bytes are consumed, nothing is
//! decoded ahead of the read position.

use std::io::{self, Read};

use aes::{Aes128, Aes256};
use cbc::cipher::{Block, BlockDecryptMut, KeyIvInit};

use crate::error::{FirmwareError, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size; sections on the encrypted path are padded to this by
/// the format itself, no unpadding scheme applies.
pub const BLOCK_LEN: usize = 16;

/// Payload transform selected by key recovery.
pub enum Transform {
    /// Pass bytes through unchanged.
    Identity,
    /// XOR every byte with a constant (the obfuscation path).
    Xor(u8),
    /// AES-128-CBC decryption.
    Aes128Cbc(Box<Aes128CbcDec>),
    /// AES-256-CBC decryption.
    Aes256Cbc(Box<Aes256CbcDec>),
}

impl Transform {
    pub fn aes128_cbc(key: &[u8; 16], iv: &[u8; BLOCK_LEN]) -> Self {
        Transform::Aes128Cbc(Box::new(Aes128CbcDec::new(key.into(), iv.into())))
    }

    pub fn aes256_cbc(key: &[u8; 32], iv: &[u8; BLOCK_LEN]) -> Self {
        Transform::Aes256Cbc(Box::new(Aes256CbcDec::new(key.into(), iv.into())))
    }

    fn is_block_cipher(&self) -> bool {
        matches!(self, Transform::Aes128Cbc(_) | Transform::Aes256Cbc(_))
    }

    fn decrypt_block(&mut self, block: &mut [u8; BLOCK_LEN]) {
        match self {
            Transform::Aes128Cbc(dec) => {
                dec.decrypt_block_mut(Block::<Aes128CbcDec>::from_mut_slice(block));
            }
            Transform::Aes256Cbc(dec) => {
                dec.decrypt_block_mut(Block::<Aes256CbcDec>::from_mut_slice(block));
            }
            Transform::Identity | Transform::Xor(_) => {}
        }
    }
}

/// Read-only view over `[offset, offset + length)` of a byte source, with
/// a transform applied lazily as bytes are consumed.
pub struct SectionReader<'a> {
    window:    &'a [u8],
    pos:       usize,
    transform: Transform,
    // decrypted-but-unconsumed bytes on the block cipher path
    block:     [u8; BLOCK_LEN],
    block_len: usize,
    block_pos: usize,
}

impl<'a> SectionReader<'a> {
    /// Wraps an already-bounded window.
    pub fn new(window: &'a [u8], transform: Transform) -> Self {
        Self {
            window,
            pos: 0,
            transform,
            block: [0; BLOCK_LEN],
            block_len: 0,
            block_pos: 0,
        }
    }

    /// Bounds `[offset, offset + length)` against `source` before wrapping
    /// it, so that no read can pass beyond the declared section end.
    pub fn bounded(source: &'a [u8], offset: u64, length: u64, transform: Transform) -> Result<Self> {
        let end = offset.checked_add(length).ok_or(FirmwareError::TruncatedInput {
            offset,
            needed: length,
            available: source.len() as u64,
        })?;
        if end > source.len() as u64 {
            return Err(FirmwareError::TruncatedInput {
                offset,
                needed: length,
                available: (source.len() as u64).saturating_sub(offset),
            });
        }
        Ok(Self::new(&source[offset as usize..end as usize], transform))
    }
}

impl Read for SectionReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.transform.is_block_cipher() {
            let n = (self.window.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.window[self.pos..self.pos + n]);
            if let Transform::Xor(key) = &self.transform {
                for b in &mut out[..n] {
                    *b ^= key;
                }
            }
            self.pos += n;
            return Ok(n);
        }
        if self.block_pos == self.block_len {
            let remaining = self.window.len() - self.pos;
            if remaining == 0 {
                return Ok(0);
            }
            if remaining < BLOCK_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "encrypted section length is not a multiple of the cipher block size",
                ));
            }
            self.block.copy_from_slice(&self.window[self.pos..self.pos + BLOCK_LEN]);
            self.pos += BLOCK_LEN;
            self.transform.decrypt_block(&mut self.block);
            self.block_len = BLOCK_LEN;
            self.block_pos = 0;
        }
        let n = (self.block_len - self.block_pos).min(out.len());
        out[..n].copy_from_slice(&self.block[self.block_pos..self.block_pos + n]);
        self.block_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use cbc::cipher::BlockEncryptMut;

    use super::*;

    type Aes128CbcEnc = cbc::Encryptor<Aes128>;

    fn encrypt_aes128(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        assert_eq!(plain.len() % BLOCK_LEN, 0);
        let mut enc = Aes128CbcEnc::new(key.into(), iv.into());
        let mut out = plain.to_vec();
        for chunk in out.chunks_exact_mut(BLOCK_LEN) {
            enc.encrypt_block_mut(Block::<Aes128CbcEnc>::from_mut_slice(chunk));
        }
        out
    }

    #[test]
    fn identity_passes_through() {
        let mut reader = SectionReader::new(b"hello", Transform::Identity);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn xor_transforms_lazily() {
        let data: Vec<u8> = b"obfuscated".iter().map(|b| b ^ 0x42).collect();
        let mut reader = SectionReader::new(&data, Transform::Xor(0x42));
        let mut first = [0u8; 3];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"obf");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"uscated");
    }

    #[test]
    fn bounded_rejects_overrun() {
        let source = [0u8; 32];
        let err = SectionReader::bounded(&source, 16, 32, Transform::Identity).err().unwrap();
        assert!(matches!(
            err,
            FirmwareError::TruncatedInput { offset: 16, needed: 32, available: 16 }
        ));
    }

    #[test]
    fn bounded_limits_reads_to_window() {
        let source: Vec<u8> = (0..64u8).collect();
        let mut reader = SectionReader::bounded(&source, 8, 16, Transform::Identity).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, (8..24u8).collect::<Vec<_>>());
    }

    #[test]
    fn aes_cbc_decrypts_across_small_reads() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plain: Vec<u8> = (0..48u8).collect();
        let cipher = encrypt_aes128(&plain, &key, &iv);

        let mut reader = SectionReader::new(&cipher, Transform::aes128_cbc(&key, &iv));
        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, plain);
    }

    #[test]
    fn aes_cbc_rejects_partial_trailing_block() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let data = [0u8; 20];
        let mut reader = SectionReader::new(&data, Transform::aes128_cbc(&key, &iv));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
