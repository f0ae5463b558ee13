//! Per-section key recovery.
//!
//! A container header embeds a 256-byte key blob. All-zero means the
//! section is only XOR-obfuscated with a fixed byte. Anything else is the
//! vendor's RSA-wrapped AES key material: applying the public key to the
//! blob (raw modular exponentiation, the inverse of the private-key
//! operation that produced it) yields a record of a 4-byte big-endian key
//! length, the AES key, and a trailing 16-byte IV.

use num_bigint::BigUint;

use crate::{
    error::{FirmwareError, Result},
    header::ContainerHeader,
    stream::{Transform, BLOCK_LEN},
};

/// Constant applied to obfuscated (unencrypted) section payloads.
pub const XOR_KEY: u8 = 0x42;

/// Modulus of the vendor's firmware signing key, big-endian.
const VENDOR_MODULUS: [u8; 256] = [
    0x97, 0x80, 0x8d, 0xae, 0x5c, 0x5b, 0xce, 0xa1, 0xb4, 0x35, 0x41, 0x07, 0x33, 0xa6, 0x68, 0xe3,
    0xcb, 0x95, 0x7f, 0x8e, 0x99, 0x12, 0x52, 0xc6, 0x5c, 0xb5, 0x09, 0x0c, 0xa3, 0x1a, 0x99, 0x50,
    0x12, 0xe0, 0x3d, 0xf7, 0xb6, 0x6a, 0xf3, 0xe5, 0x0c, 0xbc, 0x0a, 0x69, 0x91, 0xef, 0x98, 0xd7,
    0x16, 0x0a, 0xf6, 0x8e, 0x8c, 0x4e, 0x76, 0x4b, 0x32, 0x96, 0xc9, 0xeb, 0x93, 0x2e, 0x01, 0x60,
    0x4d, 0xf7, 0xea, 0x1c, 0xbe, 0x53, 0x6c, 0x69, 0xe3, 0x35, 0x38, 0x5c, 0xc5, 0x79, 0x87, 0x1d,
    0xd1, 0x73, 0xdf, 0x2b, 0x56, 0x87, 0x47, 0x60, 0xa6, 0x00, 0x65, 0x46, 0xc1, 0xe8, 0x1f, 0x83,
    0xb3, 0xcc, 0xd2, 0x42, 0x0f, 0xdc, 0x24, 0xae, 0xd1, 0xde, 0x84, 0x43, 0x49, 0x1f, 0x8d, 0x49,
    0xd9, 0xf6, 0xd8, 0x81, 0xd1, 0x34, 0xae, 0x75, 0x3d, 0xe4, 0x35, 0x88, 0x80, 0xba, 0x94, 0x91,
    0x3e, 0xe7, 0xde, 0x8e, 0xab, 0x8f, 0xc3, 0x0c, 0xc2, 0xc5, 0xe0, 0xaf, 0xdf, 0xb7, 0x58, 0x7a,
    0x24, 0xb9, 0xa3, 0x99, 0x3e, 0x78, 0x8a, 0x01, 0x36, 0x27, 0xbc, 0xfe, 0xf0, 0x1d, 0xb9, 0xc1,
    0xd1, 0x15, 0xdd, 0x03, 0x3b, 0x79, 0x3d, 0xc7, 0xc4, 0xd5, 0x01, 0x08, 0x8c, 0x07, 0x21, 0x0a,
    0x45, 0xc8, 0xaa, 0x98, 0xf1, 0xb1, 0x08, 0xbf, 0x1a, 0xa2, 0x9f, 0x2c, 0x2c, 0x2b, 0xa6, 0xdb,
    0xbe, 0x60, 0x1f, 0x30, 0x58, 0xa1, 0x05, 0x7e, 0x98, 0x4f, 0xfb, 0xa9, 0x15, 0x0a, 0x4a, 0x3e,
    0x6f, 0xd9, 0xdc, 0x78, 0x1e, 0x9a, 0xe4, 0xb9, 0x7e, 0xfe, 0x7f, 0x95, 0xa3, 0x6a, 0x0f, 0x97,
    0x5e, 0x46, 0x52, 0xe7, 0xf3, 0xba, 0x13, 0x30, 0x76, 0x67, 0x05, 0x42, 0x47, 0xa6, 0xb5, 0x6e,
    0x36, 0xbf, 0x50, 0x06, 0x61, 0xca, 0x09, 0xc0, 0x67, 0x40, 0xf1, 0x10, 0x48, 0x19, 0x8c, 0x5b,
];

/// RSA public key used to unwrap section key blobs.
///
/// The operation is a raw "public decrypt": modular exponentiation with
/// the public exponent, no padding scheme, the same primitive a signature
/// verification uses.
#[derive(Debug, Clone)]
pub struct RsaPublicKey {
    modulus:  BigUint,
    exponent: BigUint,
}

impl RsaPublicKey {
    pub fn new(modulus_be: &[u8], exponent_be: &[u8]) -> Self {
        Self {
            modulus:  BigUint::from_bytes_be(modulus_be),
            exponent: BigUint::from_bytes_be(exponent_be),
        }
    }

    /// The key Bosch signs camera firmware with.
    pub fn vendor() -> Self {
        Self::new(&VENDOR_MODULUS, &[0x01, 0x00, 0x01])
    }

    /// Raw modular exponentiation of `blob`, big-endian in and out with
    /// leading zeroes stripped.
    pub fn public_decrypt(&self, blob: &[u8]) -> Vec<u8> {
        BigUint::from_bytes_be(blob)
            .modpow(&self.exponent, &self.modulus)
            .to_bytes_be()
    }
}

/// AES key and IV recovered from a section's key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AesKey {
    Aes128 { key: [u8; 16], iv: [u8; BLOCK_LEN] },
    Aes256 { key: [u8; 32], iv: [u8; BLOCK_LEN] },
}

impl AesKey {
    /// Parses the unwrapped key record: 4-byte big-endian key length (16
    /// or 32), the key, a trailing 16-byte IV. Nothing else is tolerated.
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < 4 {
            return Err(FirmwareError::MalformedKeyBlob {
                reason: format!("key record of {} bytes is too short", record.len()),
            });
        }
        let declared = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        if declared != 16 && declared != 32 {
            return Err(FirmwareError::MalformedKeyBlob {
                reason: format!("AES key length field is {declared}, not 128 or 256 bits"),
            });
        }
        let expected = 4 + declared as usize + BLOCK_LEN;
        if record.len() != expected {
            return Err(FirmwareError::MalformedKeyBlob {
                reason: format!(
                    "key record is {} bytes, length field implies {expected}",
                    record.len()
                ),
            });
        }
        let mut iv = [0u8; BLOCK_LEN];
        iv.copy_from_slice(&record[record.len() - BLOCK_LEN..]);
        if declared == 16 {
            let mut key = [0u8; 16];
            key.copy_from_slice(&record[4..20]);
            Ok(AesKey::Aes128 { key, iv })
        } else {
            let mut key = [0u8; 32];
            key.copy_from_slice(&record[4..36]);
            Ok(AesKey::Aes256 { key, iv })
        }
    }

    pub fn transform(&self) -> Transform {
        match self {
            AesKey::Aes128 { key, iv } => Transform::aes128_cbc(key, iv),
            AesKey::Aes256 { key, iv } => Transform::aes256_cbc(key, iv),
        }
    }
}

/// Re-aligns the unwrapped bytes to a fixed-width key record. The length
/// field's leading zeroes are part of the record but not of the integer
/// the blob encodes, so the modpow output comes back short.
fn align_record(stripped: Vec<u8>) -> Result<Vec<u8>> {
    const AES128_RECORD: usize = 4 + 16 + BLOCK_LEN;
    const AES256_RECORD: usize = 4 + 32 + BLOCK_LEN;
    let width = if stripped.len() <= AES128_RECORD {
        AES128_RECORD
    } else if stripped.len() <= AES256_RECORD {
        AES256_RECORD
    } else {
        return Err(FirmwareError::MalformedKeyBlob {
            reason: format!(
                "unwrapped key record of {} bytes is larger than any key layout",
                stripped.len()
            ),
        });
    };
    let mut record = vec![0u8; width];
    record[width - stripped.len()..].copy_from_slice(&stripped);
    Ok(record)
}

/// Decides how a section's payload is recovered: an all-zero key blob
/// selects the XOR obfuscation path, anything else is unwrapped with the
/// RSA public key and selects AES-CBC.
pub fn resolve_transform(header: &ContainerHeader, rsa: &RsaPublicKey) -> Result<Transform> {
    if !header.has_key_blob() {
        return Ok(Transform::Xor(XOR_KEY));
    }
    let record = align_record(rsa.public_decrypt(&header.key_blob))?;
    let key = AesKey::parse(&record)?;
    Ok(key.transform())
}
