//! Container chain walk.
//!
//! The root header sits at offset 0. If it declares itself a nested
//! container (`target == 0x10`) the actual sections follow as a chain of
//! sibling headers, each starting where the previous header's payload
//! ends. Every header in the chain is magic-validated; a mismatch means
//! the offset arithmetic has diverged from the true layout, so the walk
//! aborts rather than resynchronize.

use crate::{
    error::{FirmwareError, Result},
    header::{ContainerHeader, CONTAINER_HEADER_LEN, CONTAINER_MAGIC},
};

/// Reads and magic-validates the container header at `offset`.
fn read_header(image: &[u8], offset: u64) -> Result<ContainerHeader> {
    let available = (image.len() as u64).saturating_sub(offset);
    if available < CONTAINER_HEADER_LEN as u64 {
        return Err(FirmwareError::TruncatedInput {
            offset,
            needed: CONTAINER_HEADER_LEN as u64,
            available,
        });
    }
    let header = ContainerHeader::parse(&image[offset as usize..], offset)?;
    if header.magic != CONTAINER_MAGIC {
        return Err(FirmwareError::InvalidMagic {
            offset,
            found: header.magic,
            expected: CONTAINER_MAGIC,
        });
    }
    Ok(header)
}

/// Walks the whole image and returns its ordered header list, root first.
/// This list is the authoritative map of the container.
pub fn walk(image: &[u8]) -> Result<Vec<ContainerHeader>> {
    let root = read_header(image, 0)?;
    let nested = root.is_nested();
    let mut headers = vec![root];
    if nested {
        let mut cursor = CONTAINER_HEADER_LEN as u64;
        while cursor < image.len() as u64 {
            let header = read_header(image, cursor)?;
            cursor = header.payload_end();
            headers.push(header);
        }
    }
    Ok(headers)
}
