//! Checksum-32 as used by the firmware format: the wrapping sum of every
//! payload byte in an unsigned 32-bit accumulator. Headers are excluded,
//! only the payload following a container header is summed.

/// Incremental Checksum-32 accumulator.
///
/// Feeding the same bytes in any chunking yields the same result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum32 {
    sum: u32,
}

impl Checksum32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.sum = self.sum.wrapping_add(u32::from(b));
        }
    }

    pub fn finish(self) -> u32 {
        self.sum
    }
}

/// Checksum-32 of a whole byte slice.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut sum = Checksum32::new();
    sum.update(bytes);
    sum.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(checksum32(&[]), 0);
    }

    #[test]
    fn sums_bytes() {
        assert_eq!(checksum32(&[0xFF, 0xFF]), 0x1FE);
        assert_eq!(checksum32(&[0x01, 0x02, 0x03]), 6);
    }

    #[test]
    fn wraps_at_u32() {
        let mut sum = Checksum32::new();
        sum.sum = u32::MAX;
        sum.update(&[1]);
        assert_eq!(sum.finish(), 0);
    }

    #[test]
    fn invariant_under_chunking() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let whole = checksum32(&data);
        for chunk_size in [1, 3, 7, 64, 1000, 4096] {
            let mut sum = Checksum32::new();
            for chunk in data.chunks(chunk_size) {
                sum.update(chunk);
            }
            assert_eq!(sum.finish(), whole);
        }
    }
}
