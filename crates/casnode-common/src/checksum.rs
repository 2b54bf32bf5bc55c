//! Payload checksums
//!
//! Every object header carries a SHA-256 of its payload (content addressing)
//! and a CRC32C (cheap inline verification by the storage tiers).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Checksum pair recorded in an object header
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadChecksum {
    /// SHA-256 of the payload
    pub sha256: [u8; 32],
    /// CRC32C of the payload
    pub crc32c: u32,
}

impl PayloadChecksum {
    /// Compute both checksums over `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self {
            sha256: Sha256::digest(data).into(),
            crc32c: crc32c::crc32c(data),
        }
    }

    /// Fast check using CRC32C only
    #[must_use]
    pub fn verify_fast(&self, data: &[u8]) -> bool {
        crc32c::crc32c(data) == self.crc32c
    }

    /// Full check of both checksums
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        self.verify_fast(data) && <[u8; 32]>::from(Sha256::digest(data)) == self.sha256
    }
}

impl fmt::Debug for PayloadChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{} crc32c:{:08x}", hex::encode(self.sha256), self.crc32c)
    }
}

/// Streaming checksum calculator, used when a payload arrives in pieces
pub struct ChecksumCalculator {
    crc32c: u32,
    sha256: Sha256,
    len: u64,
}

impl ChecksumCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            crc32c: 0,
            sha256: Sha256::new(),
            len: 0,
        }
    }

    /// Feed more payload bytes
    pub fn update(&mut self, data: &[u8]) {
        self.crc32c = crc32c::crc32c_append(self.crc32c, data);
        self.sha256.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalize and return the computed checksum
    #[must_use]
    pub fn finalize(self) -> PayloadChecksum {
        PayloadChecksum {
            sha256: self.sha256.finalize().into(),
            crc32c: self.crc32c,
        }
    }
}

impl Default for ChecksumCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Quick CRC32C computation
#[inline]
#[must_use]
pub fn compute_crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Quick CRC32C verification
#[inline]
#[must_use]
pub fn verify_crc32c(data: &[u8], expected: u32) -> bool {
    crc32c::crc32c(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_verify() {
        let data = b"hello, world!";
        let checksum = PayloadChecksum::compute(data);

        assert!(checksum.verify_fast(data));
        assert!(checksum.verify(data));

        let corrupted = b"hello, world?";
        assert!(!checksum.verify_fast(corrupted));
        assert!(!checksum.verify(corrupted));
    }

    #[test]
    fn test_streaming_calculator() {
        let data = b"hello, world!";
        let expected = PayloadChecksum::compute(data);

        let mut calc = ChecksumCalculator::new();
        calc.update(b"hello, ");
        calc.update(b"world!");
        assert_eq!(calc.len(), data.len() as u64);
        assert_eq!(calc.finalize(), expected);
    }

    #[test]
    fn test_empty_payload() {
        let calc = ChecksumCalculator::new();
        assert!(calc.is_empty());
        assert_eq!(calc.finalize(), PayloadChecksum::compute(&[]));
    }

    #[test]
    fn test_crc32c_helpers() {
        let crc = compute_crc32c(b"payload");
        assert!(verify_crc32c(b"payload", crc));
        assert!(!verify_crc32c(b"payloaD", crc));
    }
}
