//! Incremental checksum accumulation over the scanned byte stream.
//!
//! Every enabled algorithm sees every byte exactly once, in stream order.
//! Chunk boundaries never influence the final digest.

/// Which checksums to calculate for a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashesToCalculate {
    pub crc32: bool,
    pub md5: bool,
    pub sha1: bool,
}

impl HashesToCalculate {
    /// Recommended defaults. MD5 is off: it is the slowest of the three
    /// and identifies nothing that SHA-1 does not.
    pub fn recommended() -> Self {
        Self {
            crc32: true,
            md5: false,
            sha1: true,
        }
    }

    pub fn none_enabled(&self) -> bool {
        !self.crc32 && !self.md5 && !self.sha1
    }
}

impl Default for HashesToCalculate {
    fn default() -> Self {
        Self::recommended()
    }
}

pub const CRC32_LEN: usize = 4;
pub const MD5_LEN: usize = 16;
pub const SHA1_LEN: usize = 20;

/// Finalized digests. A field is `None` iff the algorithm was disabled;
/// never a zero-filled placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hashes {
    pub crc32: Option<Vec<u8>>,
    pub md5: Option<Vec<u8>>,
    pub sha1: Option<Vec<u8>>,
}

/// Running state for the enabled algorithms. Disabled algorithms cost
/// neither memory nor update time.
pub struct HashAccumulators {
    crc32: Option<crc32fast::Hasher>,
    md5: Option<md5::Context>,
    sha1: Option<sha1_smol::Sha1>,
}

impl HashAccumulators {
    pub fn new(wanted: HashesToCalculate) -> Self {
        Self {
            crc32: wanted.crc32.then(crc32fast::Hasher::new),
            md5: wanted.md5.then(md5::Context::new),
            sha1: wanted.sha1.then(sha1_smol::Sha1::new),
        }
    }

    /// Feed the next chunk of the stream to every enabled hasher.
    pub fn update(&mut self, data: &[u8]) {
        if let Some(crc) = &mut self.crc32 {
            crc.update(data);
        }
        if let Some(md5) = &mut self.md5 {
            md5.consume(data);
        }
        if let Some(sha1) = &mut self.sha1 {
            sha1.update(data);
        }
    }

    /// Consume the accumulators, yielding the final digests as raw bytes.
    /// CRC32 is emitted big-endian to match how reference databases print it.
    pub fn finalize(self) -> Hashes {
        Hashes {
            crc32: self
                .crc32
                .map(|crc| crc.finalize().to_be_bytes().to_vec()),
            md5: self.md5.map(|md5| md5.compute().0.to_vec()),
            sha1: self.sha1.map(|sha1| sha1.digest().bytes().to_vec()),
        }
    }
}
