//! Read access to disc-image volumes.
//!
//! A [`VolumeSource`] exposes ordered byte access plus the partition
//! metadata the verifier needs. [`RawDiscSource`] backs it with a flat
//! image file and parses just enough of the disc header to identify the
//! volume and locate its partitions. Anything below the header that looks
//! wrong is left for the verifier to flag while scanning; only an
//! unrecognizable container fails the open.

use std::fs::File;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// Big-endian magic word at offset 0x18 of Wii-style volumes.
pub const WII_MAGIC: u32 = 0x5D1C_9EA3;
/// Big-endian magic word at offset 0x1C of GameCube-style volumes.
pub const GC_MAGIC: u32 = 0xC233_9F3D;

/// Offset of the four partition group descriptors on Wii-style volumes.
const PARTITION_GROUPS_OFFSET: u64 = 0x40000;
const PARTITION_GROUP_COUNT: usize = 4;

const DISC_ID_LEN: usize = 6;
const HEADER_LEN: usize = 0x20;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a recognized disc image: {0}")]
    UnrecognizedFormat(String),
}

/// Partition kinds found in Wii-style partition tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Data,
    Update,
    Channel,
    Other(u32),
}

impl PartitionKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Data,
            1 => Self::Update,
            2 => Self::Channel,
            other => Self::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Data => "data".to_string(),
            Self::Update => "update".to_string(),
            Self::Channel => "channel".to_string(),
            Self::Other(raw) => format!("type {raw:#x}"),
        }
    }
}

/// One partition as exposed by the reader. `end` is exclusive and is
/// clamped to the next partition or the end of the image; offsets may lie
/// beyond the image on truncated dumps, which the verifier reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub offset: u64,
    pub end: u64,
    pub kind: PartitionKind,
}

/// Chunked, positional read access to a volume plus its partition layout.
pub trait VolumeSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;
    fn disc_id(&self) -> &str;
    fn partitions(&self) -> &[PartitionInfo];
    fn is_wii(&self) -> bool;
}

/// A volume backed by a flat image file.
#[derive(Debug)]
pub struct RawDiscSource {
    file: File,
    len: u64,
    disc_id: String,
    partitions: Vec<PartitionInfo>,
    wii: bool,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawDiscSource {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut source = Self {
            file,
            len,
            disc_id: String::new(),
            partitions: Vec::new(),
            wii: false,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        };

        let mut header = [0u8; HEADER_LEN];
        if source.read_exact_at(0, &mut header).is_err() {
            return Err(OpenError::UnrecognizedFormat(format!(
                "{} is too small to hold a disc header",
                path.display()
            )));
        }

        source.disc_id = String::from_utf8_lossy(&header[..DISC_ID_LEN]).into_owned();
        let wii_word = u32::from_be_bytes(header[0x18..0x1C].try_into().unwrap());
        let gc_word = u32::from_be_bytes(header[0x1C..0x20].try_into().unwrap());

        if wii_word == WII_MAGIC {
            source.wii = true;
            source.partitions = source.parse_wii_partitions();
        } else if gc_word == GC_MAGIC {
            // GameCube-style volumes have no partition table; the whole
            // image is one data partition.
            source.partitions = vec![PartitionInfo {
                offset: 0,
                end: len,
                kind: PartitionKind::Data,
            }];
        } else {
            return Err(OpenError::UnrecognizedFormat(format!(
                "{} carries neither disc magic word",
                path.display()
            )));
        }

        debug!(
            "opened volume disc_id={} len={} wii={} partitions={}",
            source.disc_id,
            source.len,
            source.wii,
            source.partitions.len()
        );

        Ok(source)
    }

    /// Parse the four partition group descriptors and their entry tables.
    /// Tables that cannot be read (truncated image) contribute nothing;
    /// the verifier flags an empty partition list during its scan setup.
    fn parse_wii_partitions(&self) -> Vec<PartitionInfo> {
        let mut groups = [0u8; PARTITION_GROUP_COUNT * 8];
        if self.read_exact_at(PARTITION_GROUPS_OFFSET, &mut groups).is_err() {
            return Vec::new();
        }

        let mut partitions = Vec::new();
        for group in 0..PARTITION_GROUP_COUNT {
            let base = group * 8;
            let count = u32::from_be_bytes(groups[base..base + 4].try_into().unwrap());
            let table_offset =
                u64::from(u32::from_be_bytes(groups[base + 4..base + 8].try_into().unwrap())) << 2;
            if count == 0 {
                continue;
            }

            // The count is untrusted image data; a table that cannot fit
            // inside the image is garbage, so skip the group before
            // sizing an allocation from it.
            let table_len = u64::from(count) * 8;
            if table_len > self.len.saturating_sub(table_offset) {
                debug!(
                    "partition group {group} claims {count} entries at {table_offset:#x}, \
                     past the end of the image; skipping"
                );
                continue;
            }

            let mut table = vec![0u8; table_len as usize];
            if self.read_exact_at(table_offset, &mut table).is_err() {
                debug!(
                    "partition group {group} table at {table_offset:#x} is unreadable; skipping"
                );
                continue;
            }

            for entry in table.chunks_exact(8) {
                let offset = u64::from(u32::from_be_bytes(entry[..4].try_into().unwrap())) << 2;
                let kind = u32::from_be_bytes(entry[4..8].try_into().unwrap());
                partitions.push(PartitionInfo {
                    offset,
                    end: offset,
                    kind: PartitionKind::from_raw(kind),
                });
            }
        }

        // A partition runs to the start of the next one, or to the end of
        // the image. Offsets past the end keep a zero-length extent.
        partitions.sort_by_key(|p| p.offset);
        for i in 0..partitions.len() {
            let next = partitions
                .get(i + 1)
                .map(|p| p.offset)
                .unwrap_or(self.len);
            partitions[i].end = next.clamp(partitions[i].offset, self.len.max(partitions[i].offset));
        }
        partitions
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let mut read = 0usize;
        while read < buf.len() {
            let n = self.read_at(offset + read as u64, &mut buf[read..])?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of image",
                ));
            }
            read += n;
        }
        Ok(())
    }
}

impl VolumeSource for RawDiscSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.lock.lock().unwrap();
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            f.read(buf)
        }
    }

    fn disc_id(&self) -> &str {
        &self.disc_id
    }

    fn partitions(&self) -> &[PartitionInfo] {
        &self.partitions
    }

    fn is_wii(&self) -> bool {
        self.wii
    }
}
