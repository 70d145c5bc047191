//! The verification session: a cooperative scanning state machine.
//!
//! A session is driven by one caller thread: `start()` once, `process()`
//! in a loop until the progress counters meet, then `finish()` once. Each
//! `process()` call handles one bounded chunk and returns, so the caller
//! can report progress or stop between calls. Chunk reads are offloaded
//! to a read-ahead thread; dropping the session signals that thread and
//! joins it before the volume is released.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use crate::hashes::{HashAccumulators, Hashes, HashesToCalculate};
use crate::problem::{ProblemList, Severity};
use crate::redump::{RedumpResult, RedumpSource, RedumpStatus, verify_against};
use crate::report::{VerificationResult, summarize};
use crate::volume::{OpenError, RawDiscSource, VolumeSource};

/// One `process()` call handles at most this many bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// How many chunks the reader may run ahead of the caller.
const READ_AHEAD_CHUNKS: usize = 4;

/// Options for one verification run. Immutable once the scan starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Look the finished digests up in the reference database.
    pub redump_verification: bool,
    pub hashes: HashesToCalculate,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            redump_verification: false,
            hashes: HashesToCalculate::recommended(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Scanning,
    Completed,
}

struct ChunkMsg {
    offset: u64,
    data: Vec<u8>,
    /// Set when the read failed or came back short; `data` keeps zeroes
    /// in the unread range so hashing can continue deterministically.
    error: Option<String>,
}

/// Verifies one volume against its checksums and structure.
pub struct VolumeVerifier {
    volume: Arc<dyn VolumeSource>,
    options: VerifierOptions,
    redump_source: Option<Box<dyn RedumpSource>>,
    chunk_size: u64,

    state: State,
    total_bytes: u64,
    bytes_processed: Arc<AtomicU64>,
    accumulators: Option<HashAccumulators>,
    problems: ProblemList,
    /// Byte ranges covered by partition data, for chunk content checks.
    partition_extents: Vec<(u64, u64)>,
    completed: Option<VerificationResult>,

    stop_flag: Arc<AtomicBool>,
    chunk_rx: Option<Receiver<ChunkMsg>>,
    reader: Option<JoinHandle<()>>,
}

impl VolumeVerifier {
    /// Open the image at `path` as a volume and bind a session to it.
    pub fn open(path: &Path, options: VerifierOptions) -> Result<Self, OpenError> {
        let source = RawDiscSource::open(path)?;
        Ok(Self::from_source(Arc::new(source), options))
    }

    /// Bind a session to an already-opened volume source.
    pub fn from_source(volume: Arc<dyn VolumeSource>, options: VerifierOptions) -> Self {
        let total_bytes = volume.len();
        Self {
            volume,
            options,
            redump_source: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: State::Created,
            total_bytes,
            bytes_processed: Arc::new(AtomicU64::new(0)),
            accumulators: None,
            problems: ProblemList::new(),
            partition_extents: Vec::new(),
            completed: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            chunk_rx: None,
            reader: None,
        }
    }

    /// Supply the reference-database transport used by `finish()` when
    /// redump verification is enabled.
    pub fn with_redump_source(mut self, source: Box<dyn RedumpSource>) -> Self {
        self.redump_source = Some(source);
        self
    }

    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "chunk size must be non-zero");
        self.chunk_size = bytes;
        self
    }

    /// One-time setup: reset progress, build the accumulators, validate
    /// the partition structure, and launch the read-ahead worker.
    /// Structural defects found here become problems, never errors.
    /// Calling `start()` again is a no-op.
    pub fn start(&mut self) {
        if self.state != State::Created {
            return;
        }

        self.bytes_processed.store(0, Ordering::Release);
        self.accumulators = Some(HashAccumulators::new(self.options.hashes));
        self.check_structure();

        let (tx, rx) = bounded(READ_AHEAD_CHUNKS);
        self.chunk_rx = Some(rx);
        self.reader = Some(spawn_reader(
            self.volume.clone(),
            self.chunk_size,
            self.stop_flag.clone(),
            tx,
        ));
        self.state = State::Scanning;
        debug!(
            "scan started disc_id={} total_bytes={} chunk_size={}",
            self.volume.disc_id(),
            self.total_bytes,
            self.chunk_size
        );
    }

    fn check_structure(&mut self) {
        let disc_id = self.volume.disc_id();
        if !disc_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            self.problems.add(
                Severity::Medium,
                format!("the disc id {disc_id:?} contains unusual characters"),
            );
        }

        if self.volume.is_wii() && self.volume.partitions().is_empty() {
            self.problems.add(
                Severity::High,
                "the partition table is unreadable or empty",
            );
        }

        for partition in self.volume.partitions() {
            if partition.offset >= self.total_bytes {
                self.problems.add(
                    Severity::High,
                    format!(
                        "the {} partition at offset {:#x} lies past the end of the image; \
                         the image is likely truncated",
                        partition.kind.name(),
                        partition.offset
                    ),
                );
            } else if partition.end > partition.offset {
                self.partition_extents.push((partition.offset, partition.end));
            }
        }
    }

    fn overlaps_partition(&self, offset: u64, len: u64) -> bool {
        let end = offset.saturating_add(len);
        self.partition_extents
            .iter()
            .any(|&(start, stop)| offset < stop && end > start)
    }

    /// Advance the scan by one chunk. A no-op once every byte has been
    /// processed; calling it before `start()` is caller misuse.
    pub fn process(&mut self) {
        match self.state {
            State::Created => panic!("process() called before start()"),
            State::Completed => return,
            State::Scanning => {}
        }
        if self.bytes_processed.load(Ordering::Acquire) >= self.total_bytes {
            return;
        }

        let rx = self
            .chunk_rx
            .as_ref()
            .expect("scanning state always has a chunk receiver");
        let msg = match rx.recv() {
            Ok(msg) => msg,
            Err(_) => {
                // The reader only exits early when told to stop; seeing a
                // closed channel mid-scan means it died on us.
                warn!("chunk reader stopped before the scan was complete");
                self.problems
                    .add(Severity::High, "the image reader stopped unexpectedly");
                self.bytes_processed
                    .store(self.total_bytes, Ordering::Release);
                return;
            }
        };

        if let Some(error) = &msg.error {
            self.problems.add(
                Severity::High,
                format!(
                    "could not read {} bytes at offset {:#x} ({error}); \
                     the unreadable range was treated as zeroes",
                    msg.data.len(),
                    msg.offset
                ),
            );
        } else if self.overlaps_partition(msg.offset, msg.data.len() as u64)
            && msg.data.iter().all(|b| *b == 0)
        {
            // Zero padding between partitions is normal; only blank data
            // inside a partition suggests the image is missing content.
            self.problems.add(
                Severity::Medium,
                format!(
                    "the {} bytes at offset {:#x} are all zeroes; \
                     the partition may be missing data",
                    msg.data.len(),
                    msg.offset
                ),
            );
        }

        self.accumulators
            .as_mut()
            .expect("scanning state always has accumulators")
            .update(&msg.data);

        self.bytes_processed
            .fetch_add(msg.data.len() as u64, Ordering::AcqRel);
    }

    /// Current progress. Safe to read from a thread other than the one
    /// driving `process()`.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_done_scanning(&self) -> bool {
        self.bytes_processed() >= self.total_bytes
    }

    /// Finalize the digests and, when requested, consult the reference
    /// database. Lookup failures become `RedumpStatus::Error`; they never
    /// fail the call. Calling `finish()` before the scan is complete is
    /// caller misuse. Repeat calls are no-ops.
    pub fn finish(&mut self) {
        match self.state {
            State::Created => panic!("finish() called before start()"),
            State::Completed => return,
            State::Scanning => {}
        }
        assert!(
            self.is_done_scanning(),
            "finish() called before the scan completed ({} of {} bytes)",
            self.bytes_processed(),
            self.total_bytes
        );

        self.join_reader();

        let hashes = self
            .accumulators
            .take()
            .expect("scanning state always has accumulators")
            .finalize();

        let redump = if !self.options.redump_verification {
            RedumpResult::unknown()
        } else if let Some(source) = &self.redump_source {
            verify_against(source.as_ref(), self.volume.disc_id(), &hashes)
        } else {
            RedumpResult {
                status: RedumpStatus::Error,
                message: "no reference database was configured".to_string(),
            }
        };

        let problems = self.problems.as_slice().to_vec();
        self.completed = Some(VerificationResult {
            summary_text: summarize(redump.status, &problems),
            redump_status: redump.status,
            redump_message: redump.message,
            hashes,
            problems,
        });
        self.state = State::Completed;
        debug!("scan completed disc_id={}", self.volume.disc_id());
    }

    /// The result so far. After `finish()` this is stable and repeatable;
    /// before it, digests are absent, the redump status is `Unknown`, and
    /// the problems are whatever has been found to date.
    pub fn result(&self) -> VerificationResult {
        if let Some(result) = &self.completed {
            return result.clone();
        }
        let problems = self.problems.as_slice().to_vec();
        VerificationResult {
            summary_text: summarize(RedumpStatus::Unknown, &problems),
            redump_status: RedumpStatus::Unknown,
            redump_message: String::new(),
            hashes: Hashes::default(),
            problems,
        }
    }

    fn join_reader(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        // Dropping the receiver unblocks a reader waiting to send.
        self.chunk_rx = None;
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VolumeVerifier {
    fn drop(&mut self) {
        self.join_reader();
    }
}

/// Read the image sequentially, chunk by chunk, a bounded distance ahead
/// of the caller. Failed or short reads are reported in-band and leave
/// the buffer zero-filled past the last byte read.
fn spawn_reader(
    volume: Arc<dyn VolumeSource>,
    chunk_size: u64,
    stop: Arc<AtomicBool>,
    tx: Sender<ChunkMsg>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let total = volume.len();
        let mut offset = 0u64;
        while offset < total {
            if stop.load(Ordering::Acquire) {
                break;
            }
            let len = (total - offset).min(chunk_size) as usize;
            let mut data = vec![0u8; len];
            let error = read_fully(volume.as_ref(), offset, &mut data)
                .err()
                .map(|e| e.to_string());
            if tx.send(ChunkMsg { offset, data, error }).is_err() {
                break;
            }
            offset += len as u64;
        }
    })
}

fn read_fully(volume: &dyn VolumeSource, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = volume.read_at(offset + read as u64, &mut buf[read..])?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{PartitionInfo, PartitionKind};

    /// In-memory volume for driving the session without a file.
    struct MemVolume {
        data: Vec<u8>,
        disc_id: String,
        partitions: Vec<PartitionInfo>,
        wii: bool,
    }

    impl MemVolume {
        fn gc(data: Vec<u8>) -> Self {
            let len = data.len() as u64;
            Self {
                data,
                disc_id: "GALE01".to_string(),
                partitions: vec![PartitionInfo {
                    offset: 0,
                    end: len,
                    kind: PartitionKind::Data,
                }],
                wii: false,
            }
        }
    }

    impl VolumeSource for MemVolume {
        fn len(&self) -> u64 {
            self.data.len() as u64
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
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

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253 + 1) as u8).collect()
    }

    fn drive(verifier: &mut VolumeVerifier) {
        verifier.start();
        while !verifier.is_done_scanning() {
            verifier.process();
        }
        verifier.finish();
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let volume = Arc::new(MemVolume::gc(patterned(10_000)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        verifier.start();

        let mut last = 0u64;
        while !verifier.is_done_scanning() {
            verifier.process();
            let now = verifier.bytes_processed();
            assert!(now >= last);
            assert!(now <= verifier.total_bytes());
            last = now;
        }
        assert_eq!(verifier.bytes_processed(), 10_000);
        verifier.finish();
    }

    #[test]
    fn process_after_completion_is_a_noop() {
        let volume = Arc::new(MemVolume::gc(patterned(5_000)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        verifier.start();
        while !verifier.is_done_scanning() {
            verifier.process();
        }

        let before = (verifier.bytes_processed(), verifier.result().problem_count());
        verifier.process();
        verifier.process();
        assert_eq!(
            (verifier.bytes_processed(), verifier.result().problem_count()),
            before
        );

        verifier.finish();
        let digest = verifier.result().hashes;
        verifier.process();
        verifier.finish();
        assert_eq!(verifier.result().hashes, digest);
    }

    #[test]
    fn chunk_size_does_not_change_digests() {
        let data = patterned(50_000);
        let mut digests = Vec::new();
        for chunk_size in [512u64, 4096, 65_536] {
            let volume = Arc::new(MemVolume::gc(data.clone()));
            let mut verifier = VolumeVerifier::from_source(
                volume,
                VerifierOptions {
                    redump_verification: false,
                    hashes: HashesToCalculate {
                        crc32: true,
                        md5: true,
                        sha1: true,
                    },
                },
            )
            .with_chunk_size(chunk_size);
            drive(&mut verifier);
            digests.push(verifier.result().hashes);
        }
        assert_eq!(digests[0], digests[1]);
        assert_eq!(digests[1], digests[2]);
    }

    #[test]
    fn start_is_idempotent() {
        let volume = Arc::new(MemVolume::gc(patterned(2_048)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        verifier.start();
        verifier.start();
        drive(&mut verifier);
        assert_eq!(verifier.bytes_processed(), 2_048);
    }

    #[test]
    fn partial_result_has_no_digests() {
        let volume = Arc::new(MemVolume::gc(patterned(8_192)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        verifier.start();
        verifier.process();

        let partial = verifier.result();
        assert_eq!(partial.redump_status, RedumpStatus::Unknown);
        assert!(partial.hashes.crc32.is_none());
        assert!(partial.hashes.sha1.is_none());
    }

    #[test]
    fn all_zero_chunk_is_flagged_medium() {
        let volume = Arc::new(MemVolume::gc(vec![0u8; 4_096]));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        drive(&mut verifier);

        let result = verifier.result();
        assert!(result.problem_count() >= 1);
        assert!(
            result
                .problems
                .iter()
                .any(|p| p.severity == Severity::Medium && p.text.contains("all zeroes"))
        );
    }

    #[test]
    fn zero_padding_outside_partitions_is_not_flagged() {
        // Zeroes before the partition are padding; zeroes inside it are
        // missing data.
        let volume = Arc::new(MemVolume {
            data: vec![0u8; 4096],
            disc_id: "GALE01".to_string(),
            partitions: vec![PartitionInfo {
                offset: 2048,
                end: 4096,
                kind: PartitionKind::Data,
            }],
            wii: false,
        });
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        drive(&mut verifier);

        let result = verifier.result();
        let blank: Vec<_> = result
            .problems
            .iter()
            .filter(|p| p.text.contains("all zeroes"))
            .collect();
        assert_eq!(blank.len(), 2, "problems: {:?}", result.problems);
        assert!(blank.iter().all(|p| p.severity == Severity::Medium));
        assert!(blank[0].text.contains("0x800"));
    }

    #[test]
    fn redump_enabled_without_source_reports_error_status() {
        let volume = Arc::new(MemVolume::gc(patterned(1_024)));
        let mut verifier = VolumeVerifier::from_source(
            volume,
            VerifierOptions {
                redump_verification: true,
                hashes: HashesToCalculate::recommended(),
            },
        )
        .with_chunk_size(1024);
        drive(&mut verifier);
        assert_eq!(verifier.result().redump_status, RedumpStatus::Error);
    }

    #[test]
    #[should_panic(expected = "before the scan completed")]
    fn finish_before_scan_complete_panics() {
        let volume = Arc::new(MemVolume::gc(patterned(8_192)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default())
            .with_chunk_size(1024);
        verifier.start();
        verifier.finish();
    }

    #[test]
    #[should_panic(expected = "before start()")]
    fn process_before_start_panics() {
        let volume = Arc::new(MemVolume::gc(patterned(1_024)));
        let mut verifier = VolumeVerifier::from_source(volume, VerifierOptions::default());
        verifier.process();
    }

    #[test]
    fn dropping_a_running_session_leaves_no_worker() {
        let volume = Arc::new(MemVolume::gc(patterned(1 << 20)));
        let mut verifier =
            VolumeVerifier::from_source(volume, VerifierOptions::default()).with_chunk_size(4096);
        verifier.start();
        verifier.process();
        // Drop mid-scan; Drop must stop and join the reader.
        drop(verifier);
    }
}
