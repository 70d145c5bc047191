//! Streaming integrity verification for optical disc images.
//!
//! A [`verifier::VolumeVerifier`] scans a volume chunk by chunk, feeding
//! every byte to the enabled checksum algorithms exactly once while
//! collecting structural problems, then optionally matches the finished
//! digests against a reference database:
//!
//! ```no_run
//! use discverify::verifier::{VerifierOptions, VolumeVerifier};
//!
//! let mut verifier =
//!     VolumeVerifier::open("game.iso".as_ref(), VerifierOptions::default())?;
//! verifier.start();
//! while !verifier.is_done_scanning() {
//!     verifier.process();
//! }
//! verifier.finish();
//! println!("{}", verifier.result().summary_text);
//! # Ok::<(), discverify::volume::OpenError>(())
//! ```

pub mod cli;
pub mod hashes;
pub mod logging;
pub mod problem;
pub mod redump;
pub mod report;
pub mod verifier;
pub mod volume;
