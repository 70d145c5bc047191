//! Shared test infrastructure for verifier tests.
//!
//! Builds synthetic disc images byte by byte and writes them to temp
//! files. Each integration test file imports this module.

#![allow(dead_code)]

use std::io::Write;

use discverify::verifier::VolumeVerifier;
use discverify::volume::{GC_MAGIC, WII_MAGIC};

/// Non-zero repeating fill so content checks see real data.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253 + 1) as u8).collect()
}

/// A GameCube-style volume: id + magic at 0x1C, patterned data.
pub fn gc_image(len: usize, disc_id: &[u8; 6]) -> Vec<u8> {
    assert!(len >= 0x20);
    let mut image = patterned(len);
    image[..6].copy_from_slice(disc_id);
    image[0x1C..0x20].copy_from_slice(&GC_MAGIC.to_be_bytes());
    // Keep the Wii magic slot clear so the image reads as GameCube.
    image[0x18..0x1C].copy_from_slice(&[0, 0, 0, 0]);
    image
}

/// A Wii-style volume whose single data partition starts at
/// `partition_offset`, which may lie beyond the image for truncation
/// scenarios. The partition group table sits at the standard 0x40000.
pub fn wii_image(len: usize, disc_id: &[u8; 6], partition_offset: u32) -> Vec<u8> {
    assert!(len >= 0x40030);
    let mut image = patterned(len);
    image[..6].copy_from_slice(disc_id);
    image[0x18..0x1C].copy_from_slice(&WII_MAGIC.to_be_bytes());
    image[0x1C..0x20].copy_from_slice(&[0, 0, 0, 0]);

    // One group, one partition entry directly after the group table.
    image[0x40000..0x40004].copy_from_slice(&1u32.to_be_bytes());
    image[0x40004..0x40008].copy_from_slice(&(0x40020u32 >> 2).to_be_bytes());
    image[0x40008..0x40020].fill(0);
    image[0x40020..0x40024].copy_from_slice(&(partition_offset >> 2).to_be_bytes());
    image[0x40024..0x40028].copy_from_slice(&0u32.to_be_bytes());
    image
}

pub fn write_image(image: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(image).expect("write image");
    file.flush().expect("flush image");
    file
}

/// Drive a session through the documented start/process/finish loop.
pub fn drive_to_completion(verifier: &mut VolumeVerifier) {
    verifier.start();
    while verifier.bytes_processed() != verifier.total_bytes() {
        verifier.process();
    }
    verifier.finish();
}
