use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Disc image to verify (raw GameCube/Wii-style volume)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Reference database dat file; enables redump verification
    #[arg(long)]
    pub redump_dat: Option<PathBuf>,

    /// Skip the CRC32 checksum (on by default)
    #[arg(long)]
    pub no_crc32: bool,

    /// Calculate an MD5 checksum (off by default)
    #[arg(long)]
    pub md5: bool,

    /// Skip the SHA-1 checksum (on by default)
    #[arg(long)]
    pub no_sha1: bool,

    /// Chunk size, in MiB
    #[arg(long, default_value_t = 4)]
    pub chunk_size_mib: u64,

    /// Seconds between progress log lines
    #[arg(long, default_value_t = 2)]
    pub progress_interval: u64,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
