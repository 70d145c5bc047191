use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use discverify::{
    cli,
    hashes::HashesToCalculate,
    logging,
    redump::DatFile,
    verifier::{VerifierOptions, VolumeVerifier},
};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();

    let hashes = HashesToCalculate {
        crc32: !cli_opts.no_crc32,
        md5: cli_opts.md5,
        sha1: !cli_opts.no_sha1,
    };
    if hashes.none_enabled() {
        bail!("every checksum algorithm is disabled; nothing to verify");
    }

    let options = VerifierOptions {
        redump_verification: cli_opts.redump_dat.is_some(),
        hashes,
    };

    let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    info!(
        "starting run_id={} input={} chunk_mib={} redump={}",
        run_id,
        cli_opts.input.display(),
        cli_opts.chunk_size_mib,
        options.redump_verification
    );

    let mut verifier = VolumeVerifier::open(&cli_opts.input, options)
        .with_context(|| format!("opening {}", cli_opts.input.display()))?
        .with_chunk_size(cli_opts.chunk_size_mib.max(1).saturating_mul(1024 * 1024));
    if let Some(dat) = &cli_opts.redump_dat {
        verifier = verifier.with_redump_source(Box::new(DatFile::new(dat)));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Release))
            .context("installing ctrl-c handler")?;
    }

    verifier.start();

    let interval = Duration::from_secs(cli_opts.progress_interval);
    let mut last_progress = Instant::now();
    while !verifier.is_done_scanning() {
        if cancel.load(Ordering::Acquire) {
            warn!("shutdown requested; abandoning the scan");
            return Ok(());
        }
        verifier.process();
        if last_progress.elapsed() >= interval {
            let processed = verifier.bytes_processed();
            let total = verifier.total_bytes();
            info!(
                "progress {:.1}% ({processed} of {total} bytes)",
                processed as f64 / total.max(1) as f64 * 100.0
            );
            last_progress = Instant::now();
        }
    }
    verifier.finish();

    let result = verifier.result();
    info!("{}", result.summary_text);
    if !result.redump_message.is_empty() {
        info!("redump: {}", result.redump_message);
    }
    if let Some(crc32) = &result.hashes.crc32 {
        info!("crc32 {}", hex::encode(crc32));
    }
    if let Some(md5) = &result.hashes.md5 {
        info!("md5   {}", hex::encode(md5));
    }
    if let Some(sha1) = &result.hashes.sha1 {
        info!("sha1  {}", hex::encode(sha1));
    }
    for problem in &result.problems {
        warn!("[{}] {}", problem.severity.name(), problem.text);
    }

    info!("discverify run finished");
    Ok(())
}
