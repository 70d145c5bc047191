//! The read-only result surface of a finished verification.

use crate::hashes::Hashes;
use crate::problem::{Problem, Severity};
use crate::redump::RedumpStatus;

/// Everything a verification run produced. Purely assembled from what the
/// session accumulated; nothing in here is recomputed.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub summary_text: String,
    pub redump_status: RedumpStatus,
    pub redump_message: String,
    pub hashes: Hashes,
    pub problems: Vec<Problem>,
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self {
            summary_text: String::new(),
            redump_status: RedumpStatus::Unknown,
            redump_message: String::new(),
            hashes: Hashes::default(),
            problems: Vec::new(),
        }
    }
}

impl VerificationResult {
    pub fn problem_count(&self) -> usize {
        self.problems.len()
    }

    /// Panics if `i` is out of range; an out-of-range index is caller
    /// misuse, not a recoverable condition.
    pub fn problem(&self, i: usize) -> &Problem {
        &self.problems[i]
    }
}

/// Compose the one-line human summary from the lookup status and the
/// severity histogram.
pub fn summarize(status: RedumpStatus, problems: &[Problem]) -> String {
    let high = problems.iter().filter(|p| p.severity == Severity::High).count();
    let medium = problems
        .iter()
        .filter(|p| p.severity == Severity::Medium)
        .count();
    let low = problems.iter().filter(|p| p.severity == Severity::Low).count();

    let verdict = match status {
        RedumpStatus::GoodDump if high + medium + low == 0 => {
            return "This is a good dump.".to_string();
        }
        RedumpStatus::GoodDump => "The dump matches its reference record, but problems were found.",
        RedumpStatus::BadDump => "This is a bad dump.",
        RedumpStatus::Error => "The reference database could not be consulted.",
        RedumpStatus::Unknown if high > 0 => {
            "Serious problems were found. The dump is very likely broken."
        }
        RedumpStatus::Unknown if medium > 0 => {
            "Problems were found. The dump may not work correctly."
        }
        RedumpStatus::Unknown if low > 0 => "Minor deviations were found.",
        RedumpStatus::Unknown => return "No problems were found.".to_string(),
    };

    format!("{verdict} ({high} high, {medium} medium, {low} low severity problems)")
}
