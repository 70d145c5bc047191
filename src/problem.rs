//! Problems found while scanning a volume, tagged with a severity.

/// How badly a problem is expected to affect the dump.
///
/// `High` means the image is almost certainly unusable, `Low` is an
/// informational deviation from a known-good layout. The ordering is by
/// impact so callers can sort or filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A single anomaly found during scanning. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub text: String,
}

impl Problem {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }
}

/// Append-only problem list. Detection order is preserved; repeated
/// conditions each get their own entry.
#[derive(Debug, Default)]
pub struct ProblemList {
    problems: Vec<Problem>,
}

impl ProblemList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, severity: Severity, text: impl Into<String>) {
        self.problems.push(Problem::new(severity, text));
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn as_slice(&self) -> &[Problem] {
        &self.problems
    }

    /// Number of problems at the given severity.
    pub fn count_at(&self, severity: Severity) -> usize {
        self.problems
            .iter()
            .filter(|p| p.severity == severity)
            .count()
    }
}
