//! Testcase outcomes and per-document summaries

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::expectation::Expectation;
use crate::matcher::Reconciliation;
use crate::output::{Line, Output};

/// Which budget a timeout exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// The testcase's own timeout
    Testcase(Duration),
    /// The document's total timeout
    Total(Duration),
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Testcase(d) => write!(f, "testcase timeout of {:?} exceeded", d),
            Timeout::Total(d) => write!(f, "total timeout of {:?} exceeded", d),
        }
    }
}

/// Why a testcase failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The shell exited with an unexpected code. Output was not evaluated.
    ExitCode { actual: i32, expected: i32 },
    /// The output does not match the expectations. `lines` are the lines
    /// the reconciliation indexes into.
    Expectations {
        reconciliation: Reconciliation,
        lines: Vec<Line>,
    },
    /// The shell was killed after running out of time
    Timeout(Timeout),
    /// The testcase never ran because the total timeout was exhausted
    Aborted(Timeout),
    /// The shell ended without an exit code
    Signaled,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::ExitCode { actual, expected } => {
                write!(f, "exit code {} (expected {})", actual, expected)
            }
            Failure::Expectations { reconciliation, .. } => write!(
                f,
                "output mismatch: {} missing, {} surplus",
                reconciliation.missing_count(),
                reconciliation.surplus_count()
            ),
            Failure::Timeout(t) => write!(f, "{}", t),
            Failure::Aborted(t) => write!(f, "aborted: {}", t),
            Failure::Signaled => write!(f, "shell ended without exit code"),
        }
    }
}

/// Status of one testcase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed(Failure),
    Skipped,
}

impl Status {
    pub fn is_passed(&self) -> bool {
        matches!(self, Status::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Status::Skipped)
    }
}

/// Result of one testcase
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Document the testcase was declared in (differs from the session
    /// document for prepended and appended testcases)
    pub location: PathBuf,
    pub title: String,
    pub line_number: usize,
    pub status: Status,
    pub expectations: Vec<Expectation>,
    /// What the shell produced, if it ran and was waited for
    pub output: Option<Output>,
    pub duration: Duration,
}

impl Outcome {
    /// `path:line` of the testcase
    pub fn position(&self) -> String {
        format!("{}:{}", self.location.display(), self.line_number)
    }

    /// Title, or position for untitled testcases
    pub fn name(&self) -> String {
        if self.title.is_empty() {
            self.position()
        } else {
            self.title.clone()
        }
    }
}

/// Result of one document session
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub path: PathBuf,
    pub outcomes: Vec<Outcome>,
    pub duration: Duration,
    /// Session directories kept after the run
    pub kept_directories: Vec<PathBuf>,
}

impl DocumentResult {
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary::from_outcomes(&self.outcomes)
    }
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DocumentSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut s, o| {
            match o.status {
                Status::Passed => s.succeeded += 1,
                Status::Failed(_) => s.failed += 1,
                Status::Skipped => s.skipped += 1,
            }
            s
        })
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl std::ops::Add for DocumentSummary {
    type Output = DocumentSummary;

    fn add(self, other: DocumentSummary) -> DocumentSummary {
        DocumentSummary {
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
        }
    }
}

impl fmt::Display for DocumentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped ({} total)",
            self.succeeded,
            self.failed,
            self.skipped,
            self.total()
        )
    }
}
