//! Testcases and their validation

use std::borrow::Cow;

use serde::Deserialize;

use crate::config::{EffectiveConfig, TestCaseConfig};
use crate::expectation::Expectation;
use crate::matcher::reconcile;
use crate::outcome::{Failure, Status, Timeout};
use crate::output::{normalize_crlf, split_lines, ExitStatus, Output};

/// One shell expression with its expectations and configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    #[serde(default)]
    pub title: String,

    /// Shell code to execute
    pub shell_expression: String,

    /// Expected output, in order
    #[serde(default)]
    pub expectations: Vec<Expectation>,

    /// Expected exit code, 0 if unset
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Line of the testcase in its document
    #[serde(default)]
    pub line_number: usize,

    #[serde(default)]
    pub config: TestCaseConfig,
}

impl TestCase {
    pub fn new(shell_expression: impl Into<String>, expectations: Vec<Expectation>) -> Self {
        Self {
            title: String::new(),
            shell_expression: shell_expression.into(),
            expectations,
            exit_code: None,
            line_number: 0,
            config: TestCaseConfig::default(),
        }
    }

    pub fn expected_exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(0)
    }

    /// Decide the status of this testcase from what its shell produced.
    ///
    /// The skip code wins over everything else. The exit code is checked
    /// before the output, and a mismatch leaves the output unevaluated.
    pub fn validate(&self, output: &Output, config: &EffectiveConfig) -> Status {
        let code = match output.exit_status {
            ExitStatus::Code(code) => code,
            ExitStatus::Detached => return Status::Passed,
            ExitStatus::Timeout(d) => return Status::Failed(Failure::Timeout(Timeout::Testcase(d))),
            ExitStatus::Unknown => return Status::Failed(Failure::Signaled),
        };

        if code == config.skip_document_code {
            return Status::Skipped;
        }

        let expected = self.expected_exit_code();
        if code != expected {
            return Status::Failed(Failure::ExitCode { actual: code, expected });
        }

        let raw = output.selected(config.output_stream);
        let raw = if config.keep_crlf {
            Cow::Borrowed(raw)
        } else {
            Cow::Owned(normalize_crlf(raw))
        };
        let lines = split_lines(&raw, config.output_stream);

        let reconciliation = reconcile(&self.expectations, &lines);
        if reconciliation.is_match() {
            Status::Passed
        } else {
            Status::Failed(Failure::Expectations { reconciliation, lines })
        }
    }
}
