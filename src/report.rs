//! Plain text failure reports

use std::fmt::Write as _;

use similar::TextDiff;

use crate::escaping;
use crate::expectation::Expectation;
use crate::matcher::{Hunk, Reconciliation};
use crate::outcome::{Failure, Outcome};
use crate::output::Line;

/// Render a reconciliation: matched lines prefixed with two spaces, missing
/// expectations with `- `, surplus lines with `+ `
pub fn render_reconciliation(
    expectations: &[Expectation],
    lines: &[Line],
    reconciliation: &Reconciliation,
) -> String {
    let mut out = String::new();
    for hunk in reconciliation.hunks() {
        match hunk {
            Hunk::Matched { lines: range, .. } => {
                for line in &lines[range] {
                    let _ = writeln!(out, "  {}", line);
                }
            }
            Hunk::Missing { expectation } => {
                let text = expectations
                    .get(expectation)
                    .map(Expectation::to_expression_string)
                    .unwrap_or_default();
                let _ = writeln!(out, "- {}", text);
            }
            Hunk::Surplus { lines: range } => {
                for line in &lines[range] {
                    let _ = writeln!(out, "+ {}", escaping::escaped_expectation(&line.bytes));
                }
            }
        }
    }
    out
}

/// Unified diff of the expectation list against the output, both in
/// expectation text form
pub fn unified_diff(expectations: &[Expectation], lines: &[Line]) -> String {
    let expected: String = expectations
        .iter()
        .map(|e| format!("{}\n", e.to_expression_string()))
        .collect();
    let actual: String = lines
        .iter()
        .map(|l| format!("{}\n", escaping::escaped_expectation(&l.bytes)))
        .collect();

    TextDiff::from_lines(&expected, &actual)
        .unified_diff()
        .header("expected", "actual")
        .to_string()
}

/// Details for a failed testcase, empty if there is nothing to add to the
/// failure's one-line description
pub fn failure_details(outcome: &Outcome, failure: &Failure) -> String {
    match failure {
        Failure::Expectations { reconciliation, lines } => {
            let mut out = render_reconciliation(&outcome.expectations, lines, reconciliation);
            out.push('\n');
            out.push_str(&unified_diff(&outcome.expectations, lines));
            out
        }
        Failure::ExitCode { .. } | Failure::Timeout(_) | Failure::Signaled => {
            let Some(ref output) = outcome.output else {
                return String::new();
            };
            let mut out = String::new();
            for (name, raw) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
                if raw.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "{}:", name);
                for line in crate::output::split_lines(raw, output.stream) {
                    let _ = writeln!(out, "  {}", line);
                }
            }
            out
        }
        Failure::Aborted(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::reconcile;
    use crate::output::{split_lines, OutputStream};

    fn fixture(expectations: &[&str], output: &str) -> (Vec<Expectation>, Vec<Line>) {
        (
            expectations.iter().map(|e| Expectation::parse(e).unwrap()).collect(),
            split_lines(output.as_bytes(), OutputStream::Stdout),
        )
    }

    #[test]
    fn test_render_reconciliation() {
        let (expectations, lines) = fixture(&["a", "b", "c* (glob)"], "a\ncat\n\x1b\n");
        let r = reconcile(&expectations, &lines);
        assert_eq!(
            render_reconciliation(&expectations, &lines, &r),
            "  a\n- b\n  cat\n+ \\x1b (escaped)\n"
        );
    }

    #[test]
    fn test_unified_diff() {
        let (expectations, lines) = fixture(&["Hello"], "Hello\nBar\n");
        let diff = unified_diff(&expectations, &lines);
        assert!(diff.contains("--- expected"), "{}", diff);
        assert!(diff.contains("+++ actual"), "{}", diff);
        assert!(diff.contains("+Bar"), "{}", diff);
    }
}
