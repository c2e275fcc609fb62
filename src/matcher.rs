//! Reconciliation of captured output against an expectation list
//!
//! Matching is a single greedy pass. Each expectation consumes as many
//! subsequent lines as its quantifier allows, starting where the previous
//! expectation stopped. There is no backtracking: an `(*)` expectation that
//! swallows a line a later expectation needed leaves that later expectation
//! missing.

use std::ops::Range;

use crate::expectation::Expectation;
use crate::output::Line;

/// What happened to one line of output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineVerdict {
    /// Consumed by the expectation at this index
    Matched(usize),
    /// Not consumed by any expectation
    Surplus,
}

/// What happened to one expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectationVerdict {
    /// Satisfied by the lines in this range (empty for optional
    /// expectations that consumed nothing)
    Satisfied(Range<usize>),
    /// Not satisfied
    Missing,
}

/// A contiguous section of the reconciliation, in output order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hunk {
    Matched { expectation: usize, lines: Range<usize> },
    Missing { expectation: usize },
    Surplus { lines: Range<usize> },
}

/// Line-level result of matching output against expectations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// One verdict per output line
    pub lines: Vec<LineVerdict>,
    /// One verdict per expectation
    pub expectations: Vec<ExpectationVerdict>,
}

impl Reconciliation {
    /// No missing expectations and no surplus lines
    pub fn is_match(&self) -> bool {
        self.missing_count() == 0 && self.surplus_count() == 0
    }

    /// Number of output lines consumed by an expectation
    pub fn matched_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|v| matches!(v, LineVerdict::Matched(_)))
            .count()
    }

    pub fn missing_count(&self) -> usize {
        self.expectations
            .iter()
            .filter(|v| **v == ExpectationVerdict::Missing)
            .count()
    }

    pub fn surplus_count(&self) -> usize {
        self.lines.iter().filter(|v| **v == LineVerdict::Surplus).count()
    }

    /// Ordered view for renderers. Optional expectations that consumed
    /// nothing do not produce a hunk.
    pub fn hunks(&self) -> Vec<Hunk> {
        let mut hunks = Vec::new();
        let mut cursor = 0;

        for (index, verdict) in self.expectations.iter().enumerate() {
            match verdict {
                ExpectationVerdict::Missing => hunks.push(Hunk::Missing { expectation: index }),
                ExpectationVerdict::Satisfied(range) if range.is_empty() => {}
                ExpectationVerdict::Satisfied(range) => {
                    if range.start > cursor {
                        hunks.push(Hunk::Surplus { lines: cursor..range.start });
                    }
                    hunks.push(Hunk::Matched {
                        expectation: index,
                        lines: range.clone(),
                    });
                    cursor = range.end;
                }
            }
        }

        if cursor < self.lines.len() {
            hunks.push(Hunk::Surplus { lines: cursor..self.lines.len() });
        }
        hunks
    }
}

/// Match `lines` against `expectations` in one greedy pass
pub fn reconcile(expectations: &[Expectation], lines: &[Line]) -> Reconciliation {
    let mut line_verdicts = vec![LineVerdict::Surplus; lines.len()];
    let mut expectation_verdicts = Vec::with_capacity(expectations.len());
    let mut cursor = 0;

    for (index, expectation) in expectations.iter().enumerate() {
        let start = cursor;
        let limit = if expectation.quantifier.is_multiline() {
            lines.len()
        } else {
            (start + 1).min(lines.len())
        };
        while cursor < limit && expectation.matches(&lines[cursor]) {
            line_verdicts[cursor] = LineVerdict::Matched(index);
            cursor += 1;
        }

        let consumed = cursor - start;
        let satisfied = consumed > 0 || expectation.quantifier.is_optional();
        expectation_verdicts.push(if satisfied {
            ExpectationVerdict::Satisfied(start..cursor)
        } else {
            ExpectationVerdict::Missing
        });
    }

    Reconciliation {
        lines: line_verdicts,
        expectations: expectation_verdicts,
    }
}
