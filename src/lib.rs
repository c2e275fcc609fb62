//! emx-scrut: output-expectation matching and stateful shell testing for CLIs
//!
//! # Overview
//!
//! A testcase is a shell expression plus a list of expectations about its
//! output. The testcases of a document run one after another in fresh bash
//! processes that inherit the shell state (variables, functions, aliases,
//! options, working directory) of the previous testcase.
//!
//! # Expectations
//!
//! ```text
//! Hello              exactly the line "Hello"
//! Hello* (glob+)     one or more lines starting with "Hello"
//! [0-9]+ (regex?)    an optional line of digits
//! foo\tbar (esc)     "foo<TAB>bar", newline or not
//! done (no-eol)      "done" as the last line, without newline
//! ```
//!
//! | Kind | Names | Match |
//! |------|-------|-------|
//! | Equal | `equal`, `eq` (default) | byte-exact, newline-terminated |
//! | EqualNoEol | `no-eol` | byte-exact, not newline-terminated |
//! | Escaped | `escaped`, `esc` | escape sequences decoded first |
//! | Glob | `glob`, `gl` | `*` and `?` wildcards, whole line |
//! | Regex | `regex`, `re` | anchored regular expression |
//!
//! Quantifiers: `?` (zero or one), `*` (zero or more), `+` (one or more).
//!
//! # Usage
//!
//! ```rust,ignore
//! #[test]
//! fn test_documents() {
//!     emx_scrut::run_and_assert("tests/documents");
//! }
//! ```

mod config;
mod coordinator;
mod document;
mod error;
mod escaping;
mod expectation;
mod matcher;
mod outcome;
mod output;
pub mod report;
mod runner;
mod session;
mod shell;
mod state;
mod testcase;

pub use config::{
    parse_duration, DocumentConfig, EffectiveConfig, KillSignal, TestCaseConfig, Wait, DEFAULT_SHELL,
    DEFAULT_SHELL_ENV, DEFAULT_SKIP_DOCUMENT_CODE, DEFAULT_TOTAL_TIMEOUT,
};
pub use coordinator::Coordinator;
pub use document::{discover, Document, QueuedTestCase};
pub use error::{Error, ErrorKind, Result};
pub use escaping::{decode, escape_printable, escaped_expectation};
pub use expectation::{Expectation, Kind, Quantifier};
pub use matcher::{reconcile, ExpectationVerdict, Hunk, LineVerdict, Reconciliation};
pub use outcome::{DocumentResult, DocumentSummary, Failure, Outcome, Status, Timeout};
pub use output::{ExitStatus, Line, Output, OutputStream};
pub use runner::{RunConfig, TestResult, TestRunner, TestRunnerBuilder};
pub use session::Session;
pub use shell::{DetachedProcess, Execution, Invocation, ShellRunner};
pub use state::{Environment, ShellState};
pub use testcase::TestCase;

// Convenience functions for cargo test integration
pub use runner::{run, run_and_assert, run_and_assert_with};
