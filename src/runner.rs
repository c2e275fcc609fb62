//! Test runner
//!
//! Discovers documents, runs them in parallel (each in its own session) and
//! collects the results.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::{DocumentConfig, TestCaseConfig};
use crate::coordinator::Coordinator;
use crate::document::{self, Document};
use crate::error::{Error, Result};
use crate::outcome::{DocumentResult, DocumentSummary, Status};
use crate::report;

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Document, or directory containing documents
    pub path: PathBuf,
    /// Only run documents whose file stem contains this
    pub filter: Option<String>,
    /// File extensions to scan (default: [".json"])
    pub extensions: Vec<String>,
    /// Persistent work directory
    pub work_directory: Option<PathBuf>,
    /// Keep session directories after the run
    pub keep: bool,
    /// Documents run in parallel (0: one per CPU)
    pub jobs: usize,
    /// Command line layer of the document configuration
    pub document_overrides: DocumentConfig,
    /// Command line layer of the testcase configuration
    pub testcase_overrides: TestCaseConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tests"),
            filter: None,
            extensions: vec![".json".into()],
            work_directory: None,
            keep: false,
            jobs: 0,
            document_overrides: DocumentConfig::default(),
            testcase_overrides: TestCaseConfig::default(),
        }
    }
}

/// Result of running all documents
#[derive(Debug)]
pub struct TestResult {
    /// Documents that ran, in discovery order
    pub documents: Vec<DocumentResult>,
    /// Documents that could not run
    pub errors: Vec<Error>,
    pub duration: Duration,
}

impl TestResult {
    /// Counts over all documents
    pub fn summary(&self) -> DocumentSummary {
        self.documents
            .iter()
            .map(DocumentResult::summary)
            .fold(DocumentSummary::default(), |a, b| a + b)
    }

    /// No failed testcase and no document error
    pub fn all_passed(&self) -> bool {
        self.errors.is_empty() && self.summary().all_passed()
    }

    /// Format a summary line
    pub fn summary_line(&self) -> String {
        let mut line = self.summary().to_string();
        if !self.errors.is_empty() {
            line.push_str(&format!(", {} document error(s)", self.errors.len()));
        }
        line.push_str(&format!(" in {}ms", self.duration.as_millis()));
        line
    }
}

/// The test runner
pub struct TestRunner {
    config: RunConfig,
    coordinator: Coordinator,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> Self {
        let coordinator = Coordinator {
            document_overrides: config.document_overrides.clone(),
            testcase_overrides: config.testcase_overrides.clone(),
            work_directory: config.work_directory.clone(),
            keep: config.keep,
        };
        Self { config, coordinator }
    }

    /// Discover documents under the configured path
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        document::discover(
            &self.config.path,
            &self.config.extensions,
            self.config.filter.as_deref(),
        )
    }

    /// Count the testcases that would run, including prepended and appended
    /// ones
    pub fn count_tests(&self) -> Result<usize> {
        let mut count = 0;
        for file in self.discover()? {
            count += Document::load(&file)?.testcase_queue()?.len();
        }
        Ok(count)
    }

    /// Run all discovered documents
    pub fn run_all(&self) -> Result<TestResult> {
        let start = Instant::now();
        let files = self.discover()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()
            .map_err(|e| Error::setup(format!("create thread pool: {}", e)))?;
        let results: Vec<Result<DocumentResult>> =
            pool.install(|| files.par_iter().map(|file| self.run_one(file)).collect());

        let mut documents = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!("{}", e);
                    errors.push(e);
                }
            }
        }

        Ok(TestResult {
            documents,
            errors,
            duration: start.elapsed(),
        })
    }

    /// Load and run a single document
    pub fn run_one(&self, file: &Path) -> Result<DocumentResult> {
        let document = Document::load(file)?;
        self.coordinator.run_document(&document)
    }
}

/// Builder API for convenient test runner construction
pub struct TestRunnerBuilder {
    config: RunConfig,
}

impl TestRunnerBuilder {
    /// Start building a runner for the given document or directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            config: RunConfig {
                path: path.into(),
                ..Default::default()
            },
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = Some(filter.into());
        self
    }

    pub fn extensions(mut self, exts: Vec<String>) -> Self {
        self.config.extensions = exts;
        self
    }

    pub fn work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_directory = Some(dir.into());
        self
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.config.keep = keep;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.config.jobs = jobs;
        self
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.config.document_overrides.shell = Some(shell.into());
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.document_overrides.total_timeout = Some(timeout);
        self
    }

    /// Replace the command line layer of the testcase configuration
    pub fn testcase_overrides(mut self, overrides: TestCaseConfig) -> Self {
        self.config.testcase_overrides = overrides;
        self
    }

    pub fn build(self) -> TestRunner {
        TestRunner::new(self.config)
    }

    /// Build and run all documents
    pub fn run(self) -> Result<TestResult> {
        self.build().run_all()
    }
}

/// Convenience function: create a runner builder for a path
pub fn run(path: impl Into<PathBuf>) -> TestRunnerBuilder {
    TestRunnerBuilder::new(path)
}

/// Run documents and integrate with `#[test]` by panicking on failure.
///
/// ```rust,ignore
/// #[test]
/// fn test_documents() {
///     emx_scrut::run_and_assert("tests/documents");
/// }
/// ```
pub fn run_and_assert(path: impl Into<PathBuf>) {
    run_and_assert_with(path, |builder| builder);
}

/// Like `run_and_assert` but allows runner customization
pub fn run_and_assert_with(
    path: impl Into<PathBuf>,
    customize: impl FnOnce(TestRunnerBuilder) -> TestRunnerBuilder,
) {
    let builder = run(path).keep(std::env::var_os("EMX_SCRUT_KEEP").is_some());
    let result = match customize(builder).run() {
        Ok(result) => result,
        Err(e) => panic!("failed to run documents: {}", e),
    };

    for document in &result.documents {
        for outcome in &document.outcomes {
            match outcome.status {
                Status::Passed => {
                    eprintln!("PASS  {} ({}ms)", outcome.name(), outcome.duration.as_millis())
                }
                Status::Skipped => eprintln!("SKIP  {}", outcome.name()),
                Status::Failed(ref failure) => {
                    eprintln!("FAIL  {} - {}", outcome.name(), failure);
                    for line in report::failure_details(outcome, failure).lines() {
                        eprintln!("  {}", line);
                    }
                }
            }
        }
        for dir in &document.kept_directories {
            eprintln!("  kept: {}", dir.display());
        }
    }
    for error in &result.errors {
        eprintln!("ERROR {}", error);
    }

    eprintln!("\n{}", result.summary_line());

    if !result.all_passed() {
        panic!(
            "{} testcase(s) failed, {} document error(s)",
            result.summary().failed,
            result.errors.len()
        );
    }
}
