//! Document execution
//!
//! The [`Coordinator`] runs all testcases of one document in a session:
//!
//! 1. create the session directories and write the shell prologue
//! 2. run every queued testcase in order, threading the shell state from
//!    one testcase into the next
//! 3. remove the session directories
//!
//! A testcase exiting with the skip code skips itself and everything after
//! it. Exhausting the total timeout fails the running testcase and aborts
//! everything after it. Detached shells are signalled and the directories
//! removed on every path.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{DocumentConfig, TestCaseConfig, Wait};
use crate::document::{Document, QueuedTestCase};
use crate::error::Result;
use crate::outcome::{DocumentResult, Failure, Outcome, Status, Timeout};
use crate::output::ExitStatus;
use crate::session::Session;
use crate::shell::{DetachedProcess, Invocation, ShellRunner};
use crate::state::{Environment, ShellState};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why the remaining testcases of a document do not run
#[derive(Debug, Clone, Copy)]
enum Halt {
    Skip,
    Abort(Timeout),
}

/// Runs documents. Holds the command line layer of the configuration.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    /// Document configuration that wins over every document's own
    pub document_overrides: DocumentConfig,
    /// Testcase configuration that wins over every testcase's own
    pub testcase_overrides: TestCaseConfig,
    /// Persistent work directory shared by all documents
    pub work_directory: Option<PathBuf>,
    /// Keep session directories after the run
    pub keep: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every testcase of the document (including prepended and appended
    /// ones) and return one outcome per testcase.
    ///
    /// Fails only if the session cannot be set up or torn down, or a shell
    /// cannot be started.
    pub fn run_document(&self, document: &Document) -> Result<DocumentResult> {
        let span = tracing::info_span!("session", document = %document.path.display());
        let _enter = span.enter();
        let started = Instant::now();

        let config = self.document_overrides.with_defaults_from(&document.config);
        let queue = document.testcase_queue()?;

        let name = document
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let session = Session::create(name, self.work_directory.as_deref())
            .map_err(|e| e.with_document(&document.path))?;

        let mut detached = Vec::new();
        let outcomes = self.run_session(&session, document, &config, &queue, started, &mut detached);
        for process in &detached {
            process.terminate();
        }
        let kept = session.teardown(self.keep);

        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                if let Err(teardown) = kept {
                    tracing::warn!("teardown after failed session: {}", teardown);
                }
                return Err(e);
            }
        };
        let kept_directories = kept.map_err(|e| e.with_document(&document.path))?;

        Ok(DocumentResult {
            path: document.path.clone(),
            outcomes,
            duration: started.elapsed(),
            kept_directories,
        })
    }

    fn run_session(
        &self,
        session: &Session,
        document: &Document,
        config: &DocumentConfig,
        queue: &[QueuedTestCase],
        started: Instant,
        detached: &mut Vec<DetachedProcess>,
    ) -> Result<Vec<Outcome>> {
        let shell = config.shell();
        let runner = ShellRunner::new(&shell, session).map_err(|e| e.with_document(&document.path))?;
        let total = config.total_timeout();
        let deadline = started + total;

        let mut state = ShellState::empty();
        let mut halt: Option<Halt> = None;
        let mut outcomes = Vec::with_capacity(queue.len());

        for (index, queued) in queue.iter().enumerate() {
            let testcase = &queued.testcase;
            let mut outcome = Outcome {
                location: queued.location.clone(),
                title: testcase.title.clone(),
                line_number: testcase.line_number,
                status: Status::Skipped,
                expectations: testcase.expectations.clone(),
                output: None,
                duration: Duration::ZERO,
            };

            match halt {
                Some(Halt::Skip) => {
                    outcomes.push(outcome);
                    continue;
                }
                Some(Halt::Abort(timeout)) => {
                    outcome.status = Status::Failed(Failure::Aborted(timeout));
                    outcomes.push(outcome);
                    continue;
                }
                None => {}
            }

            let effective = TestCaseConfig::resolve(&self.testcase_overrides, &testcase.config, config);
            tracing::trace!(index, config = ?effective, "effective testcase configuration");

            if let Some(ref wait) = effective.wait {
                wait_before(wait, session.temp_dir(), deadline);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let timeout = Timeout::Total(total);
                tracing::debug!(index, "total timeout exhausted before testcase started");
                outcome.status = Status::Failed(Failure::Aborted(timeout));
                outcomes.push(outcome);
                halt = Some(Halt::Abort(timeout));
                continue;
            }
            let (timeout, scope) = match effective.timeout {
                Some(t) if t <= remaining => (t, Timeout::Testcase(t)),
                _ => (remaining, Timeout::Total(total)),
            };

            let environment = testcase_environment(&shell, session, queued);
            let execution = runner
                .run(
                    &state,
                    &Invocation {
                        expression: &testcase.shell_expression,
                        environment: &environment,
                        overrides: &effective.environment,
                        timeout: Some(timeout),
                        detached: effective.detached,
                        detached_kill_signal: &effective.detached_kill_signal,
                        output_stream: effective.output_stream,
                    },
                )
                .map_err(|e| e.with_document(&document.path).with_testcase(index))?;
            state = execution.state;
            detached.extend(execution.detached);

            outcome.status = match execution.output.exit_status {
                ExitStatus::Timeout(_) => {
                    tracing::debug!(index, timeout = %scope, "testcase timed out");
                    if let Timeout::Total(_) = scope {
                        halt = Some(Halt::Abort(scope));
                    }
                    Status::Failed(Failure::Timeout(scope))
                }
                _ => testcase.validate(&execution.output, &effective),
            };
            if outcome.status.is_skipped() {
                tracing::debug!(index, "skip code, skipping remaining testcases");
                halt = Some(Halt::Skip);
            }

            outcome.output = Some(execution.output);
            outcome.duration = execution.duration;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

/// Environment every testcase shell starts with
fn testcase_environment(shell: &Path, session: &Session, queued: &QueuedTestCase) -> Environment {
    let location = absolute(&queued.location);
    let test_dir = location.parent().map(Path::to_path_buf).unwrap_or_default();
    let test_file = location
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let shell = shell.to_string_lossy();

    let mut env = Environment::inherited();
    env.extend([
        ("TESTDIR", test_dir.to_string_lossy().into_owned()),
        ("TESTFILE", test_file),
        ("TMPDIR", session.temp_dir().to_string_lossy().into_owned()),
        ("TESTSHELL", shell.to_string()),
        ("SHELL", shell.to_string()),
        (
            "SCRUT_TEST",
            format!("{}:{}", queued.location.display(), queued.testcase.line_number),
        ),
        ("LANG", "C".into()),
        ("LANGUAGE", "C".into()),
        ("LC_ALL", "C".into()),
        ("TZ", "GMT".into()),
        ("COLUMNS", "80".into()),
        ("CDPATH", String::new()),
        ("GREP_OPTIONS", String::new()),
    ]);
    env
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Sleep for the wait timeout, or until the wait path exists. Never waits
/// past the deadline.
fn wait_before(wait: &Wait, temp_dir: &Path, deadline: Instant) {
    let limit = wait
        .timeout
        .min(deadline.saturating_duration_since(Instant::now()));
    let started = Instant::now();

    match wait.path {
        None => thread::sleep(limit),
        Some(ref path) => {
            let path = temp_dir.join(path);
            tracing::debug!(path = %path.display(), ?limit, "waiting for path");
            while !path.exists() && started.elapsed() < limit {
                thread::sleep(WAIT_POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_without_path_sleeps() {
        let dir = tempfile::tempdir().unwrap();
        let wait = Wait {
            timeout: Duration::from_millis(50),
            path: None,
        };
        let started = Instant::now();
        wait_before(&wait, dir.path(), Instant::now() + Duration::from_secs(10));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_stops_when_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ready"), "").unwrap();
        let wait = Wait {
            timeout: Duration::from_secs(10),
            path: Some(PathBuf::from("ready")),
        };
        let started = Instant::now();
        wait_before(&wait, dir.path(), Instant::now() + Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_bounded_by_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let wait = Wait {
            timeout: Duration::from_secs(10),
            path: Some(PathBuf::from("never")),
        };
        let started = Instant::now();
        wait_before(&wait, dir.path(), Instant::now() + Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
