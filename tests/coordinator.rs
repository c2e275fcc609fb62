//! Coordinator behavior that documents alone cannot assert: failures,
//! timeouts, aborted testcases and session cleanup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emx_scrut::{
    Coordinator, Document, DocumentResult, ErrorKind, Failure, Status, TestCaseConfig, Timeout,
};

fn document(dir: &Path, json: &str) -> Document {
    Document::from_json(json, dir.join("doc.json")).unwrap()
}

fn run(json: &str) -> DocumentResult {
    let dir = tempfile::tempdir().unwrap();
    Coordinator::new().run_document(&document(dir.path(), json)).unwrap()
}

fn statuses(result: &DocumentResult) -> Vec<&Status> {
    result.outcomes.iter().map(|o| &o.status).collect()
}

fn stdout(result: &DocumentResult, index: usize) -> String {
    let output = result.outcomes[index].output.as_ref().expect("testcase ran");
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_exit_code_mismatch() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "echo hi; exit 1", "expectations": ["never"]}
    ]}"#);
    assert_eq!(
        statuses(&result),
        vec![&Status::Failed(Failure::ExitCode { actual: 1, expected: 0 })]
    );
}

#[test]
fn test_skip_code_skips_remaining() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let coordinator = Coordinator {
        work_directory: Some(work.clone()),
        ..Coordinator::new()
    };
    let doc = document(
        dir.path(),
        r#"{"testcases": [
            {"shell_expression": "touch first"},
            {"shell_expression": "exit 80"},
            {"shell_expression": "touch third"}
        ]}"#,
    );

    let result = coordinator.run_document(&doc).unwrap();
    assert_eq!(
        statuses(&result),
        vec![&Status::Passed, &Status::Skipped, &Status::Skipped]
    );
    assert!(result.outcomes[2].output.is_none());
    assert!(work.join("first").exists());
    assert!(!work.join("third").exists());
    assert_eq!(result.summary().skipped, 2);
}

#[test]
fn test_custom_skip_code() {
    let result = run(r#"{
        "config": {"skip_document_code": 42},
        "testcases": [
            {"shell_expression": "exit 80", "exit_code": 80},
            {"shell_expression": "exit 42"},
            {"shell_expression": "true"}
        ]
    }"#);
    assert_eq!(
        statuses(&result),
        vec![&Status::Passed, &Status::Skipped, &Status::Skipped]
    );
}

#[test]
fn test_output_mismatch_is_reported() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "echo Hello; echo Bar", "expectations": ["Hello (equal)"]},
        {"shell_expression": "echo next", "expectations": ["next"]}
    ]}"#);
    match &result.outcomes[0].status {
        Status::Failed(Failure::Expectations { reconciliation, lines }) => {
            assert_eq!(reconciliation.matched_count(), 1);
            assert_eq!(reconciliation.surplus_count(), 1);
            assert_eq!(lines[1].content(), b"Bar");
        }
        other => panic!("unexpected status {:?}", other),
    }
    // a mismatch does not stop the session
    assert_eq!(result.outcomes[1].status, Status::Passed);
}

#[test]
fn test_testcase_timeout() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "X=1"},
        {"shell_expression": "X=2; sleep 10", "config": {"timeout": "200ms"}},
        {"shell_expression": "echo \"$X\"", "expectations": ["1"]}
    ]}"#);
    assert_eq!(
        result.outcomes[1].status,
        Status::Failed(Failure::Timeout(Timeout::Testcase(Duration::from_millis(200))))
    );
    assert!(result.outcomes[1].duration < Duration::from_secs(5));
    // the timed out testcase left no state behind
    assert_eq!(result.outcomes[2].status, Status::Passed);
}

#[test]
fn test_timeout_kills_background_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let json = format!(
        r#"{{"testcases": [
            {{"shell_expression": "(sleep 1; touch '{}') & sleep 10", "config": {{"timeout": "100ms"}}}}
        ]}}"#,
        marker.display()
    );
    let result = run(&json);
    assert!(result.outcomes[0].status.is_failed());
    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists());
}

#[test]
fn test_total_timeout_aborts_remaining() {
    let result = run(r#"{
        "config": {"total_timeout": "300ms"},
        "testcases": [
            {"shell_expression": "echo quick", "expectations": ["quick"]},
            {"shell_expression": "sleep 10"},
            {"shell_expression": "echo never"}
        ]
    }"#);
    let total = Timeout::Total(Duration::from_millis(300));
    assert_eq!(
        statuses(&result),
        vec![
            &Status::Passed,
            &Status::Failed(Failure::Timeout(total)),
            &Status::Failed(Failure::Aborted(total)),
        ]
    );
    assert!(result.outcomes[2].output.is_none());
}

#[test]
fn test_testcase_timeout_capped_by_total() {
    let result = run(r#"{
        "config": {"total_timeout": "200ms"},
        "testcases": [
            {"shell_expression": "sleep 10", "config": {"timeout": "1m"}}
        ]
    }"#);
    assert_eq!(
        result.outcomes[0].status,
        Status::Failed(Failure::Timeout(Timeout::Total(Duration::from_millis(200))))
    );
}

#[test]
fn test_session_directories_removed() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "echo \"$TMPDIR\"; pwd"}
    ]}"#);
    let out = stdout(&result, 0);
    let mut lines = out.lines();
    let tmp = PathBuf::from(lines.next().unwrap());
    let work = PathBuf::from(lines.next().unwrap());
    assert!(!tmp.exists());
    assert!(!work.exists());
    assert!(result.kept_directories.is_empty());
}

#[test]
fn test_keep_session_directories() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator {
        keep: true,
        ..Coordinator::new()
    };
    let doc = document(
        dir.path(),
        r#"{"testcases": [{"shell_expression": "echo kept > file"}]}"#,
    );
    let result = coordinator.run_document(&doc).unwrap();
    assert_eq!(result.kept_directories.len(), 1);
    let root = &result.kept_directories[0];
    assert!(root.join("work/file").exists());
    std::fs::remove_dir_all(root).unwrap();
}

#[test]
fn test_persistent_work_directory_survives() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("persistent");
    let coordinator = Coordinator {
        work_directory: Some(work.clone()),
        ..Coordinator::new()
    };
    let doc = document(
        dir.path(),
        r#"{"testcases": [{"shell_expression": "echo data > artifact; echo \"$TMPDIR\""}]}"#,
    );
    let result = coordinator.run_document(&doc).unwrap();
    let tmp = PathBuf::from(stdout(&result, 0).trim_end());
    assert!(tmp.starts_with(&work));
    assert!(!tmp.exists());
    assert!(work.join("artifact").exists());
}

#[test]
fn test_overrides_layering() {
    let dir = tempfile::tempdir().unwrap();
    let mut overrides = TestCaseConfig::default();
    overrides.environment.insert("LAYER".into(), "cli".into());
    let coordinator = Coordinator {
        testcase_overrides: overrides,
        ..Coordinator::new()
    };
    let doc = document(
        dir.path(),
        r#"{
            "config": {"defaults": {"environment": {"LAYER": "document", "DOC": "document"}}},
            "testcases": [
                {
                    "shell_expression": "echo \"$LAYER $DOC $CASE\"",
                    "expectations": ["cli document testcase"],
                    "config": {"environment": {"LAYER": "testcase", "CASE": "testcase"}}
                }
            ]
        }"#,
    );
    let result = coordinator.run_document(&doc).unwrap();
    assert_eq!(result.outcomes[0].status, Status::Passed, "{}", stdout(&result, 0));
}

#[test]
fn test_detached_is_not_evaluated() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "echo unused; exit 3", "expectations": ["x"], "config": {"detached": true}},
        {"shell_expression": "echo after", "expectations": ["after"]}
    ]}"#);
    assert_eq!(statuses(&result), vec![&Status::Passed, &Status::Passed]);
}

#[test]
fn test_missing_shell_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let doc = document(
        dir.path(),
        r#"{
            "config": {"shell": "/nonexistent/emx-scrut-shell"},
            "testcases": [{"shell_expression": "true"}]
        }"#,
    );
    let err = Coordinator::new().run_document(&doc).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Spawn);
    assert_eq!(err.testcase, Some(0));
    assert!(err.document.is_some());
}

#[test]
fn test_state_survives_custom_ifs() {
    let result = run(r#"{"testcases": [
        {"shell_expression": "FOO=bar\nIFS=,\nset -u\nset -f"},
        {"shell_expression": "echo \"[$FOO] [$IFS]\"", "expectations": ["[bar] [,]"]},
        {"shell_expression": "set -o | grep -E '^(noglob|nounset) '", "expectations": ["no*on (glob+)"]}
    ]}"#);
    assert_eq!(
        statuses(&result),
        vec![&Status::Passed, &Status::Passed, &Status::Passed],
        "{}",
        stdout(&result, 1)
    );
}

fn detached_marker_document(marker: &Path, signal: Option<&str>) -> String {
    let config = match signal {
        Some(signal) => format!(r#"{{"detached": true, "detached_kill_signal": "{}"}}"#, signal),
        None => r#"{"detached": true}"#.to_string(),
    };
    format!(
        r#"{{"testcases": [
            {{"shell_expression": "sleep 1; touch '{}'", "config": {}}},
            {{"shell_expression": "true"}}
        ]}}"#,
        marker.display(),
        config
    )
}

#[test]
fn test_detached_killed_after_document() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let result = run(&detached_marker_document(&marker, None));
    assert_eq!(statuses(&result), vec![&Status::Passed, &Status::Passed]);

    std::thread::sleep(Duration::from_millis(1800));
    assert!(!marker.exists());
}

#[test]
fn test_detached_kill_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    run(&detached_marker_document(&marker, Some("off")));

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !marker.exists() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(marker.exists());
}
