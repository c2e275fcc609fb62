//! Integration test: run the JSON documents in `tests/documents/` via cargo test
//!
//! Usage:
//!   cargo test --test integration
//!   EMX_SCRUT_KEEP=1 cargo test --test integration   # keep session directories

use std::path::PathBuf;

fn documents_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/documents")
}

#[test]
fn documents_all() {
    emx_scrut::run_and_assert(documents_dir());
}

#[test]
fn documents_sequential() {
    emx_scrut::run_and_assert_with(documents_dir(), |runner| runner.jobs(1));
}

#[test]
fn documents_count() {
    let runner = emx_scrut::run(documents_dir()).build();
    let documents = runner.discover().unwrap();
    // `_` prefixed documents are only reachable through includes
    for document in &documents {
        let name = document.file_name().unwrap().to_string_lossy();
        assert!(!name.starts_with('_'), "discovered {}", name);
    }
    // includes.json counts its prepended and appended testcases
    assert!(runner.count_tests().unwrap() > documents.len());
}

#[test]
fn documents_summary() {
    let result = emx_scrut::run(documents_dir()).filter("skip").run().unwrap();
    assert_eq!(result.documents.len(), 1);
    let summary = result.summary();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);
    assert!(result.all_passed());
}
