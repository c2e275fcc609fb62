//! Testcase documents
//!
//! A document is a JSON file holding document configuration and an ordered
//! list of testcases:
//!
//! ```json
//! {
//!   "config": { "total_timeout": "1m", "prepend": ["_setup.json"] },
//!   "testcases": [
//!     {
//!       "title": "greeting",
//!       "shell_expression": "echo Hello",
//!       "expectations": ["Hello"],
//!       "line_number": 3
//!     }
//!   ]
//! }
//! ```
//!
//! Files whose name starts with `_` are only used through `prepend` and
//! `append` and are skipped by [`discover`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::DocumentConfig;
use crate::error::{Error, Result};
use crate::testcase::TestCase;

/// A loaded document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(skip)]
    pub path: PathBuf,

    #[serde(default)]
    pub config: DocumentConfig,

    #[serde(default)]
    pub testcases: Vec<TestCase>,
}

/// A testcase in execution order, with the document it was declared in
#[derive(Debug, Clone)]
pub struct QueuedTestCase {
    pub location: PathBuf,
    pub testcase: TestCase,
}

impl Document {
    /// Read and decode a document
    pub fn load(path: impl AsRef<Path>) -> Result<Document> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::document(format!("read: {}", e)).with_document(path))?;
        Self::from_json(&data, path)
    }

    /// Decode a document from JSON text
    pub fn from_json(data: &str, path: impl Into<PathBuf>) -> Result<Document> {
        let path = path.into();
        let mut document: Document =
            serde_json::from_str(data).map_err(|e| Error::from(e).with_document(&path))?;
        document.path = path;
        Ok(document)
    }

    /// Directory of the document, used to resolve includes and as `TESTDIR`
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// All testcases in execution order: prepended documents, own
    /// testcases, appended documents. Includes are resolved relative to the
    /// including document and may nest. Each included testcase inherits the
    /// testcase defaults of the document it was declared in.
    pub fn testcase_queue(&self) -> Result<Vec<QueuedTestCase>> {
        let mut queue = Vec::new();
        let mut stack = vec![canonical(&self.path)];
        self.enqueue(&mut queue, &mut stack)?;
        Ok(queue)
    }

    fn enqueue(&self, queue: &mut Vec<QueuedTestCase>, stack: &mut Vec<PathBuf>) -> Result<()> {
        for include in &self.config.prepend {
            self.enqueue_include(include, queue, stack)?;
        }
        for testcase in &self.testcases {
            let mut testcase = testcase.clone();
            testcase.config = testcase.config.with_defaults_from(&self.config.defaults);
            queue.push(QueuedTestCase {
                location: self.path.clone(),
                testcase,
            });
        }
        for include in &self.config.append {
            self.enqueue_include(include, queue, stack)?;
        }
        Ok(())
    }

    fn enqueue_include(
        &self,
        include: &Path,
        queue: &mut Vec<QueuedTestCase>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let path = self.dir().join(include);
        let key = canonical(&path);
        if stack.contains(&key) {
            return Err(Error::document(format!(
                "include cycle: {} includes {}",
                self.path.display(),
                path.display()
            ))
            .with_document(&self.path));
        }

        let included = Document::load(&path)?;
        stack.push(key);
        included.enqueue(queue, stack)?;
        stack.pop();
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Find documents under `path`: the file itself, or every file below the
/// directory whose name ends in one of `extensions`, sorted. With a filter
/// only documents whose file stem contains it are returned.
pub fn discover(path: &Path, extensions: &[String], filter: Option<&str>) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::document(format!("test path not found: {}", path.display())));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    scan_dir(path, extensions, filter, &mut files)?;
    files.sort();
    Ok(files)
}

fn scan_dir(
    dir: &Path,
    extensions: &[String],
    filter: Option<&str>,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_dir(&path, extensions, filter, files)?;
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || !extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            continue;
        }
        if let Some(filter) = filter {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !stem.contains(filter) {
                continue;
            }
        }
        files.push(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn testcase_json(expr: &str) -> String {
        format!(r#"{{"shell_expression": "{}"}}"#, expr)
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "doc.json",
            r#"{
                "config": {"skip_document_code": 77, "total_timeout": "10s"},
                "testcases": [
                    {"shell_expression": "echo hi", "expectations": ["hi"], "exit_code": 0}
                ]
            }"#,
        );
        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.path, path);
        assert_eq!(doc.config.skip_document_code(), 77);
        assert_eq!(doc.testcases.len(), 1);
        assert_eq!(doc.dir(), dir.path());
    }

    #[test]
    fn test_load_errors_name_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.json",
            r#"{"testcases": [{"shell_expression": "x", "expectations": ["x (no-eol+)"]}]}"#,
        );
        let err = Document::load(&path).unwrap_err();
        assert_eq!(err.document.as_deref(), Some(path.as_path()));

        let err = Document::load(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Document);
    }

    #[test]
    fn test_queue_order_with_nested_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        write(
            &dir.path().join("lib"),
            "_inner.json",
            &format!(r#"{{"testcases": [{}]}}"#, testcase_json("inner")),
        );
        write(
            &dir.path().join("lib"),
            "_setup.json",
            &format!(
                r#"{{"config": {{"prepend": ["_inner.json"], "defaults": {{"timeout": "3s"}}}}, "testcases": [{}]}}"#,
                testcase_json("setup")
            ),
        );
        write(
            dir.path(),
            "_teardown.json",
            &format!(r#"{{"testcases": [{}]}}"#, testcase_json("teardown")),
        );
        let main = write(
            dir.path(),
            "main.json",
            &format!(
                r#"{{"config": {{"prepend": ["lib/_setup.json"], "append": ["_teardown.json"]}}, "testcases": [{}, {}]}}"#,
                testcase_json("one"),
                testcase_json("two")
            ),
        );

        let queue = Document::load(&main).unwrap().testcase_queue().unwrap();
        let expressions: Vec<&str> = queue
            .iter()
            .map(|q| q.testcase.shell_expression.as_str())
            .collect();
        assert_eq!(expressions, vec!["inner", "setup", "one", "two", "teardown"]);
        assert!(queue[1].location.ends_with("lib/_setup.json"));
        assert_eq!(
            queue[1].testcase.config.timeout,
            Some(std::time::Duration::from_secs(3))
        );
        assert_eq!(queue[2].testcase.config.timeout, None);
    }

    #[test]
    fn test_include_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_a.json", r#"{"config": {"prepend": ["_b.json"]}}"#);
        write(dir.path(), "_b.json", r#"{"config": {"append": ["_a.json"]}}"#);
        let err = Document::load(dir.path().join("_a.json"))
            .unwrap()
            .testcase_queue()
            .unwrap_err();
        assert!(err.message.contains("include cycle"), "{}", err);
    }

    #[test]
    fn test_discover() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write(dir.path(), "b.json", "{}");
        write(dir.path(), "a.json", "{}");
        write(dir.path(), "_partial.json", "{}");
        write(dir.path(), "notes.txt", "");
        write(&dir.path().join("sub"), "c.json", "{}");

        let exts = vec![".json".to_string()];
        let found = discover(dir.path(), &exts, None).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![PathBuf::from("a.json"), PathBuf::from("b.json"), PathBuf::from("sub/c.json")]
        );

        let found = discover(dir.path(), &exts, Some("b")).unwrap();
        assert_eq!(found.len(), 1);

        let single = dir.path().join("a.json");
        assert_eq!(discover(&single, &exts, None).unwrap(), vec![single]);
        assert!(discover(&dir.path().join("nope"), &exts, None).is_err());
    }
}
