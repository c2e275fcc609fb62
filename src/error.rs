//! Crate errors
//!
//! Only failures that prevent a session from running (or from cleaning up)
//! are errors. Everything that goes wrong inside a single testcase is
//! captured in its [`crate::Outcome`] instead.

use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An expectation could not be parsed or compiled
    InvalidExpectation,
    /// A configuration value is malformed
    InvalidConfig,
    /// A document could not be read or decoded
    Document,
    /// Work, temp or state directory could not be created
    Setup,
    /// The shell process could not be started
    Spawn,
    /// Session directories could not be removed
    Teardown,
    /// IO error
    Io,
}

/// An error with optional document/testcase context
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub document: Option<PathBuf>,
    pub testcase: Option<usize>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            document: None,
            testcase: None,
        }
    }

    pub fn with_document(mut self, document: impl AsRef<Path>) -> Self {
        self.document = Some(document.as_ref().to_path_buf());
        self
    }

    /// Attach the zero-based testcase index the error occurred in
    pub fn with_testcase(mut self, index: usize) -> Self {
        self.testcase = Some(index);
        self
    }

    pub fn expectation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidExpectation, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, msg)
    }

    pub fn document(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Document, msg)
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, msg)
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Spawn, msg)
    }

    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Teardown, msg)
    }

    /// Whether this error ends the session it occurred in
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Setup | ErrorKind::Spawn | ErrorKind::Teardown | ErrorKind::Io
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref document) = self.document {
            write!(f, "{}:", document.display())?;
        }
        if let Some(index) = self.testcase {
            write!(f, " testcase {}:", index + 1)?;
        }
        if self.document.is_some() || self.testcase.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::document(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
