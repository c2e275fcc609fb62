//! Per-document session directories
//!
//! Every document runs in a session that owns three directories:
//!
//! - the work directory, where each testcase's shell starts
//! - the temp directory, exposed to testcases as `TMPDIR`
//! - the state directory, a hidden directory inside the temp directory that
//!   holds the shell prologue and the state snapshots
//!
//! Without a persistent work directory all three live under one ephemeral
//! root. With a persistent work directory only the temp directory (and the
//! state directory inside it) is created and removed.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Directories of one document session
#[derive(Debug)]
pub struct Session {
    work_dir: PathBuf,
    temp_dir: PathBuf,
    state_dir: PathBuf,
    /// Directories this session created, outermost first
    owned: Vec<TempDir>,
}

impl Session {
    /// Create the session directories for the document with the given
    /// name. When `work_directory` is set it is used (and created if
    /// missing) as the work directory and is never removed.
    pub fn create(name: &str, work_directory: Option<&Path>) -> Result<Session> {
        let mut owned = Vec::new();

        let (work_dir, temp_dir) = match work_directory {
            Some(work) => {
                std::fs::create_dir_all(work).map_err(|e| {
                    Error::setup(format!("create work directory {}: {}", work.display(), e))
                })?;
                let temp = tempdir_in(work, "tmp.")?;
                let temp_dir = temp.path().to_path_buf();
                owned.push(temp);
                (work.to_path_buf(), temp_dir)
            }
            None => {
                let root = tempfile::Builder::new()
                    .prefix(&format!("emx-scrut-{}-", name))
                    .tempdir()
                    .map_err(|e| Error::setup(format!("create session directory: {}", e)))?;
                let work_dir = root.path().join("work");
                let temp_dir = root.path().join("tmp");
                for dir in [&work_dir, &temp_dir] {
                    std::fs::create_dir(dir).map_err(|e| {
                        Error::setup(format!("create {}: {}", dir.display(), e))
                    })?;
                }
                owned.push(root);
                (work_dir, temp_dir)
            }
        };

        let state = tempdir_in(&temp_dir, ".state.")?;
        let state_dir = state.path().to_path_buf();
        owned.push(state);

        tracing::debug!(
            work_dir = %work_dir.display(),
            temp_dir = %temp_dir.display(),
            "created session directories"
        );

        Ok(Session {
            work_dir,
            temp_dir,
            state_dir,
            owned,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Remove every directory the session created. With `keep` the
    /// directories stay on disk and the outermost one is returned.
    pub fn teardown(mut self, keep: bool) -> Result<Vec<PathBuf>> {
        if keep {
            let kept: Vec<PathBuf> = self.owned.drain(..).map(TempDir::keep).collect();
            tracing::debug!(directories = ?kept, "keeping session directories");
            return Ok(kept.into_iter().take(1).collect());
        }

        while let Some(dir) = self.owned.pop() {
            let path = dir.path().to_path_buf();
            dir.close()
                .map_err(|e| Error::teardown(format!("remove {}: {}", path.display(), e)))?;
        }
        tracing::debug!(work_dir = %self.work_dir.display(), "removed session directories");
        Ok(Vec::new())
    }
}

fn tempdir_in(parent: &Path, prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(parent)
        .map_err(|e| Error::setup(format!("create directory in {}: {}", parent.display(), e)))
}
