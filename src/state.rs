//! Shell state carried between testcases
//!
//! A [`ShellState`] is the snapshot one testcase leaves behind for the next:
//! variables, functions, aliases, shell options and the working directory,
//! serialized as a shell script. Snapshots are immutable. Each execution
//! consumes one and yields a new one.
//!
//! [`Environment`] is the process environment a shell starts with.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Serialized shell state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellState {
    script: Option<Arc<str>>,
}

impl ShellState {
    /// The state of a fresh shell
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_script(script: impl Into<Arc<str>>) -> Self {
        Self {
            script: Some(script.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_none()
    }

    pub fn script(&self) -> &str {
        self.script.as_deref().unwrap_or("")
    }

    /// Write the snapshot where the next shell sources it from. An empty
    /// snapshot removes a stale file instead.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        match self.script {
            Some(ref script) => fs::write(path, script.as_bytes()),
            None => match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }

    /// Read the snapshot a shell left behind, if it left one
    pub fn read_from(path: &Path) -> io::Result<Option<ShellState>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Self::from_script(String::from_utf8_lossy(&bytes).as_ref()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Ordered environment variables for a shell process
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the environment of the current process
    pub fn inherited() -> Self {
        let mut env = Self::new();
        for (key, value) in std::env::vars() {
            env.set(key, value);
        }
        env
    }

    /// Set a variable, replacing an earlier value in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&idx) => self.vars[idx].1 = value,
            None => {
                self.index.insert(key.clone(), self.vars.len());
                self.vars.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&idx| self.vars[idx].1.as_str())
    }

    pub fn extend<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `export` statements. Sourced after a snapshot, these win
    /// over variables the snapshot restores.
    pub fn to_exports(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("export {}={}\n", k, shell_quote(v)))
            .collect()
    }
}

/// Quote a value for bash with single quotes
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Whether `name` is a valid shell variable name
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
