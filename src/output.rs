//! Captured output of a shell execution
//!
//! Output is kept as raw bytes. It is only split into [`Line`]s when it is
//! matched against expectations, so that newline handling (LF, kept CRLF,
//! missing final newline) stays visible to the rules.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The stream(s) expectations are applied to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Only what the shell printed on STDOUT
    #[default]
    Stdout,
    /// Only what the shell printed on STDERR
    Stderr,
    /// STDOUT and STDERR interleaved, in the order they were written
    Combined,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
            OutputStream::Combined => "combined",
        })
    }
}

impl std::str::FromStr for OutputStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "combined" => Ok(Self::Combined),
            other => Err(format!("unknown output stream {:?} (stdout, stderr, combined)", other)),
        }
    }
}

/// How a shell execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The shell exited with a code
    Code(i32),
    /// The shell was killed after running longer than the given duration
    Timeout(Duration),
    /// The shell was left running in the background and not waited for
    Detached,
    /// The shell ended without an exit code (e.g. killed by a signal)
    Unknown,
}

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus::Code(0);

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{}", code),
            ExitStatus::Timeout(d) => write!(f, "timeout after {}ms", d.as_millis()),
            ExitStatus::Detached => write!(f, "detached"),
            ExitStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Everything a shell execution produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: ExitStatus,
    /// Which stream(s) `stdout` holds: [`OutputStream::Combined`] when STDERR
    /// was redirected into STDOUT
    pub stream: OutputStream,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: ExitStatus::Unknown,
            stream: OutputStream::Stdout,
        }
    }
}

impl Output {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>, exit_status: ExitStatus) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
            stream: OutputStream::Stdout,
        }
    }

    /// The raw bytes expectations are matched against for the selected stream
    pub fn selected(&self, stream: OutputStream) -> &[u8] {
        match stream {
            OutputStream::Stderr => &self.stderr,
            OutputStream::Stdout | OutputStream::Combined => &self.stdout,
        }
    }

    /// The output of the selected stream split into lines
    pub fn lines(&self, stream: OutputStream) -> Vec<Line> {
        split_lines(self.selected(stream), stream)
    }
}

/// One line of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The line content, including the terminating `\n` if there was one
    pub bytes: Vec<u8>,
    /// Whether the line ended in `\n` (only the last line of output may not)
    pub terminated: bool,
    pub stream: OutputStream,
}

impl Line {
    pub fn new(bytes: impl Into<Vec<u8>>, stream: OutputStream) -> Self {
        let bytes = bytes.into();
        let terminated = bytes.last() == Some(&b'\n');
        Self { bytes, terminated, stream }
    }

    /// The line content without the terminating `\n`
    pub fn content(&self) -> &[u8] {
        if self.terminated {
            &self.bytes[..self.bytes.len() - 1]
        } else {
            &self.bytes
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::escaping::escape_printable(self.content()))
    }
}

/// Split raw output after every `\n`. Each line keeps its newline, and a
/// final line without one is kept as an unterminated line.
pub fn split_lines(raw: &[u8], stream: OutputStream) -> Vec<Line> {
    raw.split_inclusive(|b| *b == b'\n')
        .map(|chunk| Line::new(chunk, stream))
        .collect()
}

/// Replace every `\r\n` with `\n`
pub fn normalize_crlf(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_keeps_newlines() {
        let lines = split_lines(b"a\nb\n", OutputStream::Stdout);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].bytes, b"a\n".to_vec());
        assert!(lines[0].terminated);
        assert_eq!(lines[1].content(), b"b");
    }

    #[test]
    fn test_split_lines_unterminated_tail() {
        let lines = split_lines(b"a\nb", OutputStream::Stderr);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].terminated);
        assert!(!lines[1].terminated);
        assert_eq!(lines[1].content(), b"b");
        assert_eq!(lines[1].stream, OutputStream::Stderr);
    }

    #[test]
    fn test_split_lines_empty() {
        assert!(split_lines(b"", OutputStream::Stdout).is_empty());
        let lines = split_lines(b"\n\n", OutputStream::Stdout);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].content(), b"");
    }

    #[test]
    fn test_normalize_crlf() {
        assert_eq!(normalize_crlf(b"a\r\nb\r\n"), b"a\nb\n".to_vec());
        assert_eq!(normalize_crlf(b"a\rb\r"), b"a\rb\r".to_vec());
    }

    #[test]
    fn test_selected_stream() {
        let output = Output::new("out\n", "err\n", ExitStatus::SUCCESS);
        assert_eq!(output.selected(OutputStream::Stdout), b"out\n");
        assert_eq!(output.selected(OutputStream::Stderr), b"err\n");
        assert_eq!(output.lines(OutputStream::Stderr)[0].content(), b"err");
    }

    #[test]
    fn test_output_stream_from_str() {
        assert_eq!("combined".parse::<OutputStream>().unwrap(), OutputStream::Combined);
        assert!("both".parse::<OutputStream>().is_err());
    }
}
