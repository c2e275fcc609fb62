//! Document and testcase configuration
//!
//! Configuration is layered: command line overrides win over testcase
//! configuration, which wins over document defaults, which win over the
//! built-in defaults. [`TestCaseConfig::resolve`] collapses the layers into
//! one [`EffectiveConfig`] before a testcase runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::output::OutputStream;

/// Exit code with which a testcase skips itself and the rest of its document
pub const DEFAULT_SKIP_DOCUMENT_CODE: i32 = 80;

/// Time budget for all testcases of a document
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(900);

/// Shell used when neither the document nor the environment names one
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Environment variable that replaces [`DEFAULT_SHELL`]
pub const DEFAULT_SHELL_ENV: &str = "SCRUT_DEFAULT_SHELL";

/// Per-document configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentConfig {
    /// Shell to execute testcases with
    pub shell: Option<PathBuf>,

    /// Time budget for all testcases, including prepended and appended ones
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub total_timeout: Option<Duration>,

    /// Documents whose testcases run before this document's own
    pub prepend: Vec<PathBuf>,

    /// Documents whose testcases run after this document's own
    pub append: Vec<PathBuf>,

    /// Exit code that skips the rest of the document
    pub skip_document_code: Option<i32>,

    /// Default output stream for all testcases
    pub output_stream: Option<OutputStream>,

    /// Testcase configuration applied to every testcase of the document
    pub defaults: TestCaseConfig,
}

impl DocumentConfig {
    /// Fill every unset value of `self` from `other`
    pub fn with_defaults_from(&self, other: &DocumentConfig) -> DocumentConfig {
        DocumentConfig {
            shell: self.shell.clone().or_else(|| other.shell.clone()),
            total_timeout: self.total_timeout.or(other.total_timeout),
            prepend: if self.prepend.is_empty() {
                other.prepend.clone()
            } else {
                self.prepend.clone()
            },
            append: if self.append.is_empty() {
                other.append.clone()
            } else {
                self.append.clone()
            },
            skip_document_code: self.skip_document_code.or(other.skip_document_code),
            output_stream: self.output_stream.or(other.output_stream),
            defaults: self.defaults.with_defaults_from(&other.defaults),
        }
    }

    /// The configured shell, `$SCRUT_DEFAULT_SHELL`, or `/bin/bash`
    pub fn shell(&self) -> PathBuf {
        self.shell.clone().unwrap_or_else(|| {
            std::env::var_os(DEFAULT_SHELL_ENV)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL))
        })
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout.unwrap_or(DEFAULT_TOTAL_TIMEOUT)
    }

    pub fn skip_document_code(&self) -> i32 {
        self.skip_document_code.unwrap_or(DEFAULT_SKIP_DOCUMENT_CODE)
    }
}

/// Per-testcase configuration. Every value is optional so that layers can
/// be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestCaseConfig {
    /// Start the shell in the background and do not wait for it
    pub detached: Option<bool>,

    /// Environment variables set on top of the inherited shell state
    pub environment: BTreeMap<String, String>,

    /// Keep `\r\n` in the output instead of normalizing it to `\n`
    pub keep_crlf: Option<bool>,

    /// Stream(s) expectations are applied to
    pub output_stream: Option<OutputStream>,

    /// Maximum execution time of the testcase
    #[serde(deserialize_with = "deserialize_opt_duration")]
    pub timeout: Option<Duration>,

    /// Wait before the testcase starts
    pub wait: Option<Wait>,

    /// Signal sent to a detached testcase's processes when the document ends
    pub detached_kill_signal: Option<KillSignal>,
}

impl TestCaseConfig {
    /// Fill every unset value of `self` from `defaults`. Environment maps are
    /// merged, with `self` winning on conflicts.
    pub fn with_defaults_from(&self, defaults: &TestCaseConfig) -> TestCaseConfig {
        let mut environment = defaults.environment.clone();
        environment.extend(self.environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        TestCaseConfig {
            detached: self.detached.or(defaults.detached),
            environment,
            keep_crlf: self.keep_crlf.or(defaults.keep_crlf),
            output_stream: self.output_stream.or(defaults.output_stream),
            timeout: self.timeout.or(defaults.timeout),
            wait: self.wait.clone().or_else(|| defaults.wait.clone()),
            detached_kill_signal: self
                .detached_kill_signal
                .clone()
                .or_else(|| defaults.detached_kill_signal.clone()),
        }
    }

    /// Collapse command line overrides, testcase configuration and document
    /// configuration into the configuration a testcase runs with
    pub fn resolve(
        overrides: &TestCaseConfig,
        testcase: &TestCaseConfig,
        document: &DocumentConfig,
    ) -> EffectiveConfig {
        let merged = overrides
            .with_defaults_from(testcase)
            .with_defaults_from(&document.defaults);

        EffectiveConfig {
            detached: merged.detached.unwrap_or(false),
            environment: merged.environment,
            keep_crlf: merged.keep_crlf.unwrap_or(false),
            output_stream: merged
                .output_stream
                .or(document.output_stream)
                .unwrap_or_default(),
            timeout: merged.timeout,
            wait: merged.wait,
            detached_kill_signal: merged.detached_kill_signal.unwrap_or_default(),
            skip_document_code: document.skip_document_code(),
        }
    }
}

/// Wait for a duration, or until a path exists, before a testcase starts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Wait {
    /// Longest time to wait
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Stop waiting once this path exists. Relative paths are resolved
    /// against the session temp directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// The fully resolved configuration of one testcase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub detached: bool,
    pub environment: BTreeMap<String, String>,
    pub keep_crlf: bool,
    pub output_stream: OutputStream,
    pub timeout: Option<Duration>,
    pub wait: Option<Wait>,
    pub detached_kill_signal: KillSignal,
    pub skip_document_code: i32,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        TestCaseConfig::resolve(
            &TestCaseConfig::default(),
            &TestCaseConfig::default(),
            &DocumentConfig::default(),
        )
    }
}

/// What happens to the processes of a detached testcase when its document
/// ends. Written as a signal name (`"term"`, `"SIGKILL"`), a signal number,
/// or `"off"` to leave them running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSignal {
    Disabled,
    /// Signal name with `SIG` prefix
    Enabled(String),
}

impl KillSignal {
    pub fn is_off(&self) -> bool {
        matches!(self, KillSignal::Disabled)
    }
}

impl Default for KillSignal {
    fn default() -> Self {
        KillSignal::Enabled("SIGTERM".into())
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillSignal::Disabled => f.write_str("off"),
            KillSignal::Enabled(name) => f.write_str(name),
        }
    }
}

impl FromStr for KillSignal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if matches!(s.to_ascii_lowercase().as_str(), "off" | "disabled" | "none") {
            return Ok(KillSignal::Disabled);
        }
        if let Ok(number) = s.parse::<i32>() {
            return signal_name(number).map(KillSignal::Enabled);
        }

        let upper = s.to_ascii_uppercase();
        let name = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{}", upper)
        };
        check_signal_name(&name)?;
        Ok(KillSignal::Enabled(name))
    }
}

#[cfg(unix)]
fn signal_name(number: i32) -> Result<String> {
    nix::sys::signal::Signal::try_from(number)
        .map(|signal| signal.as_str().to_string())
        .map_err(|e| Error::config(format!("invalid signal {}: {}", number, e)))
}

#[cfg(not(unix))]
fn signal_name(number: i32) -> Result<String> {
    Err(Error::config(format!(
        "signal numbers are not supported on this platform: {}",
        number
    )))
}

#[cfg(unix)]
fn check_signal_name(name: &str) -> Result<()> {
    nix::sys::signal::Signal::from_str(name)
        .map(|_| ())
        .map_err(|_| Error::config(format!("unknown signal {:?}", name)))
}

#[cfg(not(unix))]
fn check_signal_name(_name: &str) -> Result<()> {
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KillSignalRepr {
    Name(String),
    Number(i32),
}

impl<'de> Deserialize<'de> for KillSignal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let signal = match KillSignalRepr::deserialize(deserializer)? {
            KillSignalRepr::Name(name) => name.parse(),
            KillSignalRepr::Number(number) => signal_name(number).map(KillSignal::Enabled),
        };
        signal.map_err(serde::de::Error::custom)
    }
}

/// Parse a duration like `"1s"`, `"500ms"` or `"1m30s"`.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. Numbers may be fractional.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let invalid = || Error::config(format!("invalid duration {:?}", s));
    let mut total_nanos: u128 = 0;
    let mut chars = s.trim().chars().peekable();
    let mut found_unit = false;

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let nanos_per_unit: f64 = match unit.as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            "" => return Err(Error::config(format!("missing unit in duration {:?}", s))),
            _ => {
                return Err(Error::config(format!(
                    "unknown unit {:?} in duration {:?}",
                    unit, s
                )))
            }
        };

        total_nanos = total_nanos
            .checked_add((value * nanos_per_unit) as u128)
            .ok_or_else(|| Error::config(format!("duration {:?} is too long", s)))?;
        found_unit = true;
    }

    if !found_unit {
        return Err(invalid());
    }

    u64::try_from(total_nanos)
        .map(Duration::from_nanos)
        .map_err(|_| Error::config(format!("duration {:?} is too long", s)))
}

/// Durations are written as strings (`"1m30s"`) or as whole seconds
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Text(String),
    Seconds(u64),
}

impl DurationRepr {
    fn into_duration(self) -> Result<Duration> {
        match self {
            DurationRepr::Text(s) => parse_duration(&s),
            DurationRepr::Seconds(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    DurationRepr::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    Option::<DurationRepr>::deserialize(deserializer)?
        .map(DurationRepr::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}
