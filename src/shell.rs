//! Stateful bash execution
//!
//! Every testcase runs in a fresh bash process. The process reads this from
//! STDIN:
//!
//! ```text
//! source '<state dir>/prologue.sh'
//! <shell expression>
//! ```
//!
//! The prologue restores the snapshot of the previous testcase, applies the
//! testcase's environment overrides, and installs an `EXIT` trap that dumps
//! the shell state when the process ends. That dump is the next snapshot.
//!
//! Each shell leads its own process group so that a timeout can kill
//! everything the expression started.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::KillSignal;
use crate::error::{Error, Result};
use crate::output::{ExitStatus, Output, OutputStream};
use crate::session::Session;
use crate::state::{is_variable_name, shell_quote, Environment, ShellState};

/// How often a running shell is checked for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const PROLOGUE_FILE: &str = "prologue.sh";

/// Variables the state dump leaves out. They are either owned by bash, read
/// only, or set per testcase by the coordinator.
const EXCLUDED_VARIABLES: &[&str] = &[
    "BASH",
    "BASHOPTS",
    "BASH_*",
    "BASHPID",
    "COPROC",
    "DIRSTACK",
    "EPOCHREALTIME",
    "EPOCHSECONDS",
    "EUID",
    "FUNCNAME",
    "GROUPS",
    "HISTCMD",
    "LINENO",
    "OLDPWD",
    "PIPESTATUS",
    "PPID",
    "PWD",
    "RANDOM",
    "SECONDS",
    "SHELLOPTS",
    "SHLVL",
    "SRANDOM",
    "UID",
    "_",
    "SCRUT_TEST",
    "TESTDIR",
    "TESTFILE",
];

const PROLOGUE: &str = r#"# restore the state of the previous testcase
if [ -n "$__EMX_STATE_IN" ] && [ -f "$__EMX_STATE_IN" ]; then
    source "$__EMX_STATE_IN" >/dev/null 2>&1
fi

# testcase environment wins over restored variables
if [ -n "$__EMX_ENV_FILE" ] && [ -f "$__EMX_ENV_FILE" ]; then
    source "$__EMX_ENV_FILE"
fi

if [ "$__EMX_COMBINE_OUTPUT" = "1" ]; then
    exec 2>&1
fi

__emx_persist_state() {
    local __emx_code=$?
    if [ "$__EMX_PERSIST_STATE" = "1" ] && [ -n "$__EMX_STATE_OUT" ]; then
        local __emx_name __emx_decl __emx_flags
        {
            # the expression may have changed IFS, so never word-split here
            while IFS= read -r __emx_name; do
                case "$__emx_name" in
                    __emx_*|__EMX_*|@EXCLUDED@) continue ;;
                esac
                __emx_decl=$(declare -p "$__emx_name" 2>/dev/null) || continue
                __emx_flags=${__emx_decl#declare -}
                __emx_flags=${__emx_flags%% *}
                case "$__emx_flags" in
                    *r*) continue ;;
                esac
                printf '%s\n' "$__emx_decl"
            done < <(compgen -v)
            declare -f
            alias -p
            shopt -p
            set +o
            printf 'cd %q\n' "$PWD"
        } >"$__EMX_STATE_OUT" 2>/dev/null
    fi
    exit "$__emx_code"
}
trap __emx_persist_state EXIT
"#;

/// What to run and how
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub expression: &'a str,
    /// Environment of the shell process
    pub environment: &'a Environment,
    /// Variables exported after the snapshot is restored
    pub overrides: &'a BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub detached: bool,
    /// Signal for the processes of a detached shell once the session ends
    pub detached_kill_signal: &'a KillSignal,
    pub output_stream: OutputStream,
}

/// Result of one shell execution
#[derive(Debug, Clone)]
pub struct Execution {
    pub output: Output,
    /// Snapshot for the next execution. The previous snapshot if the shell
    /// left none behind (timeout, detached, replaced `EXIT` trap).
    pub state: ShellState,
    pub duration: Duration,
    /// The shell left running in the background, for detached invocations
    pub detached: Option<DetachedProcess>,
}

/// A detached shell that leads its own process group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedProcess {
    pub pid: u32,
    pub signal: KillSignal,
}

impl DetachedProcess {
    /// Send the configured signal to the process group of the shell. A group
    /// that is already gone is ignored.
    pub fn terminate(&self) {
        let KillSignal::Enabled(ref name) = self.signal else {
            tracing::debug!(pid = self.pid, "cleanup of detached process disabled");
            return;
        };

        #[cfg(unix)]
        {
            use std::str::FromStr;

            match nix::sys::signal::Signal::from_str(name) {
                Ok(signal) => {
                    tracing::debug!(pid = self.pid, signal = %name, "signalling detached process group");
                    signal_process_group(self.pid, signal);
                }
                Err(e) => tracing::warn!(pid = self.pid, signal = %name, "invalid signal: {}", e),
            }
        }
        #[cfg(not(unix))]
        {
            tracing::warn!(pid = self.pid, signal = %name, "cannot signal detached processes on this platform");
        }
    }
}

/// Runs shell expressions inside one session
#[derive(Debug)]
pub struct ShellRunner {
    shell: PathBuf,
    work_dir: PathBuf,
    state_dir: PathBuf,
    prologue: PathBuf,
    counter: AtomicUsize,
}

impl ShellRunner {
    /// Prepare a runner for the session. Writes the prologue into the
    /// session's state directory.
    pub fn new(shell: impl Into<PathBuf>, session: &Session) -> Result<Self> {
        let prologue = session.state_dir().join(PROLOGUE_FILE);
        fs::write(&prologue, render_prologue())
            .map_err(|e| Error::setup(format!("write {}: {}", prologue.display(), e)))?;

        Ok(Self {
            shell: shell.into(),
            work_dir: session.work_dir().to_path_buf(),
            state_dir: session.state_dir().to_path_buf(),
            prologue,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run one expression on top of `state`
    pub fn run(&self, state: &ShellState, invocation: &Invocation<'_>) -> Result<Execution> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let files = RunFiles::new(&self.state_dir, n);

        state.write_to(&files.state_in)?;
        fs::write(&files.env, render_overrides(invocation.overrides))?;

        let script = format!(
            "source {}\n{}\n",
            shell_quote(&self.prologue.to_string_lossy()),
            invocation.expression
        );

        let mut cmd = Command::new(&self.shell);
        cmd.current_dir(&self.work_dir)
            .env_clear()
            .envs(invocation.environment.iter())
            .envs(invocation.overrides.iter())
            .env("__EMX_STATE_IN", &files.state_in)
            .env("__EMX_STATE_OUT", &files.state_out)
            .env("__EMX_ENV_FILE", &files.env)
            .env("__EMX_PERSIST_STATE", if invocation.detached { "0" } else { "1" })
            .env(
                "__EMX_COMBINE_OUTPUT",
                if invocation.output_stream == OutputStream::Combined { "1" } else { "0" },
            );
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        if invocation.detached {
            let pid = self.spawn_detached(cmd, &script, &files)?;
            return Ok(Execution {
                output: Output {
                    exit_status: ExitStatus::Detached,
                    stream: invocation.output_stream,
                    ..Output::default()
                },
                state: state.clone(),
                duration: Duration::ZERO,
                detached: Some(DetachedProcess {
                    pid,
                    signal: invocation.detached_kill_signal.clone(),
                }),
            });
        }

        let execution = self.spawn_and_wait(cmd, script, state, invocation, &files);
        files.remove();
        execution
    }

    fn spawn_detached(&self, mut cmd: Command, script: &str, files: &RunFiles) -> Result<u32> {
        fs::write(&files.script, script)?;
        let stdin = fs::File::open(&files.script)?;
        let mut child = cmd
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let pid = child.id();
        tracing::debug!(pid, "detached shell");
        // reap in the background, nobody waits for the result
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn spawn_and_wait(
        &self,
        mut cmd: Command,
        script: String,
        state: &ShellState,
        invocation: &Invocation<'_>,
        files: &RunFiles,
    ) -> Result<Execution> {
        let started = Instant::now();
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        tracing::debug!(pid = child.id(), timeout = ?invocation.timeout, "spawned shell");

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // the shell may exit before reading everything
                let _ = stdin.write_all(script.as_bytes());
            }
        });
        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());

        let exit_status = wait_with_timeout(&mut child, invocation.timeout)
            .map_err(|e| Error::spawn(format!("wait for {}: {}", self.shell.display(), e)))?;
        // background jobs of the expression would keep the pipes open
        kill_process_group(&mut child);

        let _ = writer.join();
        let output = Output {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            exit_status,
            stream: invocation.output_stream,
        };
        let duration = started.elapsed();

        let state = match exit_status {
            ExitStatus::Timeout(_) => state.clone(),
            _ => match ShellState::read_from(&files.state_out)? {
                Some(next) => next,
                None => {
                    tracing::debug!("shell left no state behind, keeping previous state");
                    state.clone()
                }
            },
        };

        Ok(Execution {
            output,
            state,
            duration,
            detached: None,
        })
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        Error::spawn(format!("spawn {}: {}", self.shell.display(), e))
    }
}

/// Per-execution files in the state directory. Numbered so that a detached
/// shell never reads files of a later execution.
struct RunFiles {
    state_in: PathBuf,
    state_out: PathBuf,
    env: PathBuf,
    script: PathBuf,
}

impl RunFiles {
    fn new(state_dir: &Path, n: usize) -> Self {
        Self {
            state_in: state_dir.join(format!("state.{}.in", n)),
            state_out: state_dir.join(format!("state.{}.out", n)),
            env: state_dir.join(format!("env.{}.sh", n)),
            script: state_dir.join(format!("detached.{}.sh", n)),
        }
    }

    fn remove(&self) {
        for path in [&self.state_in, &self.state_out, &self.env, &self.script] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "failed to remove: {}", e);
                }
            }
        }
    }
}

fn render_prologue() -> String {
    PROLOGUE.replace("@EXCLUDED@", &EXCLUDED_VARIABLES.join("|"))
}

fn render_overrides(overrides: &BTreeMap<String, String>) -> String {
    let mut env = Environment::new();
    for (key, value) in overrides {
        if is_variable_name(key) {
            env.set(key.as_str(), value.as_str());
        } else {
            tracing::warn!(name = %key, "ignoring environment override with invalid name");
        }
    }
    env.to_exports()
}

fn read_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for the child to exit. Past the timeout the whole process group is
/// killed and [`ExitStatus::Timeout`] returned.
fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<ExitStatus> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code().map_or(ExitStatus::Unknown, ExitStatus::Code));
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                tracing::debug!(pid = child.id(), ?timeout, "timeout, killing shell");
                kill_process_group(child);
                child.wait()?;
                return Ok(ExitStatus::Timeout(timeout));
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    signal_process_group(child.id(), nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_process_group(pgid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pgid) else {
        return;
    };
    match nix::sys::signal::killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, signal = signal.as_str(), "failed to signal process group: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prologue_lists_excluded_variables() {
        let prologue = render_prologue();
        assert!(!prologue.contains("@EXCLUDED@"));
        assert!(prologue.contains("__emx_*|__EMX_*|BASH|BASHOPTS|BASH_*|"));
        assert!(prologue.contains("|SCRUT_TEST|TESTDIR|TESTFILE)"));
    }

    #[test]
    fn test_render_overrides_skips_invalid_names() {
        let overrides = BTreeMap::from([
            ("GOOD".to_string(), "a b".to_string()),
            ("NOT-GOOD".to_string(), "x".to_string()),
        ]);
        assert_eq!(render_overrides(&overrides), "export GOOD='a b'\n");
    }

    #[test]
    fn test_run_files_are_numbered() {
        let a = RunFiles::new(Path::new("/s"), 0);
        let b = RunFiles::new(Path::new("/s"), 1);
        assert_ne!(a.state_in, b.state_in);
        assert_eq!(a.state_out, PathBuf::from("/s/state.0.out"));
    }
}
