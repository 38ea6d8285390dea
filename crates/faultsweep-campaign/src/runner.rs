//! Bounded external process execution.
//!
//! Every build and every test run goes through [`run_command`]: spawn with
//! piped output, drain the pipes on reader threads (so a chatty child never
//! deadlocks on a full pipe), and poll for exit under a wall-clock deadline.
//! A child that outlives its deadline is killed and reported with the
//! synthetic timeout return code; the caller classifies it like any other
//! outcome.
//!
//! Return code convention: the child's exit code when it exited, `-N` when
//! it was terminated by signal `N`.  The outcome classifier keys off this.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use faultsweep_fault::classify::TIMEOUT_RETCODE;

/// How often to poll a running child for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw record of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub retcode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunRecord {
    /// Whether the command exited 0.
    pub fn ok(&self) -> bool {
        self.retcode == 0
    }
}

/// Run `cmd` in `cwd` with `env` merged over the inherited environment,
/// bounded by `timeout`.
///
/// Only spawn-level problems (missing executable, unusable cwd) surface as
/// `Err`; everything the child does, including being killed for timing out,
/// comes back as a [`RunRecord`].
pub fn run_command(
    cmd: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> std::io::Result<RunRecord> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command line"))?;

    debug!("exec: cmd={cmd:?} cwd={}", cwd.display());

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout_thread = drain_pipe(child.stdout.take());
    let stderr_thread = drain_pipe(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let retcode = loop {
        match child.try_wait()? {
            Some(status) => break exit_retcode(status),
            None if Instant::now() >= deadline => {
                warn!("command {program:?} exceeded {timeout:?}, killing");
                let _ = child.kill();
                let _ = child.wait();
                break TIMEOUT_RETCODE;
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();

    Ok(RunRecord {
        retcode,
        stdout,
        stderr,
    })
}

/// Collect a pipe to a lossily-decoded string on a dedicated thread.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(unix)]
fn exit_retcode(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(0),
    }
}

#[cfg(not(unix))]
fn exit_retcode(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(0)
}
