//! Process lifecycle management
//!
//! Every external tool runs under a [`ProcessGuard`]: if the guard is dropped
//! before the child has been reaped, the child (and on Unix its whole process
//! group) is killed. [`run_with_timeout`] builds the verifier's wall-clock
//! limit on top of it.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// RAII guard that kills and reaps a child process on drop
pub struct ProcessGuard {
    child: Option<Child>,
    pid: u32,
}

impl ProcessGuard {
    /// Create a new process guard from a spawned child
    #[must_use]
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Wait for the child process to complete
    ///
    /// # Errors
    ///
    /// Returns an error if the process has already been consumed or wait fails.
    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.as_mut().map_or_else(
            || Err(std::io::Error::other("Process already consumed")),
            Child::wait,
        )?;
        self.child = None;
        Ok(status)
    }

    /// Poll the child without blocking
    ///
    /// # Errors
    ///
    /// Returns an error if the process has already been consumed or polling fails.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.as_mut().map_or_else(
            || Err(std::io::Error::other("Process already consumed")),
            Child::try_wait,
        )?;
        if status.is_some() {
            self.child = None;
        }
        Ok(status)
    }

    /// Kill the child and everything in its process group, then reap it
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_group(self.pid);
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Take the child process, preventing automatic cleanup
    #[must_use]
    pub fn take(mut self) -> Option<Child> {
        self.child.take()
    }

    /// Get the process ID
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::debug!(pid = self.pid, "killing unreaped child process");
            self.kill();
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // Children are spawned as group leaders, so -pid addresses the group.
    let _ = Command::new("kill")
        .args(["-KILL", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Output of a possibly time-limited process
#[derive(Debug, Clone)]
pub struct TimedOutput {
    /// Exit status, None if the process was killed on timeout
    pub status: Option<ExitStatus>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the deadline expired
    pub timed_out: bool,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl TimedOutput {
    /// Exit code, -1 when killed or terminated by a signal
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.and_then(|s| s.code()).unwrap_or(-1)
    }

    /// Whether the process exited successfully before the deadline
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|s| s.success())
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `command` to completion, feeding `stdin` and killing it once
/// `timeout` expires
///
/// # Errors
///
/// Returns an error only if the process cannot be spawned or polled.
pub fn run_with_timeout(
    command: &mut Command,
    stdin: Option<&str>,
    timeout: Option<Duration>,
) -> std::io::Result<TimedOutput> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let start = Instant::now();
    let mut child = command.spawn()?;
    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_owned();
            Some(thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            }))
        }
        _ => None,
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let mut guard = ProcessGuard::new(child);
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = guard.try_wait()? {
            break Some(status);
        }
        if timeout.is_some_and(|limit| start.elapsed() >= limit) {
            guard.kill();
            timed_out = true;
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }
    Ok(TimedOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
        timed_out,
        elapsed: start.elapsed(),
    })
}
