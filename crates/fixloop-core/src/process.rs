use crate::error::ExecError;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long to keep reading after a kill.
const KILL_GRACE: Duration = Duration::from_millis(200);
/// Read bound after exit when no timeout is configured.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One external program call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

#[derive(Debug)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed after the deadline, or its output
    /// was still held open by a detached descendant when the deadline passed.
    pub status: Option<ExitStatus>,
}

impl Captured {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

/// Shared cancellation handle between the Ctrl-C handler and a running child.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptState>,
}

#[derive(Debug, Default)]
struct InterruptState {
    cancelled: AtomicBool,
    busy: AtomicBool,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when no child is running, leaving the caller to decide what to do.
    pub fn request_cancel(&self) -> bool {
        if self.inner.busy.load(Ordering::SeqCst) {
            self.inner.cancelled.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    fn begin(&self) -> BusyGuard<'_> {
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.busy.store(true, Ordering::SeqCst);
        BusyGuard(self)
    }

    fn take_cancel(&self) -> bool {
        self.inner.cancelled.swap(false, Ordering::SeqCst)
    }
}

struct BusyGuard<'a>(&'a Interrupt);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.busy.store(false, Ordering::SeqCst);
    }
}

/// Runs `inv` with every stream piped, polling until exit, deadline or cancellation.
pub fn run_captured(
    inv: &Invocation,
    cwd: Option<&Path>,
    timeout: Option<Duration>,
    interrupt: Option<&Interrupt>,
) -> Result<Captured, ExecError> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(if inv.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let _guard = interrupt.map(Interrupt::begin);
    let mut child = cmd.spawn()?;
    debug!(program = %inv.program, pid = child.id(), "spawned child");

    if let (Some(input), Some(mut pipe)) = (inv.stdin.clone(), child.stdin.take()) {
        thread::spawn(move || {
            if let Err(err) = pipe.write_all(input.as_bytes()) {
                debug!(error = %err, "child closed stdin early");
            }
        });
    }
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(err) => {
                terminate(&mut child);
                return Err(err.into());
            }
        }
        if interrupt.is_some_and(Interrupt::take_cancel) {
            warn!(program = %inv.program, "interrupt received, killing child");
            terminate(&mut child);
            let until = Instant::now() + KILL_GRACE;
            drain(stdout, until);
            drain(stderr, until);
            return Err(ExecError::Interrupted);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(program = %inv.program, "deadline reached, killing child");
            terminate(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // The leader is reaped; anything left in its group is a stray background job.
    kill_group(&child);

    let until = match deadline {
        Some(d) => d.max(Instant::now() + KILL_GRACE),
        None => Instant::now() + DRAIN_GRACE,
    };
    let (stdout, out_closed) = drain(stdout, until);
    let (stderr, err_closed) = drain(stderr, until);
    if !(out_closed && err_closed) {
        warn!(program = %inv.program, "output still open after exit, abandoning readers");
        if deadline.is_some() {
            status = None;
        }
    }

    Ok(Captured {
        stdout,
        stderr,
        status,
    })
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(err) => {
                        debug!(error = %err, "failed reading child output");
                        break;
                    }
                }
            }
        });
        rx
    })
}

/// Collects output until the pipe closes or `until` passes. The flag is `true` on EOF.
fn drain(rx: Option<Receiver<Vec<u8>>>, until: Instant) -> (Vec<u8>, bool) {
    let Some(rx) = rx else {
        return (Vec::new(), true);
    };
    let mut buf = Vec::new();
    loop {
        let left = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => return (buf, true),
            Err(RecvTimeoutError::Timeout) => return (buf, false),
        }
    }
}

fn kill_group(child: &Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: kill(2) only signals the group created for this child.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                debug!(error = %err, "process group kill failed");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

fn terminate(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}
