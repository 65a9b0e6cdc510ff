use crate::error::ExecError;
use crate::language::{LanguageRegistry, LanguageSpec};
use crate::process::{Captured, Interrupt, Invocation, run_captured};
use fixloop_llm::TaskKind;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsTarget {
    MacOs,
    Linux,
    Windows,
}

impl OsTarget {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }
}

impl FromStr for OsTarget {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "macos" | "mac" | "darwin" | "osx" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            "windows" | "win" => Ok(Self::Windows),
            _ => Err(ExecError::UnknownOs(s.trim().to_string())),
        }
    }
}

impl fmt::Display for OsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Code,
    Script(OsTarget),
    Command,
}

impl ExecutionMode {
    pub fn kind(self) -> TaskKind {
        match self {
            Self::Code => TaskKind::Code,
            Self::Script(_) => TaskKind::Script,
            Self::Command => TaskKind::Command,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    pub mode: ExecutionMode,
}

/// `succeeded` is true exactly when `stderr` is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub succeeded: bool,
}

impl ExecutionResult {
    /// Whitespace-only stderr counts as absent.
    pub fn from_streams(stdout: Option<String>, stderr: Option<String>) -> Self {
        let stderr = stderr.filter(|s| !s.trim().is_empty());
        Self {
            succeeded: stderr.is_none(),
            stdout,
            stderr,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::from_streams(None, Some(message.into()))
    }

    pub fn error_text(&self) -> &str {
        self.stderr.as_deref().unwrap_or_default()
    }

    fn from_captured(out: Captured, timeout: Option<Duration>) -> Self {
        let stdout = match String::from_utf8(out.stdout) {
            Ok(s) => s,
            Err(err) => return Self::failed(format!("stdout is not valid UTF-8: {err}")),
        };
        let mut stderr = match String::from_utf8(out.stderr) {
            Ok(s) => s,
            Err(err) => return Self::failed(format!("stderr is not valid UTF-8: {err}")),
        };

        match out.status {
            None => {
                let secs = timeout.map_or(0, |t| t.as_secs());
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("timeout: execution exceeded {secs}s limit"));
            }
            Some(status) if !status.success() && stderr.trim().is_empty() => {
                stderr = match status.code() {
                    Some(code) => format!("process exited with code {code}"),
                    None => "process terminated by signal".to_string(),
                };
            }
            Some(_) => {}
        }

        Self::from_streams(Some(stdout), Some(stderr))
    }
}

/// Anything that can run an `ExecutionRequest`.
pub trait Execute {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError>;
}

impl<T: Execute + ?Sized> Execute for &T {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        (**self).run(request)
    }
}

pub struct SandboxedExecutor {
    pub registry: LanguageRegistry,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub interrupt: Interrupt,
    /// Working directory for programs; `None` inherits the caller's.
    pub cwd: Option<PathBuf>,
    /// Parent of the per-attempt build directories; `None` uses the system temp dir.
    pub scratch_root: Option<PathBuf>,
    probed: Mutex<HashMap<&'static str, String>>,
}

impl SandboxedExecutor {
    pub fn new(registry: LanguageRegistry, timeout: Option<Duration>, interrupt: Interrupt) -> Self {
        Self {
            registry,
            timeout,
            interrupt,
            cwd: None,
            scratch_root: None,
            probed: Mutex::new(HashMap::new()),
        }
    }

    /// Finds the first candidate binary answering its version check. Cached per session.
    pub fn probe(&self, language: &str) -> Result<String, ExecError> {
        let spec = self.registry.resolve(language)?;
        self.probe_spec(spec)
    }

    fn probe_spec(&self, spec: &LanguageSpec) -> Result<String, ExecError> {
        if let Some(binary) = self.cached_probe(spec.name) {
            return Ok(binary);
        }

        let binary = spec
            .binaries
            .iter()
            .find(|binary| {
                let check = Invocation::new(**binary, spec.version_args.iter().copied());
                answers(&check, spec.name)
            })
            .ok_or_else(|| ExecError::MissingCompiler {
                language: spec.name.to_string(),
                binary: spec.binaries.join("/"),
            })?;

        if let Some(check) = spec.runner.runtime() {
            if !answers(&check, spec.name) {
                return Err(ExecError::MissingCompiler {
                    language: spec.name.to_string(),
                    binary: check.program,
                });
            }
        }

        debug!(language = spec.name, binary, "toolchain probe passed");
        self.probed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(spec.name, binary.to_string());
        Ok(binary.to_string())
    }

    fn cached_probe(&self, name: &str) -> Option<String> {
        self.probed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    fn run_code(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let spec = self.registry.resolve(&request.language)?;
        let binary = self.probe_spec(spec)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("fixloop-");
        let workdir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let plan = spec.runner.plan(&binary, &request.code, workdir.path());
        for source in &plan.sources {
            fs::write(workdir.path().join(&source.name), &source.contents)?;
        }

        if let Some(compile) = &plan.compile {
            info!(language = spec.name, compiler = %compile.program, "compiling");
            let out = match self.capture(compile, Some(workdir.path().to_path_buf())) {
                Ok(out) => out,
                Err(ExecError::Host(err)) => return Ok(launch_failure(compile, &err)),
                Err(err) => return Err(err),
            };
            if !out.success() {
                return Ok(ExecutionResult::from_captured(out, self.timeout));
            }
        }

        self.invoke(&plan.run)
    }

    fn run_script(&self, code: &str, os: OsTarget) -> Result<ExecutionResult, ExecError> {
        let inv = match os {
            OsTarget::Linux => Invocation::new("bash", ["-c", code]),
            OsTarget::MacOs => Invocation::new("osascript", ["-"]).with_stdin(code),
            OsTarget::Windows => Invocation::new("powershell", ["-NoProfile", "-Command", code]),
        };
        self.invoke(&inv)
    }

    fn run_command(&self, command: &str) -> Result<ExecutionResult, ExecError> {
        let inv = if cfg!(windows) {
            Invocation::new("cmd", ["/C", command])
        } else {
            Invocation::new("sh", ["-c", command])
        };
        self.invoke(&inv)
    }

    fn invoke(&self, inv: &Invocation) -> Result<ExecutionResult, ExecError> {
        match self.capture(inv, self.cwd.clone()) {
            Ok(out) => Ok(ExecutionResult::from_captured(out, self.timeout)),
            Err(ExecError::Host(err)) => Ok(launch_failure(inv, &err)),
            Err(err) => Err(err),
        }
    }

    fn capture(&self, inv: &Invocation, cwd: Option<PathBuf>) -> Result<Captured, ExecError> {
        run_captured(inv, cwd.as_deref(), self.timeout, Some(&self.interrupt))
    }
}

/// Runs a version check; any launch or exit failure counts as "not installed".
fn answers(check: &Invocation, language: &str) -> bool {
    match run_captured(check, None, Some(PROBE_TIMEOUT), None) {
        Ok(out) if out.success() => true,
        Ok(_) => {
            debug!(language, program = %check.program, "version check failed");
            false
        }
        Err(err) => {
            debug!(language, program = %check.program, error = %err, "binary not runnable");
            false
        }
    }
}

fn launch_failure(inv: &Invocation, err: &std::io::Error) -> ExecutionResult {
    warn!(program = %inv.program, error = %err, "failed to launch");
    ExecutionResult::failed(format!("failed to launch `{}`: {err}", inv.program))
}

impl Execute for SandboxedExecutor {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        if request.code.trim().is_empty() {
            return Err(ExecError::EmptyCode);
        }
        match request.mode {
            ExecutionMode::Code => self.run_code(request),
            ExecutionMode::Script(os) => self.run_script(&request.code, os),
            ExecutionMode::Command => self.run_command(&request.code),
        }
    }
}
