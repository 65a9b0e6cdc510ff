use crate::classify::{FailureCategory, classify};
use crate::error::{ExecError, RepairError};
use crate::events::{EventSink, RepairAttempt, RepairEvent};
use crate::executor::{Execute, ExecutionMode, ExecutionRequest, ExecutionResult};
use crate::extract::Extractor;
use crate::packages::Install;
use fixloop_llm::{Coder, FixRequest, shell_for_os};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    pub auto_install: bool,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            auto_install: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStatus {
    Success,
    Terminal,
    ExhaustedRetries,
    Fatal,
}

/// What the caller gets back from every loop exit except a final-attempt host failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub status: RepairStatus,
    pub code: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl RepairOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RepairStatus::Success
    }

    pub fn user_message(&self) -> String {
        let first_line = self
            .error
            .as_deref()
            .and_then(|e| e.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("unknown error");
        match self.status {
            RepairStatus::Success => format!("ran successfully (attempt {})", self.attempts),
            RepairStatus::Terminal => format!(
                "stopped after attempt {}: a file or directory is missing ({first_line}); regenerating code cannot fix this",
                self.attempts
            ),
            RepairStatus::ExhaustedRetries => format!(
                "automatic fixing failed after {} attempts; last error: {first_line}",
                self.attempts
            ),
            RepairStatus::Fatal => format!("cannot run: {first_line}"),
        }
    }
}

#[derive(Debug)]
enum RepairState {
    Executing,
    Classifying(ExecutionResult),
    Installing { package: String, error: String },
    Fixing { error: String },
    Backoff,
    Done(RepairOutcome),
}

struct RepairRun {
    request: ExecutionRequest,
    original_code: String,
    attempts: u32,
    max_attempts: u32,
    attempted_packages: HashSet<String>,
    last_code: String,
    last_result: Option<ExecutionResult>,
}

impl RepairRun {
    fn outcome(&self, status: RepairStatus, code: String, result: Option<&ExecutionResult>) -> RepairOutcome {
        RepairOutcome {
            status,
            code,
            output: result.and_then(|r| r.stdout.clone()),
            error: result.and_then(|r| r.stderr.clone()),
            attempts: self.attempts,
        }
    }
}

/// Execute, classify, remediate, repeat within a fixed attempt budget.
pub struct RepairLoop<E, I, C, S>
where
    E: Execute,
    I: Install,
    C: Coder,
    S: EventSink,
{
    pub executor: E,
    pub installer: I,
    pub coder: C,
    pub extractor: Extractor,
    pub events: S,
    pub policy: RepairPolicy,
}

impl<E, I, C, S> RepairLoop<E, I, C, S>
where
    E: Execute,
    I: Install,
    C: Coder,
    S: EventSink,
{
    pub fn run(&self, request: ExecutionRequest) -> Result<RepairOutcome, RepairError> {
        let mut run = RepairRun {
            original_code: request.code.clone(),
            last_code: request.code.clone(),
            request,
            attempts: 0,
            max_attempts: self.policy.max_attempts.max(1),
            attempted_packages: HashSet::new(),
            last_result: None,
        };

        let mut state = RepairState::Executing;
        loop {
            state = match state {
                RepairState::Done(outcome) => return Ok(outcome),
                RepairState::Executing => self.execute(&mut run)?,
                RepairState::Classifying(result) => self.classify(&mut run, result),
                RepairState::Installing { package, error } => self.install(&mut run, package, error),
                RepairState::Fixing { error } => self.fix(&mut run, error),
                RepairState::Backoff => self.backoff(&mut run),
            };
        }
    }

    fn execute(&self, run: &mut RepairRun) -> Result<RepairState, RepairError> {
        run.attempts += 1;
        self.events.emit(&RepairEvent::AttemptStarted {
            attempt: run.attempts,
            max_attempts: run.max_attempts,
        });
        run.last_code = run.request.code.clone();

        match self.executor.run(&run.request) {
            Ok(result) => Ok(RepairState::Classifying(result)),
            Err(err @ ExecError::MissingCompiler { .. }) => {
                let category = FailureCategory::from_exec_error(&err).unwrap_or_else(|| {
                    FailureCategory::GenericError {
                        message: err.to_string(),
                    }
                });
                Ok(self.record_failure(run, ExecutionResult::failed(err.to_string()), category))
            }
            Err(ExecError::Host(source)) => {
                if run.attempts >= run.max_attempts {
                    return Err(RepairError {
                        attempt: run.attempts,
                        max_attempts: run.max_attempts,
                        source: ExecError::Host(source),
                    });
                }
                warn!(attempt = run.attempts, error = %source, "host failure during attempt");
                let message = format!("host failure: {source}");
                let category = FailureCategory::GenericError {
                    message: message.clone(),
                };
                Ok(self.record_failure(run, ExecutionResult::failed(message), category))
            }
            Err(err) => {
                let message = err.to_string();
                self.events.emit(&RepairEvent::Fatal {
                    message: message.clone(),
                });
                let result = ExecutionResult::failed(message);
                Ok(RepairState::Done(run.outcome(
                    RepairStatus::Fatal,
                    run.request.code.clone(),
                    Some(&result),
                )))
            }
        }
    }

    fn record_failure(
        &self,
        run: &mut RepairRun,
        result: ExecutionResult,
        category: FailureCategory,
    ) -> RepairState {
        let error = result.error_text().to_string();
        self.events.emit(&RepairEvent::AttemptFailed(RepairAttempt {
            attempt_index: run.attempts,
            code: run.request.code.clone(),
            result: result.clone(),
            category,
        }));
        run.last_result = Some(result);
        RepairState::Fixing { error }
    }

    fn classify(&self, run: &mut RepairRun, result: ExecutionResult) -> RepairState {
        if result.succeeded {
            self.events.emit(&RepairEvent::Succeeded {
                attempt: run.attempts,
            });
            return RepairState::Done(run.outcome(
                RepairStatus::Success,
                run.request.code.clone(),
                Some(&result),
            ));
        }

        let error = result.error_text().to_string();
        let category = classify(&error);
        self.events.emit(&RepairEvent::AttemptFailed(RepairAttempt {
            attempt_index: run.attempts,
            code: run.request.code.clone(),
            result: result.clone(),
            category: category.clone(),
        }));

        let next = match category {
            FailureCategory::MissingFile => {
                self.events.emit(&RepairEvent::Terminal {
                    message: error.clone(),
                });
                RepairState::Done(run.outcome(
                    RepairStatus::Terminal,
                    run.original_code.clone(),
                    Some(&result),
                ))
            }
            FailureCategory::MissingModule { package } if !self.policy.auto_install => {
                self.events.emit(&RepairEvent::InstallSkipped {
                    package,
                    reason: "automatic installation is disabled".to_string(),
                });
                RepairState::Fixing { error }
            }
            FailureCategory::MissingModule { package }
                if run.attempted_packages.contains(&package) =>
            {
                self.events.emit(&RepairEvent::InstallSkipped {
                    package,
                    reason: "already attempted in this run".to_string(),
                });
                RepairState::Fixing { error }
            }
            FailureCategory::MissingModule { package } => RepairState::Installing { package, error },
            FailureCategory::MissingCompiler { .. } | FailureCategory::GenericError { .. } => {
                RepairState::Fixing { error }
            }
        };
        run.last_result = Some(result);
        next
    }

    fn install(&self, run: &mut RepairRun, package: String, error: String) -> RepairState {
        run.attempted_packages.insert(package.clone());
        self.events.emit(&RepairEvent::InstallingPackage {
            package: package.clone(),
        });

        match self.installer.install(&package, &run.request.language) {
            Ok(report) => {
                self.events.emit(&RepairEvent::PackageInstalled(report));
                RepairState::Backoff
            }
            Err(err) => {
                self.events.emit(&RepairEvent::InstallSkipped {
                    package,
                    reason: err.to_string(),
                });
                RepairState::Fixing { error }
            }
        }
    }

    fn fix(&self, run: &mut RepairRun, error: String) -> RepairState {
        let attempt = run.attempts;
        self.events.emit(&RepairEvent::FixRequested { attempt });

        let request = FixRequest {
            code: run.request.code.clone(),
            error,
            language: fix_language(&run.request),
        };
        let unavailable = |reason: String| RepairEvent::FixUnavailable { attempt, reason };

        match self.coder.fix(&request) {
            Ok(Some(text)) => {
                let code = self.extractor.extract(&text, run.request.mode.kind());
                if code.trim().is_empty() {
                    self.events
                        .emit(&unavailable("response contained no code".to_string()));
                } else {
                    self.events.emit(&RepairEvent::CodeReplaced {
                        attempt,
                        code: code.clone(),
                    });
                    run.request.code = code;
                }
            }
            Ok(None) => self.events.emit(&unavailable("no fix offered".to_string())),
            Err(err) => self.events.emit(&unavailable(format!("{err:#}"))),
        }
        RepairState::Backoff
    }

    fn backoff(&self, run: &mut RepairRun) -> RepairState {
        if run.attempts >= run.max_attempts {
            self.events.emit(&RepairEvent::Exhausted {
                attempts: run.attempts,
            });
            return RepairState::Done(run.outcome(
                RepairStatus::ExhaustedRetries,
                run.last_code.clone(),
                run.last_result.as_ref(),
            ));
        }

        let delay = self.policy.retry_delay;
        if !delay.is_zero() {
            self.events.emit(&RepairEvent::Backoff { delay });
            thread::sleep(delay);
        }
        RepairState::Executing
    }
}

/// The language named in fix prompts; scripts and commands are shell text.
fn fix_language(request: &ExecutionRequest) -> String {
    match request.mode {
        ExecutionMode::Code => request.language.clone(),
        ExecutionMode::Script(os) => shell_for_os(os.as_str()).to_string(),
        ExecutionMode::Command => "shell command".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{RepairOutcome, RepairStatus, fix_language};
    use crate::executor::{ExecutionMode, ExecutionRequest, OsTarget};

    fn outcome(status: RepairStatus, error: Option<&str>) -> RepairOutcome {
        RepairOutcome {
            status,
            code: "print(1)".to_string(),
            output: None,
            error: error.map(str::to_string),
            attempts: 3,
        }
    }

    #[test]
    fn user_messages() {
        insta::assert_snapshot!(
            outcome(RepairStatus::ExhaustedRetries, Some("Traceback:\n  SyntaxError: bad")).user_message(),
            @"automatic fixing failed after 3 attempts; last error: Traceback:"
        );
        insta::assert_snapshot!(
            outcome(RepairStatus::Terminal, Some("\nls: /x: No such file or directory")).user_message(),
            @"stopped after attempt 3: a file or directory is missing (ls: /x: No such file or directory); regenerating code cannot fix this"
        );
        insta::assert_snapshot!(
            outcome(RepairStatus::Fatal, Some("unsupported language `cobol`")).user_message(),
            @"cannot run: unsupported language `cobol`"
        );
        insta::assert_snapshot!(
            outcome(RepairStatus::Success, None).user_message(),
            @"ran successfully (attempt 3)"
        );
    }

    #[test]
    fn fix_language_follows_mode() {
        let mut request = ExecutionRequest {
            code: "x".to_string(),
            language: "ruby".to_string(),
            mode: ExecutionMode::Code,
        };
        assert_eq!(fix_language(&request), "ruby");
        request.mode = ExecutionMode::Script(OsTarget::Windows);
        assert_eq!(fix_language(&request), "PowerShell");
        request.mode = ExecutionMode::Command;
        assert_eq!(fix_language(&request), "shell command");
    }
}
