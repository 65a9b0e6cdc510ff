use fixloop_core::{EventSink, InstallReport, RepairEvent, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    Silent,
    Minimal,
    Verbose,
}

/// Prints `[fixloop] ...` lines on stderr and forwards every event to `tracing`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConsoleSink {
    pub mode: ProgressMode,
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &RepairEvent) {
        TracingSink.emit(event);
        if let Some(line) = describe(event, self.mode) {
            eprintln!("[fixloop] {line}");
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no error output")
}

pub(crate) fn describe(event: &RepairEvent, mode: ProgressMode) -> Option<String> {
    let verbose = match mode {
        ProgressMode::Silent => return None,
        ProgressMode::Minimal => false,
        ProgressMode::Verbose => true,
    };

    match event {
        RepairEvent::AttemptStarted {
            attempt,
            max_attempts,
        } => verbose.then(|| format!("attempt {attempt}/{max_attempts}: executing")),
        RepairEvent::AttemptFailed(failed) => {
            if verbose {
                Some(format!(
                    "attempt {} failed ({}):\n{}",
                    failed.attempt_index,
                    failed.category,
                    failed.result.error_text().trim_end()
                ))
            } else {
                Some(format!(
                    "attempt {} failed: {}",
                    failed.attempt_index,
                    first_line(failed.result.error_text())
                ))
            }
        }
        RepairEvent::InstallingPackage { package } => Some(format!("installing `{package}`")),
        RepairEvent::PackageInstalled(InstallReport::Installed { package, tool }) => {
            Some(format!("installed `{package}` with {tool}"))
        }
        RepairEvent::PackageInstalled(InstallReport::AlreadyInstalled { package }) => {
            Some(format!("`{package}` is already installed"))
        }
        RepairEvent::InstallSkipped { package, reason } => {
            Some(format!("could not install `{package}`: {reason}"))
        }
        RepairEvent::FixRequested { attempt } => {
            Some(format!("asking the model to fix attempt {attempt}"))
        }
        RepairEvent::FixUnavailable { attempt, reason } => Some(format!(
            "no fix for attempt {attempt} ({reason}); retrying the same code"
        )),
        RepairEvent::CodeReplaced { attempt, code } => {
            verbose.then(|| format!("fixed code after attempt {attempt}:\n{}", code.trim_end()))
        }
        RepairEvent::Backoff { delay } => {
            (verbose && !delay.is_zero()).then(|| format!("waiting {}s before retrying", delay.as_secs_f32()))
        }
        RepairEvent::Succeeded { attempt } => verbose.then(|| format!("succeeded on attempt {attempt}")),
        RepairEvent::Terminal { .. } | RepairEvent::Fatal { .. } => None,
        RepairEvent::Exhausted { attempts } => {
            verbose.then(|| format!("giving up after {attempts} attempts"))
        }
    }
}
