use crate::classify::FailureCategory;
use crate::executor::ExecutionResult;
use crate::packages::InstallReport;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One failed loop iteration. Only the latest code is kept by the loop; attempts are reported, not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairAttempt {
    pub attempt_index: u32,
    pub code: String,
    pub result: ExecutionResult,
    pub category: FailureCategory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairEvent {
    AttemptStarted { attempt: u32, max_attempts: u32 },
    AttemptFailed(RepairAttempt),
    InstallingPackage { package: String },
    PackageInstalled(InstallReport),
    InstallSkipped { package: String, reason: String },
    FixRequested { attempt: u32 },
    FixUnavailable { attempt: u32, reason: String },
    CodeReplaced { attempt: u32, code: String },
    Backoff { delay: Duration },
    Succeeded { attempt: u32 },
    Terminal { message: String },
    Fatal { message: String },
    Exhausted { attempts: u32 },
}

/// Receives loop progress. Injected into the loop at construction.
pub trait EventSink {
    fn emit(&self, event: &RepairEvent);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &RepairEvent) {
        (**self).emit(event)
    }
}

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RepairEvent) {
        match event {
            RepairEvent::AttemptStarted {
                attempt,
                max_attempts,
            } => debug!(attempt, max_attempts, "attempt started"),
            RepairEvent::AttemptFailed(a) => {
                info!(attempt = a.attempt_index, category = %a.category, stderr = a.result.error_text(), "attempt failed")
            }
            RepairEvent::InstallingPackage { package } => info!(%package, "installing package"),
            RepairEvent::PackageInstalled(report) => info!(?report, "package ready"),
            RepairEvent::InstallSkipped { package, reason } => {
                warn!(%package, %reason, "install skipped")
            }
            RepairEvent::FixRequested { attempt } => debug!(attempt, "fix requested"),
            RepairEvent::FixUnavailable { attempt, reason } => {
                warn!(attempt, %reason, "fix unavailable, keeping previous code")
            }
            RepairEvent::CodeReplaced { attempt, .. } => debug!(attempt, "code replaced"),
            RepairEvent::Backoff { delay } => debug!(?delay, "backing off"),
            RepairEvent::Succeeded { attempt } => info!(attempt, "succeeded"),
            RepairEvent::Terminal { message } => warn!(%message, "terminal failure"),
            RepairEvent::Fatal { message } => error!(%message, "fatal failure"),
            RepairEvent::Exhausted { attempts } => warn!(attempts, "retries exhausted"),
        }
    }
}
