pub mod classify;
pub mod error;
pub mod events;
pub mod executor;
pub mod extract;
pub mod generate;
pub mod language;
pub mod packages;
pub mod process;
pub mod repair;

pub use classify::{FailureCategory, classify};
pub use error::{ExecError, InstallError, RepairError};
pub use events::{EventSink, RepairAttempt, RepairEvent, TracingSink};
pub use executor::{
    Execute, ExecutionMode, ExecutionRequest, ExecutionResult, OsTarget, SandboxedExecutor,
};
pub use extract::{CodeBlock, ExtractOptions, Extractor};
pub use generate::generate_block;
pub use language::{LanguageRegistry, LanguageSpec, Runner};
pub use packages::{
    CommandPackageManager, Ecosystem, HttpPackageIndex, Install, InstallReport, PackageIndex,
    PackageInstaller, PackageManager,
};
pub use process::Interrupt;
pub use repair::{RepairLoop, RepairOutcome, RepairPolicy, RepairStatus};
