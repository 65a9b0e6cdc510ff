use std::io;
use thiserror::Error;

/// Failures raised before or around a program run. Program failures themselves
/// are reported through `ExecutionResult::stderr`, not here.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unsupported language `{0}`")]
    UnsupportedLanguage(String),
    #[error("no working {language} toolchain found (tried {binary})")]
    MissingCompiler { language: String, binary: String },
    #[error("unknown OS target `{0}` (expected macos, linux or windows)")]
    UnknownOs(String),
    #[error("nothing to execute")]
    EmptyCode,
    #[error("execution interrupted")]
    Interrupted,
    #[error("host failure: {0}")]
    Host(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("package `{package}` does not exist on {index}")]
    PackageNotFound { package: String, index: &'static str },
    #[error("installing `{package}` failed: {detail}")]
    InstallFailed { package: String, detail: String },
    #[error("no package ecosystem for language `{0}`")]
    UnsupportedEcosystem(String),
    #[error("package index unavailable while checking `{package}`: {detail}")]
    IndexUnavailable { package: String, detail: String },
}

/// A host failure on the final attempt, when no budget is left to absorb it.
#[derive(Debug, Error)]
#[error("attempt {attempt} of {max_attempts} failed: {source}")]
pub struct RepairError {
    pub attempt: u32,
    pub max_attempts: u32,
    #[source]
    pub source: ExecError,
}
