use anyhow::{Context, Result};
use fixloop_core::{ExecutionMode, LanguageRegistry, OsTarget};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

pub(crate) fn push_bounded<T>(history: &mut VecDeque<T>, item: T, cap: usize) {
    history.push_back(item);
    while history.len() > cap {
        history.pop_front();
    }
}

/// Defaults to "no" on empty input or EOF.
pub(crate) fn confirm(question: &str, input: &mut impl BufRead) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed flushing stdout")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub(crate) fn display_code(code: &str, label: &str) {
    println!("--- {label} ---");
    println!("{}", code.trim_end());
    println!("---");
}

pub(crate) fn extension_for(mode: ExecutionMode, language: &str, registry: &LanguageRegistry) -> &'static str {
    match mode {
        ExecutionMode::Code => registry
            .resolve(language)
            .map(|spec| spec.file_extension)
            .unwrap_or(".txt"),
        ExecutionMode::Script(OsTarget::MacOs) => ".applescript",
        ExecutionMode::Script(OsTarget::Windows) => ".ps1",
        ExecutionMode::Script(OsTarget::Linux) => ".sh",
        ExecutionMode::Command if cfg!(windows) => ".bat",
        ExecutionMode::Command => ".sh",
    }
}

/// Writes `output/code_generated<ext>` under `base`, replacing any previous file.
pub(crate) fn save_generated_code(base: &Path, code: &str, extension: &str) -> Result<PathBuf> {
    let dir = base.join("output");
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed creating output directory {}", dir.display()))?;
    let path = dir.join(format!("code_generated{extension}"));
    fs::write(&path, code)
        .with_context(|| format!("failed writing generated code {}", path.display()))?;
    Ok(path)
}
