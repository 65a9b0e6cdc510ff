use crate::{FixRequest, GenerateRequest, TaskKind};

pub const SYSTEM_PROMPT: &str = "You are a careful programming assistant. Answer with exactly one fenced code block and no prose outside it.";

/// Shell family a script task targets on the given OS.
pub fn shell_for_os(os: &str) -> &'static str {
    match os.trim().to_ascii_lowercase().as_str() {
        "macos" | "darwin" | "mac" => "AppleScript",
        "windows" | "win" => "PowerShell",
        _ => "bash",
    }
}

pub fn build_generate_prompt(req: &GenerateRequest) -> String {
    match req.kind {
        TaskKind::Code => format!(
            "Write a complete {language} program for the task below. It runs on {os}.\n\
             Rules:\n\
             - Put the whole program in one fenced code block tagged `{language}`.\n\
             - Print every result to standard output.\n\
             - Do not read from standard input.\n\
             Task: {task}",
            language = req.language,
            os = req.os,
            task = req.task.trim(),
        ),
        TaskKind::Script => format!(
            "Write a {shell} script for {os} that performs the task below.\n\
             Put the script in one fenced code block and nothing else.\n\
             Task: {task}",
            shell = shell_for_os(&req.os),
            os = req.os,
            task = req.task.trim(),
        ),
        TaskKind::Command => format!(
            "Write a single terminal command for {os} that performs the task below.\n\
             Put the command in one fenced code block and nothing else.\n\
             Task: {task}",
            os = req.os,
            task = req.task.trim(),
        ),
    }
}

pub fn build_fix_prompt(req: &FixRequest) -> String {
    format!(
        "The following {language} program failed.\n\
         Error output:\n{error}\n\
         Program:\n```{language}\n{code}\n```\n\
         Return the complete corrected program in one fenced code block. Keep its output printed to standard output.",
        language = req.language,
        error = req.error.trim_end(),
        code = req.code.trim_end(),
    )
}
