mod cli_defaults;
mod dispatch;
mod progress;
mod repl_helpers;
mod runtime_context;
mod telemetry;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fixloop_config::{CliRunOverrides, ModeSetting, ProviderSetting, parse_mode};
use fixloop_core::{
    ExecutionMode, ExecutionRequest, Install, InstallReport, Interrupt, LanguageRegistry,
    RepairOutcome, SandboxedExecutor, generate_block,
};
use fixloop_llm::{GenerateRequest, Turn, shell_for_os};
use runtime_context::Session;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const REPL_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Auto,
    Ollama,
    Openai,
}

impl ProviderArg {
    fn as_setting(self) -> ProviderSetting {
        match self {
            Self::Auto => ProviderSetting::Auto,
            Self::Ollama => ProviderSetting::Ollama,
            Self::Openai => ProviderSetting::Openai,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Code,
    Script,
    Command,
}

impl ModeArg {
    fn as_setting(self) -> ModeSetting {
        match self {
            Self::Code => ModeSetting::Code,
            Self::Script => ModeSetting::Script,
            Self::Command => ModeSetting::Command,
        }
    }
}

/// Flags shared by every command that generates or runs code.
#[derive(Debug, Clone, Default, Args)]
struct SessionArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    lang: Option<String>,
    /// Target OS for script mode (macos, linux, windows).
    #[arg(long)]
    os: Option<String>,
    /// Run without asking for confirmation.
    #[arg(short = 'e', long)]
    exec: bool,
    /// Write the generated code to output/code_generated<ext>.
    #[arg(short = 's', long)]
    save_code: bool,
    #[arg(short = 'd', long)]
    display_code: bool,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Seconds to wait between attempts.
    #[arg(long)]
    retry_delay: Option<u64>,
    /// Execution timeout in seconds; 0 disables it.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    no_install: bool,
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
    #[arg(long)]
    ollama_url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    no_progress: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    log_json: bool,
}

impl SessionArgs {
    fn overrides(&self) -> CliRunOverrides {
        CliRunOverrides {
            provider: self.provider.map(ProviderArg::as_setting),
            ollama_url: self.ollama_url.clone(),
            model: self.model.clone(),
            language: self.lang.clone(),
            mode: self.mode.map(ModeArg::as_setting),
            os: self.os.clone(),
            max_attempts: self.max_attempts,
            retry_delay_secs: self.retry_delay,
            timeout_secs: self.timeout,
            no_install: self.no_install.then_some(true),
            display_code: self.display_code.then_some(true),
            save_code: self.save_code.then_some(true),
            exec: self.exec.then_some(true),
            verbose: self.verbose.then_some(true),
            no_progress: self.no_progress.then_some(true),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Generate, run and automatically repair code from natural-language tasks"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive session.
    Repl {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Generate code for one task, confirm, then run and repair it.
    Task {
        prompt: Option<String>,
        #[arg(long, conflicts_with = "prompt")]
        file: Option<PathBuf>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run existing code, a script or a command through the repair loop.
    Exec {
        /// A source file, `-` for stdin, or the code itself.
        #[arg(value_name = "SOURCE|-")]
        source: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// List supported languages.
    Languages {
        /// Check which toolchains are installed.
        #[arg(long)]
        probe: bool,
    },
}

fn mode_name(mode: ModeSetting) -> &'static str {
    match mode {
        ModeSetting::Code => "code",
        ModeSetting::Script => "script",
        ModeSetting::Command => "command",
    }
}

fn code_label(session: &Session, mode: ExecutionMode, language: &str) -> String {
    match mode {
        ExecutionMode::Code => format!("{language} code"),
        ExecutionMode::Script(os) => format!("{} script", shell_for_os(os.as_str())),
        ExecutionMode::Command => format!("{} command", session.os),
    }
}

/// One generated program and, unless the user declined to run it, its outcome.
struct TaskRun {
    request: ExecutionRequest,
    outcome: Option<RepairOutcome>,
}

/// Generates code for `task` and runs it through the repair loop.
fn run_task(
    session: &Session,
    task: &str,
    mode: ExecutionMode,
    language: &str,
    history: Vec<Turn>,
) -> Result<TaskRun> {
    let resolved = &session.resolved;
    let label = code_label(session, mode, language);
    session.announce(&format!("generating {label}"));

    let prompt = GenerateRequest {
        task: task.trim().to_string(),
        kind: mode.kind(),
        language: language.to_string(),
        os: session.os.as_str().to_string(),
        history,
        params: runtime_context::generation_params(resolved),
    };
    let block = generate_block(&session.coder, &session.extractor, &prompt)?;

    if resolved.display_code || !resolved.exec {
        repl_helpers::display_code(&block.code, &label);
    }
    if resolved.save_code {
        let cwd = std::env::current_dir().context("failed resolving current directory")?;
        let extension = repl_helpers::extension_for(mode, language, session.registry());
        let path = repl_helpers::save_generated_code(&cwd, &block.code, extension)?;
        session.announce(&format!("saved code to {}", path.display()));
    }
    let request = ExecutionRequest {
        code: block.code,
        language: language.to_string(),
        mode,
    };
    if !resolved.exec && !repl_helpers::confirm("Execute this code?", &mut io::stdin().lock())? {
        println!("Skipped execution.");
        return Ok(TaskRun {
            request,
            outcome: None,
        });
    }

    let outcome = session.repair_loop().run(request.clone())?;
    if outcome.is_success() && outcome.code != request.code && resolved.display_code {
        repl_helpers::display_code(&outcome.code, "fixed code");
    }
    Ok(TaskRun {
        request,
        outcome: Some(outcome),
    })
}

fn print_outcome(session: &Session, outcome: &RepairOutcome) {
    if let Some(output) = outcome.output.as_deref().filter(|o| !o.is_empty()) {
        print!("{output}");
        if !output.ends_with('\n') {
            println!();
        }
    }
    if outcome.is_success() {
        session.announce(&outcome.user_message());
    }
}

fn finish(session: &Session, outcome: RepairOutcome) -> Result<()> {
    print_outcome(session, &outcome);
    if !outcome.is_success() {
        bail!("{}", outcome.user_message());
    }
    Ok(())
}

fn task_command(prompt: Option<String>, file: Option<PathBuf>, args: SessionArgs) -> Result<()> {
    let task = match (prompt, file) {
        (Some(prompt), _) => prompt,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("failed reading task file {}", path.display()))?,
        (None, None) => bail!("provide a task prompt or --file PATH"),
    };
    if task.trim().is_empty() {
        bail!("task is empty");
    }

    let session = runtime_context::build_session(&args)?;
    let mode = runtime_context::execution_mode(session.resolved.mode, session.os);
    let language = session.resolved.language.clone();

    match run_task(&session, &task, mode, &language, Vec::new())?.outcome {
        Some(outcome) => finish(&session, outcome),
        None => Ok(()),
    }
}

/// Returns the code and, for files, the language implied by the extension.
fn read_exec_source(source: &str, registry: &LanguageRegistry) -> Result<(String, Option<String>)> {
    if source == "-" {
        let mut code = String::new();
        io::stdin()
            .read_to_string(&mut code)
            .context("failed reading code from stdin")?;
        return Ok((code, None));
    }

    let path = Path::new(source);
    if path.is_file() {
        let code = fs::read_to_string(path)
            .with_context(|| format!("failed reading source file {}", path.display()))?;
        let language = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| registry.by_extension(ext))
            .map(|spec| spec.name.to_string());
        return Ok((code, language));
    }

    Ok((source.to_string(), None))
}

fn exec_command(source: String, args: SessionArgs) -> Result<()> {
    let session = runtime_context::build_session(&args)?;
    let mode = runtime_context::execution_mode(session.resolved.mode, session.os);
    let (code, inferred) = read_exec_source(&source, session.registry())?;
    let language = args
        .lang
        .clone()
        .or(inferred)
        .unwrap_or_else(|| session.resolved.language.clone());

    if session.resolved.display_code {
        repl_helpers::display_code(&code, &code_label(&session, mode, &language));
    }

    let outcome = session.repair_loop().run(ExecutionRequest {
        code,
        language,
        mode,
    })?;
    finish(&session, outcome)
}

fn languages_command(probe: bool) -> Result<()> {
    telemetry::init_tracing(false, false);
    let executor = SandboxedExecutor::new(LanguageRegistry::builtin(), None, Interrupt::new());

    for spec in executor.registry.iter() {
        let kind = if spec.needs_compile() {
            "compiled"
        } else {
            "interpreted"
        };
        let mut line = format!("{:<12}{:<8}{:<13}", spec.name, spec.file_extension, kind);
        if !spec.aliases.is_empty() {
            line.push_str(&format!("aliases: {}", spec.aliases.join(", ")));
        }
        if probe {
            match executor.probe(spec.name) {
                Ok(binary) => line.push_str(&format!("  [found {binary}]")),
                Err(_) => line.push_str("  [missing]"),
            }
        }
        println!("{}", line.trim_end());
    }
    Ok(())
}

fn print_repl_help() {
    println!("REPL commands:");
    println!("  .help          - show this help");
    println!("  .mode <mode>   - switch between code, script and command");
    println!("  .lang <name>   - change the target language for code mode");
    println!("  .execute       - run the last generated code again");
    println!("  .install <pkg> - install a package for the current language");
    println!("  .model [name]  - show or override the model for this session");
    println!("  .exit          - quit");
    println!("Anything else is sent to the model as a task.");
}

fn report_repl_outcome(session: &Session, outcome: &RepairOutcome) {
    print_outcome(session, outcome);
    if !outcome.is_success() {
        eprintln!("error: {}", outcome.user_message());
    }
}

fn repl_install(session: &Session, package: &str, language: &str) {
    if package.is_empty() {
        eprintln!("error: expected .install <package>");
        return;
    }
    match session.installer.install(package, language) {
        Ok(InstallReport::Installed { package, tool }) => println!("installed `{package}` with {tool}"),
        Ok(InstallReport::AlreadyInstalled { package }) => println!("`{package}` is already installed"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn repl_model(session: &mut Session, name: &str) {
    if name.is_empty() {
        match session.coder.model_override.as_deref() {
            Some(model) => println!("model: {model}"),
            None => println!("model: provider default"),
        }
        return;
    }
    session.coder.model_override = Some(name.to_string());
    println!("model set to {name}");
}

fn repl_command(args: SessionArgs) -> Result<()> {
    let mut session = runtime_context::build_session(&args)?;
    let mut mode_setting = session.resolved.mode;
    let mut language = session.resolved.language.clone();
    let mut history: VecDeque<Turn> = VecDeque::new();
    let mut last: Option<ExecutionRequest> = None;
    let mut line = String::new();

    println!("fixloop REPL. Type .help for commands, .exit to quit.");
    loop {
        line.clear();
        print!("fixloop [{} {}]> ", mode_name(mode_setting), language);
        io::stdout().flush().context("failed flushing stdout")?;

        let bytes = io::stdin()
            .read_line(&mut line)
            .context("failed reading REPL input")?;
        if bytes == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('.') {
            let (command, rest) = trimmed
                .split_once(char::is_whitespace)
                .unwrap_or((trimmed, ""));
            match command {
                ".exit" | ".quit" => break,
                ".help" => print_repl_help(),
                ".mode" => match parse_mode(rest) {
                    Some(mode) => mode_setting = mode,
                    None => eprintln!("error: expected .mode code|script|command"),
                },
                ".lang" => match session.registry().resolve(rest) {
                    Ok(spec) => language = spec.name.to_string(),
                    Err(err) => eprintln!("error: {err}"),
                },
                ".execute" => match last.as_mut() {
                    Some(request) => match session.repair_loop().run(request.clone()) {
                        Ok(outcome) => {
                            report_repl_outcome(&session, &outcome);
                            request.code = outcome.code;
                        }
                        Err(err) => eprintln!("error: {err:#}"),
                    },
                    None => eprintln!("error: no code to execute yet; describe a task first"),
                },
                ".install" => repl_install(&session, rest.trim(), &language),
                ".model" => repl_model(&mut session, rest.trim()),
                other => eprintln!("error: unknown command {other}; type .help"),
            }
            continue;
        }

        let mode = runtime_context::execution_mode(mode_setting, session.os);
        let turns = history.iter().cloned().collect();
        match run_task(&session, trimmed, mode, &language, turns) {
            Ok(TaskRun {
                mut request,
                outcome: Some(outcome),
            }) => {
                report_repl_outcome(&session, &outcome);
                repl_helpers::push_bounded(&mut history, Turn::user(trimmed), REPL_HISTORY_LIMIT);
                repl_helpers::push_bounded(
                    &mut history,
                    Turn::assistant(outcome.code.clone()),
                    REPL_HISTORY_LIMIT,
                );
                request.code = outcome.code;
                last = Some(request);
            }
            Ok(TaskRun {
                request,
                outcome: None,
            }) => last = Some(request),
            Err(err) => eprintln!("error: {err:#}"),
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(cli_defaults::normalize_cli_args(std::env::args_os()));
    dispatch::execute(cli)
}
