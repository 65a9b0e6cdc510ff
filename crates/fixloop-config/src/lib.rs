use anyhow::{Context, Result, anyhow, bail};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSetting {
    Auto,
    Ollama,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSetting {
    Auto,
    Silent,
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSetting {
    Code,
    Script,
    Command,
}

/// Values read from a `key=value` config file. Absent keys stay `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub language: Option<String>,
    pub mode: Option<ModeSetting>,
    pub os: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub start_sep: Option<String>,
    pub end_sep: Option<String>,
    pub skip_first_line: Option<bool>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub install_timeout_secs: Option<u64>,
    pub auto_install: Option<bool>,
    pub display_code: Option<bool>,
    pub save_code: Option<bool>,
    pub exec: Option<bool>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub language: Option<String>,
    pub mode: Option<ModeSetting>,
    pub os: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliRunOverrides {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub mode: Option<ModeSetting>,
    pub os: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub no_install: Option<bool>,
    pub display_code: Option<bool>,
    pub save_code: Option<bool>,
    pub exec: Option<bool>,
    pub verbose: Option<bool>,
    pub no_progress: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunDefaults {
    pub provider: ProviderSetting,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub language: String,
    pub mode: ModeSetting,
    /// `None` means "detect from the host".
    pub os: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub start_sep: String,
    pub end_sep: String,
    pub skip_first_line: bool,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// 0 disables the execution timeout.
    pub timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub auto_install: bool,
    pub display_code: bool,
    pub save_code: bool,
    pub exec: bool,
    pub verbose: bool,
    pub progress: ProgressSetting,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            provider: ProviderSetting::Auto,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "qwen2.5-coder:7b".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4.1-mini".to_string(),
            language: "python".to_string(),
            mode: ModeSetting::Code,
            os: None,
            temperature: 0.1,
            max_tokens: 2048,
            start_sep: "```".to_string(),
            end_sep: "```".to_string(),
            skip_first_line: true,
            max_attempts: 5,
            retry_delay_secs: 5,
            timeout_secs: 120,
            install_timeout_secs: 300,
            auto_install: true,
            display_code: false,
            save_code: false,
            exec: false,
            verbose: false,
            progress: ProgressSetting::Auto,
        }
    }
}

pub const CONFIG_FILE_NAME: &str = "fixloop.config";

/// Default lookup order when no explicit path is given.
pub fn config_search_paths(cwd: &Path) -> Vec<PathBuf> {
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".fixloop").join("config"));
    }
    paths
}

/// An explicit path must exist; search paths are skipped when missing.
pub fn load_file_config(
    explicit_path: Option<&Path>,
    search_paths: &[PathBuf],
) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => match search_paths.iter().find(|p| p.is_file()) {
            Some(p) => p.clone(),
            None => return Ok(None),
        },
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed = parse_file_config(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

pub fn parse_file_config(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            bail!("line {line_no}: expected key=value, got `{line}`");
        };
        let key = key.trim();
        let value = unquote(value.trim());

        apply_key(&mut cfg, key, value).with_context(|| format!("line {line_no}"))?;
    }

    Ok(cfg)
}

fn apply_key(cfg: &mut FileConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "provider" => cfg.provider = Some(required(key, value, parse_provider)?),
        "ollama_url" => cfg.ollama_url = Some(value.to_string()),
        "ollama_model" => cfg.ollama_model = Some(value.to_string()),
        "openai_base_url" => cfg.openai_base_url = Some(value.to_string()),
        "openai_model" => cfg.openai_model = Some(value.to_string()),
        "language" => cfg.language = Some(value.to_string()),
        "mode" => cfg.mode = Some(required(key, value, parse_mode)?),
        "os" => cfg.os = Some(value.to_string()),
        "temperature" => cfg.temperature = Some(number(key, value)?),
        "max_tokens" => cfg.max_tokens = Some(number(key, value)?),
        "start_sep" => cfg.start_sep = Some(value.to_string()),
        "end_sep" => cfg.end_sep = Some(value.to_string()),
        "skip_first_line" => cfg.skip_first_line = Some(required(key, value, parse_bool)?),
        "max_attempts" => cfg.max_attempts = Some(number(key, value)?),
        "retry_delay_secs" => cfg.retry_delay_secs = Some(number(key, value)?),
        "timeout_secs" => cfg.timeout_secs = Some(number(key, value)?),
        "install_timeout_secs" => cfg.install_timeout_secs = Some(number(key, value)?),
        "auto_install" => cfg.auto_install = Some(required(key, value, parse_bool)?),
        "display_code" => cfg.display_code = Some(required(key, value, parse_bool)?),
        "save_code" => cfg.save_code = Some(required(key, value, parse_bool)?),
        "exec" => cfg.exec = Some(required(key, value, parse_bool)?),
        "verbose" => cfg.verbose = Some(required(key, value, parse_bool)?),
        "progress" => cfg.progress = Some(required(key, value, parse_progress)?),
        other => bail!("unknown key `{other}`"),
    }
    Ok(())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn required<T>(key: &str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| anyhow!("invalid value `{value}` for `{key}`"))
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid number `{value}` for `{key}`"))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            provider: lookup("FIXLOOP_PROVIDER").and_then(|v| parse_provider(&v)),
            ollama_url: lookup("FIXLOOP_OLLAMA_URL"),
            ollama_model: lookup("FIXLOOP_OLLAMA_MODEL"),
            openai_base_url: lookup("OPENAI_BASE_URL"),
            openai_model: lookup("FIXLOOP_MODEL"),
            language: lookup("FIXLOOP_LANG"),
            mode: lookup("FIXLOOP_MODE").and_then(|v| parse_mode(&v)),
            os: lookup("FIXLOOP_OS"),
            max_attempts: lookup("FIXLOOP_MAX_ATTEMPTS").and_then(|v| v.trim().parse().ok()),
            retry_delay_secs: lookup("FIXLOOP_RETRY_DELAY_SECS")
                .and_then(|v| v.trim().parse().ok()),
            timeout_secs: lookup("FIXLOOP_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()),
            verbose: lookup("FIXLOOP_VERBOSE").and_then(|v| parse_bool(&v)),
            progress: lookup("FIXLOOP_PROGRESS").and_then(|v| parse_progress(&v)),
        }
    }
}

pub fn resolve_run_defaults(
    cli: &CliRunOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let base = RunDefaults::default();

    let provider = cli
        .provider
        .or(env_cfg.provider)
        .or(file_cfg.and_then(|c| c.provider))
        .unwrap_or(base.provider);

    let ollama_url = cli
        .ollama_url
        .clone()
        .or_else(|| env_cfg.ollama_url.clone())
        .or_else(|| file_cfg.and_then(|c| c.ollama_url.clone()))
        .unwrap_or(base.ollama_url);

    let ollama_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.ollama_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.ollama_model.clone()))
        .unwrap_or(base.ollama_model);

    let openai_base_url = env_cfg
        .openai_base_url
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.openai_base_url.clone()))
        .unwrap_or(base.openai_base_url);

    let openai_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.openai_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.openai_model.clone()))
        .unwrap_or(base.openai_model);

    let language = cli
        .language
        .clone()
        .or_else(|| env_cfg.language.clone())
        .or_else(|| file_cfg.and_then(|c| c.language.clone()))
        .unwrap_or(base.language);

    let mode = cli
        .mode
        .or(env_cfg.mode)
        .or(file_cfg.and_then(|c| c.mode))
        .unwrap_or(base.mode);

    let os = cli
        .os
        .clone()
        .or_else(|| env_cfg.os.clone())
        .or_else(|| file_cfg.and_then(|c| c.os.clone()))
        .or(base.os);

    let max_attempts = cli
        .max_attempts
        .or(env_cfg.max_attempts)
        .or(file_cfg.and_then(|c| c.max_attempts))
        .unwrap_or(base.max_attempts);

    let retry_delay_secs = cli
        .retry_delay_secs
        .or(env_cfg.retry_delay_secs)
        .or(file_cfg.and_then(|c| c.retry_delay_secs))
        .unwrap_or(base.retry_delay_secs);

    let timeout_secs = cli
        .timeout_secs
        .or(env_cfg.timeout_secs)
        .or(file_cfg.and_then(|c| c.timeout_secs))
        .unwrap_or(base.timeout_secs);

    let mut auto_install = file_cfg
        .and_then(|c| c.auto_install)
        .unwrap_or(base.auto_install);
    if cli.no_install == Some(true) {
        auto_install = false;
    }

    let display_code = cli
        .display_code
        .or(file_cfg.and_then(|c| c.display_code))
        .unwrap_or(base.display_code);

    let save_code = cli
        .save_code
        .or(file_cfg.and_then(|c| c.save_code))
        .unwrap_or(base.save_code);

    let exec = cli
        .exec
        .or(file_cfg.and_then(|c| c.exec))
        .unwrap_or(base.exec);

    let verbose = cli
        .verbose
        .or(env_cfg.verbose)
        .or(file_cfg.and_then(|c| c.verbose))
        .unwrap_or(base.verbose);

    let mut progress = env_cfg
        .progress
        .or(file_cfg.and_then(|c| c.progress))
        .unwrap_or(base.progress);

    if cli.no_progress == Some(true) {
        progress = ProgressSetting::Silent;
    }

    RunDefaults {
        provider,
        ollama_url,
        ollama_model,
        openai_base_url,
        openai_model,
        language,
        mode,
        os,
        temperature: file_cfg
            .and_then(|c| c.temperature)
            .unwrap_or(base.temperature),
        max_tokens: file_cfg
            .and_then(|c| c.max_tokens)
            .unwrap_or(base.max_tokens),
        start_sep: file_cfg
            .and_then(|c| c.start_sep.clone())
            .unwrap_or(base.start_sep),
        end_sep: file_cfg
            .and_then(|c| c.end_sep.clone())
            .unwrap_or(base.end_sep),
        skip_first_line: file_cfg
            .and_then(|c| c.skip_first_line)
            .unwrap_or(base.skip_first_line),
        max_attempts,
        retry_delay_secs,
        timeout_secs,
        install_timeout_secs: file_cfg
            .and_then(|c| c.install_timeout_secs)
            .unwrap_or(base.install_timeout_secs),
        auto_install,
        display_code,
        save_code,
        exec,
        verbose,
        progress,
    }
}

pub fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_provider(input: &str) -> Option<ProviderSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProviderSetting::Auto),
        "ollama" => Some(ProviderSetting::Ollama),
        "openai" | "openai-compatible" => Some(ProviderSetting::Openai),
        _ => None,
    }
}

pub fn parse_progress(input: &str) -> Option<ProgressSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProgressSetting::Auto),
        "silent" => Some(ProgressSetting::Silent),
        "verbose" => Some(ProgressSetting::Verbose),
        _ => None,
    }
}

pub fn parse_mode(input: &str) -> Option<ModeSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "code" => Some(ModeSetting::Code),
        "script" => Some(ModeSetting::Script),
        "command" => Some(ModeSetting::Command),
        _ => None,
    }
}
