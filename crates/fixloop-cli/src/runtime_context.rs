use crate::progress::{ConsoleSink, ProgressMode};
use crate::telemetry;
use crate::SessionArgs;
use anyhow::{Context, Result, anyhow};
use fixloop_config::{
    CliRunOverrides, EnvConfig, ModeSetting, ProgressSetting, ProviderSetting, RunDefaults,
    config_search_paths, load_file_config, resolve_run_defaults,
};
use fixloop_core::{
    CommandPackageManager, ExecutionMode, ExtractOptions, Extractor, HttpPackageIndex, Interrupt,
    LanguageRegistry, OsTarget, PackageInstaller, RepairLoop, RepairPolicy, SandboxedExecutor,
};
use fixloop_llm::{
    CompletionRequest, GenerationParams, LlmClient, LlmCoder, ProviderRouter, ProviderSelection,
};
use fixloop_llm_ollama::OllamaClient;
use fixloop_llm_openai::OpenAiCompatibleClient;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) struct MaybeOpenAiClient {
    inner: Option<OpenAiCompatibleClient>,
}

impl LlmClient for MaybeOpenAiClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let client = self
            .inner
            .as_ref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for the OpenAI-compatible provider"))?;
        client.complete(req, model)
    }
}

type FixloopProviderRouter = ProviderRouter<OllamaClient, MaybeOpenAiClient, OllamaClient>;
pub(crate) type FixloopCoder = LlmCoder<FixloopProviderRouter>;
pub(crate) type FixloopInstaller = PackageInstaller<HttpPackageIndex, CommandPackageManager>;
pub(crate) type FixloopRepairLoop<'a> =
    RepairLoop<&'a SandboxedExecutor, &'a FixloopInstaller, &'a FixloopCoder, ConsoleSink>;

pub(crate) fn provider_to_selection(provider: ProviderSetting) -> ProviderSelection {
    match provider {
        ProviderSetting::Auto => ProviderSelection::Auto,
        ProviderSetting::Ollama => ProviderSelection::Ollama,
        ProviderSetting::Openai => ProviderSelection::OpenAiCompatible,
    }
}

pub(crate) fn resolved_progress_mode(progress: ProgressSetting, verbose: bool) -> ProgressMode {
    match progress {
        ProgressSetting::Silent => ProgressMode::Silent,
        ProgressSetting::Verbose => ProgressMode::Verbose,
        ProgressSetting::Auto => {
            if verbose {
                ProgressMode::Verbose
            } else {
                ProgressMode::Minimal
            }
        }
    }
}

pub(crate) fn resolve_config(
    config: Option<PathBuf>,
    cli_overrides: &CliRunOverrides,
) -> Result<RunDefaults> {
    let cwd = std::env::current_dir().context("failed resolving current directory")?;
    let file_cfg = load_file_config(config.as_deref(), &config_search_paths(&cwd))?;
    let env_cfg = EnvConfig::from_current_env();
    Ok(resolve_run_defaults(
        cli_overrides,
        &env_cfg,
        file_cfg.as_ref(),
    ))
}

pub(crate) fn resolve_os(resolved: &RunDefaults) -> Result<OsTarget> {
    match resolved.os.as_deref() {
        Some(os) => Ok(os.parse::<OsTarget>()?),
        None => Ok(OsTarget::current()),
    }
}

pub(crate) fn execution_mode(mode: ModeSetting, os: OsTarget) -> ExecutionMode {
    match mode {
        ModeSetting::Code => ExecutionMode::Code,
        ModeSetting::Script => ExecutionMode::Script(os),
        ModeSetting::Command => ExecutionMode::Command,
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

pub(crate) fn build_coder(resolved: &RunDefaults) -> Result<FixloopCoder> {
    let ollama_client = OllamaClient::new(resolved.ollama_url.clone())?;
    let openai_client = MaybeOpenAiClient {
        inner: std::env::var("OPENAI_API_KEY").ok().map(|api_key| {
            OpenAiCompatibleClient::new(resolved.openai_base_url.clone(), api_key)
        }),
    };

    let router = ProviderRouter {
        ollama: ollama_client.clone(),
        openai: openai_client,
        reachability: ollama_client,
        ollama_model: resolved.ollama_model.clone(),
        openai_model: resolved.openai_model.clone(),
    };

    Ok(LlmCoder {
        service: router,
        selection: provider_to_selection(resolved.provider),
        model_override: None,
        fix_params: generation_params(resolved),
    })
}

pub(crate) fn generation_params(resolved: &RunDefaults) -> GenerationParams {
    GenerationParams {
        temperature: resolved.temperature,
        max_tokens: resolved.max_tokens,
    }
}

/// Ctrl-C stops the running child if there is one, otherwise exits the process.
fn install_interrupt_handler(interrupt: &Interrupt) -> Result<()> {
    let handle = interrupt.clone();
    ctrlc::set_handler(move || {
        if !handle.request_cancel() {
            eprintln!();
            std::process::exit(130);
        }
    })
    .context("failed installing Ctrl-C handler")
}

/// Everything one CLI invocation needs to generate, run and repair code.
pub(crate) struct Session {
    pub resolved: RunDefaults,
    pub os: OsTarget,
    pub coder: FixloopCoder,
    pub extractor: Extractor,
    pub executor: SandboxedExecutor,
    pub installer: FixloopInstaller,
    pub progress: ProgressMode,
}

impl Session {
    pub(crate) fn repair_loop(&self) -> FixloopRepairLoop<'_> {
        RepairLoop {
            executor: &self.executor,
            installer: &self.installer,
            coder: &self.coder,
            extractor: self.extractor.clone(),
            events: ConsoleSink {
                mode: self.progress,
            },
            policy: RepairPolicy {
                max_attempts: self.resolved.max_attempts,
                retry_delay: Duration::from_secs(self.resolved.retry_delay_secs),
                auto_install: self.resolved.auto_install,
            },
        }
    }

    pub(crate) fn registry(&self) -> &LanguageRegistry {
        &self.executor.registry
    }

    pub(crate) fn announce(&self, message: &str) {
        if self.progress != ProgressMode::Silent {
            eprintln!("[fixloop] {message}");
        }
    }
}

pub(crate) fn build_session(args: &SessionArgs) -> Result<Session> {
    let resolved = resolve_config(args.config.clone(), &args.overrides())?;
    telemetry::init_tracing(args.log_json, resolved.verbose);

    let os = resolve_os(&resolved)?;
    let interrupt = Interrupt::new();
    install_interrupt_handler(&interrupt)?;

    let executor = SandboxedExecutor::new(
        LanguageRegistry::builtin(),
        seconds(resolved.timeout_secs),
        interrupt,
    );
    let installer = PackageInstaller {
        index: HttpPackageIndex::default(),
        manager: CommandPackageManager {
            timeout: seconds(resolved.install_timeout_secs),
        },
    };
    let extractor = Extractor::new(ExtractOptions {
        start_sep: resolved.start_sep.clone(),
        end_sep: resolved.end_sep.clone(),
        skip_first_line: resolved.skip_first_line,
    });

    Ok(Session {
        coder: build_coder(&resolved)?,
        progress: resolved_progress_mode(resolved.progress, resolved.verbose),
        os,
        extractor,
        executor,
        installer,
        resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::{execution_mode, provider_to_selection, resolve_os, resolved_progress_mode};
    use crate::progress::ProgressMode;
    use fixloop_config::{ModeSetting, ProgressSetting, ProviderSetting, RunDefaults};
    use fixloop_core::{ExecutionMode, OsTarget};
    use fixloop_llm::ProviderSelection;

    #[test]
    fn progress_follows_verbosity_in_auto() {
        assert_eq!(
            resolved_progress_mode(ProgressSetting::Auto, false),
            ProgressMode::Minimal
        );
        assert_eq!(
            resolved_progress_mode(ProgressSetting::Auto, true),
            ProgressMode::Verbose
        );
        assert_eq!(
            resolved_progress_mode(ProgressSetting::Silent, true),
            ProgressMode::Silent
        );
    }

    #[test]
    fn provider_mapping() {
        assert_eq!(
            provider_to_selection(ProviderSetting::Openai),
            ProviderSelection::OpenAiCompatible
        );
        assert_eq!(
            provider_to_selection(ProviderSetting::Auto),
            ProviderSelection::Auto
        );
    }

    #[test]
    fn os_override_and_detection() {
        let mut resolved = RunDefaults::default();
        assert_eq!(resolve_os(&resolved).expect("detect should work"), OsTarget::current());

        resolved.os = Some("Windows".to_string());
        assert_eq!(resolve_os(&resolved).expect("parse should work"), OsTarget::Windows);

        resolved.os = Some("beos".to_string());
        let err = resolve_os(&resolved).expect_err("unknown os should fail");
        assert!(err.to_string().contains("beos"));
    }

    #[test]
    fn script_mode_carries_os() {
        assert_eq!(
            execution_mode(ModeSetting::Script, OsTarget::MacOs),
            ExecutionMode::Script(OsTarget::MacOs)
        );
        assert_eq!(
            execution_mode(ModeSetting::Command, OsTarget::MacOs),
            ExecutionMode::Command
        );
    }
}
