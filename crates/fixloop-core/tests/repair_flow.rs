use anyhow::{Result, anyhow};
use fixloop_core::{
    EventSink, ExecError, Execute, ExecutionMode, ExecutionRequest, ExecutionResult, Extractor,
    FailureCategory, Install, InstallError, InstallReport, Interrupt, LanguageRegistry,
    RepairEvent, RepairLoop, RepairPolicy, RepairStatus, SandboxedExecutor,
};
use fixloop_llm::{Coder, FixRequest, GenerateRequest};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

type ExecStep = Result<ExecutionResult, ExecError>;

struct ScriptedExecutor {
    steps: RefCell<VecDeque<ExecStep>>,
    fallback: ExecutionResult,
    seen: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(steps: Vec<ExecStep>, fallback: ExecutionResult) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            fallback,
            seen: RefCell::new(Vec::new()),
        }
    }

    fn always(result: ExecutionResult) -> Self {
        Self::new(Vec::new(), result)
    }

    fn runs(&self) -> usize {
        self.seen.borrow().len()
    }
}

impl Execute for ScriptedExecutor {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.seen.borrow_mut().push(request.code.clone());
        self.steps
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

struct FakeInstaller {
    outcome: fn(&str) -> Result<InstallReport, InstallError>,
    calls: RefCell<Vec<String>>,
}

impl FakeInstaller {
    fn succeeding() -> Self {
        Self {
            outcome: |package| {
                Ok(InstallReport::Installed {
                    package: package.to_string(),
                    tool: "pip",
                })
            },
            calls: RefCell::new(Vec::new()),
        }
    }

    fn not_found() -> Self {
        Self {
            outcome: |package| {
                Err(InstallError::PackageNotFound {
                    package: package.to_string(),
                    index: "PyPI",
                })
            },
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Install for FakeInstaller {
    fn install(&self, module: &str, _language: &str) -> Result<InstallReport, InstallError> {
        self.calls.borrow_mut().push(module.to_string());
        (self.outcome)(module)
    }
}

#[derive(Default)]
struct FakeCoder {
    fixes: RefCell<VecDeque<Result<Option<String>>>>,
    requests: RefCell<Vec<FixRequest>>,
}

impl FakeCoder {
    fn with_fixes(fixes: Vec<Result<Option<String>>>) -> Self {
        Self {
            fixes: RefCell::new(fixes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Coder for FakeCoder {
    fn generate(&self, _req: &GenerateRequest) -> Result<String> {
        Err(anyhow!("not used"))
    }

    fn fix(&self, req: &FixRequest) -> Result<Option<String>> {
        self.requests.borrow_mut().push(req.clone());
        self.fixes.borrow_mut().pop_front().unwrap_or(Ok(None))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: RefCell<Vec<RepairEvent>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RepairEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

fn policy(max_attempts: u32) -> RepairPolicy {
    RepairPolicy {
        max_attempts,
        retry_delay: Duration::ZERO,
        auto_install: true,
    }
}

fn python(code: &str) -> ExecutionRequest {
    ExecutionRequest {
        code: code.to_string(),
        language: "python".to_string(),
        mode: ExecutionMode::Code,
    }
}

fn ok(stdout: &str) -> ExecutionResult {
    ExecutionResult::from_streams(Some(stdout.to_string()), None)
}

fn err(stderr: &str) -> ExecutionResult {
    ExecutionResult::from_streams(Some(String::new()), Some(stderr.to_string()))
}

fn repair_loop<'a>(
    executor: &'a ScriptedExecutor,
    installer: &'a FakeInstaller,
    coder: &'a FakeCoder,
    sink: &'a RecordingSink,
    policy: RepairPolicy,
) -> RepairLoop<&'a ScriptedExecutor, &'a FakeInstaller, &'a FakeCoder, &'a RecordingSink> {
    RepairLoop {
        executor,
        installer,
        coder,
        extractor: Extractor::default(),
        events: sink,
        policy,
    }
}

#[test]
fn first_attempt_success_returns_stdout() {
    let executor = ScriptedExecutor::always(ok("hi\n"));
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python("print('hi')"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::Success);
    assert_eq!(outcome.output.as_deref(), Some("hi\n"));
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(coder.calls(), 0);
}

#[test]
fn unresolved_syntax_error_uses_every_attempt() {
    let executor = ScriptedExecutor::always(err("SyntaxError: '(' was never closed"));
    let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
    let coder = FakeCoder::with_fixes(vec![
        Ok(Some("```python\nprint('hi'\n```".to_string())),
        Ok(Some("```python\nprint('hi'  \n```".to_string())),
    ]);

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(4))
        .run(python("print('hi'"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::ExhaustedRetries);
    assert_eq!(executor.runs(), 4);
    assert_eq!(coder.calls(), 4);
    assert!(installer.calls.borrow().is_empty());
    assert_eq!(outcome.code, "print('hi'  ");
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("SyntaxError")));
    assert_eq!(coder.requests.borrow()[0].language, "python");
    assert!(coder.requests.borrow()[0].error.contains("never closed"));
    assert!(
        sink.events
            .borrow()
            .iter()
            .any(|e| matches!(e, RepairEvent::Exhausted { attempts: 4 }))
    );
}

#[test]
fn missing_file_stops_after_one_attempt() {
    let executor = ScriptedExecutor::always(err(
        "FileNotFoundError: [Errno 2] No such file or directory: 'data.csv'",
    ));
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python("open('data.csv')"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::Terminal);
    assert_eq!(outcome.code, "open('data.csv')");
    assert_eq!(executor.runs(), 1);
    assert_eq!(coder.calls(), 0);
    assert!(installer.calls.borrow().is_empty());
}

#[test]
fn missing_header_goes_to_fix() {
    let executor = ScriptedExecutor::new(
        vec![Ok(err(
            "main.c:1:10: fatal error: curl/curl.h: No such file or directory\ncompilation terminated.\n",
        ))],
        ok("ok\n"),
    );
    let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
    let coder = FakeCoder::with_fixes(vec![Ok(Some(
        "```c\n#include <stdio.h>\nint main(void) { puts(\"ok\"); }\n```".to_string(),
    ))]);

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(3))
        .run(ExecutionRequest {
            code: "#include <curl/curl.h>\nint main(void) { return 0; }".to_string(),
            language: "c".to_string(),
            mode: ExecutionMode::Code,
        })
        .expect("loop should finish");

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(coder.calls(), 1);
    assert!(coder.requests.borrow()[0].error.contains("curl/curl.h"));
    assert!(installer.calls.borrow().is_empty());
}

#[test]
fn missing_module_is_installed_then_same_code_reruns() {
    let executor = ScriptedExecutor::new(
        vec![Ok(err("ModuleNotFoundError: No module named 'pandas'"))],
        ok("2.2.2\n"),
    );
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());
    let code = "import pandas; print(pandas.__version__)";

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python(code))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::Success);
    assert_eq!(outcome.output.as_deref(), Some("2.2.2\n"));
    assert_eq!(*installer.calls.borrow(), vec!["pandas"]);
    assert_eq!(*executor.seen.borrow(), vec![code, code]);
    assert_eq!(coder.calls(), 0);
}

#[test]
fn same_package_is_installed_at_most_once() {
    let executor = ScriptedExecutor::always(err("ModuleNotFoundError: No module named 'ghost'"));
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(3))
        .run(python("import ghost"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::ExhaustedRetries);
    assert_eq!(installer.calls.borrow().len(), 1);
    assert_eq!(coder.calls(), 2);
    assert!(sink.events.borrow().iter().any(|e| matches!(
        e,
        RepairEvent::InstallSkipped { reason, .. } if reason.contains("already attempted")
    )));
}

#[test]
fn unknown_package_falls_through_to_fix() {
    let executor = ScriptedExecutor::new(
        vec![Ok(err("ModuleNotFoundError: No module named 'totally_fake_pkg'"))],
        ok("fixed\n"),
    );
    let installer = FakeInstaller::not_found();
    let coder = FakeCoder::with_fixes(vec![Ok(Some("print('fixed')".to_string()))]);
    let sink = RecordingSink::default();

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python("import totally_fake_pkg"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::Success);
    assert_eq!(outcome.code, "print('fixed')");
    assert_eq!(coder.calls(), 1);
    assert_eq!(*executor.seen.borrow(), vec!["import totally_fake_pkg", "print('fixed')"]);
}

#[test]
fn disabled_auto_install_goes_straight_to_fix() {
    let executor = ScriptedExecutor::new(
        vec![Ok(err("ModuleNotFoundError: No module named 'numpy'"))],
        ok("ok\n"),
    );
    let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
    let coder = FakeCoder::with_fixes(vec![Ok(Some("print('ok')".to_string()))]);

    let mut no_install = policy(5);
    no_install.auto_install = false;
    let outcome = repair_loop(&executor, &installer, &coder, &sink, no_install)
        .run(python("import numpy"))
        .expect("loop should finish");

    assert!(outcome.is_success());
    assert!(installer.calls.borrow().is_empty());
    assert_eq!(coder.calls(), 1);
}

#[test]
fn refused_fix_keeps_code_and_consumes_attempt() {
    let executor = ScriptedExecutor::new(vec![Ok(err("NameError: name 'x' is not defined"))], ok("1\n"));
    let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
    let coder = FakeCoder::with_fixes(vec![Ok(None)]);

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python("print(x)"))
        .expect("loop should finish");

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(*executor.seen.borrow(), vec!["print(x)", "print(x)"]);
    assert!(
        sink.events
            .borrow()
            .iter()
            .any(|e| matches!(e, RepairEvent::FixUnavailable { attempt: 1, .. }))
    );
}

#[test]
fn coder_errors_do_not_end_the_loop() {
    let executor = ScriptedExecutor::always(err("boom"));
    let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
    let coder = FakeCoder::with_fixes(vec![Err(anyhow!("connection refused")), Ok(Some("   ".to_string()))]);

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(2))
        .run(python("raise SystemExit('boom')"))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::ExhaustedRetries);
    assert_eq!(outcome.code, "raise SystemExit('boom')");
}

#[test]
fn host_failure_is_absorbed_until_final_attempt() {
    let executor = ScriptedExecutor::new(
        vec![Err(ExecError::Host(std::io::Error::other("disk full")))],
        ok("done\n"),
    );
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(3))
        .run(python("print('done')"))
        .expect("loop should finish");
    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);

    let failing = ScriptedExecutor::new(
        vec![
            Err(ExecError::Host(std::io::Error::other("disk full"))),
            Err(ExecError::Host(std::io::Error::other("disk still full"))),
        ],
        ok("never\n"),
    );
    let err = repair_loop(&failing, &installer, &coder, &sink, policy(2))
        .run(python("print('done')"))
        .expect_err("final host failure propagates");
    assert_eq!(err.attempt, 2);
    assert!(err.to_string().contains("disk still full"));
}

#[test]
fn configuration_errors_are_fatal() {
    let executor = ScriptedExecutor::new(
        vec![Err(ExecError::UnsupportedLanguage("cobol".to_string()))],
        ok("unused"),
    );
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(5))
        .run(python("DISPLAY 'HI'."))
        .expect("loop should finish");

    assert_eq!(outcome.status, RepairStatus::Fatal);
    assert_eq!(outcome.error.as_deref(), Some("unsupported language `cobol`"));
    assert_eq!(executor.runs(), 1);
    assert_eq!(coder.calls(), 0);
}

#[test]
fn missing_compiler_goes_to_fix() {
    let executor = ScriptedExecutor::new(
        vec![Err(ExecError::MissingCompiler {
            language: "go".to_string(),
            binary: "go".to_string(),
        })],
        ok("ok\n"),
    );
    let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());

    let outcome = repair_loop(&executor, &installer, &coder, &sink, policy(3))
        .run(python("package main"))
        .expect("loop should finish");

    assert!(outcome.is_success());
    assert_eq!(coder.calls(), 1);
    assert!(sink.events.borrow().iter().any(|e| matches!(
        e,
        RepairEvent::AttemptFailed(a)
            if a.category == (FailureCategory::MissingCompiler { language: "go".to_string() })
    )));
}

#[cfg(unix)]
mod subprocess {
    use super::*;

    fn executor() -> SandboxedExecutor {
        SandboxedExecutor::new(
            LanguageRegistry::builtin(),
            Some(Duration::from_secs(20)),
            Interrupt::new(),
        )
    }

    fn command(code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            language: "shell".to_string(),
            mode: ExecutionMode::Command,
        }
    }

    #[test]
    fn ls_of_missing_path_is_terminal() {
        let (installer, coder, sink) = (FakeInstaller::succeeding(), FakeCoder::default(), RecordingSink::default());
        let outcome = RepairLoop {
            executor: executor(),
            installer: &installer,
            coder: &coder,
            extractor: Extractor::default(),
            events: &sink,
            policy: policy(5),
        }
        .run(command("ls /nonexistent"))
        .expect("loop should finish");

        assert_eq!(outcome.status, RepairStatus::Terminal);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(coder.calls(), 0);
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("No such file or directory")));
    }

    #[test]
    fn fixed_command_runs_on_next_attempt() {
        let installer = FakeInstaller::succeeding();
        let sink = RecordingSink::default();
        let coder = FakeCoder::with_fixes(vec![Ok(Some("```sh\necho recovered\n```".to_string()))]);

        let outcome = RepairLoop {
            executor: executor(),
            installer: &installer,
            coder: &coder,
            extractor: Extractor::default(),
            events: &sink,
            policy: policy(3),
        }
        .run(command("echo broken 1>&2"))
        .expect("loop should finish");

        assert!(outcome.is_success());
        assert_eq!(outcome.code, "echo recovered");
        assert_eq!(outcome.output.as_deref(), Some("recovered\n"));
        assert_eq!(coder.requests.borrow()[0].language, "shell command");
    }

    #[test]
    fn python_missing_module_flows_to_installer() {
        if std::process::Command::new("python3").arg("--version").output().is_err() {
            return;
        }
        let installer = FakeInstaller::not_found();
        let (coder, sink) = (FakeCoder::default(), RecordingSink::default());

        let outcome = RepairLoop {
            executor: executor(),
            installer: &installer,
            coder: &coder,
            extractor: Extractor::default(),
            events: &sink,
            policy: policy(2),
        }
        .run(python("import fixloop_definitely_missing_mod"))
        .expect("loop should finish");

        assert_eq!(outcome.status, RepairStatus::ExhaustedRetries);
        assert_eq!(*installer.calls.borrow(), vec!["fixloop_definitely_missing_mod"]);
        assert_eq!(coder.calls(), 2);
    }

    #[test]
    fn missing_c_header_is_sent_to_the_coder() {
        if std::process::Command::new("gcc").arg("--version").output().is_err() {
            return;
        }
        let (installer, sink) = (FakeInstaller::succeeding(), RecordingSink::default());
        let coder = FakeCoder::default();

        let outcome = RepairLoop {
            executor: executor(),
            installer: &installer,
            coder: &coder,
            extractor: Extractor::default(),
            events: &sink,
            policy: policy(2),
        }
        .run(ExecutionRequest {
            code: "#include <fixloop_missing/header.h>\nint main(void) { return 0; }\n".to_string(),
            language: "c".to_string(),
            mode: ExecutionMode::Code,
        })
        .expect("loop should finish");

        assert_eq!(outcome.status, RepairStatus::ExhaustedRetries);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(coder.calls(), 2);
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("fixloop_missing/header.h")));
    }
}
