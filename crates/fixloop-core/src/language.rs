use crate::error::ExecError;
use crate::process::Invocation;
use regex::Regex;
use std::env::consts::EXE_SUFFIX;
use std::path::Path;
use std::sync::LazyLock;

/// A file the runner needs on disk before compiling or running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub sources: Vec<SourceFile>,
    pub compile: Option<Invocation>,
    pub run: Invocation,
}

/// How one language turns source text into process invocations.
pub trait Runner: Send + Sync {
    fn compiles(&self) -> bool {
        false
    }

    /// `binary` is the probed toolchain entry point; `workdir` is a fresh per-attempt directory.
    fn plan(&self, binary: &str, code: &str, workdir: &Path) -> RunPlan;

    /// Version check for a separate launcher the run step needs, if any.
    fn runtime(&self) -> Option<Invocation> {
        None
    }
}

/// `<interpreter> <flag> <code>`.
pub struct InlineRunner {
    pub flag: &'static str,
}

impl Runner for InlineRunner {
    fn plan(&self, binary: &str, code: &str, _workdir: &Path) -> RunPlan {
        RunPlan {
            sources: Vec::new(),
            compile: None,
            run: Invocation::new(binary, [self.flag, code]),
        }
    }
}

/// Program text piped to the interpreter's stdin.
pub struct StdinRunner {
    pub args: &'static [&'static str],
}

impl Runner for StdinRunner {
    fn plan(&self, binary: &str, code: &str, _workdir: &Path) -> RunPlan {
        RunPlan {
            sources: Vec::new(),
            compile: None,
            run: Invocation::new(binary, self.args.iter().copied()).with_stdin(code),
        }
    }
}

/// Compile `{src}` into `{out}`, then run. Templates may use `{src}`, `{out}` and `{dir}`.
pub struct CompiledRunner {
    pub source_name: &'static str,
    pub artifact_name: &'static str,
    pub compile_args: &'static [&'static str],
    /// `None` runs the artifact directly. Artifacts without an extension get the
    /// platform executable suffix.
    pub run_program: Option<&'static str>,
    pub run_args: &'static [&'static str],
}

impl Runner for CompiledRunner {
    fn compiles(&self) -> bool {
        true
    }

    fn runtime(&self) -> Option<Invocation> {
        // Only JVM launchers are used here; they answer `-version`.
        self.run_program.map(|program| Invocation::new(program, ["-version"]))
    }

    fn plan(&self, binary: &str, code: &str, workdir: &Path) -> RunPlan {
        let src = path_arg(workdir, self.source_name);
        let artifact = if Path::new(self.artifact_name).extension().is_some() {
            self.artifact_name.to_string()
        } else {
            format!("{}{EXE_SUFFIX}", self.artifact_name)
        };
        let out = path_arg(workdir, &artifact);
        let dir = workdir.display().to_string();
        let fill = |arg: &&str| {
            arg.replace("{src}", &src)
                .replace("{out}", &out)
                .replace("{dir}", &dir)
        };

        let run_program = self.run_program.map_or_else(|| out.clone(), str::to_string);
        RunPlan {
            sources: vec![SourceFile {
                name: self.source_name.to_string(),
                contents: code.to_string(),
            }],
            compile: Some(Invocation::new(binary, self.compile_args.iter().map(fill))),
            run: Invocation::new(run_program, self.run_args.iter().map(fill)),
        }
    }
}

static JAVA_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:public\s+)?(?:final\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("valid regex")
});

/// The class enclosing `main`, else the first declared class, else `Main`.
pub fn java_class_name(code: &str) -> String {
    let declared = match code.find("static void main") {
        Some(pos) => JAVA_CLASS
            .captures_iter(&code[..pos])
            .filter_map(|c| c.get(1))
            .last(),
        None => JAVA_CLASS.captures_iter(code).filter_map(|c| c.get(1)).next(),
    };
    declared.map_or_else(|| "Main".to_string(), |m| m.as_str().to_string())
}

pub struct JavaRunner;

impl Runner for JavaRunner {
    fn compiles(&self) -> bool {
        true
    }

    fn runtime(&self) -> Option<Invocation> {
        Some(Invocation::new("java", ["-version"]))
    }

    fn plan(&self, binary: &str, code: &str, workdir: &Path) -> RunPlan {
        let class = java_class_name(code);
        let file = format!("{class}.java");
        let dir = workdir.display().to_string();
        RunPlan {
            compile: Some(Invocation::new(
                binary,
                ["-d".to_string(), dir.clone(), path_arg(workdir, &file)],
            )),
            run: Invocation::new("java", ["-cp".to_string(), dir, class]),
            sources: vec![SourceFile {
                name: file,
                contents: code.to_string(),
            }],
        }
    }
}

fn path_arg(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}

pub struct LanguageSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub file_extension: &'static str,
    /// Tried in order by the capability probe.
    pub binaries: &'static [&'static str],
    pub version_args: &'static [&'static str],
    pub runner: Box<dyn Runner>,
}

impl LanguageSpec {
    pub fn needs_compile(&self) -> bool {
        self.runner.compiles()
    }

    fn matches(&self, key: &str) -> bool {
        self.name == key || self.aliases.iter().any(|alias| *alias == key)
    }
}

impl std::fmt::Debug for LanguageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageSpec")
            .field("name", &self.name)
            .field("file_extension", &self.file_extension)
            .field("binaries", &self.binaries)
            .field("compiles", &self.needs_compile())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct LanguageRegistry {
    specs: Vec<LanguageSpec>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for spec in builtin_specs() {
            registry.register(spec);
        }
        registry
    }

    /// Later registrations shadow earlier ones with the same name.
    pub fn register(&mut self, spec: LanguageSpec) {
        self.specs.retain(|s| s.name != spec.name);
        self.specs.push(spec);
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageSpec, ExecError> {
        let key = language.trim().to_ascii_lowercase();
        self.specs
            .iter()
            .find(|s| s.matches(&key))
            .ok_or_else(|| ExecError::UnsupportedLanguage(language.trim().to_string()))
    }

    /// Looks up by file extension, with or without the leading dot.
    pub fn by_extension(&self, ext: &str) -> Option<&LanguageSpec> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        self.specs
            .iter()
            .find(|s| s.file_extension.trim_start_matches('.') == ext)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.iter()
    }
}

fn builtin_specs() -> Vec<LanguageSpec> {
    vec![
        LanguageSpec {
            name: "python",
            aliases: &["py", "python3"],
            file_extension: ".py",
            binaries: &["python3", "python"],
            version_args: &["--version"],
            runner: Box::new(InlineRunner { flag: "-c" }),
        },
        LanguageSpec {
            name: "javascript",
            aliases: &["js", "node", "nodejs"],
            file_extension: ".js",
            binaries: &["node"],
            version_args: &["--version"],
            runner: Box::new(InlineRunner { flag: "-e" }),
        },
        LanguageSpec {
            name: "ruby",
            aliases: &["rb"],
            file_extension: ".rb",
            binaries: &["ruby"],
            version_args: &["--version"],
            runner: Box::new(InlineRunner { flag: "-e" }),
        },
        LanguageSpec {
            name: "perl",
            aliases: &["pl"],
            file_extension: ".pl",
            binaries: &["perl"],
            version_args: &["--version"],
            runner: Box::new(InlineRunner { flag: "-e" }),
        },
        LanguageSpec {
            name: "scala",
            aliases: &[],
            file_extension: ".scala",
            binaries: &["scala"],
            version_args: &["-version"],
            runner: Box::new(InlineRunner { flag: "-e" }),
        },
        LanguageSpec {
            name: "swift",
            aliases: &[],
            file_extension: ".swift",
            binaries: &["swift"],
            version_args: &["--version"],
            runner: Box::new(StdinRunner { args: &["-"] }),
        },
        LanguageSpec {
            name: "c",
            aliases: &[],
            file_extension: ".c",
            binaries: &["gcc", "cc", "clang"],
            version_args: &["--version"],
            runner: Box::new(CompiledRunner {
                source_name: "main.c",
                artifact_name: "main",
                compile_args: &["{src}", "-o", "{out}", "-lm"],
                run_program: None,
                run_args: &[],
            }),
        },
        LanguageSpec {
            name: "cpp",
            aliases: &["c++", "cxx"],
            file_extension: ".cpp",
            binaries: &["g++", "clang++"],
            version_args: &["--version"],
            runner: Box::new(CompiledRunner {
                source_name: "main.cpp",
                artifact_name: "main",
                compile_args: &["-std=c++17", "{src}", "-o", "{out}"],
                run_program: None,
                run_args: &[],
            }),
        },
        LanguageSpec {
            name: "rust",
            aliases: &["rs"],
            file_extension: ".rs",
            binaries: &["rustc"],
            version_args: &["--version"],
            runner: Box::new(CompiledRunner {
                source_name: "main.rs",
                artifact_name: "main",
                compile_args: &["--edition", "2021", "{src}", "-o", "{out}"],
                run_program: None,
                run_args: &[],
            }),
        },
        LanguageSpec {
            name: "go",
            aliases: &["golang"],
            file_extension: ".go",
            binaries: &["go"],
            version_args: &["version"],
            runner: Box::new(CompiledRunner {
                source_name: "main.go",
                artifact_name: "main",
                compile_args: &["build", "-o", "{out}", "{src}"],
                run_program: None,
                run_args: &[],
            }),
        },
        LanguageSpec {
            name: "java",
            aliases: &[],
            file_extension: ".java",
            binaries: &["javac"],
            version_args: &["-version"],
            runner: Box::new(JavaRunner),
        },
        LanguageSpec {
            name: "kotlin",
            aliases: &["kt"],
            file_extension: ".kt",
            binaries: &["kotlinc"],
            version_args: &["-version"],
            runner: Box::new(CompiledRunner {
                source_name: "main.kt",
                artifact_name: "main.jar",
                compile_args: &["{src}", "-include-runtime", "-d", "{out}"],
                run_program: Some("java"),
                run_args: &["-jar", "{out}"],
            }),
        },
    ]
}
