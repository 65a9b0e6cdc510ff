use crate::error::ExecError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    MissingModule { package: String },
    MissingFile,
    MissingCompiler { language: String },
    GenericError { message: String },
}

impl FailureCategory {
    /// `MissingFile` ends the repair loop; everything else may be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MissingFile)
    }

    /// Categories that come from the toolchain probe rather than program output.
    pub fn from_exec_error(err: &ExecError) -> Option<Self> {
        match err {
            ExecError::MissingCompiler { language, .. } => Some(Self::MissingCompiler {
                language: language.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingModule { package } => write!(f, "missing module `{package}`"),
            Self::MissingFile => f.write_str("missing file or directory"),
            Self::MissingCompiler { language } => write!(f, "missing {language} toolchain"),
            Self::GenericError { .. } => f.write_str("error"),
        }
    }
}

const MISSING_FILE_MARKERS: &[&str] = &[
    "FileNotFoundError",
    "DirectoryNotFoundError",
    "No such file or directory",
];

const MISSING_MODULE_MARKERS: &[&str] = &["ModuleNotFoundError", "No module named", "Cannot find module"];

static MODULE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:No module named|Cannot find module)\s+['"]([^'"]+)['"]"#)
        .expect("valid regex")
});

/// Compiler `file:line[:col]: [fatal ]error:` lines and linker search failures.
/// A missing header or library there stays fixable.
static BUILD_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\S+:\d+(?::\d+)?:\s*(?:fatal\s+)?error:|\bld(?:\.\w+)?: cannot find")
        .expect("valid regex")
});

/// Maps program stderr to exactly one category. Never fails.
pub fn classify(stderr: &str) -> FailureCategory {
    let missing_file = stderr.lines().any(|line| {
        MISSING_FILE_MARKERS.iter().any(|m| line.contains(m)) && !BUILD_DIAGNOSTIC.is_match(line)
    });
    if missing_file {
        return FailureCategory::MissingFile;
    }

    if MISSING_MODULE_MARKERS.iter().any(|m| stderr.contains(m)) {
        let package = MODULE_NAME
            .captures(stderr)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty() && !is_path_like(name));
        if let Some(package) = package {
            return FailureCategory::MissingModule {
                package: package.to_string(),
            };
        }
    }

    FailureCategory::GenericError {
        message: stderr.trim().to_string(),
    }
}

fn is_path_like(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('/') || name.starts_with('\\') || name.contains(":\\")
}

#[cfg(test)]
mod tests {
    use super::{FailureCategory, classify};
    use crate::error::ExecError;

    #[test]
    fn python_missing_module() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 1, in <module>\nModuleNotFoundError: No module named 'pandas'\n";
        assert_eq!(
            classify(stderr),
            FailureCategory::MissingModule {
                package: "pandas".to_string()
            }
        );
    }

    #[test]
    fn dotted_module_is_kept_whole() {
        assert_eq!(
            classify("ModuleNotFoundError: No module named 'google.protobuf'"),
            FailureCategory::MissingModule {
                package: "google.protobuf".to_string()
            }
        );
    }

    #[test]
    fn node_missing_module() {
        let stderr = "node:internal/modules/cjs/loader:1080\n  throw err;\n  ^\n\nError: Cannot find module 'lodash'\nRequire stack:\n- /tmp/[eval]";
        assert_eq!(
            classify(stderr),
            FailureCategory::MissingModule {
                package: "lodash".to_string()
            }
        );
    }

    #[test]
    fn relative_module_is_generic() {
        let category = classify("Error: Cannot find module './helpers'");
        assert!(matches!(category, FailureCategory::GenericError { .. }));
    }

    #[test]
    fn unextractable_module_is_generic() {
        let category = classify("ModuleNotFoundError");
        assert_eq!(
            category,
            FailureCategory::GenericError {
                message: "ModuleNotFoundError".to_string()
            }
        );
    }

    #[test]
    fn missing_header_is_fixable() {
        let gcc = "main.c:1:10: fatal error: curl/curl.h: No such file or directory\n    1 | #include <curl/curl.h>\n      |          ^~~~~~~~~~~~~\ncompilation terminated.\n";
        let category = classify(gcc);
        assert!(matches!(category, FailureCategory::GenericError { .. }));
        assert!(!category.is_terminal());

        let ld = "/usr/bin/ld: cannot find -lcurl: No such file or directory\ncollect2: error: ld returned 1 exit status";
        assert!(matches!(classify(ld), FailureCategory::GenericError { .. }));
    }

    #[test]
    fn missing_file_is_terminal() {
        let py = classify("FileNotFoundError: [Errno 2] No such file or directory: 'data.csv'");
        assert_eq!(py, FailureCategory::MissingFile);
        assert!(py.is_terminal());

        let shell = classify("ls: cannot access '/nonexistent': No such file or directory\n");
        assert_eq!(shell, FailureCategory::MissingFile);

        assert_eq!(
            classify("System.IO.DirectoryNotFoundException"),
            FailureCategory::GenericError {
                message: "System.IO.DirectoryNotFoundException".to_string()
            }
        );
        assert_eq!(classify("DirectoryNotFoundError: out/"), FailureCategory::MissingFile);
    }

    #[test]
    fn everything_else_is_generic() {
        for stderr in ["", "SyntaxError: '(' was never closed", "segfault", "timeout: execution exceeded 1s limit"] {
            let category = classify(stderr);
            assert!(matches!(category, FailureCategory::GenericError { .. }), "{stderr}");
            assert!(!category.is_terminal());
        }
    }

    #[test]
    fn probe_error_maps_to_missing_compiler() {
        let err = ExecError::MissingCompiler {
            language: "go".to_string(),
            binary: "go".to_string(),
        };
        assert_eq!(
            FailureCategory::from_exec_error(&err),
            Some(FailureCategory::MissingCompiler {
                language: "go".to_string()
            })
        );
        assert_eq!(FailureCategory::from_exec_error(&ExecError::EmptyCode), None);
    }
}
