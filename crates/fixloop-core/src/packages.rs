use crate::error::InstallError;
use crate::process::{Invocation, run_captured};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ecosystem {
    PyPi,
    Npm,
}

/// A package manager binary and how to ask it about one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    pub program: &'static str,
    pub show_args: &'static [&'static str],
    pub install_args: &'static [&'static str],
}

const PIP_TOOLS: &[Tool] = &[
    Tool {
        program: "pip",
        show_args: &["show"],
        install_args: &["install"],
    },
    Tool {
        program: "pip3",
        show_args: &["show"],
        install_args: &["install"],
    },
];

const NPM_TOOLS: &[Tool] = &[Tool {
    program: "npm",
    show_args: &["ls", "--depth=0"],
    install_args: &["install"],
}];

/// Python import names whose distribution is published under another name.
const PYTHON_ALIASES: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("sklearn", "scikit-learn"),
    ("PIL", "pillow"),
    ("yaml", "pyyaml"),
    ("bs4", "beautifulsoup4"),
    ("skimage", "scikit-image"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("Crypto", "pycryptodome"),
    ("OpenSSL", "pyopenssl"),
    ("serial", "pyserial"),
    ("usb", "pyusb"),
    ("attr", "attrs"),
    ("magic", "python-magic"),
    ("docx", "python-docx"),
    ("pptx", "python-pptx"),
    ("fitz", "pymupdf"),
    ("jwt", "pyjwt"),
];

impl Ecosystem {
    pub fn for_language(language: &str) -> Option<Self> {
        match language.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Some(Self::PyPi),
            "javascript" | "js" | "node" | "nodejs" => Some(Self::Npm),
            _ => None,
        }
    }

    pub fn index_name(self) -> &'static str {
        match self {
            Self::PyPi => "PyPI",
            Self::Npm => "the npm registry",
        }
    }

    pub fn index_url(self, package: &str) -> String {
        match self {
            Self::PyPi => format!("https://pypi.org/pypi/{package}/json"),
            Self::Npm => format!("https://registry.npmjs.org/{package}"),
        }
    }

    /// Primary tool first, fallbacks after.
    pub fn tools(self) -> &'static [Tool] {
        match self {
            Self::PyPi => PIP_TOOLS,
            Self::Npm => NPM_TOOLS,
        }
    }

    /// Maps an import name to the name published on the index. `None` for paths.
    pub fn distribution_name(self, module: &str) -> Option<String> {
        let module = module.trim();
        if module.is_empty() || module.starts_with('.') || module.starts_with('/') {
            return None;
        }
        match self {
            Self::PyPi => {
                let top = module.split('.').next().unwrap_or(module);
                let name = PYTHON_ALIASES
                    .iter()
                    .find(|(import, _)| *import == top)
                    .map_or(top, |(_, dist)| *dist);
                Some(name.to_string())
            }
            Self::Npm => {
                let module = module.strip_prefix("node:").unwrap_or(module);
                let mut parts = module.split('/');
                let first = parts.next()?;
                if first.starts_with('@') {
                    let second = parts.next()?;
                    Some(format!("{first}/{second}"))
                } else {
                    Some(first.to_string())
                }
            }
        }
    }
}

/// Existence check against an ecosystem's public index.
pub trait PackageIndex {
    fn exists(&self, ecosystem: Ecosystem, package: &str) -> Result<bool, InstallError>;
}

pub struct HttpPackageIndex {
    pub timeout: Duration,
}

impl Default for HttpPackageIndex {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl PackageIndex for HttpPackageIndex {
    fn exists(&self, ecosystem: Ecosystem, package: &str) -> Result<bool, InstallError> {
        let unavailable = |detail: String| InstallError::IndexUnavailable {
            package: package.to_string(),
            detail,
        };
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("fixloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| unavailable(e.to_string()))?;

        let url = ecosystem.index_url(package);
        let response = client.get(&url).send().map_err(|e| unavailable(e.to_string()))?;
        debug!(%url, status = %response.status(), "package index lookup");
        Ok(response.status().is_success())
    }
}

/// Host package-manager operations.
pub trait PackageManager {
    fn is_installed(&self, tool: &Tool, package: &str) -> bool;

    /// `Err` carries the tool's diagnostic output.
    fn install(&self, tool: &Tool, package: &str) -> Result<(), String>;
}

pub struct CommandPackageManager {
    pub timeout: Option<Duration>,
}

impl CommandPackageManager {
    fn invocation(tool: &Tool, args: &[&str], package: &str) -> Invocation {
        Invocation::new(
            tool.program,
            args.iter()
                .map(|arg| arg.to_string())
                .chain(std::iter::once(package.to_string())),
        )
    }
}

impl PackageManager for CommandPackageManager {
    fn is_installed(&self, tool: &Tool, package: &str) -> bool {
        let inv = Self::invocation(tool, tool.show_args, package);
        run_captured(&inv, None, self.timeout, None).is_ok_and(|out| out.success())
    }

    fn install(&self, tool: &Tool, package: &str) -> Result<(), String> {
        let inv = Self::invocation(tool, tool.install_args, package);
        let out = run_captured(&inv, None, self.timeout, None)
            .map_err(|e| format!("{}: {e}", tool.program))?;
        if out.success() {
            return Ok(());
        }
        if out.timed_out() {
            return Err(format!("{} timed out", tool.program));
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        Err(last_lines(&stderr, 5))
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReport {
    Installed { package: String, tool: &'static str },
    AlreadyInstalled { package: String },
}

pub trait Install {
    fn install(&self, module: &str, language: &str) -> Result<InstallReport, InstallError>;
}

impl<T: Install + ?Sized> Install for &T {
    fn install(&self, module: &str, language: &str) -> Result<InstallReport, InstallError> {
        (**self).install(module, language)
    }
}

/// Checks the host, then the index, then tries each tool in order.
pub struct PackageInstaller<I, M>
where
    I: PackageIndex,
    M: PackageManager,
{
    pub index: I,
    pub manager: M,
}

impl<I, M> Install for PackageInstaller<I, M>
where
    I: PackageIndex,
    M: PackageManager,
{
    fn install(&self, module: &str, language: &str) -> Result<InstallReport, InstallError> {
        let ecosystem = Ecosystem::for_language(language)
            .ok_or_else(|| InstallError::UnsupportedEcosystem(language.to_string()))?;
        let package = ecosystem
            .distribution_name(module)
            .ok_or_else(|| InstallError::PackageNotFound {
                package: module.to_string(),
                index: ecosystem.index_name(),
            })?;

        let tools = ecosystem.tools();
        if tools.iter().any(|t| self.manager.is_installed(t, &package)) {
            debug!(%package, "already installed");
            return Ok(InstallReport::AlreadyInstalled { package });
        }

        if !self.index.exists(ecosystem, &package)? {
            return Err(InstallError::PackageNotFound {
                package,
                index: ecosystem.index_name(),
            });
        }

        let mut last_error = String::new();
        for tool in tools {
            info!(%package, tool = tool.program, "installing package");
            match self.manager.install(tool, &package) {
                Ok(()) => {
                    return Ok(InstallReport::Installed {
                        package,
                        tool: tool.program,
                    });
                }
                Err(detail) => {
                    warn!(%package, tool = tool.program, %detail, "install attempt failed");
                    last_error = detail;
                }
            }
        }

        Err(InstallError::InstallFailed {
            package,
            detail: last_error,
        })
    }
}
