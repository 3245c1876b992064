//! Execution environments for the analyzed project.
//!
//! The extractor never needs an environment itself; resolution engines that
//! import the project do. A provider either hands back an interpreter or
//! states explicitly that the run is degraded.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use tracing::{info, warn};

/// A resolvable interpreter handle, or none in degraded mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub interpreter: Option<PathBuf>,
}

impl Environment {
    pub fn degraded() -> Self {
        Self { interpreter: None }
    }

    pub fn is_degraded(&self) -> bool {
        self.interpreter.is_none()
    }
}

/// Supplies the environment for a run. Errors are fatal to the run.
pub trait EnvironmentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn provide(&self) -> anyhow::Result<Environment>;
}

/// No environment: resolution falls back to hints or nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnvironment;

impl EnvironmentProvider for NoEnvironment {
    fn name(&self) -> &'static str {
        "none"
    }

    fn provide(&self) -> anyhow::Result<Environment> {
        warn!("no execution environment; dependency-aware type resolution is disabled");
        Ok(Environment::degraded())
    }
}

/// Interpreter inside a virtualenv directory.
pub fn interpreter_in(venv: &Path) -> PathBuf {
    let unix = venv.join("bin").join("python");
    if unix.exists() {
        return unix;
    }
    let windows = venv.join("Scripts").join("python.exe");
    if windows.exists() {
        return windows;
    }
    unix
}

/// A virtualenv the caller already built.
#[derive(Debug, Clone)]
pub struct ExistingVirtualenv {
    path: PathBuf,
}

impl ExistingVirtualenv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EnvironmentProvider for ExistingVirtualenv {
    fn name(&self) -> &'static str {
        "virtualenv"
    }

    fn provide(&self) -> anyhow::Result<Environment> {
        let interpreter = interpreter_in(&self.path);
        if !interpreter.exists() {
            bail!(
                "no interpreter found in virtualenv {}",
                self.path.display()
            );
        }
        Ok(Environment {
            interpreter: Some(interpreter),
        })
    }
}

/// Creates `<cache>/<project>/virtualenv` and installs the project into it.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    project_root: PathBuf,
    venv_dir: PathBuf,
    python: String,
    eager: bool,
}

impl VenvProvisioner {
    pub fn new(project_root: &Path, venv_dir: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            venv_dir: venv_dir.to_path_buf(),
            python: "python3".to_string(),
            eager: false,
        }
    }

    /// Base interpreter used to create the environment.
    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Recreate the environment even if it exists.
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    fn run(&self, program: &Path, args: &[&str]) -> anyhow::Result<()> {
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.project_root)
            .output()
            .with_context(|| format!("spawning {}", program.display()))?;
        if !output.status.success() {
            bail!(
                "`{} {}` exited with {}: {}",
                program.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn pip_install(&self, interpreter: &Path, args: &[&str]) -> anyhow::Result<()> {
        let mut full = vec!["-m", "pip", "install"];
        full.extend_from_slice(args);
        self.run(interpreter, &full)
    }
}

impl EnvironmentProvider for VenvProvisioner {
    fn name(&self) -> &'static str {
        "provisioned"
    }

    fn provide(&self) -> anyhow::Result<Environment> {
        let interpreter = interpreter_in(&self.venv_dir);
        if interpreter.exists() && !self.eager {
            info!(path = %self.venv_dir.display(), "reusing virtual environment");
            return Ok(Environment {
                interpreter: Some(interpreter),
            });
        }

        info!(path = %self.venv_dir.display(), "(re-)creating virtual environment");
        if let Some(parent) = self.venv_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let venv = self.venv_dir.to_string_lossy().to_string();
        self.run(Path::new(&self.python), &["-m", "venv", "--clear", &venv])?;

        let interpreter = interpreter_in(&self.venv_dir);
        self.pip_install(
            &interpreter,
            &["--upgrade", "pip", "build", "setuptools", "wheel"],
        )?;

        if self.project_root.join("pyproject.toml").exists()
            || self.project_root.join("setup.py").exists()
        {
            let project = self.project_root.to_string_lossy().to_string();
            self.pip_install(&interpreter, &["-U", &project])?;
        }
        let requirements = self.project_root.join("requirements.txt");
        if requirements.exists() {
            let requirements = requirements.to_string_lossy().to_string();
            self.pip_install(&interpreter, &["-r", &requirements])?;
        }
        self.pip_install(&interpreter, &["jedi"])?;

        Ok(Environment {
            interpreter: Some(interpreter),
        })
    }
}
