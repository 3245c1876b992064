//! Run options and the optional per-project configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;

/// Project configuration file names, in lookup order.
pub const CONFIG_FILE_NAMES: &[&str] = &["codeanalyzer.yaml", ".codeanalyzer.yaml"];

/// Encoding of the written application artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Msgpack,
}

impl OutputFormat {
    /// Artifact file name written into the output directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Json => "analysis.json",
            OutputFormat::Msgpack => "analysis.msgpack",
        }
    }
}

/// Every option of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Project root directory.
    pub input: PathBuf,
    /// Output directory; stdout when absent.
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    /// 1: symbol table, 2: symbol table and call graph.
    pub analysis_level: u8,
    /// Build (or reuse) the CodeQL database even at level 1.
    pub using_codeql: bool,
    /// Ignore every cache and rebuild.
    pub rebuild_analysis: bool,
    pub skip_tests: bool,
    /// Analyze only this file (relative to `input` or absolute).
    pub file_name: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Remove the cache root when the run ends.
    pub clear_cache: bool,
    pub verbosity: u8,
    /// Worker threads; 0 uses every core.
    pub jobs: usize,
    /// An existing environment to resolve against.
    pub virtualenv: Option<PathBuf>,
    /// Create an environment under the cache root.
    pub provision_env: bool,
    pub hints_file: Option<PathBuf>,
    pub progress: bool,
    /// Glob patterns, matched against paths relative to `input`.
    pub excluded_paths: Vec<String>,
}

impl AnalysisOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            format: OutputFormat::Json,
            analysis_level: 1,
            using_codeql: false,
            rebuild_analysis: false,
            skip_tests: true,
            file_name: None,
            cache_dir: None,
            clear_cache: false,
            verbosity: 0,
            jobs: 0,
            virtualenv: None,
            provision_env: false,
            hints_file: None,
            progress: false,
            excluded_paths: Vec::new(),
        }
    }

    /// Whether the external semantic database is needed for this run.
    pub fn needs_database(&self) -> bool {
        self.using_codeql || self.analysis_level == 2
    }

    /// The single file to analyze, resolved against the input root.
    pub fn target_file(&self) -> Option<PathBuf> {
        self.file_name.as_ref().map(|f| {
            if f.is_absolute() {
                f.clone()
            } else {
                self.input.join(f)
            }
        })
    }

    /// Fill options the command line left unset from a project config.
    pub fn merge_project_config(&mut self, config: &ProjectConfig) {
        if let Some(skip) = config.skip_tests {
            self.skip_tests = skip;
        }
        if self.jobs == 0 {
            if let Some(jobs) = config.jobs {
                self.jobs = jobs;
            }
        }
        if self.hints_file.is_none() {
            self.hints_file = config.hints_file.as_ref().map(|h| {
                if h.is_absolute() {
                    h.clone()
                } else {
                    self.input.join(h)
                }
            });
        }
        for pattern in &config.excluded_paths {
            if !self.excluded_paths.contains(pattern) {
                self.excluded_paths.push(pattern.clone());
            }
        }
    }

    /// Check every precondition of a run.
    pub fn validate(&self) -> Result<(), AnalyzerError> {
        if !self.input.exists() {
            return Err(AnalyzerError::InputValidation(format!(
                "input path {} does not exist",
                self.input.display()
            )));
        }
        if !self.input.is_dir() {
            return Err(AnalyzerError::InputValidation(format!(
                "input path {} is not a directory",
                self.input.display()
            )));
        }
        if !matches!(self.analysis_level, 1 | 2) {
            return Err(AnalyzerError::InputValidation(format!(
                "analysis level must be 1 or 2, got {}",
                self.analysis_level
            )));
        }
        if let Some(target) = self.target_file() {
            if !target.is_file() {
                return Err(AnalyzerError::InputValidation(format!(
                    "file {} does not exist",
                    target.display()
                )));
            }
            if target.extension().and_then(|e| e.to_str()) != Some("py") {
                return Err(AnalyzerError::InputValidation(format!(
                    "file {} is not a Python source file",
                    target.display()
                )));
            }
        }
        if self.virtualenv.is_some() && self.provision_env {
            return Err(AnalyzerError::InputValidation(
                "--virtualenv and --provision-env are mutually exclusive".to_string(),
            ));
        }
        self.exclusion_set()?;
        Ok(())
    }

    /// Compiled `excluded_paths`.
    pub fn exclusion_set(&self) -> Result<GlobSet, AnalyzerError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.excluded_paths {
            let glob = Glob::new(pattern).map_err(|e| {
                AnalyzerError::InputValidation(format!("invalid exclude pattern {:?}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| AnalyzerError::InputValidation(format!("invalid exclude patterns: {}", e)))
    }
}

/// Optional `codeanalyzer.yaml` at the project root.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub skip_tests: Option<bool>,
    /// Glob patterns for paths to exclude (e.g. "**/migrations/**").
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    #[serde(default)]
    pub hints_file: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl ProjectConfig {
    /// Parse a config from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: ProjectConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Look for a config file in `root`.
    pub fn discover(root: &Path) -> anyhow::Result<Option<(PathBuf, Self)>> {
        for name in CONFIG_FILE_NAMES {
            let path = root.join(name);
            if path.is_file() {
                let config = Self::parse_file(&path)?;
                return Ok(Some((path, config)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_project_config() {
        let yaml = r#"
skip_tests: false
excluded_paths:
  - "**/migrations/**"
hints_file: hints.json
jobs: 4
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.skip_tests, Some(false));
        assert_eq!(config.excluded_paths, vec!["**/migrations/**"]);
        assert_eq!(config.jobs, Some(4));
    }

    #[test]
    fn test_discover_and_merge() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".codeanalyzer.yaml"),
            "skip_tests: false\nhints_file: hints.json\njobs: 3\n",
        )
        .unwrap();

        let (path, config) = ProjectConfig::discover(temp.path()).unwrap().unwrap();
        assert!(path.ends_with(".codeanalyzer.yaml"));

        let mut options = AnalysisOptions::new(temp.path());
        options.jobs = 8;
        options.merge_project_config(&config);
        assert!(!options.skip_tests);
        assert_eq!(options.jobs, 8);
        assert_eq!(options.hints_file, Some(temp.path().join("hints.json")));
    }

    #[test]
    fn test_discover_none() {
        let temp = TempDir::new().unwrap();
        assert!(ProjectConfig::discover(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_validate() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "hi\n").unwrap();

        let options = AnalysisOptions::new(temp.path());
        assert!(options.validate().is_ok());

        let missing = AnalysisOptions::new(temp.path().join("nope"));
        assert!(matches!(
            missing.validate(),
            Err(AnalyzerError::InputValidation(_))
        ));

        let mut level = AnalysisOptions::new(temp.path());
        level.analysis_level = 3;
        assert!(level.validate().is_err());

        let mut not_python = AnalysisOptions::new(temp.path());
        not_python.file_name = Some(PathBuf::from("notes.txt"));
        assert!(not_python.validate().is_err());

        let mut single = AnalysisOptions::new(temp.path());
        single.file_name = Some(PathBuf::from("a.py"));
        assert!(single.validate().is_ok());

        let mut both = AnalysisOptions::new(temp.path());
        both.virtualenv = Some(temp.path().join("venv"));
        both.provision_env = true;
        assert!(both.validate().is_err());

        let mut bad_glob = AnalysisOptions::new(temp.path());
        bad_glob.excluded_paths = vec!["[".to_string()];
        assert!(bad_glob.validate().is_err());
    }

    #[test]
    fn test_output_file_names() {
        assert_eq!(OutputFormat::Json.file_name(), "analysis.json");
        assert_eq!(OutputFormat::Msgpack.file_name(), "analysis.msgpack");
    }
}
