//! Error types.
//!
//! Two families: [`AnalyzerError`] aborts a run and names the stage that
//! failed; [`ExtractionError`] is scoped to a single source file and only ever
//! causes that file to be skipped.

use std::path::PathBuf;

use thiserror::Error;

/// A run-fatal failure, one variant per stage.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("input validation failed: {0}")]
    InputValidation(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("database build failed: {0}")]
    DatabaseBuild(String),

    #[error("cache failed: {0}")]
    Cache(String),

    #[error("output failed: {0}")]
    Output(String),
}

impl AnalyzerError {
    /// Human-readable stage name.
    pub fn stage(&self) -> &'static str {
        match self {
            AnalyzerError::InputValidation(_) => "input validation",
            AnalyzerError::Provisioning(_) => "provisioning",
            AnalyzerError::DatabaseBuild(_) => "database build",
            AnalyzerError::Cache(_) => "cache",
            AnalyzerError::Output(_) => "output",
        }
    }

    /// The failure detail without the stage prefix.
    pub fn detail(&self) -> &str {
        match self {
            AnalyzerError::InputValidation(d)
            | AnalyzerError::Provisioning(d)
            | AnalyzerError::DatabaseBuild(d)
            | AnalyzerError::Cache(d)
            | AnalyzerError::Output(d) => d,
        }
    }

    pub(crate) fn provisioning(err: anyhow::Error) -> Self {
        AnalyzerError::Provisioning(format!("{:#}", err))
    }

    pub(crate) fn database(err: anyhow::Error) -> Self {
        AnalyzerError::DatabaseBuild(format!("{:#}", err))
    }

    pub(crate) fn cache(err: anyhow::Error) -> Self {
        AnalyzerError::Cache(format!("{:#}", err))
    }

    pub(crate) fn output(err: anyhow::Error) -> Self {
        AnalyzerError::Output(format!("{:#}", err))
    }
}

/// A failure confined to one source file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in {path} at line {line}")]
    Syntax { path: PathBuf, line: usize },

    #[error("failed to parse {path}: {message}")]
    Parser { path: PathBuf, message: String },

    #[error("extraction of {path} panicked")]
    Panicked { path: PathBuf },
}

impl ExtractionError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            ExtractionError::Read { path, .. }
            | ExtractionError::Syntax { path, .. }
            | ExtractionError::Parser { path, .. }
            | ExtractionError::Panicked { path } => path,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_in_messages() {
        let err = AnalyzerError::DatabaseBuild("codeql exited with 2".to_string());
        assert_eq!(err.stage(), "database build");
        assert_eq!(err.detail(), "codeql exited with 2");
        assert_eq!(err.to_string(), "database build failed: codeql exited with 2");
    }

    #[test]
    fn test_extraction_error_path() {
        let err = ExtractionError::Syntax {
            path: PathBuf::from("pkg/broken.py"),
            line: 4,
        };
        assert_eq!(err.path(), std::path::Path::new("pkg/broken.py"));
        assert!(err.to_string().contains("line 4"));
    }
}
