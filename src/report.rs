//! Output of analysis results.
//!
//! Two artifact encodings:
//! - JSON: compact, printed to stdout or written to `analysis.json`
//! - MessagePack: written to `analysis.msgpack`
//!
//! plus the run summary, logged through `tracing`, and the colored fatal
//! error line.

use colored::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::analysis::PyApplication;
use crate::config::OutputFormat;
use crate::pipeline::RunReport;

// =============================================================================
// Artifact
// =============================================================================

/// Encode the application in `format`.
pub fn encode(app: &PyApplication, format: OutputFormat) -> anyhow::Result<Vec<u8>> {
    match format {
        OutputFormat::Json => Ok(app.to_json()?.into_bytes()),
        OutputFormat::Msgpack => app.to_msgpack(),
    }
}

/// Write the application to `output_dir`, or to stdout when absent.
///
/// Returns the written file path, if any.
pub fn write_application(
    app: &PyApplication,
    format: OutputFormat,
    output_dir: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    let bytes = encode(app, format)?;

    let Some(dir) = output_dir else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(&bytes).context("writing to stdout")?;
        if format == OutputFormat::Json {
            handle.write_all(b"\n")?;
        }
        handle.flush()?;
        return Ok(None);
    };

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format.file_name());
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(Some(path))
}

// =============================================================================
// Summary
// =============================================================================

/// Counts describing one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub modules: usize,
    pub classes: usize,
    pub callables: usize,
    pub skipped: usize,
    pub call_edges: Option<usize>,
    pub cache: String,
    pub resolution: String,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let app = &report.application;
        Self {
            modules: app.symbol_table.len(),
            classes: app.class_count(),
            callables: app.callable_count(),
            skipped: report.skipped.len(),
            call_edges: app.call_graph.as_ref().map(Vec::len),
            cache: report.cache_state.to_string(),
            resolution: report.resolution.to_string(),
        }
    }
}

/// Log the run summary. Skipped files are only counted here; each one was
/// already logged with its reason when it failed.
pub fn write_summary(report: &RunReport, written: Option<&Path>) {
    let summary = RunSummary::from_report(report);

    info!(
        modules = summary.modules,
        classes = summary.classes,
        callables = summary.callables,
        call_edges = ?summary.call_edges,
        cache = %summary.cache,
        resolution = %summary.resolution,
        "run summary"
    );
    if summary.skipped > 0 {
        warn!("{} skipped", plural(summary.skipped, "file"));
    }
    if let Some(path) = written {
        info!(output = %path.display(), "wrote analysis");
    }
}

/// Print a fatal error to stderr.
pub fn write_error(message: &str) {
    eprintln!("{} {}", "Error:".red().bold(), message);
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheState;
    use crate::cli::log_level;
    use crate::pipeline::SkippedFile;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn report() -> RunReport {
        RunReport {
            application: PyApplication::default(),
            skipped: vec![SkippedFile {
                path: PathBuf::from("broken.py"),
                reason: "syntax error".to_string(),
            }],
            cache_state: CacheState::Absent,
            resolution: "none",
        }
    }

    #[test]
    fn test_write_to_directory() {
        let temp = TempDir::new().unwrap();
        let app = PyApplication::default();

        let json = write_application(&app, OutputFormat::Json, Some(temp.path()))
            .unwrap()
            .unwrap();
        assert_eq!(json, temp.path().join("analysis.json"));
        let decoded = PyApplication::from_json(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(decoded, app);

        let msgpack = write_application(&app, OutputFormat::Msgpack, Some(temp.path()))
            .unwrap()
            .unwrap();
        assert_eq!(msgpack, temp.path().join("analysis.msgpack"));
        assert_eq!(PyApplication::from_msgpack(&fs::read(&msgpack).unwrap()).unwrap(), app);
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_report(&report());
        assert_eq!(summary.modules, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.call_edges, None);
        assert_eq!(summary.cache, "absent");
    }

    /// Log sink shared with the test.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn summary_output(verbosity: u8) -> String {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(log_level(verbosity)))
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            write_summary(&report(), Some(Path::new("out/analysis.json")))
        });
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_summary_is_silent_by_default() {
        assert_eq!(summary_output(0), "");
    }

    #[test]
    fn test_summary_verbosity() {
        let warn = summary_output(1);
        assert!(warn.contains("1 file skipped"));
        assert!(!warn.contains("run summary"));

        let info = summary_output(2);
        assert!(info.contains("run summary"));
        assert!(info.contains("out/analysis.json"));
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(3, "file"), "3 files");
    }
}
