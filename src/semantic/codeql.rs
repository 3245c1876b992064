//! The CodeQL command-line driver.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use serde_json::Value;
use tracing::debug;

use super::{CallRow, SemanticDatabase};

const QLPACK: &str = r#"name: codeanalyzer/call-graph
version: 0.0.1
dependencies:
  codeql/python-all: "*"
"#;

const CALL_GRAPH_QUERY: &str = r#"/**
 * @kind table
 */
import python

from Call call, Function caller, Function callee, FunctionValue target
where
  call.getScope() = caller and
  call.getFunc().pointsTo(target) and
  target.getScope() = callee
select caller.getLocation().getFile().getAbsolutePath(), caller.getLocation().getStartLine(),
  caller.getName(), call.getLocation().getStartLine(),
  callee.getLocation().getFile().getAbsolutePath(), callee.getLocation().getStartLine(),
  callee.getName()
"#;

/// `codeql` on the PATH, or an explicit binary.
#[derive(Debug, Clone)]
pub struct CodeqlCli {
    binary: PathBuf,
}

impl CodeqlCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Find `codeql` on the PATH.
    pub fn locate() -> anyhow::Result<Self> {
        let path = std::env::var_os("PATH").context("PATH is not set")?;
        for dir in std::env::split_paths(&path) {
            for name in ["codeql", "codeql.exe"] {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(Self::new(candidate));
                }
            }
        }
        bail!("codeql executable not found on PATH")
    }

    fn run(&self, args: &[String]) -> anyhow::Result<()> {
        debug!(binary = %self.binary.display(), args = ?args, "running codeql");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .with_context(|| format!("spawning {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "codeql {} exited with {}: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn query_dir(db_dir: &Path) -> PathBuf {
        db_dir
            .parent()
            .unwrap_or(db_dir)
            .join("queries")
    }
}

fn arg(flag: &str, path: &Path) -> String {
    format!("{}={}", flag, path.display())
}

impl SemanticDatabase for CodeqlCli {
    fn name(&self) -> &'static str {
        "codeql"
    }

    fn is_built(&self, db_dir: &Path) -> bool {
        db_dir.join("codeql-database.yml").is_file()
    }

    fn create(&self, source_root: &Path, language: &str, db_dir: &Path) -> anyhow::Result<()> {
        self.run(&[
            "database".to_string(),
            "create".to_string(),
            db_dir.display().to_string(),
            arg("--source-root", source_root),
            format!("--language={}", language),
            "--overwrite".to_string(),
        ])
    }

    fn call_edges(&self, db_dir: &Path) -> anyhow::Result<Vec<CallRow>> {
        let queries = Self::query_dir(db_dir);
        std::fs::create_dir_all(&queries)
            .with_context(|| format!("creating {}", queries.display()))?;
        std::fs::write(queries.join("qlpack.yml"), QLPACK)?;
        let query = queries.join("call_graph.ql");
        std::fs::write(&query, CALL_GRAPH_QUERY)?;

        self.run(&[
            "pack".to_string(),
            "install".to_string(),
            queries.display().to_string(),
        ])?;

        let bqrs = queries.join("call_graph.bqrs");
        self.run(&[
            "query".to_string(),
            "run".to_string(),
            arg("--database", db_dir),
            arg("--output", &bqrs),
            query.display().to_string(),
        ])?;

        let decoded = queries.join("call_graph.json");
        self.run(&[
            "bqrs".to_string(),
            "decode".to_string(),
            "--format=json".to_string(),
            arg("--output", &decoded),
            bqrs.display().to_string(),
        ])?;

        let content = std::fs::read_to_string(&decoded)
            .with_context(|| format!("reading {}", decoded.display()))?;
        parse_decoded(&content)
    }
}

/// Parse `codeql bqrs decode --format=json` output of the call graph query.
pub(crate) fn parse_decoded(content: &str) -> anyhow::Result<Vec<CallRow>> {
    let value: Value = serde_json::from_str(content).context("parsing decoded query results")?;
    let tuples = value
        .get("#select")
        .and_then(|s| s.get("tuples"))
        .and_then(Value::as_array)
        .context("decoded results have no #select tuples")?;

    let mut rows = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let Some(cells) = tuple.as_array().filter(|c| c.len() == 7) else {
            bail!("unexpected result row: {}", tuple);
        };
        let text = |i: usize| cells[i].as_str().unwrap_or_default().to_string();
        let line = |i: usize| cells[i].as_u64().unwrap_or_default() as usize;
        rows.push(CallRow {
            caller_file: PathBuf::from(text(0)),
            caller_line: line(1),
            caller_name: text(2),
            call_line: line(3),
            callee_file: PathBuf::from(text(4)),
            callee_line: line(5),
            callee_name: text(6),
        });
    }
    Ok(rows)
}
