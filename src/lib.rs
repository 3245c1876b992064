//! codeanalyzer - static symbol-table extraction for Python projects.
//!
//! Walks a Python project and produces one [`PyApplication`]: a symbol table
//! mapping every module to its imports, comments, classes, callables,
//! variables and call sites, plus an optional call graph built from an
//! external semantic database.
//!
//! # Architecture
//!
//! - `analysis`: tree-sitter based per-file extraction and the data model
//! - `cache`: whole-tree digest and the cached artifact
//! - `discovery`: which files of a project are analyzed
//! - `executor`: failure-isolated per-file scheduling
//! - `environment`: interpreter provisioning for resolution engines
//! - `semantic`: level-2 call graph through CodeQL
//! - `pipeline`: the orchestrator tying the stages together
//! - `report`: artifact encoding and run summary
//!
//! # Example
//!
//! ```no_run
//! use codeanalyzer::{AnalysisOptions, ProjectAnalyzer};
//!
//! let options = AnalysisOptions::new("path/to/project");
//! let report = ProjectAnalyzer::new(options)?.run()?;
//! println!("{} modules", report.application.symbol_table.len());
//! # Ok::<(), codeanalyzer::AnalyzerError>(())
//! ```

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod report;
pub mod semantic;

pub use analysis::{
    extract_file, extract_source, NoResolution, PyApplication, PyCallEdge, PyCallable, PyClass,
    PyModule, ResolutionPort,
};
pub use cache::{CacheLayout, CacheState};
pub use config::{AnalysisOptions, OutputFormat, ProjectConfig};
pub use error::{AnalyzerError, ExtractionError};
pub use pipeline::{ProjectAnalyzer, RunContext, RunReport, SkippedFile};
pub use semantic::{CallRow, SemanticDatabase};
