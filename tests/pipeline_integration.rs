//! End-to-end runs of the project analyzer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use tempfile::TempDir;

use codeanalyzer::analysis::Position;
use codeanalyzer::cli::{self, Cli, EXIT_ERROR, EXIT_SUCCESS};
use codeanalyzer::{
    AnalysisOptions, CacheState, CallRow, ProjectAnalyzer, PyApplication, ResolutionPort,
    SemanticDatabase,
};

use clap::Parser;

fn testdata_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
}

/// Options for a fixture directory, caching into a scratch directory.
fn fixture_options(name: &str, cache: &TempDir) -> AnalysisOptions {
    let mut options = AnalysisOptions::new(testdata_path().join(name));
    options.cache_dir = Some(cache.path().to_path_buf());
    options
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn scratch_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "app.py", "def helper():\n    return 1\n\n\ndef run():\n    return helper()\n");
    write(temp.path(), "pkg/models.py", "class Model:\n    pass\n");
    temp
}

#[test]
fn test_partial_failure_keeps_valid_modules() {
    let cache = TempDir::new().unwrap();
    let mut options = fixture_options("partial", &cache);
    options.jobs = 2;

    let report = ProjectAnalyzer::new(options).unwrap().run().unwrap();
    let names: Vec<&str> = report
        .application
        .symbol_table
        .values()
        .map(|m| m.module_name.as_str())
        .collect();
    assert_eq!(names, vec!["inventory", "pricing"]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("broken.py"));
}

#[cfg(unix)]
#[test]
fn test_dangling_symlink_is_skipped_not_fatal() {
    let project = TempDir::new().unwrap();
    write(project.path(), "good.py", "def ok():\n    return 1\n");
    std::os::unix::fs::symlink(
        project.path().join("missing.py"),
        project.path().join("dangling.py"),
    )
    .unwrap();

    let report = ProjectAnalyzer::new(AnalysisOptions::new(project.path()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.application.symbol_table.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("dangling.py"));
}

#[test]
fn test_partial_failure_exits_successfully() {
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let input = testdata_path().join("partial");
    let cli = Cli::try_parse_from([
        "codeanalyzer",
        "-i",
        input.to_str().unwrap(),
        "-o",
        out.path().to_str().unwrap(),
        "-c",
        cache.path().to_str().unwrap(),
    ])
    .unwrap();

    assert_eq!(cli::execute(&cli), EXIT_SUCCESS);
    let written = std::fs::read_to_string(out.path().join("analysis.json")).unwrap();
    let app = PyApplication::from_json(&written).unwrap();
    assert_eq!(app.symbol_table.len(), 2);
}

#[test]
fn test_bad_level_exits_with_error() {
    let input = testdata_path().join("partial");
    let cli = Cli::try_parse_from(["codeanalyzer", "-i", input.to_str().unwrap(), "-a", "3"])
        .unwrap();
    assert_eq!(cli::execute(&cli), EXIT_ERROR);
}

#[test]
fn test_tests_skipped_by_default() {
    let cache = TempDir::new().unwrap();
    let report = ProjectAnalyzer::new(fixture_options("project", &cache))
        .unwrap()
        .run()
        .unwrap();
    let names: Vec<&str> = report
        .application
        .symbol_table
        .values()
        .map(|m| m.module_name.as_str())
        .collect();
    assert_eq!(names, vec!["main", "shop.cart", "shop.pricing"]);

    let cache = TempDir::new().unwrap();
    let mut options = fixture_options("project", &cache);
    options.skip_tests = false;
    let report = ProjectAnalyzer::new(options).unwrap().run().unwrap();
    assert_eq!(report.application.symbol_table.len(), 4);
}

#[test]
fn test_single_file() {
    let cache = TempDir::new().unwrap();
    let mut options = fixture_options("project", &cache);
    options.file_name = Some(PathBuf::from("shop/cart.py"));
    let report = ProjectAnalyzer::new(options).unwrap().run().unwrap();
    assert_eq!(report.application.symbol_table.len(), 1);
    let module = report.application.symbol_table.values().next().unwrap();
    assert_eq!(module.module_name, "shop.cart");
    assert!(module.classes.contains_key("Cart"));
}

#[test]
fn test_cache_reuse_and_invalidation() {
    let project = scratch_project();
    let options = AnalysisOptions::new(project.path());

    let first = ProjectAnalyzer::new(options.clone()).unwrap().run().unwrap();
    assert_eq!(first.cache_state, CacheState::Absent);

    let second = ProjectAnalyzer::new(options.clone()).unwrap().run().unwrap();
    assert_eq!(second.cache_state, CacheState::Fresh);
    assert_eq!(
        first.application.to_json().unwrap(),
        second.application.to_json().unwrap()
    );

    // one byte
    write(project.path(), "pkg/models.py", "class Modex:\n    pass\n");
    let third = ProjectAnalyzer::new(options.clone()).unwrap().run().unwrap();
    assert_eq!(third.cache_state, CacheState::Stale);
    let models = third
        .application
        .symbol_table
        .values()
        .find(|m| m.module_name == "pkg.models")
        .unwrap();
    assert!(models.classes.contains_key("Modex"));

    let mut eager = options;
    eager.rebuild_analysis = true;
    let fourth = ProjectAnalyzer::new(eager).unwrap().run().unwrap();
    assert_eq!(fourth.cache_state, CacheState::Stale);
}

#[test]
fn test_changed_settings_invalidate_cache() {
    let project = scratch_project();
    let options = AnalysisOptions::new(project.path());
    ProjectAnalyzer::new(options.clone()).unwrap().run().unwrap();

    let mut other = options;
    other.excluded_paths = vec!["pkg/**".to_string()];
    let report = ProjectAnalyzer::new(other).unwrap().run().unwrap();
    assert_eq!(report.cache_state, CacheState::Stale);
    assert_eq!(report.application.symbol_table.len(), 1);
}

#[test]
fn test_clear_cache_removes_cache_root() {
    let project = scratch_project();
    let mut options = AnalysisOptions::new(project.path());
    options.clear_cache = true;
    ProjectAnalyzer::new(options).unwrap().run().unwrap();
    assert!(!project.path().join(".codeanalyzer").exists());
}

/// Database double that reports a single call `run -> helper`.
struct FakeDb {
    source_root: Mutex<Option<PathBuf>>,
    fail: bool,
}

impl FakeDb {
    fn new(fail: bool) -> Self {
        Self {
            source_root: Mutex::new(None),
            fail,
        }
    }
}

impl SemanticDatabase for FakeDb {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_built(&self, db_dir: &Path) -> bool {
        db_dir.exists()
    }

    fn create(&self, source_root: &Path, _language: &str, db_dir: &Path) -> anyhow::Result<()> {
        if self.fail {
            bail!("extractor crashed");
        }
        *self.source_root.lock().unwrap() = Some(source_root.to_path_buf());
        std::fs::create_dir_all(db_dir)?;
        Ok(())
    }

    fn call_edges(&self, _db_dir: &Path) -> anyhow::Result<Vec<CallRow>> {
        let root = self.source_root.lock().unwrap().clone().unwrap();
        Ok(vec![CallRow {
            caller_file: root.join("app.py"),
            caller_line: 5,
            caller_name: "run".to_string(),
            call_line: 6,
            callee_file: root.join("app.py"),
            callee_line: 1,
            callee_name: "helper".to_string(),
        }])
    }
}

#[test]
fn test_level_two_builds_call_graph() {
    let project = scratch_project();
    let mut options = AnalysisOptions::new(project.path());
    options.analysis_level = 2;

    let report = ProjectAnalyzer::new(options)
        .unwrap()
        .with_database(Box::new(FakeDb::new(false)))
        .run()
        .unwrap();
    let edges = report.application.call_graph.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, "app.run");
    assert_eq!(edges[0].target, "app.helper");
    assert_eq!(edges[0].line, 6);
}

#[test]
fn test_level_one_has_no_call_graph() {
    let project = scratch_project();
    let report = ProjectAnalyzer::new(AnalysisOptions::new(project.path()))
        .unwrap()
        .with_database(Box::new(FakeDb::new(true)))
        .run()
        .unwrap();
    assert!(report.application.call_graph.is_none());
}

#[test]
fn test_database_failure_is_fatal() {
    let project = scratch_project();
    let mut options = AnalysisOptions::new(project.path());
    options.analysis_level = 2;

    let err = ProjectAnalyzer::new(options.clone())
        .unwrap()
        .with_database(Box::new(FakeDb::new(true)))
        .run()
        .unwrap_err();
    assert_eq!(err.stage(), "database build");
    assert!(err.to_string().contains("extractor crashed"));

    // nothing half-built was cached
    let retry = ProjectAnalyzer::new(options)
        .unwrap()
        .with_database(Box::new(FakeDb::new(false)))
        .run()
        .unwrap();
    assert_eq!(retry.cache_state, CacheState::Absent);
    assert!(retry.application.call_graph.is_some());
}

/// Resolver that knows every position's type as `Known`.
struct KnowsEverything;

impl ResolutionPort for KnowsEverything {
    fn type_at(&self, _pos: &Position<'_>) -> Option<String> {
        Some("Known".to_string())
    }

    fn qualified_name_at(&self, _pos: &Position<'_>) -> Option<String> {
        None
    }
}

#[test]
fn test_custom_resolver_is_used() {
    let project = scratch_project();
    let report = ProjectAnalyzer::new(AnalysisOptions::new(project.path()))
        .unwrap()
        .with_resolver(Arc::new(KnowsEverything))
        .run()
        .unwrap();
    assert_eq!(report.resolution, "custom");

    let app = report
        .application
        .symbol_table
        .values()
        .find(|m| m.module_name == "app")
        .unwrap();
    assert_eq!(app.functions["run"].return_type.as_deref(), Some("Known"));
}

#[test]
fn test_hints_file_resolution() {
    let project = scratch_project();
    let hints = project.path().join("hints.json");
    std::fs::write(
        &hints,
        r#"{"files": {"app.py": {"types": [{"line": 1, "column": 4, "type": "int"}], "names": []}}}"#,
    )
    .unwrap();

    let mut options = AnalysisOptions::new(project.path());
    options.hints_file = Some(hints);
    let report = ProjectAnalyzer::new(options).unwrap().run().unwrap();
    assert_eq!(report.resolution, "sidecar");

    let app = report
        .application
        .symbol_table
        .values()
        .find(|m| m.module_name == "app")
        .unwrap();
    assert_eq!(app.functions["helper"].return_type.as_deref(), Some("int"));
    assert_eq!(app.functions["run"].return_type, None);
}

#[test]
fn test_edited_hints_file_invalidates_cache() {
    let project = scratch_project();
    let hints = project.path().join("hints.json");
    let hint = |type_name: &str| {
        format!(
            r#"{{"files": {{"app.py": {{"types": [{{"line": 1, "column": 4, "type": "{}"}}]}}}}}}"#,
            type_name
        )
    };
    let mut options = AnalysisOptions::new(project.path());
    options.hints_file = Some(hints.clone());

    std::fs::write(&hints, hint("int")).unwrap();
    ProjectAnalyzer::new(options.clone()).unwrap().run().unwrap();

    std::fs::write(&hints, hint("str")).unwrap();
    let report = ProjectAnalyzer::new(options).unwrap().run().unwrap();
    assert_eq!(report.cache_state, CacheState::Stale);
    let app = report
        .application
        .symbol_table
        .values()
        .find(|m| m.module_name == "app")
        .unwrap();
    assert_eq!(app.functions["helper"].return_type.as_deref(), Some("str"));
}
