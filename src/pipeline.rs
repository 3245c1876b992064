//! Whole-project orchestration.
//!
//! A run is strictly staged:
//!
//! ```text
//! validate → environment → resolver → digest/cache ─┬─ fresh ──────────────▶ artifact
//!                                                   └─ rebuild → extract ─▶ reduce
//!                                                                 → database (level 2) → store
//! ```
//!
//! The cache decision is a barrier: extraction never starts before it and is
//! skipped entirely when the cached artifact is reused.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::analysis::{
    extract_file, CachingResolver, InterpreterHints, NoResolution, PyApplication, PyModule,
    ResolutionPort, SidecarHints, SignatureRegistry,
};
use crate::cache::{
    digest_tree, settings_fingerprint, CacheLayout, CacheState, ChecksumCache, TreeDigest,
};
use crate::config::AnalysisOptions;
use crate::discovery::SourceFilter;
use crate::environment::{
    Environment, EnvironmentProvider, ExistingVirtualenv, NoEnvironment, VenvProvisioner,
};
use crate::error::{AnalyzerError, ExtractionError, Result};
use crate::executor::{strategy_for, ExecutionStrategy, TaskOutcome};
use crate::semantic::{ensure_database, resolve_call_graph, CodeqlCli, SemanticDatabase};

/// The resolution engine picked for a run.
struct SelectedResolver {
    name: &'static str,
    /// Part of the cache settings; covers the engine's own inputs.
    key: String,
    port: Arc<dyn ResolutionPort>,
}

impl SelectedResolver {
    fn new(name: &'static str, port: Arc<dyn ResolutionPort>) -> Self {
        Self {
            name,
            key: name.to_string(),
            port,
        }
    }
}

/// Explicit per-run state: the cache root and what to do with it at the end.
pub struct RunContext {
    layout: CacheLayout,
    clear_on_close: bool,
}

impl RunContext {
    /// Create the cache root for a run.
    pub fn open(project_root: &Path, options: &AnalysisOptions) -> Result<Self> {
        let layout = CacheLayout::new(project_root, options.cache_dir.as_deref());
        layout.ensure().map_err(AnalyzerError::cache)?;
        debug!(cache = %layout.root().display(), "opened run context");
        Ok(Self {
            layout,
            clear_on_close: options.clear_cache,
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// End the run, removing the cache root if requested.
    pub fn close(self) -> Result<()> {
        if self.clear_on_close {
            self.layout.clear().map_err(AnalyzerError::cache)?;
        }
        Ok(())
    }
}

/// A file left out of the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunReport {
    pub application: PyApplication,
    pub skipped: Vec<SkippedFile>,
    /// State of the symbol-table cache entry when the run started.
    pub cache_state: CacheState,
    /// Name of the resolution engine used.
    pub resolution: &'static str,
}

impl RunReport {
    /// Whether the artifact came from the cache instead of extraction.
    pub fn reused_cache(&self) -> bool {
        self.cache_state.is_fresh()
    }
}

/// Runs one analysis over one project.
pub struct ProjectAnalyzer {
    options: AnalysisOptions,
    root: PathBuf,
    environment: Option<Box<dyn EnvironmentProvider>>,
    resolver: Option<Arc<dyn ResolutionPort>>,
    database: Option<Box<dyn SemanticDatabase>>,
    strategy: Option<Box<dyn ExecutionStrategy>>,
}

impl ProjectAnalyzer {
    /// Validate the options and resolve the project root.
    pub fn new(options: AnalysisOptions) -> Result<Self> {
        options.validate()?;
        let root = options.input.canonicalize().map_err(|e| {
            AnalyzerError::InputValidation(format!(
                "cannot access {}: {}",
                options.input.display(),
                e
            ))
        })?;
        Ok(Self {
            options,
            root,
            environment: None,
            resolver: None,
            database: None,
            strategy: None,
        })
    }

    /// Use this environment provider instead of the one the options select.
    pub fn with_environment(mut self, provider: Box<dyn EnvironmentProvider>) -> Self {
        self.environment = Some(provider);
        self
    }

    /// Use this resolver instead of the one the options select.
    pub fn with_resolver(mut self, resolver: Arc<dyn ResolutionPort>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use this semantic database instead of `codeql` on the PATH.
    pub fn with_database(mut self, database: Box<dyn SemanticDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ExecutionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    fn provide_environment(&self, layout: &CacheLayout) -> Result<Environment> {
        let provided = match &self.environment {
            Some(provider) => provider.provide(),
            None => {
                if let Some(venv) = &self.options.virtualenv {
                    ExistingVirtualenv::new(venv).provide()
                } else if self.options.provision_env {
                    VenvProvisioner::new(&self.root, &layout.virtualenv_dir())
                        .eager(self.options.rebuild_analysis)
                        .provide()
                } else {
                    NoEnvironment.provide()
                }
            }
        };
        provided.map_err(AnalyzerError::provisioning)
    }

    fn select_resolver(&self, environment: &Environment) -> Result<SelectedResolver> {
        if let Some(resolver) = &self.resolver {
            return Ok(SelectedResolver::new("custom", Arc::clone(resolver)));
        }

        let hints = self
            .options
            .hints_file
            .clone()
            .or_else(|| std::env::var_os(SidecarHints::ENV_VAR).map(PathBuf::from));
        if let Some(hints) = hints {
            let sidecar = SidecarHints::open(&self.root, &hints).map_err(|e| {
                AnalyzerError::InputValidation(format!("{:#}", e))
            })?;
            info!(hints = %hints.display(), "resolving with hints file");
            let key = format!("sidecar:{}", sidecar.fingerprint());
            return Ok(SelectedResolver {
                name: "sidecar",
                key,
                port: Arc::new(CachingResolver::new(sidecar)),
            });
        }

        if let Some(interpreter) = &environment.interpreter {
            info!(interpreter = %interpreter.display(), "resolving with project interpreter");
            let source = InterpreterHints::new(interpreter, &self.root);
            return Ok(SelectedResolver::new(
                "interpreter",
                Arc::new(CachingResolver::new(source)),
            ));
        }

        info!("degraded mode: no resolution engine, types and qualified names left absent");
        Ok(SelectedResolver::new("none", Arc::new(NoResolution)))
    }

    fn source_files(&self, layout: &CacheLayout) -> Result<Vec<PathBuf>> {
        if let Some(target) = self.options.target_file() {
            let target = target.canonicalize().map_err(|e| {
                AnalyzerError::InputValidation(format!("cannot access {}: {}", target.display(), e))
            })?;
            return Ok(vec![target]);
        }
        let excluded = self.options.exclusion_set()?;
        SourceFilter::new(&self.root, self.options.skip_tests, &excluded)
            .cache_root(layout.root())
            .collect()
            .map_err(|e| AnalyzerError::InputValidation(format!("cannot enumerate sources: {:#}", e)))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        bar.set_message("extracting");
        bar
    }

    fn extract_all(
        &self,
        files: &[PathBuf],
        resolver: &dyn ResolutionPort,
    ) -> (Vec<PyModule>, Vec<SkippedFile>) {
        let default_strategy;
        let strategy: &dyn ExecutionStrategy = match &self.strategy {
            Some(strategy) => strategy.as_ref(),
            None => {
                default_strategy = strategy_for(self.options.jobs);
                default_strategy.as_ref()
            }
        };
        info!(files = files.len(), strategy = strategy.name(), "extracting symbol table");

        let bar = self.progress_bar(files.len());
        let root = self.root.as_path();
        let task = |path: &Path| -> std::result::Result<PyModule, ExtractionError> {
            let result = extract_file(path, root, resolver);
            bar.inc(1);
            result
        };
        let outcomes = strategy.run(files, &task);
        bar.finish_and_clear();

        let mut modules = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for TaskOutcome { path, result } in outcomes {
            match result {
                Ok(module) => modules.push(module),
                Err(e) => {
                    warn!(path = %path.display(), "skipping file: {}", e);
                    skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        skipped.sort_by(|a, b| a.path.cmp(&b.path));
        (modules, skipped)
    }

    fn build_call_graph(
        &self,
        layout: &CacheLayout,
        digest: &TreeDigest,
        app: &mut PyApplication,
    ) -> Result<()> {
        let located;
        let db: &dyn SemanticDatabase = match &self.database {
            Some(db) => db.as_ref(),
            None => {
                located = CodeqlCli::locate().map_err(AnalyzerError::database)?;
                &located
            }
        };

        let state = ensure_database(db, layout, &self.root, digest, self.options.rebuild_analysis)
            .map_err(AnalyzerError::database)?;
        debug!(state = %state, "semantic database ready");

        if self.options.analysis_level == 2 {
            let rows = db
                .call_edges(&layout.database_dir())
                .map_err(AnalyzerError::database)?;
            let edges = resolve_call_graph(app, &rows, &self.root);
            info!(edges = edges.len(), "call graph built");
            app.call_graph = Some(edges);
        }
        Ok(())
    }

    /// Run the analysis. The cache root is cleared afterwards when requested,
    /// whether or not the run succeeded.
    pub fn run(&self) -> Result<RunReport> {
        let context = RunContext::open(&self.root, &self.options)?;
        let result = self.run_in(&context);
        let closed = context.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn run_in(&self, context: &RunContext) -> Result<RunReport> {
        let layout = context.layout();
        let environment = self.provide_environment(layout)?;
        let selected = self.select_resolver(&environment)?;
        let resolution = selected.name;

        let digest = digest_tree(&self.root, Some(layout.root()));
        let settings = settings_fingerprint(&self.options, &selected.key);
        let cache = ChecksumCache::new(layout.clone());
        let mut state = cache.evaluate(&digest, &settings, self.options.rebuild_analysis);

        if state.is_fresh() {
            match cache.load_artifact() {
                Some(application) => {
                    info!(
                        modules = application.symbol_table.len(),
                        "source tree unchanged, reusing cached analysis"
                    );
                    return Ok(RunReport {
                        application,
                        skipped: Vec::new(),
                        cache_state: state,
                        resolution,
                    });
                }
                None => {
                    debug!("cached artifact missing, rebuilding");
                    state = CacheState::Stale;
                }
            }
        }
        debug!(state = %state.begin_rebuild(), "symbol table cache");

        let files = self.source_files(layout)?;
        let (modules, skipped) = self.extract_all(&files, selected.port.as_ref());
        let mut application = reduce(modules);

        if self.options.needs_database() {
            self.build_call_graph(layout, &digest, &mut application)?;
        }

        match cache.store(&digest, &settings, &application) {
            Ok(true) => debug!("analysis cached"),
            Ok(false) => debug!("analysis not cached, source digest incomplete"),
            Err(e) => warn!("could not write analysis cache: {:#}", e),
        }

        info!(
            modules = application.symbol_table.len(),
            classes = application.class_count(),
            callables = application.callable_count(),
            skipped = skipped.len(),
            cache = %state,
            "analysis complete"
        );

        Ok(RunReport {
            application,
            skipped,
            cache_state: state,
            resolution,
        })
    }
}

/// Merge per-file modules into one application.
///
/// Runs on one thread after every task has finished, so the result does not
/// depend on task completion order.
pub fn reduce(modules: Vec<PyModule>) -> PyApplication {
    let mut symbol_table: BTreeMap<String, PyModule> = BTreeMap::new();
    for module in modules {
        symbol_table.insert(module.signature().to_string(), module);
    }

    let mut registry = SignatureRegistry::new();
    let mut renamed = 0;
    for module in symbol_table.values_mut() {
        renamed += registry.apply(module);
    }
    if renamed > 0 {
        debug!(renamed, "disambiguated colliding signatures");
    }

    PyApplication {
        symbol_table,
        call_graph: None,
    }
}
