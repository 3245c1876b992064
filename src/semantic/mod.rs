//! Level-2 call graph through an external semantic database.
//!
//! The database is built from the project tree and cached under the cache
//! root with its own digest. Call rows returned by the database are mapped
//! back onto callable signatures of the symbol table.

mod codeql;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::analysis::{Entity, PyApplication, PyCallEdge};
use crate::cache::{digest_file_state, write_digest_file, CacheLayout, CacheState, TreeDigest};

pub use codeql::CodeqlCli;

/// Language tag handed to the database builder.
pub const PYTHON: &str = "python";

/// One caller → callee row reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRow {
    pub caller_file: PathBuf,
    /// Start line of the calling function.
    pub caller_line: usize,
    pub caller_name: String,
    /// Line of the call expression.
    pub call_line: usize,
    pub callee_file: PathBuf,
    /// Start line of the called function.
    pub callee_line: usize,
    pub callee_name: String,
}

/// An external database that can be built from source and queried for calls.
pub trait SemanticDatabase: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a usable database exists at `db_dir`.
    fn is_built(&self, db_dir: &Path) -> bool;

    /// Build (or overwrite) the database. A non-zero status is an error.
    fn create(&self, source_root: &Path, language: &str, db_dir: &Path) -> anyhow::Result<()>;

    /// Every resolved call in the database.
    fn call_edges(&self, db_dir: &Path) -> anyhow::Result<Vec<CallRow>>;
}

/// Reuse the database when built, digest-equal and not eager; otherwise
/// build it and record the digest.
///
/// Returns the state the database entry was in before this call.
pub fn ensure_database(
    db: &dyn SemanticDatabase,
    layout: &CacheLayout,
    source_root: &Path,
    current: &TreeDigest,
    eager: bool,
) -> anyhow::Result<CacheState> {
    let db_dir = layout.database_dir();
    let checksum = layout.database_checksum();

    let mut state = digest_file_state(&checksum, current, eager);
    if state.is_fresh() && !db.is_built(&db_dir) {
        state = CacheState::Stale;
    }
    if state.is_fresh() {
        info!(db = %db_dir.display(), "reusing semantic database");
        return Ok(state);
    }

    let building = state.begin_rebuild();
    info!(
        db = %db_dir.display(),
        engine = db.name(),
        state = %building,
        "building semantic database"
    );
    if let Some(parent) = db_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    db.create(source_root, PYTHON, &db_dir)?;
    write_digest_file(&checksum, current)?;
    Ok(state)
}

fn relative_key(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Map database rows onto the symbol table.
///
/// A caller or callee whose file and start line match a callable becomes that
/// callable's signature; anything else keeps the raw name from the row.
/// Duplicate rows collapse to one edge.
pub fn resolve_call_graph(app: &PyApplication, rows: &[CallRow], root: &Path) -> Vec<PyCallEdge> {
    let mut index: HashMap<(String, usize), &str> = HashMap::new();
    for module in app.symbol_table.values() {
        let key = relative_key(root, Path::new(&module.file_path));
        module.for_each_entity(&mut |e| {
            if let Entity::Callable(c) = e {
                index
                    .entry((key.clone(), c.span.start_line))
                    .or_insert(c.signature.as_str());
            }
        });
    }

    let lookup = |file: &Path, line: usize, name: &str| -> String {
        index
            .get(&(relative_key(root, file), line))
            .map(|s| s.to_string())
            .unwrap_or_else(|| name.to_string())
    };

    let mut edges: Vec<PyCallEdge> = rows
        .iter()
        .map(|row| PyCallEdge {
            source: lookup(&row.caller_file, row.caller_line, &row.caller_name),
            target: lookup(&row.callee_file, row.callee_line, &row.callee_name),
            file: relative_key(root, &row.caller_file),
            line: row.call_line,
        })
        .collect();

    edges.sort_by(|a, b| {
        (&a.file, a.line, &a.source, &a.target).cmp(&(&b.file, b.line, &b.source, &b.target))
    });
    edges.dedup();
    debug!(rows = rows.len(), edges = edges.len(), "resolved call graph");
    edges
}
