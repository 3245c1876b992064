//! Best-effort type and name resolution.
//!
//! The extractor asks a [`ResolutionPort`] two questions about a source
//! position: what type is there, and what is the fully qualified name of the
//! symbol there. Every answer is optional. Engines behind the port may be
//! missing, slow, wrong or crash; none of that is ever surfaced to the
//! extractor as an error.
//!
//! ```text
//! ┌──────────────┐   load(file)   ┌────────────────┐
//! │ HintSource   │───────────────▶│ CachingResolver│──▶ ResolutionPort
//! │ (sidecar /   │   HintTable    │ (per-file,     │    type_at
//! │  interpreter)│                │  errors→absent)│    qualified_name_at
//! └──────────────┘                └────────────────┘
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::cache::digest_str;

/// A location inside one source file.
///
/// `line` is 1-indexed, `column` is the 0-indexed byte column.
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    pub file: &'a Path,
    pub line: usize,
    pub column: usize,
}

impl<'a> Position<'a> {
    /// Start position of a tree-sitter node.
    pub fn of_node(file: &'a Path, node: tree_sitter::Node) -> Self {
        let point = node.start_position();
        Self {
            file,
            line: point.row + 1,
            column: point.column,
        }
    }
}

/// Best-effort inference contract consulted during extraction.
///
/// For the name of a function definition, `type_at` answers the function's
/// return type.
pub trait ResolutionPort: Send + Sync {
    /// Inferred type at a position.
    fn type_at(&self, pos: &Position<'_>) -> Option<String>;

    /// Fully qualified name of the symbol at a position.
    fn qualified_name_at(&self, pos: &Position<'_>) -> Option<String>;
}

/// Resolver that never knows anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolution;

impl ResolutionPort for NoResolution {
    fn type_at(&self, _pos: &Position<'_>) -> Option<String> {
        None
    }

    fn qualified_name_at(&self, _pos: &Position<'_>) -> Option<String> {
        None
    }
}

impl<T: ResolutionPort + ?Sized> ResolutionPort for Arc<T> {
    fn type_at(&self, pos: &Position<'_>) -> Option<String> {
        (**self).type_at(pos)
    }

    fn qualified_name_at(&self, pos: &Position<'_>) -> Option<String> {
        (**self).qualified_name_at(pos)
    }
}

/// Answers known for one file, keyed by (line, column).
#[derive(Debug, Clone, Default)]
pub struct HintTable {
    types: HashMap<(usize, usize), String>,
    names: HashMap<(usize, usize), String>,
}

impl HintTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_type(&mut self, line: usize, column: usize, type_name: impl Into<String>) {
        let type_name = type_name.into();
        if !type_name.trim().is_empty() {
            self.types.insert((line, column), type_name);
        }
    }

    pub fn insert_name(&mut self, line: usize, column: usize, name: impl Into<String>) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.names.insert((line, column), name);
        }
    }

    pub fn type_at(&self, line: usize, column: usize) -> Option<&str> {
        self.types.get(&(line, column)).map(String::as_str)
    }

    pub fn name_at(&self, line: usize, column: usize) -> Option<&str> {
        self.names.get(&(line, column)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.names.is_empty()
    }

    fn from_payload(payload: &FileHintsPayload) -> Self {
        let mut table = Self::new();
        for hint in &payload.types {
            table.insert_type(hint.line, hint.column, hint.type_name.as_str());
        }
        for hint in &payload.names {
            table.insert_name(hint.line, hint.column, hint.name.as_str());
        }
        table
    }
}

/// A fallible producer of per-file hint tables (an inference engine).
pub trait HintSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Produce the hints for one file.
    fn load(&self, file: &Path) -> anyhow::Result<HintTable>;
}

/// Resolution port over a [`HintSource`].
///
/// Tables are loaded lazily, once per file. A load that fails or panics is
/// remembered as "no hints" for that file, so every later query for it is
/// answered with absent without touching the engine again.
pub struct CachingResolver<S> {
    source: S,
    tables: RwLock<HashMap<PathBuf, Option<Arc<HintTable>>>>,
}

impl<S: HintSource> CachingResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_for(&self, file: &Path) -> Option<Arc<HintTable>> {
        if let Ok(tables) = self.tables.read() {
            if let Some(entry) = tables.get(file) {
                return entry.clone();
            }
        }

        let loaded = match catch_unwind(AssertUnwindSafe(|| self.source.load(file))) {
            Ok(Ok(table)) => {
                trace!(file = %file.display(), engine = self.source.name(), "loaded hints");
                Some(Arc::new(table))
            }
            Ok(Err(e)) => {
                debug!(
                    file = %file.display(),
                    engine = self.source.name(),
                    "resolution unavailable: {:#}",
                    e
                );
                None
            }
            Err(_) => {
                debug!(
                    file = %file.display(),
                    engine = self.source.name(),
                    "resolution engine panicked"
                );
                None
            }
        };

        if let Ok(mut tables) = self.tables.write() {
            tables.insert(file.to_path_buf(), loaded.clone());
        }
        loaded
    }
}

impl<S: HintSource> ResolutionPort for CachingResolver<S> {
    fn type_at(&self, pos: &Position<'_>) -> Option<String> {
        self.table_for(pos.file)?
            .type_at(pos.line, pos.column)
            .map(str::to_string)
    }

    fn qualified_name_at(&self, pos: &Position<'_>) -> Option<String> {
        self.table_for(pos.file)?
            .name_at(pos.line, pos.column)
            .map(str::to_string)
    }
}

// =============================================================================
// Sidecar hints file
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct HintsFilePayload {
    #[serde(default)]
    files: HashMap<String, FileHintsPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct FileHintsPayload {
    #[serde(default)]
    types: Vec<TypeHint>,
    #[serde(default)]
    names: Vec<NameHint>,
}

#[derive(Debug, Deserialize)]
struct TypeHint {
    line: usize,
    column: usize,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
struct NameHint {
    line: usize,
    column: usize,
    name: String,
}

/// Hints read from a JSON file produced by an external inference tool.
///
/// File keys are paths relative to the project root, `/`-separated.
pub struct SidecarHints {
    project_root: PathBuf,
    files: HashMap<String, FileHintsPayload>,
    fingerprint: String,
}

impl SidecarHints {
    /// Environment variable naming a hints file when none is configured.
    pub const ENV_VAR: &'static str = "CODEANALYZER_HINTS_FILE";

    pub fn open(project_root: &Path, hints_file: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(hints_file)
            .with_context(|| format!("reading hints file {}", hints_file.display()))?;
        let payload: HintsFilePayload = serde_json::from_str(&content)
            .with_context(|| format!("parsing hints file {}", hints_file.display()))?;
        Ok(Self {
            project_root: project_root.to_path_buf(),
            files: payload.files,
            fingerprint: digest_str(&format!("{}\n{}", hints_file.display(), content)),
        })
    }

    /// Digest of the hints file's path and content.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn key_for(&self, file: &Path) -> String {
        file.strip_prefix(&self.project_root)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/")
            .trim_start_matches('/')
            .to_string()
    }
}

impl HintSource for SidecarHints {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn load(&self, file: &Path) -> anyhow::Result<HintTable> {
        let key = self.key_for(file);
        let payload = self
            .files
            .get(&key)
            .with_context(|| format!("no hints recorded for {}", key))?;

        Ok(HintTable::from_payload(payload))
    }
}

// =============================================================================
// Interpreter-backed inference
// =============================================================================

/// Inference script run by the project's interpreter. Prints one JSON object
/// with `types` and `names` arrays for the file given as argv[1].
const INFERENCE_SCRIPT: &str = r#"
import json, sys
try:
    import jedi
except ImportError:
    sys.stderr.write("jedi is not installed\n")
    sys.exit(3)
path = sys.argv[1]
with open(path, encoding="utf-8") as fh:
    src = fh.read()
script = jedi.Script(src, path=path)
types, names = [], []
for name in script.get_names(all_scopes=True, definitions=True, references=True):
    line, column = name.line, name.column
    try:
        if name.full_name:
            names.append({"line": line, "column": column, "name": name.full_name})
        inferred = name.infer()
        if inferred:
            first = inferred[0]
            if first.type == "function":
                sigs = first.get_signatures()
                hint = sigs[0].annotation_string if sigs else ""
                if not hint:
                    returned = first.execute()
                    hint = returned[0].full_name or returned[0].name if returned else ""
            else:
                hint = first.full_name or first.name
            if hint:
                types.append({"line": line, "column": column, "type": hint})
    except Exception:
        continue
json.dump({"types": types, "names": names}, sys.stdout)
"#;

/// Hints computed by running an inference script with a project interpreter.
pub struct InterpreterHints {
    interpreter: PathBuf,
    project_root: PathBuf,
}

impl InterpreterHints {
    pub fn new(interpreter: &Path, project_root: &Path) -> Self {
        Self {
            interpreter: interpreter.to_path_buf(),
            project_root: project_root.to_path_buf(),
        }
    }
}

impl HintSource for InterpreterHints {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn load(&self, file: &Path) -> anyhow::Result<HintTable> {
        let mut child = Command::new(&self.interpreter)
            .arg("-")
            .arg(file)
            .current_dir(&self.project_root)
            .env("PYTHONPATH", &self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.interpreter.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(INFERENCE_SCRIPT.as_bytes())
                .context("writing inference script")?;
        }

        let output = child.wait_with_output().context("waiting for inference")?;
        if !output.status.success() {
            bail!(
                "inference exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let payload: FileHintsPayload =
            serde_json::from_slice(&output.stdout).context("parsing inference output")?;
        Ok(HintTable::from_payload(&payload))
    }
}
