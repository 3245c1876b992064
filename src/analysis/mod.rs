//! Source-fact extraction for Python.
//!
//! This module turns one source file into a [`PyModule`] record: imports,
//! comments, classes, callables, variables and call sites, nested to any
//! depth.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ Source File     │────▶│ parse_python     │────▶│ ParsedFile    │
//! └─────────────────┘     │ (tree-sitter)    │     │ (tree + bytes)│
//!                         └──────────────────┘     └───────────────┘
//!                                                          │
//!                                                          ▼
//! ┌─────────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ ResolutionPort  │◀────│ EntityBuilder    │◀────│ModuleExtractor│
//! │ (best effort)   │     │ + complexity     │     │ (qual. stack) │
//! └─────────────────┘     └──────────────────┘     └───────────────┘
//!                                                          │
//!                                                          ▼
//!                                                  ┌───────────────┐
//!                                                  │ PyModule      │
//!                                                  └───────────────┘
//! ```
//!
//! Extraction never fails because of resolution: every resolver answer is
//! optional and the extractor is fully usable with [`NoResolution`].

mod builder;
mod complexity;
mod extractor;
mod facts;
mod resolution;
mod signatures;
mod traits;

pub use builder::{clean_docstring, is_entrypoint_decorator, literal_kind, EntityBuilder};
pub use complexity::{cyclomatic_complexity, ControlFlowInfo};
pub use extractor::{extract_file, extract_source, module_name_for, ModuleExtractor};
pub use facts::{
    Entity, EntityMut, ParameterKind, PyApplication, PyCallEdge, PyCallable, PyCallableParameter,
    PyCallsite, PyClass, PyClassAttribute, PyComment, PyImport, PyModule, PyVariableDeclaration,
    Span, VariableScope, Visibility,
};
pub use resolution::{
    CachingResolver, HintSource, HintTable, InterpreterHints, NoResolution, Position,
    ResolutionPort, SidecarHints,
};
pub use signatures::SignatureRegistry;
pub use traits::{parse_python, ParsedFile, PYTHON_LANGUAGE};
