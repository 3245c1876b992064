//! Fact records extracted from Python sources.
//!
//! Every record is a value snapshot built once during an extraction pass.
//! Containers own their children (`PyModule` owns its classes, a class owns
//! its methods and inner classes); cross references such as base classes or
//! call-site callees are plain name strings and may point at signatures that
//! are not present in the symbol table.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Source location of a record.
///
/// Lines are 1-indexed, columns are 0-indexed byte offsets within the line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

impl Span {
    /// Create a span from a tree-sitter node.
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_line: start.row + 1, // tree-sitter rows are 0-indexed
            end_line: end.row + 1,
            start_column: start.column,
            end_column: end.column,
        }
    }

    /// Whether the span starts no later than it ends.
    pub fn is_well_formed(&self) -> bool {
        (self.start_line, self.start_column) <= (self.end_line, self.end_column)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_column)
    }
}

/// One imported name.
///
/// `import numpy as np` is `{module: "numpy", name: "numpy", alias: "np"}`,
/// `from os.path import join` is `{module: "os.path", name: "join"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyImport {
    pub module: String,
    pub name: String,
    pub alias: Option<String>,
    pub span: Span,
}

/// A `#` comment or a docstring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyComment {
    /// Comment text without the leading `#`, or the docstring body without quotes.
    pub content: String,
    pub span: Span,
    pub is_docstring: bool,
}

/// Where a variable binding lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Module,
    Class,
    Function,
}

impl VariableScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableScope::Module => "module",
            VariableScope::Class => "class",
            VariableScope::Function => "function",
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A variable or attribute binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyVariableDeclaration {
    pub name: String,
    /// Annotated type, or the inferred type when the resolver knows it.
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    /// Source text of the right-hand side.
    pub initializer: Option<String>,
    pub scope: VariableScope,
    pub span: Span,
}

/// How a parameter may be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

/// One parameter of a callable, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyCallableParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub default_value: Option<String>,
    pub kind: ParameterKind,
    pub span: Span,
}

/// Visibility implied by the naming convention of a callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    /// `__name` is private, `_name` is protected, dunders and everything else are public.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("__") && !name.ends_with("__") {
            Visibility::Private
        } else if name.starts_with('_') && !name.starts_with("__") {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }
}

/// One call expression inside a callable body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyCallsite {
    pub method_name: String,
    /// Source text of the receiver for attribute calls (`obj` in `obj.run()`).
    pub receiver_expr: Option<String>,
    pub receiver_type: Option<String>,
    /// One label per argument; falls back to the argument's syntactic kind.
    pub argument_types: Vec<String>,
    pub return_type: Option<String>,
    pub callee_signature: Option<String>,
    pub is_constructor_call: bool,
    pub is_static_call: bool,
    pub visibility: Visibility,
    pub span: Span,
}

/// A function or method.
///
/// Equality and hashing are keyed by `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyCallable {
    pub name: String,
    pub signature: String,
    pub docstring: Option<PyComment>,
    pub decorators: Vec<String>,
    pub parameters: Vec<PyCallableParameter>,
    pub return_type: Option<String>,
    /// Verbatim source text of the definition.
    pub code: String,
    pub span: Span,
    /// Line where the body block starts.
    pub code_start_line: usize,
    pub accessed_symbols: Vec<String>,
    pub call_sites: Vec<PyCallsite>,
    pub is_entrypoint: bool,
    pub local_variables: Vec<PyVariableDeclaration>,
    pub cyclomatic_complexity: u32,
    pub inner_callables: BTreeMap<String, PyCallable>,
    pub inner_classes: BTreeMap<String, PyClass>,
}

impl PartialEq for PyCallable {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for PyCallable {}

impl Hash for PyCallable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

/// A class-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyClassAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub docstring: Option<PyComment>,
    pub span: Span,
}

/// A class definition.
///
/// Equality and hashing are keyed by `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PyClass {
    pub name: String,
    pub signature: String,
    pub docstring: Option<PyComment>,
    pub base_classes: Vec<String>,
    pub methods: BTreeMap<String, PyCallable>,
    pub attributes: BTreeMap<String, PyClassAttribute>,
    pub inner_classes: BTreeMap<String, PyClass>,
    pub span: Span,
}

impl PartialEq for PyClass {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for PyClass {}

impl Hash for PyClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
    }
}

/// One source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyModule {
    pub file_path: String,
    pub module_name: String,
    pub imports: Vec<PyImport>,
    pub comments: Vec<PyComment>,
    pub classes: BTreeMap<String, PyClass>,
    pub functions: BTreeMap<String, PyCallable>,
    pub variables: Vec<PyVariableDeclaration>,
}

impl PyModule {
    /// Key of this module in the application's symbol table.
    pub fn signature(&self) -> &str {
        &self.file_path
    }

    /// Visit every class and callable in the module, depth first.
    pub fn for_each_entity<'a>(&'a self, visit: &mut dyn FnMut(Entity<'a>)) {
        for class in self.classes.values() {
            walk_class(class, visit);
        }
        for callable in self.functions.values() {
            walk_callable(callable, visit);
        }
    }

    /// Mutable variant of [`PyModule::for_each_entity`].
    pub fn for_each_entity_mut(&mut self, visit: &mut dyn FnMut(EntityMut<'_>)) {
        for class in self.classes.values_mut() {
            walk_class_mut(class, visit);
        }
        for callable in self.functions.values_mut() {
            walk_callable_mut(callable, visit);
        }
    }
}

/// A borrowed class or callable, yielded by the entity walkers.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Class(&'a PyClass),
    Callable(&'a PyCallable),
}

impl<'a> Entity<'a> {
    pub fn signature(&self) -> &'a str {
        match self {
            Entity::Class(c) => &c.signature,
            Entity::Callable(c) => &c.signature,
        }
    }
}

/// A mutably borrowed class or callable.
pub enum EntityMut<'a> {
    Class(&'a mut PyClass),
    Callable(&'a mut PyCallable),
}

fn walk_class<'a>(class: &'a PyClass, visit: &mut dyn FnMut(Entity<'a>)) {
    visit(Entity::Class(class));
    for method in class.methods.values() {
        walk_callable(method, visit);
    }
    for inner in class.inner_classes.values() {
        walk_class(inner, visit);
    }
}

fn walk_callable<'a>(callable: &'a PyCallable, visit: &mut dyn FnMut(Entity<'a>)) {
    visit(Entity::Callable(callable));
    for inner in callable.inner_callables.values() {
        walk_callable(inner, visit);
    }
    for class in callable.inner_classes.values() {
        walk_class(class, visit);
    }
}

fn walk_class_mut(class: &mut PyClass, visit: &mut dyn FnMut(EntityMut<'_>)) {
    visit(EntityMut::Class(class));
    for method in class.methods.values_mut() {
        walk_callable_mut(method, visit);
    }
    for inner in class.inner_classes.values_mut() {
        walk_class_mut(inner, visit);
    }
}

fn walk_callable_mut(callable: &mut PyCallable, visit: &mut dyn FnMut(EntityMut<'_>)) {
    visit(EntityMut::Callable(callable));
    for inner in callable.inner_callables.values_mut() {
        walk_callable_mut(inner, visit);
    }
    for class in callable.inner_classes.values_mut() {
        walk_class_mut(class, visit);
    }
}

/// One resolved call-graph edge produced by level-2 analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyCallEdge {
    /// Caller signature, or the raw caller name when it is not in the symbol table.
    pub source: String,
    /// Callee signature, or the raw callee name when it is not in the symbol table.
    pub target: String,
    pub file: String,
    pub line: usize,
}

/// The whole-project result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyApplication {
    pub symbol_table: BTreeMap<String, PyModule>,
    /// Present only when level-2 analysis ran.
    pub call_graph: Option<Vec<PyCallEdge>>,
}

impl PyApplication {
    /// Encode as compact JSON.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to encode application as JSON")
    }

    /// Decode from JSON.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("failed to decode application JSON")
    }

    /// Encode as MessagePack with named fields.
    pub fn to_msgpack(&self) -> anyhow::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).context("failed to encode application as MessagePack")
    }

    /// Decode from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> anyhow::Result<Self> {
        rmp_serde::from_slice(bytes).context("failed to decode application MessagePack")
    }

    /// Number of classes in the symbol table, nested ones included.
    pub fn class_count(&self) -> usize {
        self.count_entities(|e| matches!(e, Entity::Class(_)))
    }

    /// Number of callables in the symbol table, nested ones included.
    pub fn callable_count(&self) -> usize {
        self.count_entities(|e| matches!(e, Entity::Callable(_)))
    }

    fn count_entities(&self, pred: impl Fn(&Entity<'_>) -> bool) -> usize {
        let mut count = 0;
        for module in self.symbol_table.values() {
            module.for_each_entity(&mut |e| {
                if pred(&e) {
                    count += 1;
                }
            });
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callable(name: &str, signature: &str) -> PyCallable {
        PyCallable {
            name: name.to_string(),
            signature: signature.to_string(),
            docstring: None,
            decorators: Vec::new(),
            parameters: Vec::new(),
            return_type: None,
            code: format!("def {}(): pass", name),
            span: Span::default(),
            code_start_line: 1,
            accessed_symbols: Vec::new(),
            call_sites: Vec::new(),
            is_entrypoint: false,
            local_variables: Vec::new(),
            cyclomatic_complexity: 1,
            inner_callables: BTreeMap::new(),
            inner_classes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_visibility_from_name() {
        assert_eq!(Visibility::from_name("run"), Visibility::Public);
        assert_eq!(Visibility::from_name("_helper"), Visibility::Protected);
        assert_eq!(Visibility::from_name("__secret"), Visibility::Private);
        assert_eq!(Visibility::from_name("__init__"), Visibility::Public);
    }

    #[test]
    fn test_callable_equality_keyed_by_signature() {
        let a = callable("f", "pkg.mod.f");
        let mut b = callable("g", "pkg.mod.f");
        b.cyclomatic_complexity = 7;
        assert_eq!(a, b);

        let c = callable("f", "pkg.other.f");
        assert_ne!(a, c);
    }

    #[test]
    fn test_span_well_formed() {
        let span = Span {
            start_line: 3,
            end_line: 3,
            start_column: 4,
            end_column: 10,
        };
        assert!(span.is_well_formed());
        assert_eq!(span.to_string(), "3:4");

        let backwards = Span {
            start_line: 5,
            end_line: 4,
            start_column: 0,
            end_column: 0,
        };
        assert!(!backwards.is_well_formed());
    }

    #[test]
    fn test_entity_walk_reaches_nested() {
        let mut outer = callable("outer", "m.outer");
        let mut inner = callable("inner", "m.outer.inner");
        inner
            .inner_callables
            .insert("deep".to_string(), callable("deep", "m.outer.inner.deep"));
        outer.inner_callables.insert("inner".to_string(), inner);

        let mut module = PyModule {
            file_path: "m.py".to_string(),
            module_name: "m".to_string(),
            imports: Vec::new(),
            comments: Vec::new(),
            classes: BTreeMap::new(),
            functions: BTreeMap::new(),
            variables: Vec::new(),
        };
        module.functions.insert("outer".to_string(), outer);

        let mut seen = Vec::new();
        module.for_each_entity(&mut |e| seen.push(e.signature().to_string()));
        assert_eq!(seen, vec!["m.outer", "m.outer.inner", "m.outer.inner.deep"]);
    }

    #[test]
    fn test_empty_collections_and_absent_fields_encode_explicitly() {
        let mut app = PyApplication::default();
        app.symbol_table.insert(
            "m.py".to_string(),
            PyModule {
                file_path: "m.py".to_string(),
                module_name: "m".to_string(),
                imports: Vec::new(),
                comments: Vec::new(),
                classes: BTreeMap::new(),
                functions: BTreeMap::new(),
                variables: Vec::new(),
            },
        );
        let json = app.to_json().unwrap();
        assert!(json.contains("\"imports\":[]"));
        assert!(json.contains("\"classes\":{}"));
        assert!(json.contains("\"call_graph\":null"));
    }
}
