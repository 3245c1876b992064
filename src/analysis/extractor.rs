//! Per-file extraction of the module record.
//!
//! The extractor walks the syntax tree once, top-down, keeping a
//! qualification stack of enclosing class and function names. Each
//! definition is built bottom-up: its body is walked first into a fresh
//! [`Members`] accumulator, and the finished children are then moved into
//! the parent record. Nesting depth is unbounded.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use tree_sitter::Node;

use crate::analysis::builder::{
    is_entrypoint_decorator, named_children, Assignment, EntityBuilder, RECEIVER_NAMES,
};
use crate::analysis::complexity::cyclomatic_complexity;
use crate::analysis::facts::{
    PyCallable, PyClass, PyClassAttribute, PyModule, PyVariableDeclaration, Span, VariableScope,
};
use crate::analysis::resolution::ResolutionPort;
use crate::analysis::signatures::SignatureRegistry;
use crate::analysis::traits::{parse_python, ParsedFile};
use crate::error::ExtractionError;

/// What the definitions and bindings being walked belong to.
#[derive(Debug, Clone, Copy)]
enum Owner<'o> {
    Module,
    Class(&'o str),
    /// `method_of` is set when the callable is a direct method of that class.
    Callable { method_of: Option<&'o str> },
}

/// Children collected while walking one scope.
#[derive(Default)]
struct Members {
    classes: BTreeMap<String, PyClass>,
    callables: BTreeMap<String, PyCallable>,
    variables: Vec<PyVariableDeclaration>,
    attributes: BTreeMap<String, PyClassAttribute>,
    /// `self.x = ...` bindings found in a method, handed to the class.
    receiver_attributes: Vec<PyClassAttribute>,
}

/// Builds one [`PyModule`] from a parsed file.
pub struct ModuleExtractor<'a> {
    parsed: &'a ParsedFile,
    file: &'a Path,
    module_name: String,
    builder: EntityBuilder<'a>,
    stack: Vec<String>,
    main_calls: HashSet<String>,
}

impl<'a> ModuleExtractor<'a> {
    pub fn new(
        parsed: &'a ParsedFile,
        file: &'a Path,
        module_name: impl Into<String>,
        resolver: &'a dyn ResolutionPort,
    ) -> Self {
        Self {
            parsed,
            file,
            module_name: module_name.into(),
            builder: EntityBuilder::new(parsed, file, resolver),
            stack: Vec::new(),
            main_calls: HashSet::new(),
        }
    }

    pub fn extract(mut self) -> Result<PyModule, ExtractionError> {
        if let Some(line) = self.parsed.first_syntax_error() {
            return Err(ExtractionError::Syntax {
                path: self.file.to_path_buf(),
                line,
            });
        }

        let root = self.parsed.tree.root_node();
        let imports = self.builder.imports(root);
        let comments = self
            .builder
            .comments(root)
            .map_err(|e| ExtractionError::Parser {
                path: self.file.to_path_buf(),
                message: format!("{:#}", e),
            })?;
        self.main_calls = self.builder.main_block_calls(root);

        let mut members = Members::default();
        self.walk_members(root, Owner::Module, &mut members);

        let mut module = PyModule {
            file_path: self.file.to_string_lossy().to_string(),
            module_name: std::mem::take(&mut self.module_name),
            imports,
            comments,
            classes: members.classes,
            functions: members.callables,
            variables: members.variables,
        };
        SignatureRegistry::new().apply(&mut module);
        Ok(module)
    }

    fn walk_members(&mut self, node: Node<'a>, owner: Owner<'_>, members: &mut Members) {
        // Class attribute that a following bare string documents.
        let mut documented: Option<String> = None;

        for child in named_children(node) {
            match child.kind() {
                "function_definition" => {
                    self.add_callable(child, Vec::new(), owner, members);
                    documented = None;
                }
                "class_definition" => {
                    self.add_class(child, members);
                    documented = None;
                }
                "decorated_definition" => {
                    let decorators = self.builder.decorators(child);
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => {
                                self.add_callable(def, decorators, owner, members)
                            }
                            "class_definition" => self.add_class(def, members),
                            _ => {}
                        }
                    }
                    documented = None;
                }
                "expression_statement" => {
                    documented = self.statement(child, owner, members, documented.take());
                }
                _ => {
                    documented = None;
                    self.walk_members(child, owner, members);
                }
            }
        }
    }

    fn statement(
        &mut self,
        stmt: Node<'a>,
        owner: Owner<'_>,
        members: &mut Members,
        pending: Option<String>,
    ) -> Option<String> {
        let exprs = named_children(stmt);
        let mut documented = None;
        for expr in &exprs {
            match expr.kind() {
                "assignment" => documented = self.assignment(*expr, owner, members),
                "string" if exprs.len() == 1 => {
                    if let (Owner::Class(_), Some(name)) = (owner, pending.as_ref()) {
                        if let Some(attr) = members.attributes.get_mut(name) {
                            if attr.docstring.is_none() {
                                attr.docstring = Some(self.builder.docstring_comment(*expr));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        documented
    }

    /// Record the bindings of one assignment; returns the class attribute
    /// name when it is a single-name class-level binding.
    fn assignment(&mut self, node: Node<'a>, owner: Owner<'_>, members: &mut Members) -> Option<String> {
        let assignment = Assignment::from_node(node);
        let mut documented = None;

        for &target in &assignment.targets {
            if target.kind() == "attribute" {
                if let Owner::Callable {
                    method_of: Some(_),
                } = owner
                {
                    self.receiver_assignment(target, &assignment, members);
                }
                continue;
            }

            let mut names = Vec::new();
            self.builder.bound_names(target, &mut names);
            let single = names.len() == 1;

            for name_node in names {
                let name = self.builder.text(name_node).to_string();
                match owner {
                    Owner::Module => members.variables.push(self.builder.variable(
                        name_node,
                        &assignment,
                        VariableScope::Module,
                        &name,
                    )),
                    Owner::Callable { .. } => members.variables.push(self.builder.variable(
                        name_node,
                        &assignment,
                        VariableScope::Function,
                        &name,
                    )),
                    Owner::Class(_) if name == "__slots__" => {
                        let Some(value) = assignment.value else {
                            continue;
                        };
                        for (slot, slot_node) in self.builder.slot_names(value) {
                            members.attributes.insert(
                                slot.clone(),
                                PyClassAttribute {
                                    name: slot,
                                    type_name: Some("slot".to_string()),
                                    docstring: None,
                                    span: Span::from_node(slot_node),
                                },
                            );
                        }
                    }
                    Owner::Class(_) => {
                        let decl = self.builder.variable(
                            name_node,
                            &assignment,
                            VariableScope::Class,
                            &name,
                        );
                        members.attributes.insert(
                            name.clone(),
                            PyClassAttribute {
                                name: name.clone(),
                                type_name: decl.type_name,
                                docstring: None,
                                span: decl.span,
                            },
                        );
                        if single {
                            documented = Some(name);
                        }
                    }
                }
            }
        }
        documented
    }

    /// `self.x = ...` inside a method declares a class-scope binding.
    fn receiver_assignment(&self, target: Node<'a>, assignment: &Assignment<'a>, members: &mut Members) {
        let (Some(object), Some(attr)) = (
            target.child_by_field_name("object"),
            target.child_by_field_name("attribute"),
        ) else {
            return;
        };
        if !RECEIVER_NAMES.contains(&self.builder.text(object)) {
            return;
        }

        let name = self.builder.text(attr);
        let decl = self
            .builder
            .variable(attr, assignment, VariableScope::Class, name);
        members.receiver_attributes.push(PyClassAttribute {
            name: name.to_string(),
            type_name: decl.type_name.clone(),
            docstring: None,
            span: decl.span,
        });
        members.variables.push(decl);
    }

    fn add_callable(
        &mut self,
        def: Node<'a>,
        decorators: Vec<String>,
        owner: Owner<'_>,
        members: &mut Members,
    ) {
        let Some(name_node) = def.child_by_field_name("name") else {
            return;
        };
        let name = self.builder.text(name_node).to_string();
        let method_of = match owner {
            Owner::Class(class) => Some(class),
            _ => None,
        };
        let signature = self.signature_for(name_node, &name);
        let body = def.child_by_field_name("body");

        self.stack.push(name.clone());
        let mut inner = Members::default();
        if let Some(body) = body {
            self.walk_members(body, Owner::Callable { method_of }, &mut inner);
        }
        self.stack.pop();

        let is_entrypoint = decorators.iter().any(|d| is_entrypoint_decorator(d))
            || (matches!(owner, Owner::Module)
                && (name == "main" || self.main_calls.contains(&name)));

        let span = Span::from_node(def);
        let callable = PyCallable {
            name: name.clone(),
            signature,
            docstring: body.and_then(|b| self.builder.docstring(b)),
            decorators,
            parameters: def
                .child_by_field_name("parameters")
                .map(|p| self.builder.parameters(p, method_of))
                .unwrap_or_default(),
            return_type: self.builder.return_type(def),
            code: self.builder.text(def).to_string(),
            span,
            code_start_line: body.map_or(span.start_line, |b| b.start_position().row + 1),
            accessed_symbols: body
                .map(|b| self.builder.accessed_symbols(b))
                .unwrap_or_default(),
            call_sites: body
                .map(|b| self.builder.call_sites(b, method_of))
                .unwrap_or_default(),
            is_entrypoint,
            local_variables: inner.variables,
            cyclomatic_complexity: body.map_or(1, cyclomatic_complexity),
            inner_callables: inner.callables,
            inner_classes: inner.classes,
        };

        members.receiver_attributes.extend(inner.receiver_attributes);
        members.callables.insert(name, callable);
    }

    fn add_class(&mut self, def: Node<'a>, members: &mut Members) {
        let Some(name_node) = def.child_by_field_name("name") else {
            return;
        };
        let name = self.builder.text(name_node).to_string();
        let signature = self.signature_for(name_node, &name);
        let body = def.child_by_field_name("body");

        self.stack.push(name.clone());
        let mut inner = Members::default();
        if let Some(body) = body {
            self.walk_members(body, Owner::Class(&name), &mut inner);
        }
        self.stack.pop();

        let mut attributes = inner.attributes;
        for attr in inner.receiver_attributes {
            attributes.entry(attr.name.clone()).or_insert(attr);
        }

        let class = PyClass {
            name: name.clone(),
            signature,
            docstring: body.and_then(|b| self.builder.docstring(b)),
            base_classes: self.builder.base_classes(def),
            methods: inner.callables,
            attributes,
            inner_classes: inner.classes,
            span: Span::from_node(def),
        };
        members.classes.insert(name, class);
    }

    /// Resolver answer, else `<module>.<stack>.<name>`.
    fn signature_for(&self, name_node: Node, name: &str) -> String {
        if let Some(qualified) = self.builder.qualified_name_at(name_node) {
            return qualified;
        }
        let mut parts: Vec<&str> = Vec::with_capacity(self.stack.len() + 2);
        if !self.module_name.is_empty() {
            parts.push(&self.module_name);
        }
        parts.extend(self.stack.iter().map(String::as_str));
        parts.push(name);
        parts.join(".")
    }
}

/// Dotted module name of `file` relative to the project root.
///
/// `pkg/sub/mod.py` is `pkg.sub.mod`; a package `__init__.py` takes the
/// package's name.
pub fn module_name_for(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    if let Some(last) = parts.last_mut() {
        if let Some(stem) = last.strip_suffix(".py") {
            *last = stem.to_string();
        }
    }
    if parts.len() > 1 && parts.last().map_or(false, |p| p == "__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// Parse and extract `source` as the module `module_name`.
pub fn extract_source(
    file: &Path,
    module_name: &str,
    source: &[u8],
    resolver: &dyn ResolutionPort,
) -> Result<PyModule, ExtractionError> {
    let parsed = parse_python(file, source).map_err(|e| ExtractionError::Parser {
        path: file.to_path_buf(),
        message: format!("{:#}", e),
    })?;
    ModuleExtractor::new(&parsed, file, module_name, resolver).extract()
}

/// Read, parse and extract one file under `root`.
pub fn extract_file(
    file: &Path,
    root: &Path,
    resolver: &dyn ResolutionPort,
) -> Result<PyModule, ExtractionError> {
    let source = std::fs::read(file).map_err(|source| ExtractionError::Read {
        path: file.to_path_buf(),
        source,
    })?;
    extract_source(file, &module_name_for(root, file), &source, resolver)
}
