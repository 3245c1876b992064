//! Record construction from individual syntax nodes.
//!
//! The [`EntityBuilder`] knows how to turn one node (an import statement, a
//! parameter list, a call expression, ...) into its fact record. It never
//! walks definitions recursively; that is the module extractor's job.

use std::collections::HashSet;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use crate::analysis::facts::{
    ParameterKind, PyCallableParameter, PyCallsite, PyComment, PyImport, PyVariableDeclaration,
    Span, VariableScope, Visibility,
};
use crate::analysis::resolution::{Position, ResolutionPort};
use crate::analysis::traits::{ParsedFile, PYTHON_LANGUAGE};

lazy_static! {
    /// Decorators that register a callable with a CLI, web or task framework.
    static ref ENTRYPOINT_DECORATOR: Regex = Regex::new(
        r"(?s)^[A-Za-z_][\w.]*\.(command|group|route|get|post|put|delete|patch|websocket|task)(\(.*\))?$"
    ).unwrap();

    /// `if __name__ == "__main__":` in either operand order.
    static ref MAIN_GUARD: Regex = Regex::new(
        r#"^(__name__\s*==\s*['"]__main__['"]|['"]__main__['"]\s*==\s*__name__)$"#
    ).unwrap();
}

const COMMENT_QUERY: &str = "(comment) @comment";

/// Names of the implicit receiver parameter of methods.
pub const RECEIVER_NAMES: [&str; 2] = ["self", "cls"];

/// Pre-order walk; `visit` returns false to skip a node's children.
pub(crate) fn walk_tree<'t>(node: Node<'t>, visit: &mut dyn FnMut(Node<'t>) -> bool) {
    if !visit(node) {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_tree(child, visit);
    }
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// Whether a decorator expression registers an entry point.
pub fn is_entrypoint_decorator(decorator: &str) -> bool {
    ENTRYPOINT_DECORATOR.is_match(decorator.trim())
}

/// Label used for an argument whose type could not be inferred.
pub fn literal_kind(node: Node) -> String {
    match node.kind() {
        "string" | "concatenated_string" => "string",
        "integer" | "float" => "number",
        "true" | "false" => "boolean",
        "none" => "none",
        "list" | "list_comprehension" => "list",
        "dictionary" | "dictionary_comprehension" => "dict",
        "set" | "set_comprehension" => "set",
        "tuple" => "tuple",
        "unary_operator" => {
            return match node.child_by_field_name("argument").map(|a| a.kind()) {
                Some("integer") | Some("float") => "number".to_string(),
                _ => "unary_operator".to_string(),
            };
        }
        other => other,
    }
    .to_string()
}

/// Body of a string literal: prefix letters and quotes removed.
pub fn string_literal_content(raw: &str) -> &str {
    let unprefixed = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if unprefixed.len() >= quote.len() * 2
            && unprefixed.starts_with(quote)
            && unprefixed.ends_with(quote)
        {
            return &unprefixed[quote.len()..unprefixed.len() - quote.len()];
        }
    }
    unprefixed
}

/// Strip the common indentation of continuation lines, then outer blank space.
pub fn clean_docstring(content: &str) -> String {
    let mut lines = content.lines();
    let first = lines.next().unwrap_or("").trim();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned = vec![first.to_string()];
    for line in rest {
        let cut = indent.min(line.len() - line.trim_start().len());
        let stripped = line.get(cut..).unwrap_or_else(|| line.trim_start());
        cleaned.push(stripped.trim_end().to_string());
    }
    cleaned.join("\n").trim().to_string()
}

/// The pieces of an assignment statement, chained assignments flattened.
///
/// `a = b = f()` has targets `[a, b]` and value `f()`.
pub struct Assignment<'t> {
    pub targets: Vec<Node<'t>>,
    pub value: Option<Node<'t>>,
    pub annotation: Option<Node<'t>>,
}

impl<'t> Assignment<'t> {
    pub fn from_node(node: Node<'t>) -> Self {
        let mut targets = Vec::new();
        let mut annotation = None;
        let mut current = node;
        loop {
            if let Some(left) = current.child_by_field_name("left") {
                targets.push(left);
            }
            if annotation.is_none() {
                annotation = current.child_by_field_name("type");
            }
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                value => {
                    return Self {
                        targets,
                        value,
                        annotation,
                    }
                }
            }
        }
    }
}

/// Builds fact records for one parsed file.
pub struct EntityBuilder<'a> {
    parsed: &'a ParsedFile,
    file: &'a Path,
    resolver: &'a dyn ResolutionPort,
}

impl<'a> EntityBuilder<'a> {
    pub fn new(parsed: &'a ParsedFile, file: &'a Path, resolver: &'a dyn ResolutionPort) -> Self {
        Self {
            parsed,
            file,
            resolver,
        }
    }

    pub fn text(&self, node: Node) -> &'a str {
        self.parsed.node_text(node)
    }

    pub fn type_at(&self, node: Node) -> Option<String> {
        self.resolver.type_at(&Position::of_node(self.file, node))
    }

    pub fn qualified_name_at(&self, node: Node) -> Option<String> {
        self.resolver
            .qualified_name_at(&Position::of_node(self.file, node))
    }

    // =========================================================================
    // Module-level records
    // =========================================================================

    /// Every import in the file, in source order.
    pub fn imports(&self, root: Node) -> Vec<PyImport> {
        let mut imports = Vec::new();
        walk_tree(root, &mut |node| {
            match node.kind() {
                "import_statement" => self.plain_imports(node, &mut imports),
                "import_from_statement" | "future_import_statement" => {
                    self.from_imports(node, &mut imports)
                }
                _ => return true,
            }
            false
        });
        imports
    }

    fn plain_imports(&self, stmt: Node, out: &mut Vec<PyImport>) {
        let span = Span::from_node(stmt);
        let mut cursor = stmt.walk();
        for name in stmt.children_by_field_name("name", &mut cursor) {
            let (target, alias) = self.import_target(name);
            out.push(PyImport {
                module: target.clone(),
                name: target,
                alias,
                span,
            });
        }
    }

    fn from_imports(&self, stmt: Node, out: &mut Vec<PyImport>) {
        let span = Span::from_node(stmt);
        let module = match stmt.kind() {
            "future_import_statement" => "__future__".to_string(),
            _ => stmt
                .child_by_field_name("module_name")
                .map(|m| self.text(m).to_string())
                .unwrap_or_default(),
        };

        let mut cursor = stmt.walk();
        let names: Vec<Node> = stmt.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (target, alias) = self.import_target(name);
            out.push(PyImport {
                module: module.clone(),
                name: target,
                alias,
                span,
            });
        }

        let mut cursor = stmt.walk();
        if stmt
            .named_children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import")
        {
            out.push(PyImport {
                module,
                name: "*".to_string(),
                alias: None,
                span,
            });
        }
    }

    fn import_target(&self, node: Node) -> (String, Option<String>) {
        if node.kind() == "aliased_import" {
            let name = node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string())
                .unwrap_or_default();
            let alias = node
                .child_by_field_name("alias")
                .map(|a| self.text(a).to_string());
            (name, alias)
        } else {
            (self.text(node).to_string(), None)
        }
    }

    /// All `#` comments plus the module docstring, ordered by position.
    pub fn comments(&self, root: Node) -> anyhow::Result<Vec<PyComment>> {
        let query = Query::new(&PYTHON_LANGUAGE, COMMENT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, root, &self.parsed.source[..]);

        let mut comments = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let text = self.text(capture.node);
                comments.push(PyComment {
                    content: text.trim_start_matches('#').trim().to_string(),
                    span: Span::from_node(capture.node),
                    is_docstring: false,
                });
            }
        }

        if let Some(doc) = self.docstring(root) {
            comments.push(doc);
        }
        comments.sort_by_key(|c| (c.span.start_line, c.span.start_column));
        Ok(comments)
    }

    /// Docstring of a module root or a definition body.
    pub fn docstring(&self, body: Node) -> Option<PyComment> {
        let first = named_children(body).into_iter().next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let children = named_children(first);
        match children.as_slice() {
            [string] if string.kind() == "string" => Some(self.docstring_comment(*string)),
            _ => None,
        }
    }

    pub fn docstring_comment(&self, string: Node) -> PyComment {
        PyComment {
            content: clean_docstring(string_literal_content(self.text(string))),
            span: Span::from_node(string),
            is_docstring: true,
        }
    }

    /// Names called by bare identifier inside a module-level main guard.
    pub fn main_block_calls(&self, root: Node) -> HashSet<String> {
        let mut names = HashSet::new();
        for stmt in named_children(root) {
            if stmt.kind() != "if_statement" {
                continue;
            }
            let Some(condition) = stmt.child_by_field_name("condition") else {
                continue;
            };
            let normalized: String = self
                .text(condition)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if !MAIN_GUARD.is_match(&normalized) {
                continue;
            }
            if let Some(block) = stmt.child_by_field_name("consequence") {
                walk_tree(block, &mut |node| {
                    if node.kind() == "call" {
                        if let Some(func) = node.child_by_field_name("function") {
                            if func.kind() == "identifier" {
                                names.insert(self.text(func).to_string());
                            }
                        }
                    }
                    true
                });
            }
        }
        names
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Decorator expressions of a `decorated_definition`, in order.
    pub fn decorators(&self, decorated: Node) -> Vec<String> {
        let mut cursor = decorated.walk();
        decorated
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|d| match named_children(d).first() {
                Some(expr) => self.text(*expr).to_string(),
                None => self.text(d).trim_start_matches('@').trim().to_string(),
            })
            .collect()
    }

    /// Positional base-class expressions of a class definition.
    pub fn base_classes(&self, class_def: Node) -> Vec<String> {
        let Some(superclasses) = class_def.child_by_field_name("superclasses") else {
            return Vec::new();
        };
        named_children(superclasses)
            .into_iter()
            .filter(|n| n.kind() != "keyword_argument")
            .map(|n| self.text(n).to_string())
            .collect()
    }

    /// Annotated return type, or what the resolver infers for the name.
    pub fn return_type(&self, func_def: Node) -> Option<String> {
        if let Some(annotation) = func_def.child_by_field_name("return_type") {
            return Some(self.text(annotation).to_string());
        }
        func_def
            .child_by_field_name("name")
            .and_then(|name| self.type_at(name))
    }

    /// Parameters in declaration order.
    ///
    /// `method_of` names the enclosing class when the callable is one of its
    /// direct methods; an unannotated receiver is then typed with it.
    pub fn parameters(&self, params: Node, method_of: Option<&str>) -> Vec<PyCallableParameter> {
        let mut parameters = Vec::new();
        let mut positional_only_until = None;
        let mut keyword_only = false;

        for node in named_children(params) {
            let (name_node, annotation, default, kind) = match node.kind() {
                "identifier" => (node, None, None, None),
                "typed_parameter" => {
                    let Some(inner) = named_children(node).into_iter().next() else {
                        continue;
                    };
                    let (name_node, kind) = self.splat_name(inner);
                    (name_node, node.child_by_field_name("type"), None, kind)
                }
                "default_parameter" | "typed_default_parameter" => {
                    let Some(name_node) = node.child_by_field_name("name") else {
                        continue;
                    };
                    (
                        name_node,
                        node.child_by_field_name("type"),
                        node.child_by_field_name("value"),
                        None,
                    )
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let (name_node, kind) = self.splat_name(node);
                    (name_node, None, None, kind)
                }
                "keyword_separator" => {
                    keyword_only = true;
                    continue;
                }
                "positional_separator" => {
                    positional_only_until = Some(parameters.len());
                    continue;
                }
                _ => continue,
            };

            let kind = match kind {
                Some(ParameterKind::VarPositional) => {
                    keyword_only = true;
                    ParameterKind::VarPositional
                }
                Some(kind) => kind,
                None if keyword_only => ParameterKind::KeywordOnly,
                None => ParameterKind::PositionalOrKeyword,
            };

            let name = self.text(name_node).to_string();
            let type_name = match (annotation, method_of) {
                (Some(annotation), _) => Some(self.text(annotation).to_string()),
                (None, Some(class))
                    if parameters.is_empty() && RECEIVER_NAMES.contains(&name.as_str()) =>
                {
                    Some(class.to_string())
                }
                (None, _) => self.type_at(name_node),
            };

            parameters.push(PyCallableParameter {
                name,
                type_name,
                default_value: default.map(|d| self.text(d).to_string()),
                kind,
                span: Span::from_node(node),
            });
        }

        if let Some(end) = positional_only_until {
            for param in parameters.iter_mut().take(end) {
                param.kind = ParameterKind::PositionalOnly;
            }
        }
        parameters
    }

    fn splat_name<'t>(&self, node: Node<'t>) -> (Node<'t>, Option<ParameterKind>) {
        let kind = match node.kind() {
            "list_splat_pattern" => Some(ParameterKind::VarPositional),
            "dictionary_splat_pattern" => Some(ParameterKind::VarKeyword),
            _ => return (node, None),
        };
        let name = named_children(node).into_iter().next().unwrap_or(node);
        (name, kind)
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// A variable declaration for one assigned name.
    pub fn variable(
        &self,
        target: Node,
        assignment: &Assignment,
        scope: VariableScope,
        name: &str,
    ) -> PyVariableDeclaration {
        let type_name = match assignment.annotation {
            Some(annotation) => Some(self.text(annotation).to_string()),
            None => self.type_at(target),
        };
        PyVariableDeclaration {
            name: name.to_string(),
            type_name,
            initializer: assignment.value.map(|v| self.text(v).to_string()),
            scope,
            span: Span::from_node(target),
        }
    }

    /// Identifiers bound by an assignment target, unpacking tuples and lists.
    pub fn bound_names<'t>(&self, target: Node<'t>, out: &mut Vec<Node<'t>>) {
        match target.kind() {
            "identifier" => out.push(target),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "list_splat_pattern" => {
                for child in named_children(target) {
                    self.bound_names(child, out);
                }
            }
            _ => {}
        }
    }

    /// Names listed by a `__slots__` value.
    pub fn slot_names<'t>(&self, value: Node<'t>) -> Vec<(String, Node<'t>)> {
        let strings: Vec<Node<'t>> = match value.kind() {
            "string" => vec![value],
            "list" | "tuple" | "set" => named_children(value)
                .into_iter()
                .filter(|n| n.kind() == "string")
                .collect(),
            _ => Vec::new(),
        };
        strings
            .into_iter()
            .map(|s| (string_literal_content(self.text(s)).to_string(), s))
            .filter(|(name, _)| !name.is_empty())
            .collect()
    }

    // =========================================================================
    // Body analysis
    // =========================================================================

    /// Every call expression anywhere under `body`, outermost first.
    pub fn call_sites(&self, body: Node, method_of: Option<&str>) -> Vec<PyCallsite> {
        let mut sites = Vec::new();
        walk_tree(body, &mut |node| {
            if node.kind() == "call" {
                if let Some(site) = self.call_site(node, method_of) {
                    sites.push(site);
                }
            }
            true
        });
        sites
    }

    pub fn call_site(&self, call: Node, method_of: Option<&str>) -> Option<PyCallsite> {
        let callee = call.child_by_field_name("function")?;

        let (method_name, name_node, receiver) = match callee.kind() {
            "attribute" => {
                let attr = callee.child_by_field_name("attribute")?;
                (
                    self.text(attr).to_string(),
                    attr,
                    callee.child_by_field_name("object"),
                )
            }
            _ => (self.text(callee).to_string(), callee, None),
        };

        let receiver_expr = receiver.map(|r| self.text(r).to_string());
        // `a.b.run()` asks for the type at `b`, the last segment.
        let receiver_type = receiver.and_then(|r| {
            let queried = match r.kind() {
                "attribute" => r.child_by_field_name("attribute").unwrap_or(r),
                _ => r,
            };
            self.type_at(queried).or_else(|| match (method_of, self.text(r)) {
                (Some(class), text) if RECEIVER_NAMES.contains(&text) => Some(class.to_string()),
                _ => None,
            })
        });

        let argument_types = call
            .child_by_field_name("arguments")
            .map(|args| self.argument_types(args))
            .unwrap_or_default();

        let is_static_call = receiver_expr
            .as_deref()
            .and_then(|r| r.rsplit('.').next())
            .and_then(|last| last.chars().next())
            .map_or(false, char::is_uppercase);

        Some(PyCallsite {
            is_constructor_call: method_name == "__init__",
            is_static_call,
            visibility: Visibility::from_name(&method_name),
            callee_signature: self.qualified_name_at(name_node),
            return_type: self.type_at(name_node),
            method_name,
            receiver_expr,
            receiver_type,
            argument_types,
            span: Span::from_node(call),
        })
    }

    fn argument_types(&self, args: Node) -> Vec<String> {
        if args.kind() == "generator_expression" {
            return vec![self.type_at(args).unwrap_or_else(|| literal_kind(args))];
        }
        named_children(args)
            .into_iter()
            .map(|arg| {
                let value = match arg.kind() {
                    "keyword_argument" => arg.child_by_field_name("value").unwrap_or(arg),
                    "list_splat" | "dictionary_splat" => {
                        named_children(arg).into_iter().next().unwrap_or(arg)
                    }
                    _ => arg,
                };
                self.type_at(value).unwrap_or_else(|| literal_kind(value))
            })
            .collect()
    }

    /// Identifiers and dotted chains read under `body`, first occurrence first.
    pub fn accessed_symbols(&self, body: Node) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut symbols = Vec::new();
        self.collect_reads(body, &mut seen, &mut symbols);
        symbols
    }

    fn collect_reads(&self, node: Node, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        let fields: &[&str] = match node.kind() {
            "comment" | "import_statement" | "import_from_statement"
            | "future_import_statement" | "global_statement" | "nonlocal_statement" => return,
            "function_definition" => &["body"],
            "class_definition" => &["superclasses", "body"],
            "lambda" => &["body"],
            "keyword_argument" => &["value"],
            "assignment" => &["right"],
            "for_statement" => &["right", "body", "alternative"],
            "for_in_clause" => &["right"],
            "identifier" => {
                self.record_read(node, node, seen, out);
                return;
            }
            "attribute" if is_dotted(node) => {
                let anchor = node.child_by_field_name("attribute").unwrap_or(node);
                self.record_read(node, anchor, seen, out);
                return;
            }
            "attribute" => &["object"],
            "as_pattern" => {
                if let Some(value) = named_children(node).into_iter().next() {
                    self.collect_reads(value, seen, out);
                }
                return;
            }
            _ => {
                for child in named_children(node) {
                    self.collect_reads(child, seen, out);
                }
                return;
            }
        };

        for field in fields {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children_by_field_name(field, &mut cursor).collect();
            for child in children {
                self.collect_reads(child, seen, out);
            }
        }
    }

    fn record_read(&self, node: Node, anchor: Node, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        let symbol = self
            .qualified_name_at(anchor)
            .unwrap_or_else(|| self.text(node).to_string());
        if seen.insert(symbol.clone()) {
            out.push(symbol);
        }
    }
}

/// `a`, `a.b`, `a.b.c`: a chain of names with no calls or subscripts.
fn is_dotted(node: Node) -> bool {
    match node.kind() {
        "identifier" => true,
        "attribute" => node.child_by_field_name("object").map_or(false, is_dotted),
        _ => false,
    }
}
