//! Parsed source units and the tree-sitter entry point.

use std::path::Path;

use once_cell::sync::Lazy;
use tree_sitter::{Language, Node, Parser};

/// The Python grammar, shared by every parse.
pub static PYTHON_LANGUAGE: Lazy<Language> = Lazy::new(|| tree_sitter_python::LANGUAGE.into());

/// Holds a parsed tree-sitter tree and associated metadata.
///
/// The source bytes are kept alongside the tree because every node text
/// lookup slices into them.
pub struct ParsedFile {
    /// The tree-sitter parse tree.
    pub tree: tree_sitter::Tree,
    /// The original source code.
    pub source: Vec<u8>,
    /// The file path (for error reporting).
    pub path: String,
}

impl ParsedFile {
    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: Node) -> &str {
        node.utf8_text(&self.source).unwrap_or("")
    }

    /// Line (1-indexed) of the first ERROR or MISSING node, if any.
    pub fn first_syntax_error(&self) -> Option<usize> {
        let root = self.tree.root_node();
        if !root.has_error() {
            return None;
        }
        first_error_node(root).map(|n| n.start_position().row + 1)
    }
}

fn first_error_node(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error_node)
}

/// Parse Python source into a tree.
///
/// Parsers are not `Sync`, so one is created per call. Partial parse errors
/// still produce a tree; callers decide whether ERROR nodes are fatal.
pub fn parse_python(path: &Path, source: &[u8]) -> anyhow::Result<ParsedFile> {
    let mut parser = Parser::new();
    parser.set_language(&PYTHON_LANGUAGE)?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("failed to parse Python source: {}", path.display()))?;

    Ok(ParsedFile {
        tree,
        source: source.to_vec(),
        path: path.to_string_lossy().to_string(),
    })
}
