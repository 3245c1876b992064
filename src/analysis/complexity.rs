//! Cyclomatic complexity of a callable body.
//!
//! Complexity is calculated as:
//! - Start at 1
//! - Add 1 for each: if, elif, for, while, with, try, except, ternary
//! - Add 1 for each `and`/`or` operator (an n-ary chain adds operands - 1)
//! - Add 1 for each assert, return, yield and yield-from
//!
//! Returns, yields and asserts are counted as exit points on top of the
//! structural branches. Downstream consumers depend on these exact numbers.

use tree_sitter::Node;

/// Decision points counted in a callable body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlowInfo {
    /// Number of if/elif branches.
    pub branch_count: u32,
    /// Number of for/while loops.
    pub loop_count: u32,
    /// Number of with blocks.
    pub with_count: u32,
    /// Number of try blocks.
    pub try_count: u32,
    /// Number of except clauses.
    pub handler_count: u32,
    /// Number of conditional expressions.
    pub ternary_count: u32,
    /// Number of binary and/or operators.
    pub boolean_count: u32,
    /// Number of assert, return and yield exit points.
    pub exit_count: u32,
}

impl ControlFlowInfo {
    /// Walk `body` and every descendant, counting decision points.
    pub fn collect(body: Node) -> Self {
        let mut info = Self::default();
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            if node.is_named() {
                info.record(node.kind());
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        info
    }

    fn record(&mut self, kind: &str) {
        match kind {
            "if_statement" | "elif_clause" => self.branch_count += 1,
            "for_statement" | "while_statement" => self.loop_count += 1,
            "with_statement" => self.with_count += 1,
            "try_statement" => self.try_count += 1,
            "except_clause" | "except_group_clause" => self.handler_count += 1,
            "conditional_expression" => self.ternary_count += 1,
            "boolean_operator" => self.boolean_count += 1,
            "assert_statement" | "return_statement" | "yield" => self.exit_count += 1,
            _ => {}
        }
    }

    /// CC = 1 + decision points. Always at least 1.
    pub fn cyclomatic_complexity(&self) -> u32 {
        1 + self.branch_count
            + self.loop_count
            + self.with_count
            + self.try_count
            + self.handler_count
            + self.ternary_count
            + self.boolean_count
            + self.exit_count
    }
}

/// Complexity of a callable body node.
pub fn cyclomatic_complexity(body: Node) -> u32 {
    ControlFlowInfo::collect(body).cyclomatic_complexity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::traits::parse_python;
    use std::path::Path;

    fn body_complexity(source: &str) -> u32 {
        let parsed = parse_python(Path::new("t.py"), source.as_bytes()).unwrap();
        let root = parsed.tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .children(&mut cursor)
            .find(|n| n.kind() == "function_definition")
            .expect("function definition");
        let body = func.child_by_field_name("body").unwrap();
        cyclomatic_complexity(body)
    }

    #[test]
    fn test_straight_line_is_one() {
        let source = r#"
def f(a):
    x = a + 1
    print(x)
"#;
        assert_eq!(body_complexity(source), 1);
    }

    #[test]
    fn test_if_else_with_and() {
        let source = r#"
def f(a, b):
    if a and b:
        x = 1
    else:
        x = 2
"#;
        // 1 (base) + 1 (if) + 1 (and) = 3
        assert_eq!(body_complexity(source), 3);
    }

    #[test]
    fn test_three_returns() {
        let source = r#"
def f(a):
    return a
    return a
    return a
"#;
        // 1 (base) + 3 (return) = 4
        assert_eq!(body_complexity(source), 4);
    }

    #[test]
    fn test_nary_boolean_chain() {
        let source = r#"
def f(a, b, c, d):
    x = a or b or c or d
"#;
        // 4 operands -> 3 operators
        assert_eq!(body_complexity(source), 4);
    }

    #[test]
    fn test_loops_handlers_and_exits() {
        let source = r#"
def f(items):
    for item in items:
        while item:
            item -= 1
    try:
        with open("x") as fh:
            pass
    except ValueError:
        pass
    except KeyError:
        pass
    assert items
    y = 1 if items else 2
    yield y
"#;
        // base 1 + for 1 + while 1 + try 1 + with 1 + except 2 + assert 1 + ternary 1 + yield 1
        assert_eq!(body_complexity(source), 10);
    }

    #[test]
    fn test_elif_counts_as_branch() {
        let source = r#"
def f(a):
    if a == 1:
        pass
    elif a == 2:
        pass
    else:
        pass
"#;
        assert_eq!(body_complexity(source), 3);
    }

    #[test]
    fn test_yield_from_counted() {
        let source = r#"
def f(xs):
    yield from xs
"#;
        assert_eq!(body_complexity(source), 2);
    }
}
