//! tree-sitter plumbing shared by the bundler and the transpiler.
//!
//! Every source is parsed with the TSX grammar so plain JS, JSX and
//! TypeScript files go through one parser.

use tree_sitter::{Node, Parser, Tree};
use tree_sitter_typescript::LANGUAGE_TSX;

/// Location of the first syntax error found in a tree, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub detail: String,
}

pub fn new_parser() -> Result<Parser, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&LANGUAGE_TSX.into())
        .map_err(|err| format!("failed to initialize TSX parser: {err}"))?;
    Ok(parser)
}

/// Parses `code`, failing on the first syntax error.
pub fn parse_checked(parser: &mut Parser, code: &str) -> Result<Tree, SyntaxIssue> {
    let tree = parser.parse(code, None).ok_or_else(|| SyntaxIssue {
        line: 1,
        column: 1,
        detail: "parser produced no tree".into(),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(first_syntax_issue(root, code).unwrap_or(SyntaxIssue {
            line: 1,
            column: 1,
            detail: "syntax error".into(),
        }));
    }
    Ok(tree)
}

fn first_syntax_issue(node: Node, code: &str) -> Option<SyntaxIssue> {
    if node.is_missing() {
        let pos = node.start_position();
        return Some(SyntaxIssue {
            line: pos.row + 1,
            column: pos.column + 1,
            detail: format!("missing `{}`", node.kind()),
        });
    }
    if node.is_error() {
        let pos = node.start_position();
        let snippet: String = node_text(node, code).chars().take(40).collect();
        return Some(SyntaxIssue {
            line: pos.row + 1,
            column: pos.column + 1,
            detail: if snippet.is_empty() {
                "unexpected end of input".into()
            } else {
                format!("unexpected `{snippet}`")
            },
        });
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|child| first_syntax_issue(child, code))
}

pub fn node_text<'c>(node: Node, code: &'c str) -> &'c str {
    node.utf8_text(code.as_bytes()).unwrap_or_default()
}

/// Text of a string literal node without its quotes.
pub fn string_literal_value<'c>(node: Node, code: &'c str) -> &'c str {
    let raw = node_text(node, code);
    if raw.len() >= 2 {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

pub fn has_child_kind(node: Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

/// Names bound by a declaration pattern (`a`, `{ b, c: d }`, `[e, ...f]`).
pub fn collect_binding_names(node: Node, code: &str, out: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.push(node_text(node, code).to_string());
            return;
        }
        "pair_pattern" => {
            if let Some(value) = node.child_by_field_name("value") {
                collect_binding_names(value, code, out);
            }
            return;
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_binding_names(left, code, out);
            }
            return;
        }
        "rest_pattern" | "array_pattern" | "object_pattern" => {}
        _ => return,
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_binding_names(child, code, out);
    }
}

/// Names a top-level declaration introduces at runtime. Type-only
/// declarations introduce none.
pub fn declared_names(decl: Node, code: &str) -> Vec<String> {
    let mut names = Vec::new();
    match decl.kind() {
        "function_declaration"
        | "generator_function_declaration"
        | "class_declaration"
        | "abstract_class_declaration"
        | "enum_declaration" => {
            if let Some(name) = decl.child_by_field_name("name") {
                names.push(node_text(name, code).to_string());
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = decl.walk();
            for child in decl.children(&mut cursor) {
                if child.kind() == "variable_declarator" {
                    if let Some(name) = child.child_by_field_name("name") {
                        collect_binding_names(name, code, &mut names);
                    }
                }
            }
        }
        _ => {}
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_error_position() {
        let mut parser = new_parser().expect("parser");
        let issue = parse_checked(&mut parser, "const a = 1;\nconst = ;\n").unwrap_err();
        assert_eq!(issue.line, 2);
    }

    #[test]
    fn collects_destructured_names() {
        let mut parser = new_parser().expect("parser");
        let code = "const { a, b: c, ...rest } = obj, [d, e = 1] = arr;";
        let tree = parse_checked(&mut parser, code).expect("parse");
        let decl = tree.root_node().child(0).expect("decl");
        assert_eq!(declared_names(decl, code), vec!["a", "c", "rest", "d", "e"]);
    }

    #[test]
    fn parses_jsx_and_typescript() {
        let mut parser = new_parser().expect("parser");
        let code = "const x: number = 1;\nconst el = <div className=\"a\">{x}</div>;";
        assert!(parse_checked(&mut parser, code).is_ok());
    }
}
