//! Source-to-source lowering run right before a bundle is evaluated.
//!
//! JSX becomes `React.createElement(...)` calls and erasable TypeScript
//! syntax is dropped. Everything else is copied through byte for byte, so
//! the output lines up with the input wherever nothing was rewritten.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use tree_sitter::Node;

use crate::config::errors;
use crate::syntax::{self, node_text, string_literal_value};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranspileError {
    #[error("{}: syntax error at {line}:{column}: {detail}", errors::ERR_TRANSPILE_PARSE)]
    Parse {
        line: usize,
        column: usize,
        detail: String,
    },
    #[error("{}: {0}", errors::ERR_TRANSPILE_UNSUPPORTED)]
    Unsupported(String),
}

/// Node kinds that only exist for the type checker.
const ERASED_KINDS: &[&str] = &[
    "type_annotation",
    "type_arguments",
    "type_parameters",
    "interface_declaration",
    "type_alias_declaration",
    "ambient_declaration",
    "function_signature",
    "method_signature",
    "abstract_method_signature",
    "index_signature",
    "implements_clause",
    "accessibility_modifier",
    "override_modifier",
];

/// Modifier tokens dropped wherever they appear as direct children.
const ERASED_TOKENS: &[&str] = &["?", "!", "readonly", "declare", "abstract"];

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("html entity regex")
});

pub fn transpile(source: &str) -> Result<String, TranspileError> {
    let mut parser = syntax::new_parser().map_err(TranspileError::Unsupported)?;
    let tree = syntax::parse_checked(&mut parser, source).map_err(|issue| TranspileError::Parse {
        line: issue.line,
        column: issue.column,
        detail: issue.detail,
    })?;
    Lowering { code: source }.rewrite(tree.root_node())
}

struct Lowering<'c> {
    code: &'c str,
}

impl<'c> Lowering<'c> {
    fn rewrite(&self, node: Node) -> Result<String, TranspileError> {
        let kind = node.kind();
        if ERASED_KINDS.contains(&kind) {
            return Ok(String::new());
        }
        match kind {
            "jsx_element" | "jsx_self_closing_element" => self.jsx_element(node),
            "as_expression" | "satisfies_expression" | "non_null_expression" => {
                match node.named_child(0) {
                    Some(inner) => self.rewrite(inner),
                    None => Ok(String::new()),
                }
            }
            "enum_declaration" => self.enum_declaration(node),
            "optional_parameter"
            | "required_parameter"
            | "public_field_definition"
            | "abstract_class_declaration"
            | "variable_declarator"
            | "method_definition" => self.splice(node, ERASED_TOKENS),
            _ => self.splice(node, &[]),
        }
    }

    /// Copies `node`, substituting rewritten children and dropping direct
    /// children whose kind is listed in `skip`.
    fn splice(&self, node: Node, skip: &[&str]) -> Result<String, TranspileError> {
        if node.child_count() == 0 {
            return Ok(node_text(node, self.code).to_string());
        }
        let mut out = String::with_capacity(node.end_byte() - node.start_byte());
        let mut cursor = node.start_byte();
        let mut walker = node.walk();
        for child in node.children(&mut walker) {
            out.push_str(&self.code[cursor..child.start_byte()]);
            if !(skip.contains(&child.kind()) && !child.is_named()) {
                out.push_str(&self.rewrite(child)?);
            }
            cursor = child.end_byte();
        }
        out.push_str(&self.code[cursor..node.end_byte()]);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // TypeScript enums
    // ------------------------------------------------------------------

    fn enum_declaration(&self, node: Node) -> Result<String, TranspileError> {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.code).to_string())
            .ok_or_else(|| TranspileError::Unsupported("enum without a name".into()))?;
        let mut members = Vec::new();
        let mut next: Option<f64> = Some(0.0);
        if let Some(body) = node.child_by_field_name("body") {
            let mut walker = body.walk();
            for member in body.named_children(&mut walker) {
                let (key, value) = match member.kind() {
                    "enum_assignment" => {
                        let key = member
                            .child_by_field_name("name")
                            .or_else(|| member.named_child(0))
                            .map(|n| self.member_key(n))
                            .unwrap_or_default();
                        let value_node = member
                            .child_by_field_name("value")
                            .or_else(|| member.named_child(1));
                        let value = match value_node {
                            Some(v) => {
                                let text = self.rewrite(v)?;
                                next = text.trim().parse::<f64>().ok().map(|n| n + 1.0);
                                text
                            }
                            None => String::from("undefined"),
                        };
                        (key, value)
                    }
                    "property_identifier" | "string" => {
                        let key = self.member_key(member);
                        let current = next.ok_or_else(|| {
                            TranspileError::Unsupported(format!(
                                "enum member {key} in {name} needs an initializer"
                            ))
                        })?;
                        next = Some(current + 1.0);
                        (key, format_number(current))
                    }
                    _ => continue,
                };
                members.push(format!("{key}: {value}"));
            }
        }
        Ok(format!(
            "const {name} = Object.freeze({{ {} }});",
            members.join(", ")
        ))
    }

    fn member_key(&self, node: Node) -> String {
        if node.kind() == "string" {
            node_text(node, self.code).to_string()
        } else {
            json_string(node_text(node, self.code))
        }
    }

    // ------------------------------------------------------------------
    // JSX
    // ------------------------------------------------------------------

    fn jsx_element(&self, node: Node) -> Result<String, TranspileError> {
        let mut children = Vec::new();
        let opening = if node.kind() == "jsx_self_closing_element" {
            node
        } else {
            let opening = node
                .child_by_field_name("open_tag")
                .or_else(|| node.named_child(0))
                .ok_or_else(|| TranspileError::Unsupported("JSX element without tag".into()))?;
            let content_end = node
                .child_by_field_name("close_tag")
                .map(|close| close.start_byte())
                .unwrap_or_else(|| node.end_byte());
            children = self.jsx_children(node, opening.end_byte(), content_end)?;
            opening
        };

        let element_type = match opening.child_by_field_name("name") {
            Some(name) => self.element_type(name),
            None => "React.Fragment".to_string(),
        };
        let mut args = vec![element_type, self.jsx_props(opening)?];
        args.extend(children);
        Ok(format!("React.createElement({})", args.join(", ")))
    }

    fn element_type(&self, name: Node) -> String {
        let text = node_text(name, self.code);
        if text.contains(':') {
            return json_string(text);
        }
        if text.contains('.') {
            return text.to_string();
        }
        let intrinsic = text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase())
            || text.contains('-');
        if intrinsic {
            json_string(text)
        } else {
            text.to_string()
        }
    }

    fn jsx_props(&self, opening: Node) -> Result<String, TranspileError> {
        let mut entries = Vec::new();
        let mut walker = opening.walk();
        for attr in opening.named_children(&mut walker) {
            match attr.kind() {
                "jsx_attribute" => {
                    let Some(name) = attr.named_child(0) else {
                        continue;
                    };
                    let key = json_string(node_text(name, self.code));
                    let value = match attr.named_child(1) {
                        None => "true".to_string(),
                        Some(value) => self.attribute_value(value)?,
                    };
                    entries.push(format!("{key}: {value}"));
                }
                "jsx_expression" => {
                    if let Some(spread) = first_expression(attr) {
                        entries.push(self.rewrite(spread)?);
                    }
                }
                _ => {}
            }
        }
        if entries.is_empty() {
            Ok("null".into())
        } else {
            Ok(format!("{{ {} }}", entries.join(", ")))
        }
    }

    fn attribute_value(&self, value: Node) -> Result<String, TranspileError> {
        match value.kind() {
            "string" => {
                let raw = string_literal_value(value, self.code);
                Ok(json_string(&decode_entities(raw)))
            }
            "jsx_expression" => match first_expression(value) {
                Some(inner) => Ok(format!("({})", self.rewrite(inner)?)),
                None => Err(TranspileError::Unsupported(
                    "JSX attributes must not be empty expressions".into(),
                )),
            },
            _ => self.rewrite(value),
        }
    }

    /// Children between the opening and closing tags. Text is taken from
    /// the raw source span between structural children so whitespace the
    /// grammar treats as trivia still follows JSX rules.
    fn jsx_children(
        &self,
        element: Node,
        content_start: usize,
        content_end: usize,
    ) -> Result<Vec<String>, TranspileError> {
        let mut out = Vec::new();
        let mut cursor = content_start;
        let mut walker = element.walk();
        for child in element.named_children(&mut walker) {
            let kind = child.kind();
            if !matches!(
                kind,
                "jsx_expression" | "jsx_element" | "jsx_self_closing_element"
            ) || child.start_byte() < content_start
                || child.end_byte() > content_end
            {
                continue;
            }
            push_text(&self.code[cursor..child.start_byte()], &mut out);
            if kind == "jsx_expression" {
                if let Some(inner) = first_expression(child) {
                    out.push(self.rewrite(inner)?);
                }
            } else {
                out.push(self.jsx_element(child)?);
            }
            cursor = child.end_byte();
        }
        if cursor < content_end {
            push_text(&self.code[cursor..content_end], &mut out);
        }
        Ok(out)
    }
}

fn first_expression(node: Node) -> Option<Node> {
    let mut walker = node.walk();
    let found = node
        .named_children(&mut walker)
        .find(|child| child.kind() != "comment");
    found
}

fn push_text(raw: &str, out: &mut Vec<String>) {
    if raw.is_empty() {
        return;
    }
    let cleaned = clean_jsx_text(&decode_entities(raw));
    if !cleaned.is_empty() {
        out.push(json_string(&cleaned));
    }
}

/// JSX whitespace rules: lines are trimmed except at the outer edges, blank
/// lines vanish, and the survivors are joined with single spaces.
pub fn clean_jsx_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let last_non_empty = lines
        .iter()
        .rposition(|line| line.chars().any(|c| c != ' ' && c != '\t'));
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let mut trimmed = line.replace('\t', " ");
        if idx != 0 {
            trimmed = trimmed.trim_start_matches(' ').to_string();
        }
        if idx != lines.len() - 1 {
            trimmed = trimmed.trim_end_matches(' ').to_string();
        }
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(&trimmed);
        if Some(idx) != last_non_empty {
            out.push(' ');
        }
    }
    out
}

pub fn decode_entities(raw: &str) -> String {
    ENTITY_RE
        .replace_all(raw, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "times" => '\u{d7}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "rarr" => '\u{2192}',
        "larr" => '\u{2190}',
        _ => return None,
    })
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
