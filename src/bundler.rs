//! Module bundler: flattens a virtual module graph into one script.
//!
//! Each file is parsed once, its `import`/`export` statements are rewritten
//! into plain bindings, and the results are concatenated dependency-first.
//! Every module gets a generated default binding derived from its path so a
//! default import always has something to point at.

use std::collections::HashMap;
use std::ops::Range;

use thiserror::Error;
use tracing::{debug, info_span};
use tree_sitter::{Node, Parser};

use crate::config::errors;
use crate::file_index::{self, FileIndex};
use crate::syntax::{self, declared_names, node_text, string_literal_value};

/// Path of the synthetic entry that aggregates several test files.
pub const VIRTUAL_ENTRY_PATH: &str = "/__virtual_entry__.js";

const DEFAULT_EXPORT_PREFIX: &str = "defaultExport_";

/// Packages whose default export is provided as an ambient binding.
const PACKAGE_DEFAULTS: &[(&str, &str)] = &[
    ("react", "React"),
    ("react-dom", "ReactDOM"),
    ("react-dom/client", "ReactDOM"),
    ("@testing-library/user-event", "userEvent"),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("{}: Module not found: '{specifier}' imported from '{importer}'", errors::ERR_MODULE_NOT_FOUND)]
    ModuleNotFound { specifier: String, importer: String },
    #[error("{}: syntax error in {path} at {line}:{column}: {detail}", errors::ERR_PARSE)]
    Parse {
        path: String,
        line: usize,
        column: usize,
        detail: String,
    },
    #[error("{}: entry file not found: '{0}'", errors::ERR_ENTRY_NOT_FOUND)]
    EntryNotFound(String),
    #[error("{}: {0}", errors::ERR_PARSER_INIT)]
    Parser(String),
    #[error("{}: unsupported re-export in {path}: {form}", errors::ERR_UNSUPPORTED_EXPORT)]
    UnsupportedExport { path: String, form: String },
}

/// Output of a bundling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    pub code: String,
    /// Canonical paths in emission order.
    pub modules: Vec<String>,
}

/// Generated default-export identifier for a path. Non-alphanumerics become `_`.
pub fn default_export_id(path: &str) -> String {
    let sanitized: String = file_index::canonical(path)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{DEFAULT_EXPORT_PREFIX}{sanitized}")
}

/// What the rest of the bundle needs to know about one module.
#[derive(Debug, Clone)]
struct ModuleSummary {
    default_id: String,
    /// Top-level name the default export was declared under, if any.
    default_name: Option<String>,
    exports: Vec<String>,
}

/// Accumulates emitted chunks. `modules` is the arena, `index` the visited
/// set; a path is registered before its dependencies are visited, which is
/// what terminates cycles.
#[derive(Debug, Default)]
struct Bundle {
    chunks: Vec<String>,
    order: Vec<String>,
    modules: Vec<ModuleSummary>,
    index: HashMap<String, usize>,
}

impl Bundle {
    fn summary(&self, path: &str) -> Option<&ModuleSummary> {
        self.index.get(path).map(|idx| &self.modules[*idx])
    }
}

pub struct Bundler<'a> {
    files: &'a FileIndex<'a>,
    parser: Parser,
}

impl<'a> Bundler<'a> {
    pub fn new(files: &'a FileIndex<'a>) -> Result<Self, BundleError> {
        let parser = syntax::new_parser().map_err(BundleError::Parser)?;
        Ok(Self { files, parser })
    }

    /// Bundles one file of the index and everything it reaches.
    pub fn bundle_entry(&mut self, entry: &str) -> Result<BundleOutput, BundleError> {
        let found = self
            .files
            .find_file(entry)
            .ok_or_else(|| BundleError::EntryNotFound(entry.to_string()))?;
        let mut bundle = Bundle::default();
        self.visit(&mut bundle, &found.path, &found.file.content)?;
        Ok(finish(bundle))
    }

    /// Bundles source that is not part of the index, resolving its imports
    /// from the root.
    pub fn bundle_inline(&mut self, source: &str) -> Result<BundleOutput, BundleError> {
        let mut bundle = Bundle::default();
        let path = file_index::canonical(VIRTUAL_ENTRY_PATH).to_string();
        self.visit(&mut bundle, &path, source)?;
        Ok(finish(bundle))
    }

    /// One entry bundles directly; several are aggregated through a
    /// synthetic entry of side-effect imports.
    pub fn bundle_entries<S: AsRef<str>>(
        &mut self,
        entries: &[S],
    ) -> Result<BundleOutput, BundleError> {
        let _span = info_span!("bundle", entries = entries.len()).entered();
        match entries {
            [single] => self.bundle_entry(single.as_ref()),
            many => {
                let source = virtual_entry_source(many);
                self.bundle_inline(&source)
            }
        }
    }

    fn visit(&mut self, bundle: &mut Bundle, path: &str, source: &str) -> Result<(), BundleError> {
        if bundle.index.contains_key(path) {
            return Ok(());
        }

        let tree = syntax::parse_checked(&mut self.parser, source).map_err(|issue| {
            BundleError::Parse {
                path: path.to_string(),
                line: issue.line,
                column: issue.column,
                detail: issue.detail,
            }
        })?;
        let plan = analyze(tree.root_node(), source, path, self.files)?;

        let slot = bundle.modules.len();
        bundle.index.insert(path.to_string(), slot);
        bundle.modules.push(ModuleSummary {
            default_id: default_export_id(path),
            default_name: plan.default_name.clone(),
            exports: plan.exports.clone(),
        });

        for dep in &plan.dependencies {
            if let Some(found) = self.files.find_file(dep) {
                self.visit(bundle, &found.path, &found.file.content)?;
            }
        }
        absorb_star_exports(bundle, slot, &plan.star_sources);

        let chunk = emit(&plan, source, path, bundle);
        debug!(target = "sandtest", path, bytes = chunk.len(), "module bundled");
        bundle.order.push(path.to_string());
        bundle.chunks.push(chunk);
        Ok(())
    }
}

/// `export * from './dep'` re-exports every named export of `dep`. Names the
/// module declares itself win; `default` is never forwarded.
fn absorb_star_exports(bundle: &mut Bundle, slot: usize, sources: &[String]) {
    for source in sources {
        let Some(forwarded) = bundle.summary(source).map(|dep| dep.exports.clone()) else {
            continue;
        };
        let exports = &mut bundle.modules[slot].exports;
        for name in forwarded {
            if name != "default" && !exports.contains(&name) {
                exports.push(name);
            }
        }
    }
}

fn finish(bundle: Bundle) -> BundleOutput {
    BundleOutput {
        code: bundle.chunks.join("\n\n"),
        modules: bundle.order,
    }
}

pub fn virtual_entry_source<S: AsRef<str>>(entries: &[S]) -> String {
    entries
        .iter()
        .map(|entry| {
            let path = file_index::canonical(entry.as_ref());
            format!("import '/{path}';")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ----------------------------------------------------------------------------
// Analysis
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Target {
    /// Inlined module, by canonical path.
    Local(String),
    /// External package, left to ambient bindings.
    Package(String),
}

#[derive(Debug, Clone)]
enum Binding {
    Default { local: String },
    Namespace { local: String },
    Named { imported: String, local: String },
}

#[derive(Debug, Clone)]
enum Edit {
    /// Replace the range with fixed text.
    Text(String),
    /// Replace the range with bindings computed once dependencies are known.
    Bindings(Target, Vec<Binding>),
}

#[derive(Debug, Default)]
struct ModulePlan {
    dependencies: Vec<String>,
    edits: Vec<(Range<usize>, Edit)>,
    exports: Vec<String>,
    /// Targets of `export * from`, whose exports join ours once visited.
    star_sources: Vec<String>,
    has_exports: bool,
    has_default: bool,
    default_name: Option<String>,
}

fn analyze(
    root: Node,
    code: &str,
    path: &str,
    files: &FileIndex<'_>,
) -> Result<ModulePlan, BundleError> {
    let mut plan = ModulePlan::default();
    let default_id = default_export_id(path);
    let mut cursor = root.walk();
    for node in root.children(&mut cursor) {
        match node.kind() {
            "import_statement" => analyze_import(node, code, path, files, &mut plan)?,
            "export_statement" => {
                plan.has_exports = true;
                analyze_export(node, code, path, files, &default_id, &mut plan)?;
            }
            _ => {}
        }
    }
    Ok(plan)
}

fn resolve_target(
    specifier: &str,
    importer: &str,
    files: &FileIndex<'_>,
) -> Result<Target, BundleError> {
    if !file_index::is_local_specifier(specifier) {
        return Ok(Target::Package(specifier.to_string()));
    }
    let resolved = file_index::resolve(importer, specifier);
    files
        .find_file(&resolved)
        .map(|found| Target::Local(found.path))
        .ok_or_else(|| BundleError::ModuleNotFound {
            specifier: specifier.to_string(),
            importer: display_path(importer),
        })
}

fn display_path(path: &str) -> String {
    format!("/{}", file_index::canonical(path))
}

fn push_dependency(plan: &mut ModulePlan, target: &Target) {
    if let Target::Local(dep) = target {
        if !plan.dependencies.contains(dep) {
            plan.dependencies.push(dep.clone());
        }
    }
}

fn analyze_import(
    node: Node,
    code: &str,
    path: &str,
    files: &FileIndex<'_>,
    plan: &mut ModulePlan,
) -> Result<(), BundleError> {
    let range = node.start_byte()..node.end_byte();
    // `import type { X } from './x'` has no runtime effect.
    if syntax::has_child_kind(node, "type") {
        plan.edits.push((range, Edit::Text(String::new())));
        return Ok(());
    }
    let Some(source) = node.child_by_field_name("source") else {
        plan.edits.push((range, Edit::Text(String::new())));
        return Ok(());
    };
    let specifier = string_literal_value(source, code);
    let target = resolve_target(specifier, path, files)?;
    push_dependency(plan, &target);

    let mut bindings = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "import_clause" {
            collect_import_bindings(child, code, &mut bindings);
        }
    }
    plan.edits.push((range, Edit::Bindings(target, bindings)));
    Ok(())
}

fn collect_import_bindings(clause: Node, code: &str, out: &mut Vec<Binding>) {
    let mut cursor = clause.walk();
    for child in clause.children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(Binding::Default {
                local: node_text(child, code).to_string(),
            }),
            "namespace_import" => {
                let mut inner = child.walk();
                let local = child
                    .children(&mut inner)
                    .find(|n| n.kind() == "identifier")
                    .map(|n| node_text(n, code).to_string());
                if let Some(local) = local {
                    out.push(Binding::Namespace { local });
                }
            }
            "named_imports" => {
                let mut inner = child.walk();
                for spec in child.children(&mut inner) {
                    if spec.kind() != "import_specifier" || syntax::has_child_kind(spec, "type") {
                        continue;
                    }
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let imported = specifier_name(name, code);
                    let local = spec
                        .child_by_field_name("alias")
                        .map(|alias| node_text(alias, code).to_string())
                        .unwrap_or_else(|| imported.clone());
                    out.push(Binding::Named { imported, local });
                }
            }
            _ => {}
        }
    }
}

fn specifier_name(node: Node, code: &str) -> String {
    if node.kind() == "string" {
        string_literal_value(node, code).to_string()
    } else {
        node_text(node, code).to_string()
    }
}

fn analyze_export(
    node: Node,
    code: &str,
    path: &str,
    files: &FileIndex<'_>,
    default_id: &str,
    plan: &mut ModulePlan,
) -> Result<(), BundleError> {
    let range = node.start_byte()..node.end_byte();
    let is_default = syntax::has_child_kind(node, "default");

    if let Some(source) = node.child_by_field_name("source") {
        let specifier = string_literal_value(source, code);
        let target = resolve_target(specifier, path, files)?;
        push_dependency(plan, &target);
        let mut bindings = Vec::new();
        let mut form = None;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "*" if form.is_none() => form = Some("*"),
                "export_clause" => {
                    form = Some("clause");
                    for (name, alias) in export_clause_pairs(child, code) {
                        plan.exports.push(alias.clone());
                        if alias == "default" {
                            plan.has_default = true;
                            bindings.push(Binding::Named {
                                imported: name,
                                local: default_id.to_string(),
                            });
                        } else {
                            bindings.push(Binding::Named {
                                imported: name,
                                local: alias,
                            });
                        }
                    }
                }
                "namespace_export" => {
                    form = Some("namespace");
                    let mut inner = child.walk();
                    let local = child
                        .children(&mut inner)
                        .find(|n| matches!(n.kind(), "identifier" | "string"))
                        .map(|n| specifier_name(n, code));
                    if let Some(local) = local {
                        plan.exports.push(local.clone());
                        bindings.push(Binding::Namespace { local });
                    }
                }
                _ => {}
            }
        }
        match form {
            // Scope hoisting already puts the target's names at top level.
            Some("*") => {
                if let Target::Local(dep) = &target {
                    plan.star_sources.push(dep.clone());
                }
                plan.edits.push((range, Edit::Text(String::new())));
            }
            Some(_) => plan.edits.push((range, Edit::Bindings(target, bindings))),
            None => {
                return Err(BundleError::UnsupportedExport {
                    path: display_path(path),
                    form: node_text(node, code).trim().to_string(),
                })
            }
        }
        return Ok(());
    }

    if let Some(decl) = node.child_by_field_name("declaration") {
        let decl_text = node_text(decl, code).to_string();
        let names = declared_names(decl, code);
        if is_default {
            plan.has_default = true;
            match names.first() {
                Some(name) => {
                    plan.default_name = Some(name.clone());
                    plan.edits.push((
                        range,
                        Edit::Text(format!("{decl_text}\nconst {default_id} = {name};")),
                    ));
                }
                None => plan.edits.push((
                    range,
                    Edit::Text(format!("const {default_id} = {decl_text};")),
                )),
            }
        } else {
            plan.exports.extend(names);
            plan.edits.push((range, Edit::Text(decl_text)));
        }
        return Ok(());
    }

    if is_default {
        if let Some(value) = node.child_by_field_name("value") {
            plan.has_default = true;
            if value.kind() == "identifier" {
                plan.default_name = Some(node_text(value, code).to_string());
            }
            let expr = &code[value.start_byte()..node.end_byte()];
            let expr = expr.trim_end();
            let terminator = if expr.ends_with(';') { "" } else { ";" };
            plan.edits.push((
                range,
                Edit::Text(format!("const {default_id} = {expr}{terminator}")),
            ));
            return Ok(());
        }
    }

    // `export { a, b as c }`: names already exist at top level, only
    // renames need a binding.
    let mut lines = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "export_clause" {
            continue;
        }
        for (name, alias) in export_clause_pairs(child, code) {
            if alias == "default" {
                plan.has_default = true;
                plan.default_name = Some(name.clone());
                lines.push(format!("const {default_id} = {name};"));
            } else {
                if alias != name {
                    lines.push(format!("const {alias} = {name};"));
                }
                plan.exports.push(alias);
            }
        }
    }
    plan.edits.push((range, Edit::Text(lines.join("\n"))));
    Ok(())
}

fn export_clause_pairs(clause: Node, code: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut cursor = clause.walk();
    for spec in clause.children(&mut cursor) {
        if spec.kind() != "export_specifier" || syntax::has_child_kind(spec, "type") {
            continue;
        }
        let Some(name) = spec.child_by_field_name("name") else {
            continue;
        };
        let name = specifier_name(name, code);
        let alias = spec
            .child_by_field_name("alias")
            .map(|alias| specifier_name(alias, code))
            .unwrap_or_else(|| name.clone());
        pairs.push((name, alias));
    }
    pairs
}

// ----------------------------------------------------------------------------
// Emission
// ----------------------------------------------------------------------------

fn emit(plan: &ModulePlan, code: &str, path: &str, bundle: &Bundle) -> String {
    let mut out = String::with_capacity(code.len() + 64);
    let mut cursor = 0usize;
    for (range, edit) in &plan.edits {
        out.push_str(&code[cursor..range.start]);
        match edit {
            Edit::Text(text) => out.push_str(text),
            Edit::Bindings(target, bindings) => {
                out.push_str(&binding_lines(target, bindings, bundle).join("\n"))
            }
        }
        cursor = range.end;
    }
    out.push_str(&code[cursor..]);

    let mut chunk = if plan.has_exports {
        out
    } else {
        format!("{{\n{out}\n}}")
    };
    if !plan.has_default {
        chunk.push_str(&format!("\nconst {} = undefined;", default_export_id(path)));
    }
    chunk
}

fn binding_lines(target: &Target, bindings: &[Binding], bundle: &Bundle) -> Vec<String> {
    match target {
        Target::Local(dep) => {
            let Some(summary) = bundle.summary(dep) else {
                return Vec::new();
            };
            bindings
                .iter()
                .filter_map(|binding| local_binding(binding, summary))
                .collect()
        }
        Target::Package(package) => bindings
            .iter()
            .filter_map(|binding| package_binding(binding, package))
            .collect(),
    }
}

fn local_binding(binding: &Binding, dep: &ModuleSummary) -> Option<String> {
    match binding {
        Binding::Default { local } => {
            if dep.default_name.as_deref() == Some(local.as_str()) {
                None
            } else {
                Some(format!("const {local} = {};", dep.default_id))
            }
        }
        Binding::Named { imported, local } if imported == "default" => {
            if dep.default_name.as_deref() == Some(local.as_str()) {
                None
            } else {
                Some(format!("const {local} = {};", dep.default_id))
            }
        }
        Binding::Named { imported, local } => {
            (imported != local).then(|| format!("const {local} = {imported};"))
        }
        Binding::Namespace { local } => {
            let mut members: Vec<String> = dep
                .exports
                .iter()
                .filter(|name| name.as_str() != "default")
                .map(|name| format!("get {name}() {{ return {name}; }}"))
                .collect();
            members.push(format!("get default() {{ return {}; }}", dep.default_id));
            Some(format!(
                "const {local} = Object.freeze({{ {} }});",
                members.join(", ")
            ))
        }
    }
}

fn package_binding(binding: &Binding, package: &str) -> Option<String> {
    let ambient_default = PACKAGE_DEFAULTS
        .iter()
        .find(|(name, _)| *name == package)
        .map(|(_, ambient)| *ambient);
    match binding {
        Binding::Default { local } | Binding::Namespace { local } => ambient_default
            .filter(|ambient| ambient != local)
            .map(|ambient| format!("const {local} = {ambient};")),
        Binding::Named { imported, local } => {
            (imported != local && imported != "default")
                .then(|| format!("const {local} = {imported};"))
        }
    }
}
