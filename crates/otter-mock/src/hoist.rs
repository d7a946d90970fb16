//! Hoist & rewrite pass
//!
//! A pure source-to-source transform over the oxc AST:
//!
//! 1. top-level `mocker.declareMock(...)`, `mocker.undeclareMock(...)` and
//!    `mocker.hoisted(...)` statements move above every import of the module,
//!    keeping their relative order; framework imports stay above them,
//! 2. once anything moved, the remaining static value imports and
//!    re-exports become awaited registry requests in place, so they run
//!    after the declarations,
//! 3. every `import(...)` expression is routed through
//!    `mocker.dynamicImport(...)`, except for framework-internal specifiers.
//!
//! Edits are applied as byte-span replacements on the original text; the
//! rest of the source is left untouched.

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::MockConfig;
use crate::error::{MockError, MockResult};
use crate::resolver::ModuleId;

const DECLARE: &str = "declareMock";
const UNDECLARE: &str = "undeclareMock";
const HOISTED: &str = "hoisted";
const DYNAMIC_IMPORT: &str = "dynamicImport";
const EXPORT_ALL: &str = "exportAll";
const REEXPORT_PREFIX: &str = "__mock_reexport";

/// Options of the rewrite pass
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Identifier of the declarative surface object
    pub api_namespace: String,
    /// Specifiers that are never routed through the registry
    pub internal_specifiers: Vec<String>,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self::from_config(&MockConfig::default())
    }
}

impl RewriteOptions {
    pub fn from_config(config: &MockConfig) -> Self {
        Self {
            api_namespace: config.api_namespace.clone(),
            internal_specifiers: config.internal_specifiers.clone(),
        }
    }

    fn is_internal(&self, specifier: &str) -> bool {
        self.internal_specifiers.iter().any(|s| s == specifier)
    }
}

/// Result of [`rewrite`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutput {
    pub code: String,
    /// Number of relocated statements
    pub hoisted: usize,
    /// Non-fatal problems (parse failures)
    pub diagnostics: Vec<String>,
    pub changed: bool,
}

impl RewriteOutput {
    fn unchanged(source: &str, diagnostics: Vec<String>) -> Self {
        Self {
            code: source.to_string(),
            hoisted: 0,
            diagnostics,
            changed: false,
        }
    }
}

/// Literal specifiers the rewrite of `source` will need resolved ids for.
///
/// A source that fails to parse needs nothing; [`rewrite`] reports it.
pub fn collect_requests(source: &str, id: &str, opts: &RewriteOptions) -> MockResult<Vec<String>> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type_for(id)).parse();
    if !parsed.errors.is_empty() {
        return Ok(Vec::new());
    }

    let analysis = analyze(&parsed.program, source, id, opts)?;
    Ok(analysis.requests())
}

/// Rewrite `source` of module `id`.
///
/// `resolved` maps each specifier from [`collect_requests`] to its module
/// id. A parse failure returns the source unchanged with a diagnostic; a
/// declaration that cannot be hoisted is an error.
pub fn rewrite(
    source: &str,
    id: &str,
    resolved: &HashMap<String, ModuleId>,
    opts: &RewriteOptions,
) -> MockResult<RewriteOutput> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, source_type_for(id)).parse();
    if !parsed.errors.is_empty() {
        let diagnostics: Vec<String> = parsed.errors.iter().map(|e| e.to_string()).collect();
        tracing::warn!(
            "Failed to parse {} for mock hoisting, leaving it unchanged: {}",
            id,
            diagnostics.join("; ")
        );
        return Ok(RewriteOutput::unchanged(source, diagnostics));
    }

    let analysis = analyze(&parsed.program, source, id, opts)?;
    let code = analysis.render(source, id, resolved, opts);
    let changed = code != source;
    if !analysis.hoisted.is_empty() {
        tracing::debug!("Hoisted {} mock statements in {}", analysis.hoisted.len(), id);
    }

    Ok(RewriteOutput {
        code,
        hoisted: analysis.hoisted.len(),
        diagnostics: Vec::new(),
        changed,
    })
}

fn source_type_for(id: &str) -> SourceType {
    SourceType::from_path(Path::new(id)).unwrap_or_else(|_| SourceType::default().with_module(true))
}

/// Byte-span replacement
#[derive(Debug, Clone)]
struct Edit {
    start: u32,
    end: u32,
    text: String,
}

impl Edit {
    fn replace(span: Span, text: impl Into<String>) -> Self {
        Self {
            start: span.start,
            end: span.end,
            text: text.into(),
        }
    }

    fn remove(span: Span) -> Self {
        Self::replace(span, "")
    }
}

/// A statement moved to the top of the module
#[derive(Debug)]
struct HoistedStatement {
    span: Span,
    /// `import('./x')` used as the target, rewritten to its literal
    target_edit: Option<Edit>,
}

#[derive(Debug)]
enum ImportBinding {
    Named { imported: String, local: String },
    Default(String),
    Namespace(String),
}

/// What a static module edge brings into scope
#[derive(Debug)]
enum EdgeForm {
    Import(Vec<ImportBinding>),
    /// `export { imported as exported } from`
    ReExport(Vec<(String, String)>),
    /// `export * as name from`
    ReExportNamespace(String),
    /// `export * from`
    ReExportAll,
}

#[derive(Debug)]
struct StaticImport {
    span: Span,
    specifier: String,
    form: EdgeForm,
}

#[derive(Debug)]
enum DynamicTarget {
    Literal(String),
    Computed(Span),
}

#[derive(Debug)]
struct DynamicImport {
    span: Span,
    target: DynamicTarget,
}

#[derive(Debug, Default)]
struct Analysis {
    /// Offset after the hashbang and directive prologue
    insert_at: u32,
    framework_imports: Vec<Span>,
    hoisted: Vec<HoistedStatement>,
    static_imports: Vec<StaticImport>,
    dynamic_imports: Vec<DynamicImport>,
}

impl Analysis {
    fn requests(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut requests = Vec::new();

        let statics = self
            .static_imports
            .iter()
            .filter(|_| !self.hoisted.is_empty())
            .map(|import| import.specifier.as_str());
        let dynamics = self.dynamic_imports.iter().filter_map(|import| match &import.target {
            DynamicTarget::Literal(specifier) => Some(specifier.as_str()),
            DynamicTarget::Computed(_) => None,
        });

        for specifier in statics.chain(dynamics) {
            if seen.insert(specifier) {
                requests.push(specifier.to_string());
            }
        }
        requests
    }

    fn render(
        &self,
        source: &str,
        id: &str,
        resolved: &HashMap<String, ModuleId>,
        opts: &RewriteOptions,
    ) -> String {
        let api = &opts.api_namespace;
        let importer = quote(id);
        let resolved_id = |specifier: &str| {
            resolved
                .get(specifier)
                .map(|id| id.as_str().to_string())
                .unwrap_or_else(|| specifier.to_string())
        };

        let mut replacements = Vec::new();
        for hoisted in &self.hoisted {
            replacements.extend(hoisted.target_edit.clone());
        }
        for import in &self.dynamic_imports {
            let text = match &import.target {
                DynamicTarget::Literal(specifier) => format!(
                    "{api}.{DYNAMIC_IMPORT}({}, {importer}, {})",
                    quote(&resolved_id(specifier)),
                    quote(specifier)
                ),
                DynamicTarget::Computed(expr) => format!(
                    "{api}.{DYNAMIC_IMPORT}({}, {importer})",
                    slice(source, expr.start, expr.end)
                ),
            };
            replacements.push(Edit::replace(import.span, text));
        }

        let mut body_edits = replacements.clone();
        if !self.hoisted.is_empty() {
            for span in &self.framework_imports {
                body_edits.push(Edit::remove(*span));
            }
            for hoisted in &self.hoisted {
                body_edits.push(Edit::remove(hoisted.span));
            }
            for (index, import) in self.static_imports.iter().enumerate() {
                let request = format!(
                    "await {api}.{DYNAMIC_IMPORT}({}, {importer}, {})",
                    quote(&resolved_id(&import.specifier)),
                    quote(&import.specifier)
                );
                let text = edge_statement(&import.form, &request, index, api);
                body_edits.push(Edit::replace(import.span, text));
            }
        }

        sort_edits(&mut replacements);
        sort_edits(&mut body_edits);

        let mut out = String::with_capacity(source.len() + 128);
        out.push_str(slice(source, 0, self.insert_at));

        if !self.hoisted.is_empty() {
            if self.insert_at > 0 {
                out.push('\n');
            }
            for span in &self.framework_imports {
                out.push_str(slice(source, span.start, span.end));
                out.push('\n');
            }
            for hoisted in &self.hoisted {
                out.push_str(&render_range(source, hoisted.span.start, hoisted.span.end, &replacements));
                out.push('\n');
            }
        }

        out.push_str(&render_range(source, self.insert_at, source.len() as u32, &body_edits));
        out
    }
}

/// `const { a, default: b } = <request>;` for the given import bindings.
fn import_statement(bindings: &[ImportBinding], request: &str) -> String {
    let namespace = bindings.iter().find_map(|b| match b {
        ImportBinding::Namespace(local) => Some(local.as_str()),
        _ => None,
    });
    let mut properties = Vec::new();
    for binding in bindings {
        match binding {
            ImportBinding::Named { imported, local } if imported == local => {
                properties.push(local.clone())
            }
            ImportBinding::Named { imported, local } => {
                properties.push(format!("{}: {}", property_key(imported), local))
            }
            ImportBinding::Default(local) => properties.push(format!("default: {local}")),
            ImportBinding::Namespace(_) => {}
        }
    }

    match (namespace, properties.is_empty()) {
        (None, true) if bindings.is_empty() => format!("{request};"),
        (None, _) => format!("const {{ {} }} = {request};", properties.join(", ")),
        (Some(ns), true) => format!("const {ns} = {request};"),
        (Some(ns), false) => format!(
            "const {ns} = {request}; const {{ {} }} = {ns};",
            properties.join(", ")
        ),
    }
}

/// Replacement for a static edge. Re-exports bind locals and export them
/// again; `export *` names are only known at run time, so they go through
/// `exportAll`.
fn edge_statement(form: &EdgeForm, request: &str, index: usize, api: &str) -> String {
    match form {
        EdgeForm::Import(bindings) => import_statement(bindings, request),
        EdgeForm::ReExport(names) if names.is_empty() => format!("{request};"),
        EdgeForm::ReExport(names) => {
            let mut properties = Vec::with_capacity(names.len());
            let mut exports = Vec::with_capacity(names.len());
            for (n, (imported, exported)) in names.iter().enumerate() {
                let local = format!("{REEXPORT_PREFIX}_{index}_{n}");
                properties.push(format!("{}: {local}", property_key(imported)));
                exports.push(format!("{local} as {}", property_key(exported)));
            }
            format!(
                "const {{ {} }} = {request}; export {{ {} }};",
                properties.join(", "),
                exports.join(", ")
            )
        }
        EdgeForm::ReExportNamespace(name) => {
            let local = format!("{REEXPORT_PREFIX}_{index}");
            format!("const {local} = {request}; export {{ {local} as {} }};", property_key(name))
        }
        EdgeForm::ReExportAll => format!("{api}.{EXPORT_ALL}({request});"),
    }
}

fn property_key(name: &str) -> String {
    let mut chars = name.chars();
    let is_identifier = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if is_identifier {
        name.to_string()
    } else {
        quote(name)
    }
}

fn sort_edits(edits: &mut [Edit]) {
    // outer edits first when they share a start
    edits.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
}

/// Render `source[start..end]` with the edits that fall inside it. Edits
/// nested in an already applied edit are dropped.
fn render_range(source: &str, start: u32, end: u32, edits: &[Edit]) -> String {
    let mut out = String::new();
    let mut cursor = start;
    for edit in edits {
        if edit.start < cursor || edit.end > end {
            continue;
        }
        out.push_str(slice(source, cursor, edit.start));
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(slice(source, cursor, end));
    out
}

fn slice(source: &str, start: u32, end: u32) -> &str {
    source.get(start as usize..end as usize).unwrap_or_default()
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

/// 1-based line and column of a byte offset
fn line_col(source: &str, offset: u32) -> (usize, usize) {
    let before = slice(source, 0, offset);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

fn hoist_error(source: &str, file: &str, offset: u32, message: impl Into<String>) -> MockError {
    let (line, column) = line_col(source, offset);
    MockError::Hoist {
        file: file.to_string(),
        line,
        column,
        message: message.into(),
    }
}

/// `<api>.<method>(...)`, optionally awaited
fn api_call<'b, 'a>(expr: &'b Expression<'a>, api: &str) -> Option<(&'b str, &'b CallExpression<'a>)> {
    let expr = match expr {
        Expression::AwaitExpression(awaited) => &awaited.argument,
        other => other,
    };
    let Expression::CallExpression(call) = expr else {
        return None;
    };
    let Expression::StaticMemberExpression(member) = &call.callee else {
        return None;
    };
    let Expression::Identifier(object) = &member.object else {
        return None;
    };
    if object.name.as_str() != api {
        return None;
    }
    Some((member.property.name.as_str(), &**call))
}

/// A specifier known without running code: `'x'` or `` `x` ``.
fn literal_of(expr: &Expression) -> Option<String> {
    match expr {
        Expression::StringLiteral(lit) => Some(lit.value.to_string()),
        Expression::TemplateLiteral(tpl) if tpl.expressions.is_empty() => {
            let quasi = tpl.quasis.first()?;
            Some(
                quasi
                    .value
                    .cooked
                    .as_ref()
                    .unwrap_or(&quasi.value.raw)
                    .to_string(),
            )
        }
        _ => None,
    }
}

fn is_hoisted_declaration(decl: &VariableDeclaration, api: &str) -> bool {
    !decl.declarations.is_empty()
        && decl.declarations.iter().all(|d| {
            d.init
                .as_ref()
                .and_then(|init| api_call(init, api))
                .is_some_and(|(method, _)| method == HOISTED)
        })
}

fn binding_names(decl: &VariableDeclaration, out: &mut HashSet<String>) {
    for declarator in &decl.declarations {
        for ident in declarator.id.get_binding_identifiers() {
            out.insert(ident.name.to_string());
        }
    }
}

/// Bindings a factory argument must not name: they are initialized after
/// the hoisted block runs.
fn late_bindings(program: &Program, api: &str) -> (HashSet<String>, HashSet<String>) {
    let mut late = HashSet::new();
    let mut hoisted = HashSet::new();

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(import) => {
                for specifier in import.specifiers.iter().flatten() {
                    let local = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
                    };
                    late.insert(local.name.to_string());
                }
            }
            Statement::VariableDeclaration(decl) if is_hoisted_declaration(decl, api) => {
                binding_names(decl, &mut hoisted);
            }
            Statement::VariableDeclaration(decl) => binding_names(decl, &mut late),
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    late.insert(id.name.to_string());
                }
            }
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::VariableDeclaration(decl)) => binding_names(decl, &mut late),
                Some(Declaration::ClassDeclaration(class)) => {
                    if let Some(id) = &class.id {
                        late.insert(id.name.to_string());
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    (late, hoisted)
}

/// Collects `import(...)` expressions anywhere in the program.
#[derive(Default)]
struct ImportExpressionCollector {
    found: Vec<DynamicImport>,
}

impl<'a> Visit<'a> for ImportExpressionCollector {
    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        let target = match literal_of(&it.source) {
            Some(specifier) => DynamicTarget::Literal(specifier),
            None => DynamicTarget::Computed(it.source.span()),
        };
        self.found.push(DynamicImport {
            span: it.span,
            target,
        });
    }
}

fn analyze(program: &Program, source: &str, file: &str, opts: &RewriteOptions) -> MockResult<Analysis> {
    let api = opts.api_namespace.as_str();
    let mut analysis = Analysis::default();

    if let Some(hashbang) = &program.hashbang {
        analysis.insert_at = hashbang.span.end;
    }
    if let Some(last) = program.directives.last() {
        analysis.insert_at = analysis.insert_at.max(last.span.end);
    }

    let (late, hoisted_names) = late_bindings(program, api);
    let mut target_spans: HashSet<(u32, u32)> = HashSet::new();

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(import) => {
                let specifier = import.source.value.to_string();
                if opts.is_internal(&specifier) {
                    analysis.framework_imports.push(import.span);
                    continue;
                }
                if import.import_kind.is_type() {
                    continue;
                }
                let Some(bindings) = value_bindings(import) else {
                    continue;
                };
                analysis.static_imports.push(StaticImport {
                    span: import.span,
                    specifier,
                    form: EdgeForm::Import(bindings),
                });
            }
            Statement::ExportAllDeclaration(export) => {
                let specifier = export.source.value.to_string();
                if export.export_kind.is_type() || opts.is_internal(&specifier) {
                    continue;
                }
                let form = match &export.exported {
                    Some(name) => EdgeForm::ReExportNamespace(name.name().to_string()),
                    None => EdgeForm::ReExportAll,
                };
                analysis.static_imports.push(StaticImport {
                    span: export.span,
                    specifier,
                    form,
                });
            }
            Statement::ExpressionStatement(expr_stmt) => {
                let Some((method, call)) = api_call(&expr_stmt.expression, api) else {
                    continue;
                };
                let target_edit = match method {
                    DECLARE | UNDECLARE => {
                        check_factory_argument(call, source, file, &late, &hoisted_names)?;
                        declaration_target(call, method, source, file)?
                    }
                    HOISTED => None,
                    _ => continue,
                };
                if let Some(edit) = &target_edit {
                    target_spans.insert((edit.start, edit.end));
                }
                analysis.hoisted.push(HoistedStatement {
                    span: expr_stmt.span,
                    target_edit,
                });
            }
            Statement::VariableDeclaration(decl) if is_hoisted_declaration(decl, api) => {
                analysis.hoisted.push(HoistedStatement {
                    span: decl.span,
                    target_edit: None,
                });
            }
            Statement::ExportNamedDeclaration(export) => {
                if let Some(Declaration::VariableDeclaration(decl)) = &export.declaration {
                    if decl.declarations.iter().any(|d| {
                        d.init
                            .as_ref()
                            .and_then(|init| api_call(init, api))
                            .is_some_and(|(method, _)| method == HOISTED)
                    }) {
                        return Err(hoist_error(
                            source,
                            file,
                            export.span.start,
                            format!("Cannot export hoisted variable; `{api}.{HOISTED}` results are module-local"),
                        ));
                    }
                }
                if let Some(source_lit) = &export.source {
                    let specifier = source_lit.value.to_string();
                    if export.export_kind.is_type() || opts.is_internal(&specifier) {
                        continue;
                    }
                    let names: Vec<(String, String)> = export
                        .specifiers
                        .iter()
                        .filter(|s| !s.export_kind.is_type())
                        .map(|s| (s.local.name().to_string(), s.exported.name().to_string()))
                        .collect();
                    if names.is_empty() && !export.specifiers.is_empty() {
                        continue;
                    }
                    analysis.static_imports.push(StaticImport {
                        span: export.span,
                        specifier,
                        form: EdgeForm::ReExport(names),
                    });
                } else {
                    for specifier in &export.specifiers {
                        let local = specifier.local.name();
                        if hoisted_names.contains(local.as_str()) {
                            return Err(hoist_error(
                                source,
                                file,
                                specifier.span.start,
                                format!("Cannot export hoisted variable `{local}`"),
                            ));
                        }
                    }
                }
            }
            Statement::ExportDefaultDeclaration(export) => {
                if let ExportDefaultDeclarationKind::Identifier(ident) = &export.declaration {
                    if hoisted_names.contains(ident.name.as_str()) {
                        return Err(hoist_error(
                            source,
                            file,
                            ident.span.start,
                            format!("Cannot export hoisted variable `{}`", ident.name),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    let mut collector = ImportExpressionCollector::default();
    collector.visit_program(program);
    analysis.dynamic_imports = collector
        .found
        .into_iter()
        .filter(|import| !target_spans.contains(&(import.span.start, import.span.end)))
        .filter(|import| match &import.target {
            DynamicTarget::Literal(specifier) => !opts.is_internal(specifier),
            DynamicTarget::Computed(_) => true,
        })
        .collect();

    Ok(analysis)
}

/// Value bindings of an import; `None` when only types are imported.
fn value_bindings(import: &ImportDeclaration) -> Option<Vec<ImportBinding>> {
    let Some(specifiers) = &import.specifiers else {
        // side-effect import
        return Some(Vec::new());
    };

    let mut bindings = Vec::new();
    for specifier in specifiers {
        match specifier {
            ImportDeclarationSpecifier::ImportSpecifier(s) => {
                if s.import_kind.is_type() {
                    continue;
                }
                bindings.push(ImportBinding::Named {
                    imported: s.imported.name().to_string(),
                    local: s.local.name.to_string(),
                });
            }
            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                bindings.push(ImportBinding::Default(s.local.name.to_string()));
            }
            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                bindings.push(ImportBinding::Namespace(s.local.name.to_string()));
            }
        }
    }

    if bindings.is_empty() && !specifiers.is_empty() {
        return None;
    }
    Some(bindings)
}

/// Validate the first argument; an `import('./x')` target is rewritten to
/// its literal.
fn declaration_target(
    call: &CallExpression,
    method: &str,
    source: &str,
    file: &str,
) -> MockResult<Option<Edit>> {
    let Some(first) = call.arguments.first() else {
        return Err(hoist_error(
            source,
            file,
            call.span.start,
            format!("`{method}` requires a module specifier"),
        ));
    };

    match first {
        Argument::StringLiteral(_) => Ok(None),
        Argument::TemplateLiteral(tpl) if tpl.expressions.is_empty() => Ok(None),
        Argument::ImportExpression(import) => match literal_of(&import.source) {
            Some(specifier) => Ok(Some(Edit::replace(import.span, quote(&specifier)))),
            None => Err(hoist_error(
                source,
                file,
                import.span.start,
                format!("`{method}` target `import(...)` must use a string literal"),
            )),
        },
        other => Err(hoist_error(
            source,
            file,
            other.span().start,
            format!(
                "`{method}` target must be a string literal or `import('...')`, found `{}`",
                slice(source, other.span().start, other.span().end)
            ),
        )),
    }
}

/// A factory passed by name must be a hoisted binding or a function
/// declaration, never something initialized below the hoisted block.
fn check_factory_argument(
    call: &CallExpression,
    source: &str,
    file: &str,
    late: &HashSet<String>,
    hoisted: &HashSet<String>,
) -> MockResult<()> {
    let Some(Argument::Identifier(ident)) = call.arguments.get(1) else {
        return Ok(());
    };
    let name = ident.name.as_str();
    if late.contains(name) && !hoisted.contains(name) {
        return Err(hoist_error(
            source,
            file,
            ident.span.start,
            format!(
                "Mock factory `{name}` is initialized after the hoisted declaration; \
                 define it inline or with `hoisted(...)`"
            ),
        ));
    }
    Ok(())
}
