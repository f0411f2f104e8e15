//! Call-site and declaration checks for a single file.
use crate::graph::{outgoing_references, Target};
use crate::parser::{self, ParameterDeclaration, PassedParameter};
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingRequiredParameter { parameter: String, template: PathBuf },
    UnknownParameter { parameter: String, template: PathBuf },
    InvalidParameterValue { parameter: String, value: String, allowed: Vec<String> },
    UnusedParameter { parameter: String },
    UnknownAlias { alias: String },
    MissingTemplate { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// 0-based line in the checked file.
    pub line: usize,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    fn new(line: usize, severity: Severity, kind: DiagnosticKind) -> Self {
        let message = describe(&kind);
        Self { line, severity, kind, message }
    }
}

fn describe(kind: &DiagnosticKind) -> String {
    match kind {
        DiagnosticKind::MissingRequiredParameter { parameter, template } => {
            format!("missing required parameter '{parameter}' for {}", file_name(template))
        }
        DiagnosticKind::UnknownParameter { parameter, template } => {
            format!("'{parameter}' is not declared by {}", file_name(template))
        }
        DiagnosticKind::InvalidParameterValue { parameter, value, allowed } => {
            format!("'{value}' is not an allowed value for '{parameter}' (allowed: {})", allowed.join(", "))
        }
        DiagnosticKind::UnusedParameter { parameter } => format!("parameter '{parameter}' is never used"),
        DiagnosticKind::UnknownAlias { alias } => format!("unknown repository alias '{alias}'"),
        DiagnosticKind::MissingTemplate { path } => format!("template not found: {}", path.display()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}

/// Compare what a call site passes against what the target declares.
#[must_use]
pub fn check_call_site(
    declared: &[ParameterDeclaration],
    passed: &BTreeMap<String, PassedParameter>,
    call_line: usize,
    template: &Path,
) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for p in declared.iter().filter(|p| p.required) {
        if !passed.contains_key(&p.name) {
            out.push(Diagnostic::new(
                call_line,
                Severity::Error,
                DiagnosticKind::MissingRequiredParameter {
                    parameter: p.name.clone(),
                    template: template.to_path_buf(),
                },
            ));
        }
    }
    // A template that declares nothing accepts anything
    if declared.is_empty() {
        return out;
    }
    for arg in passed.values() {
        let Some(decl) = declared.iter().find(|d| d.name == arg.name) else {
            out.push(Diagnostic::new(
                arg.line,
                Severity::Error,
                DiagnosticKind::UnknownParameter { parameter: arg.name.clone(), template: template.to_path_buf() },
            ));
            continue;
        };
        let literal = !arg.value.is_empty() && !parser::is_runtime_expression(&arg.value);
        if literal && !decl.allowed_values.is_empty() && !decl.allowed_values.contains(&arg.value) {
            out.push(Diagnostic::new(
                arg.line,
                Severity::Error,
                DiagnosticKind::InvalidParameterValue {
                    parameter: arg.name.clone(),
                    value: arg.value.clone(),
                    allowed: decl.allowed_values.clone(),
                },
            ));
        }
    }
    out
}

/// All diagnostics for `file`, ordered by line then severity.
#[must_use]
pub fn check_file(ws: &Workspace, file: &Path) -> Vec<Diagnostic> {
    let Some(text) = ws.cache().read(file) else {
        return Vec::new();
    };
    let normalized = parser::normalize_line_endings(&text);
    let lines: Vec<&str> = normalized.split('\n').collect();
    let mut out = Vec::new();

    for o in outgoing_references(ws.cache(), ws.resolver(), file).unwrap_or_default() {
        let line = o.reference.source_line;
        match &o.target {
            Target::UnknownAlias { alias } => {
                out.push(Diagnostic::new(line, Severity::Error, DiagnosticKind::UnknownAlias { alias: alias.clone() }));
            }
            Target::Missing { path, .. } => {
                out.push(Diagnostic::new(line, Severity::Error, DiagnosticKind::MissingTemplate { path: path.clone() }));
            }
            Target::File { path, .. } => {
                let declared = ws.parameters(path);
                let passed = parser::extract_passed_parameters(&lines, line);
                out.extend(check_call_site(&declared, &passed, line, path));
            }
        }
    }

    let used = parser::extract_parameter_usages(&text);
    for p in parser::extract_parameters(&text) {
        if !used.contains(&p.name) {
            out.push(Diagnostic::new(
                p.declaration_line,
                Severity::Warning,
                DiagnosticKind::UnusedParameter { parameter: p.name },
            ));
        }
    }

    out.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.severity.cmp(&b.severity)));
    out
}
