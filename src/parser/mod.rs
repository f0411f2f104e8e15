//! Line-oriented structural scanner for pipeline YAML.
//!
//! The scanner understands the narrow subset of YAML that pipeline templates
//! actually use: the top-level `parameters:` block, the
//! `resources.repositories` block, `template:` call sites and the
//! `parameters:` sub-block of a call site. It does not attempt full YAML
//! semantics; any input it does not understand yields empty results.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Alias name -> repository short name (last `/` segment of the declared name).
pub type AliasTable = BTreeMap<String, String>;

/// Top-level keys that only a pipeline entry file carries.
pub const PIPELINE_ROOT_KEYS: &[&str] = &["trigger", "pr", "schedules", "stages", "jobs", "extends"];

/// The alias that always refers to the current repository.
pub const SELF_ALIAS: &str = "self";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub default_value: Option<String>,
    /// Always `default_value.is_none()`.
    pub required: bool,
    /// 0-based line of the declaration in the normalized text.
    pub declaration_line: usize,
    pub display_name: Option<String>,
    pub allowed_values: Vec<String>,
}

impl ParameterDeclaration {
    #[must_use]
    pub fn new(name: &str, param_type: &str, default_value: Option<String>, line: usize) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: default_value.is_none(),
            default_value,
            declaration_line: line,
            display_name: None,
            allowed_values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassedParameter {
    pub name: String,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateReference {
    pub raw_ref: String,
    pub source_line: usize,
}

impl TemplateReference {
    /// References containing runtime/compile-time expression syntax cannot be resolved statically.
    #[must_use]
    pub fn is_runtime_expression(&self) -> bool {
        is_runtime_expression(&self.raw_ref)
    }
}

#[derive(Debug)]
pub struct RegexPatterns {
    pub template_key: Regex,
    pub param_dot_usage: Regex,
    pub param_index_usage: Regex,
}

impl RegexPatterns {
    pub fn compile() -> Self {
        // Anchored and linear; no nested quantifiers
        let template_key = Regex::new(r"^\s*(?:-\s+)?template\s*:\s*(?P<value>.*)$").unwrap();
        let param_dot_usage = Regex::new(r"\bparameters\.(?P<name>[A-Za-z_][A-Za-z0-9_\-]*)").unwrap();
        let param_index_usage =
            Regex::new(r#"\bparameters\[\s*['"](?P<name>[^'"\]]+)['"]\s*\]"#).unwrap();
        Self { template_key, param_dot_usage, param_index_usage }
    }
}

impl Default for RegexPatterns {
    fn default() -> Self {
        Self::compile()
    }
}

fn patterns() -> &'static RegexPatterns {
    static PATTERNS: OnceLock<RegexPatterns> = OnceLock::new();
    PATTERNS.get_or_init(RegexPatterns::compile)
}

/// Convert CRLF and lone CR line endings to LF.
///
/// Every extraction normalizes first so that indentation and line numbers are
/// computed on the same text regardless of the file's line endings.
#[must_use]
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Remove a trailing (or whole-line) `#` comment, honouring quoted strings.
#[must_use]
pub fn strip_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev_ws = true;
    for (idx, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double && prev_ws => return line[..idx].trim_end(),
            _ => {}
        }
        prev_ws = c.is_whitespace();
    }
    line.trim_end()
}

/// True if the reference contains expression syntax that is only expanded at queue/run time.
#[must_use]
pub fn is_runtime_expression(raw: &str) -> bool {
    raw.contains("${{") || raw.contains("$(") || raw.contains("$[")
}

/// True if any top-level key is one of [`PIPELINE_ROOT_KEYS`].
#[must_use]
pub fn is_pipeline_root(text: &str) -> bool {
    let text = normalize_line_endings(text);
    text.split('\n').any(|line| {
        if indent_of(line) != 0 {
            return false;
        }
        split_key_value(strip_comment(line))
            .is_some_and(|(key, _)| PIPELINE_ROOT_KEYS.contains(&key.as_str()))
    })
}

/// Extract the parameter declarations of the top-level `parameters:` block.
///
/// Supports the list form (`- name:` entries with `type`, `default`,
/// `displayName` and `values`) and the legacy map form (`name: default`).
#[must_use]
pub fn extract_parameters(text: &str) -> Vec<ParameterDeclaration> {
    let text = normalize_line_endings(text);
    let lines: Vec<&str> = text.split('\n').collect();
    let Some(header) = find_top_level_key(&lines, "parameters") else {
        return Vec::new();
    };
    let block = block_after(&lines, header, 0);
    let mut out = Vec::new();
    for item in split_items(&block) {
        if item.dashed {
            let fields = collect_fields(&item);
            if let Some(p) = parameter_from_fields(&fields, item.line) {
                out.push(p);
            }
        } else if let Some((name, value)) = split_key_value(item.content) {
            // Legacy map form: every entry carries its default inline or as a nested block
            let nested = dedent(&item.body).join("\n");
            let (default, ty) = if value.is_empty() && !nested.is_empty() {
                (nested, "object")
            } else {
                (unquote(&value), "string")
            };
            out.push(ParameterDeclaration::new(&name, ty, Some(default), item.line));
        }
    }
    out
}

/// Extract `repository alias -> repository short name` from `resources.repositories`.
#[must_use]
pub fn extract_repository_aliases(text: &str) -> AliasTable {
    let text = normalize_line_endings(text);
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = AliasTable::new();
    let Some(resources) = find_top_level_key(&lines, "resources") else {
        return out;
    };
    let resources_block = block_after(&lines, resources, 0);
    let Some(repos) = resources_block.iter().find(|l| {
        split_key_value(l.content).is_some_and(|(k, v)| k == "repositories" && v.is_empty())
    }) else {
        return out;
    };
    let repos_block = block_after(&lines, repos.index, repos.indent);
    for item in split_items(&repos_block) {
        if !item.dashed {
            continue;
        }
        let fields = collect_fields(&item);
        let alias = field_value(&fields, "repository");
        let name = field_value(&fields, "name");
        if let (Some(alias), Some(name)) = (alias, name) {
            let short = name.rsplit('/').next().unwrap_or(&name).trim().to_string();
            if !alias.is_empty() && !short.is_empty() {
                out.insert(alias, short);
            }
        }
    }
    out
}

/// Extract the parameters already passed at the call site on `template_line`.
///
/// `lines` should come from normalized text; a trailing `\r` is tolerated.
/// Scanning stops at the next sibling call site or once indentation returns to
/// the call site's own level.
#[must_use]
pub fn extract_passed_parameters(
    lines: &[&str],
    template_line: usize,
) -> BTreeMap<String, PassedParameter> {
    let mut out = BTreeMap::new();
    let Some(header) = lines.get(template_line) else {
        return out;
    };
    let header = strip_comment(header.trim_end_matches('\r'));
    let indent = indent_of(header);
    let mut content = &header[indent..];
    let mut key_col = indent;
    if let Some(rest) = content.strip_prefix('-') {
        let trimmed = rest.trim_start();
        key_col = indent + (content.len() - trimmed.len());
        content = trimmed;
    }
    if !split_key_value(content).is_some_and(|(k, _)| k == "template") {
        return out;
    }

    let mut in_params = false;
    let mut param_col: Option<usize> = None;
    for (j, raw) in lines.iter().enumerate().skip(template_line + 1) {
        let raw = raw.trim_end_matches('\r');
        if is_ignorable(raw) {
            continue;
        }
        let line = strip_comment(raw);
        let ind = indent_of(line);
        let c = &line[ind..];
        if ind < key_col {
            break;
        }
        if ind == key_col {
            if c.starts_with('-') {
                break;
            }
            match split_key_value(c) {
                Some((k, v)) if k == "parameters" => {
                    if v.starts_with('{') {
                        for (name, value) in parse_flow_map(&v) {
                            out.entry(name.clone()).or_insert(PassedParameter { name, value, line: j });
                        }
                        in_params = false;
                    } else {
                        in_params = true;
                        param_col = None;
                    }
                }
                Some((k, _)) if k == "template" => break,
                _ => in_params = false,
            }
            continue;
        }
        if !in_params {
            continue;
        }
        let col = *param_col.get_or_insert(ind);
        if ind != col || c.starts_with('-') {
            continue;
        }
        if let Some((name, value)) = split_key_value(c) {
            let value = unquote(&value);
            out.entry(name.clone()).or_insert(PassedParameter { name, value, line: j });
        }
    }
    out
}

/// Extract every `template:` reference, skipping commented-out lines and empty values.
#[must_use]
pub fn extract_template_references(text: &str) -> Vec<TemplateReference> {
    let text = normalize_line_endings(text);
    let re = &patterns().template_key;
    let mut out = Vec::new();
    for (idx, line) in text.split('\n').enumerate() {
        let line = strip_comment(line);
        let Some(cap) = re.captures(line) else { continue };
        let value = cap.name("value").map_or("", |m| m.as_str());
        let raw_ref = unquote(value);
        if raw_ref.is_empty() {
            continue;
        }
        out.push(TemplateReference { raw_ref, source_line: idx });
    }
    out
}

/// Names referenced in the body as `parameters.x` or `parameters['x']`.
#[must_use]
pub fn extract_parameter_usages(text: &str) -> BTreeSet<String> {
    let text = normalize_line_endings(text);
    let p = patterns();
    let mut out = BTreeSet::new();
    for line in text.split('\n') {
        let line = strip_comment(line);
        for re in [&p.param_dot_usage, &p.param_index_usage] {
            for cap in re.captures_iter(line) {
                if let Some(m) = cap.name("name") {
                    out.insert(m.as_str().to_string());
                }
            }
        }
    }
    out
}

// ---- scanning helpers ----

#[derive(Debug, Clone, Copy)]
struct BlockLine<'a> {
    index: usize,
    indent: usize,
    /// Comment-stripped text after the indentation.
    content: &'a str,
    /// Comment-stripped text including the indentation.
    raw: &'a str,
}

#[derive(Debug)]
struct BlockItem<'a> {
    line: usize,
    dashed: bool,
    /// First line content, without the leading `- ` for dashed items.
    content: &'a str,
    /// Column of `content` on its line.
    content_col: usize,
    body: Vec<BlockLine<'a>>,
}

#[derive(Debug)]
struct Field {
    key: String,
    value: String,
    nested: Vec<String>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

fn is_ignorable(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

fn is_dash(content: &str) -> bool {
    content == "-" || content.starts_with("- ") || content.starts_with("-\t")
}

// A line belongs to a block opened at `key_indent` if it is deeper, or a
// sequence entry at the same column (YAML allows `key:\n- item`).
fn in_block(indent: usize, content: &str, key_indent: usize) -> bool {
    indent > key_indent || (indent == key_indent && is_dash(content))
}

fn find_top_level_key(lines: &[&str], key: &str) -> Option<usize> {
    lines.iter().position(|line| {
        indent_of(line) == 0 && split_key_value(strip_comment(line)).is_some_and(|(k, _)| k == key)
    })
}

fn block_after<'a>(lines: &[&'a str], header: usize, key_indent: usize) -> Vec<BlockLine<'a>> {
    let mut out = Vec::new();
    for (index, line) in lines.iter().enumerate().skip(header + 1) {
        if is_ignorable(line) {
            continue;
        }
        let raw = strip_comment(line);
        let indent = indent_of(raw);
        let content = &raw[indent..];
        if !in_block(indent, content, key_indent) {
            break;
        }
        out.push(BlockLine { index, indent, content, raw });
    }
    out
}

fn split_items<'a>(block: &[BlockLine<'a>]) -> Vec<BlockItem<'a>> {
    let Some(item_col) = block.iter().map(|l| l.indent).min() else {
        return Vec::new();
    };
    let mut items: Vec<BlockItem<'a>> = Vec::new();
    for l in block {
        if l.indent <= item_col {
            let dashed = is_dash(l.content);
            let (content, content_col) = if dashed {
                let rest = l.content[1..].trim_start();
                (rest, l.indent + (l.content.len() - rest.len()))
            } else {
                (l.content, l.indent)
            };
            items.push(BlockItem { line: l.index, dashed, content, content_col, body: Vec::new() });
        } else if let Some(last) = items.last_mut() {
            last.body.push(*l);
        }
    }
    items
}

fn collect_fields(item: &BlockItem<'_>) -> Vec<Field> {
    let mut fields: Vec<Field> = Vec::new();
    if let Some((key, value)) = split_key_value(item.content) {
        fields.push(Field { key, value, nested: Vec::new() });
    }
    let body_min = item.body.iter().map(|l| l.indent).min();
    let key_col = if item.content.is_empty() {
        body_min.unwrap_or(item.content_col)
    } else {
        body_min.map_or(item.content_col, |m| m.min(item.content_col))
    };
    let mut pending: Vec<BlockLine<'_>> = Vec::new();
    for l in &item.body {
        let is_key = l.indent <= key_col && !is_dash(l.content);
        match (is_key, split_key_value(l.content)) {
            (true, Some((key, value))) => {
                if let Some(last) = fields.last_mut() {
                    last.nested = dedent(&pending);
                }
                pending.clear();
                fields.push(Field { key, value, nested: Vec::new() });
            }
            _ => pending.push(*l),
        }
    }
    if let Some(last) = fields.last_mut() {
        if !pending.is_empty() {
            last.nested = dedent(&pending);
        }
    }
    fields
}

fn dedent(lines: &[BlockLine<'_>]) -> Vec<String> {
    let min = lines.iter().map(|l| l.indent).min().unwrap_or(0);
    lines.iter().map(|l| l.raw[min.min(l.indent)..].to_string()).collect()
}

fn field_value(fields: &[Field], key: &str) -> Option<String> {
    fields.iter().find(|f| f.key == key).map(|f| unquote(&f.value))
}

fn parameter_from_fields(fields: &[Field], line: usize) -> Option<ParameterDeclaration> {
    let name = field_value(fields, "name").filter(|n| !n.is_empty())?;
    let ty = field_value(fields, "type").filter(|t| !t.is_empty()).unwrap_or_else(|| "string".to_string());
    let default = fields.iter().find(|f| f.key == "default").map(|f| {
        if f.value.is_empty() {
            f.nested.join("\n")
        } else {
            unquote(&f.value)
        }
    });
    let mut p = ParameterDeclaration::new(&name, &ty, default, line);
    p.display_name = field_value(fields, "displayName");
    if let Some(values) = fields.iter().find(|f| f.key == "values") {
        p.allowed_values = if values.value.starts_with('[') {
            parse_flow_list(&values.value)
        } else {
            values
                .nested
                .iter()
                .filter_map(|l| l.trim_start().strip_prefix('-'))
                .map(|v| unquote(v.trim()))
                .filter(|v| !v.is_empty())
                .collect()
        };
    }
    Some(p)
}

/// Split `key: value` (or `key:`) on the first unquoted colon followed by whitespace or end of line.
fn split_key_value(content: &str) -> Option<(String, String)> {
    let content = content.trim();
    let mut in_single = false;
    let mut in_double = false;
    for (idx, c) in content.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ':' if !in_single && !in_double => {
                let rest = &content[idx + 1..];
                if rest.is_empty() || rest.starts_with([' ', '\t']) {
                    let key = unquote(&content[..idx]);
                    if key.is_empty() || key.starts_with('-') || key.contains(' ') {
                        return None;
                    }
                    return Some((key, rest.trim().to_string()));
                }
            }
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    let bytes = v.as_bytes();
    if v.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[v.len() - 1] == bytes[0] {
        let inner = &v[1..v.len() - 1];
        return if bytes[0] == b'\'' { inner.replace("''", "'") } else { inner.to_string() };
    }
    v.to_string()
}

fn parse_flow_list(value: &str) -> Vec<String> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    inner.split(',').map(unquote).filter(|v| !v.is_empty()).collect()
}

fn parse_flow_map(value: &str) -> Vec<(String, String)> {
    let inner = value.trim().trim_start_matches('{').trim_end_matches('}');
    inner
        .split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once(':')?;
            let k = unquote(k);
            (!k.is_empty()).then(|| (k, unquote(v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
parameters:
  - name: environment
    type: string
  - name: region
    type: string
    default: eastus
  - name: tags
    type: object
    default:
      team: infra
      tier: gold
  - name: size
    displayName: VM size
    values:
      - small
      - large
    default: small

steps:
  - script: echo ${{ parameters.environment }}
";

    #[test]
    fn extracts_list_form_parameters() {
        let params = extract_parameters(TEMPLATE);
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["environment", "region", "tags", "size"]);
        assert!(params[0].required);
        assert_eq!(params[0].declaration_line, 1);
        assert_eq!(params[1].default_value.as_deref(), Some("eastus"));
        assert!(!params[1].required);
        assert_eq!(params[2].default_value.as_deref(), Some("team: infra\ntier: gold"));
        assert_eq!(params[3].display_name.as_deref(), Some("VM size"));
        assert_eq!(params[3].allowed_values, vec!["small", "large"]);
    }

    #[test]
    fn column_zero_entries_continue_the_block_with_crlf() {
        let src = "parameters:\r\n- name: a\r\n  type: boolean\r\n- name: b\r\n  default: 'x'\r\njobs:\r\n- job: j\r\n";
        let params = extract_parameters(src);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].param_type, "boolean");
        assert_eq!(params[1].default_value.as_deref(), Some("x"));
        assert_eq!(params[1].declaration_line, 3);
    }

    #[test]
    fn legacy_map_form_parameters_have_defaults() {
        let src = "parameters:\n  pool: ubuntu-latest\n  flags: ''\nsteps: []\n";
        let params = extract_parameters(src);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "pool");
        assert_eq!(params[1].default_value.as_deref(), Some(""));
        assert!(params.iter().all(|p| !p.required));
    }

    #[test]
    fn legacy_map_form_nested_default_is_an_object() {
        let src = "parameters:\n  tags:\n    team: infra\n  pool: ubuntu-latest\nsteps: []\n";
        let params = extract_parameters(src);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "tags");
        assert_eq!(params[0].param_type, "object");
        assert_eq!(params[0].default_value.as_deref(), Some("team: infra"));
        assert_eq!(params[1].param_type, "string");
    }

    #[test]
    fn repository_aliases_keep_short_name() {
        let src = "\
resources:
  repositories:
    - repository: templates
      type: git
      name: Contoso/shared-templates
    - name: plain
      repository: other
  pipelines: []
";
        let aliases = extract_repository_aliases(src);
        assert_eq!(aliases.get("templates").map(String::as_str), Some("shared-templates"));
        assert_eq!(aliases.get("other").map(String::as_str), Some("plain"));
    }

    #[test]
    fn passed_parameters_stop_at_sibling_call_site() {
        let src = "\
steps:
  - template: a.yml
    parameters:
      region: westus
      nested:
        inner: 1
    condition: always()
  - template: b.yml
    parameters:
      other: x
";
        let lines: Vec<&str> = src.split('\n').collect();
        let passed = extract_passed_parameters(&lines, 1);
        let names: Vec<_> = passed.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["nested", "region"]);
        assert_eq!(passed["region"].value, "westus");
        assert_eq!(passed["region"].line, 3);
    }

    #[test]
    fn passed_parameters_flow_map() {
        let lines = ["- template: a.yml", "  parameters: { x: 1, 'y': two }"];
        let passed = extract_passed_parameters(&lines, 0);
        assert_eq!(passed["x"].value, "1");
        assert_eq!(passed["y"].value, "two");
    }

    #[test]
    fn references_ignore_comments() {
        let src = "\
# - template: commented.yml
steps:
- template: real.yml # trailing comment
- template: 'quoted.yml@templates'
- script: echo \"template: not a key\"
extends:
  template: base.yml
";
        let refs = extract_template_references(src);
        let raws: Vec<_> = refs.iter().map(|r| r.raw_ref.as_str()).collect();
        assert_eq!(raws, vec!["real.yml", "quoted.yml@templates", "base.yml"]);
        assert_eq!(refs[0].source_line, 2);
    }

    #[test]
    fn pipeline_root_detection_and_usages() {
        assert!(is_pipeline_root("trigger:\n- main\nstages: []\n"));
        assert!(!is_pipeline_root("parameters: []\nsteps:\n- script: x\n"));
        let used = extract_parameter_usages("a: ${{ parameters.env }}\nb: ${{ parameters['region'] }}\n# parameters.ghost\n");
        assert!(used.contains("env"));
        assert!(used.contains("region"));
        assert!(!used.contains("ghost"));
    }

    #[test]
    fn strip_comment_respects_quotes() {
        assert_eq!(strip_comment("color: '#fff' # c"), "color: '#fff'");
        assert_eq!(strip_comment("   # whole"), "");
        assert_eq!(strip_comment("url: a#b"), "url: a#b");
    }
}
