//! Jac support without a grammar: string and comment masking, brace matching,
//! and regular expressions over the masked text.

use regex::Regex;

use super::common::{ancestor_dirs, join_relative, parent_dir, ExtractionBuilder};
use super::{ImportRef, ImportedSymbol, Language, LanguageParser, ParseError, ParseResult};
use crate::core::{EntityKind, Parameter};

const KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "with", "can", "def", "return", "report", "print", "len",
    "str", "int", "float", "list", "dict", "set", "tuple", "isinstance", "range", "spawn",
    "visit", "ignore", "disengage", "super", "type", "in", "not", "and", "or", "entry", "exit",
];

const RECEIVERS_SKIPPED: &[&str] = &["print", "std"];

pub struct JacParser {
    archetype: Regex,
    ability: Regex,
    call: Regex,
    import: Regex,
    has: Regex,
    branch: Regex,
}

/// A definition header and the extent of its body in the source.
#[derive(Debug, Clone)]
struct Header {
    start: usize,
    /// Offset of the opening brace, or of the terminating `;`.
    open: usize,
    /// Offset of the closing brace; equals `open` for bodiless declarations.
    close: usize,
    kind: HeaderKind,
    name: String,
    bases: Vec<String>,
    params: Option<String>,
    return_type: Option<String>,
    signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Archetype,
    Ability,
}

impl JacParser {
    pub fn new() -> Self {
        Self {
            archetype: Regex::new(
                r"\b(node|walker|edge|obj|object|class|enum)\s+([A-Za-z_]\w*)\s*(\([^)]*\)|:[^{:;]*:)?\s*\{",
            )
            .expect("static regex"),
            ability: Regex::new(
                r"\b(can|def)\s+([A-Za-z_]\w*)\s*(\([^)]*\))?\s*(->\s*[^{;]+?)?\s*(with\s+[^{;]+?)?\s*([{;])",
            )
            .expect("static regex"),
            call: Regex::new(r"(?:([A-Za-z_][\w.]*)\.)?([A-Za-z_]\w*)\s*\(").expect("static regex"),
            import: Regex::new(
                r"(?m)^[ \t]*(?:import|include)(?::\s*(\w+))?\s+(from\s+)?(\.*[\w.]*)\s*(\{[^}]*\}|[^;\n]*)\s*;?",
            )
            .expect("static regex"),
            has: Regex::new(r"\bhas\s+([^;]+);").expect("static regex"),
            branch: Regex::new(r"\b(if|elif|while|for|except|and|or)\b").expect("static regex"),
        }
    }

    fn headers(&self, masked: &str, pairs: &[(usize, usize)]) -> Vec<Header> {
        let close_of = |open: usize| {
            pairs
                .binary_search_by_key(&open, |&(o, _)| o)
                .ok()
                .map(|i| pairs[i].1)
        };
        let mut headers = Vec::new();

        for caps in self.archetype.captures_iter(masked) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
            let open = whole.1 - 1;
            let Some(close) = close_of(open) else { continue };
            let bases = caps
                .get(3)
                .map(|m| split_list(m.as_str().trim_matches(|c| c == '(' || c == ')' || c == ':')))
                .unwrap_or_default();
            headers.push(Header {
                start: whole.0,
                open,
                close,
                kind: HeaderKind::Archetype,
                name: caps[2].to_string(),
                bases,
                params: None,
                return_type: None,
                signature: masked[whole.0..open].trim().to_string(),
            });
        }

        for caps in self.ability.captures_iter(masked) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
            let open = whole.1 - 1;
            let close = if &caps[6] == "{" {
                match close_of(open) {
                    Some(close) => close,
                    None => continue,
                }
            } else {
                open
            };
            headers.push(Header {
                start: whole.0,
                open,
                close,
                kind: HeaderKind::Ability,
                name: caps[2].to_string(),
                bases: Vec::new(),
                params: caps
                    .get(3)
                    .map(|m| m.as_str().trim_matches(|c| c == '(' || c == ')').to_string()),
                return_type: caps
                    .get(4)
                    .map(|m| m.as_str().trim_start_matches("->").trim().to_string()),
                signature: masked[whole.0..open].trim().to_string(),
            });
        }

        headers.sort_by_key(|h| h.start);
        headers
    }

    fn process_imports(&self, masked: &str, lines: &LineIndex, out: &mut ExtractionBuilder) {
        let file_dir = parent_dir(out.path()).to_string();
        for caps in self.import.captures_iter(masked) {
            let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let lang = caps.get(1).map(|m| m.as_str());
            let is_from = caps.get(2).is_some();
            let module = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
            if module.is_empty() {
                continue;
            }
            let extensions: &[&str] = match lang {
                Some("py") => &["py"],
                _ => &["jac", "py"],
            };
            let module_bases = module_bases(&file_dir, module);
            let candidates = module_bases
                .iter()
                .flat_map(|base| module_files(base, extensions))
                .collect();

            let mut symbols = Vec::new();
            let mut alias = None;
            if is_from {
                let names = rest.trim().trim_start_matches(',').trim();
                let names = names.trim_start_matches('{').trim_end_matches('}');
                for item in split_list(names) {
                    let (name, item_alias) = split_alias(&item);
                    let candidates = module_bases
                        .iter()
                        .filter_map(|base| join_relative(base, &name))
                        .flat_map(|sub| module_files(&sub, extensions))
                        .collect();
                    symbols.push(ImportedSymbol {
                        name,
                        alias: item_alias,
                        candidates,
                    });
                }
            } else {
                let (_, module_alias) = split_alias(&format!("{module} {}", rest.trim()));
                alias = Some(module_alias.unwrap_or_else(|| module.trim_start_matches('.').to_string()));
            }

            out.add_import(ImportRef {
                importer: ExtractionBuilder::MODULE,
                target: module.to_string(),
                candidates,
                symbols,
                alias,
                line: lines.line_of(offset),
            });
        }
    }

    /// Count of decision keywords in `range`, skipping nested bodies.
    fn complexity(&self, masked: &str, range: (usize, usize), nested: &[(usize, usize)]) -> u32 {
        let body = &masked[range.0..range.1];
        let branches = self
            .branch
            .find_iter(body)
            .filter(|m| {
                let at = range.0 + m.start();
                !nested.iter().any(|&(s, e)| at > s && at < e)
            })
            .count();
        1 + u32::try_from(branches).unwrap_or(u32::MAX)
    }
}

impl Default for JacParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for JacParser {
    fn language(&self) -> Language {
        Language::Jac
    }

    fn parse(&self, path: &str, source: &str) -> Result<ParseResult, ParseError> {
        let masked = mask_strings_and_comments(source)
            .map_err(|offset| unterminated(path, source, offset, "unterminated string or comment"))?;
        let pairs = match_braces(&masked).map_err(|offset| {
            unterminated(path, source, offset, "unbalanced braces")
        })?;
        let lines = LineIndex::new(source);

        let mut out = ExtractionBuilder::new(path, Language::Jac, source.lines().count());
        let mut module_doc_end = 0;
        if let Some((doc, end)) = leading_docstring_span(source, 0) {
            out.entity_mut(ExtractionBuilder::MODULE).docstring = Some(doc);
            module_doc_end = end;
        }

        let headers = self.headers(&masked, &pairs);
        // (close offset, local entity index, header index)
        let mut stack: Vec<(usize, usize, usize)> = Vec::new();
        let mut body_of: Vec<(usize, usize, usize)> = Vec::new();

        for (header_idx, header) in headers.iter().enumerate() {
            while stack.last().map(|&(close, _, _)| close < header.start).unwrap_or(false) {
                stack.pop();
            }
            let enclosing = stack.last().map(|&(_, idx, h)| (idx, headers[h].kind));
            let parent = enclosing.map(|(idx, _)| idx).unwrap_or(ExtractionBuilder::MODULE);
            let kind = match (header.kind, enclosing.map(|(_, k)| k)) {
                (HeaderKind::Archetype, _) => EntityKind::Class,
                (HeaderKind::Ability, Some(HeaderKind::Archetype)) => EntityKind::Method,
                (HeaderKind::Ability, _) => EntityKind::Function,
            };
            let lines_span = (lines.line_of(header.start), lines.line_of(header.close));
            let idx = out.add(parent, &header.name, kind, lines_span);

            let nested: Vec<(usize, usize)> = headers
                .iter()
                .filter(|h| h.start > header.open && h.close < header.close)
                .map(|h| (h.start, h.close))
                .collect();
            let docstring = leading_docstring(source, header.open + 1)
                .or_else(|| trailing_docstring(source, header.start, module_doc_end));

            let entity = out.entity_mut(idx);
            entity.bases = header.bases.clone();
            entity.signature = Some(collapse_whitespace(&header.signature));
            entity.docstring = docstring;
            match header.kind {
                HeaderKind::Archetype => {
                    let body = &masked[header.open..header.close];
                    for caps in self.has.captures_iter(body) {
                        let at = header.open + caps.get(0).map(|m| m.start()).unwrap_or(0);
                        if nested.iter().any(|&(s, e)| at > s && at < e) {
                            continue;
                        }
                        for field in split_list(&caps[1]) {
                            let name = field.split(':').next().unwrap_or("").trim().to_string();
                            if !name.is_empty() && !entity.attributes.contains(&name) {
                                entity.attributes.push(name);
                            }
                        }
                    }
                }
                HeaderKind::Ability => {
                    entity.parameters = header
                        .params
                        .as_deref()
                        .map(parse_parameters)
                        .unwrap_or_default();
                    entity.return_type = header.return_type.clone();
                    if header.close > header.open {
                        entity.complexity =
                            Some(self.complexity(&masked, (header.open, header.close), &nested));
                        body_of.push((header.open, header.close, idx));
                    }
                }
            }

            if header.close > header.open {
                stack.push((header.close, idx, header_idx));
            }
        }

        self.process_imports(&masked, &lines, &mut out);

        let header_spans: Vec<(usize, usize)> = headers.iter().map(|h| (h.start, h.open)).collect();
        for caps in self.call.captures_iter(&masked) {
            let Some(name) = caps.get(2) else { continue };
            let at = name.start();
            if KEYWORDS.contains(&name.as_str())
                || header_spans.iter().any(|&(s, e)| at >= s && at < e)
            {
                continue;
            }
            let receiver = caps.get(1).map(|m| m.as_str());
            if receiver.map(|r| RECEIVERS_SKIPPED.contains(&r)).unwrap_or(false) {
                continue;
            }
            // Innermost ability body holding the call.
            let caller = body_of
                .iter()
                .filter(|&&(open, close, _)| at > open && at < close)
                .min_by_key(|&&(open, close, _)| close - open)
                .map(|&(_, _, idx)| idx);
            if let Some(caller) = caller {
                out.add_call(caller, name.as_str(), receiver, lines.line_of(at));
            }
        }

        Ok(out.finish())
    }
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }
}

fn unterminated(path: &str, source: &str, offset: usize, message: &str) -> ParseError {
    ParseError::new(path, message).at_line(LineIndex::new(source).line_of(offset))
}

/// Blank out string literals and comments, keeping offsets and newlines.
///
/// Returns the offset of an unterminated literal on failure.
fn mask_strings_and_comments(source: &str) -> Result<String, usize> {
    let bytes = source.as_bytes();
    let mut masked = bytes.to_vec();
    let mut i = 0;
    let blank = |masked: &mut Vec<u8>, from: usize, to: usize| {
        for b in &mut masked[from..to] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    };
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"#*") {
            let end = find(bytes, i + 2, b"*#").ok_or(i)? + 2;
            blank(&mut masked, i, end);
            i = end;
        } else if rest[0] == b'#' {
            let end = find(bytes, i, b"\n").unwrap_or(bytes.len());
            blank(&mut masked, i, end);
            i = end;
        } else if rest.starts_with(b"\"\"\"") || rest.starts_with(b"'''") {
            let quote = &rest[..3];
            let end = find(bytes, i + 3, quote).ok_or(i)? + 3;
            blank(&mut masked, i + 3, end - 3);
            i = end;
        } else if rest[0] == b'"' || rest[0] == b'\'' {
            let quote = rest[0];
            let mut j = i + 1;
            loop {
                match bytes.get(j) {
                    None | Some(b'\n') => return Err(i),
                    Some(b'\\') => j += 2,
                    Some(&b) if b == quote => break,
                    Some(_) => j += 1,
                }
            }
            blank(&mut masked, i + 1, j);
            i = j + 1;
        } else {
            i += 1;
        }
    }
    // Only ASCII bytes were replaced, so the text is still valid UTF-8.
    String::from_utf8(masked).map_err(|_| 0)
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Pairs of (open, close) brace offsets, sorted by open offset.
fn match_braces(masked: &str) -> Result<Vec<(usize, usize)>, usize> {
    let mut stack = Vec::new();
    let mut pairs = Vec::new();
    for (offset, byte) in masked.bytes().enumerate() {
        match byte {
            b'{' => stack.push(offset),
            b'}' => {
                let open = stack.pop().ok_or(offset)?;
                pairs.push((open, offset));
            }
            _ => {}
        }
    }
    if let Some(&open) = stack.last() {
        return Err(open);
    }
    pairs.sort_unstable();
    Ok(pairs)
}

/// A `"""..."""` literal starting at `from`, after optional whitespace.
fn leading_docstring(source: &str, from: usize) -> Option<String> {
    leading_docstring_span(source, from).map(|(doc, _)| doc)
}

/// The docstring at `from` together with the offset just past its closing quotes.
fn leading_docstring_span(source: &str, from: usize) -> Option<(String, usize)> {
    let tail = source.get(from..)?;
    let rest = tail.trim_start();
    let open = from + (tail.len() - rest.len());
    let body = rest.strip_prefix("\"\"\"")?;
    let end = body.find("\"\"\"")?;
    let doc = body[..end].trim();
    (!doc.is_empty()).then(|| (doc.to_string(), open + 3 + end + 3))
}

/// A `"""..."""` literal ending right before `until` and opening at or after `floor`.
fn trailing_docstring(source: &str, until: usize, floor: usize) -> Option<String> {
    let before = source.get(..until)?.trim_end();
    let body = before.strip_suffix("\"\"\"")?;
    let start = body.rfind("\"\"\"")?;
    if start < floor {
        return None;
    }
    let doc = body[start + 3..].trim();
    (!doc.is_empty()).then(|| doc.to_string())
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_alias(item: &str) -> (String, Option<String>) {
    match item.split_once(" as ") {
        Some((name, alias)) => (name.trim().to_string(), Some(alias.trim().to_string())),
        None => (item.trim().to_string(), None),
    }
}

fn parse_parameters(text: &str) -> Vec<Parameter> {
    split_list(text)
        .into_iter()
        .map(|param| {
            let without_default = param.split('=').next().unwrap_or("").trim();
            match without_default.split_once(':') {
                Some((name, annotation)) => {
                    Parameter::new(name.trim(), Some(annotation.trim().to_string()))
                }
                None => Parameter::new(without_default, None),
            }
        })
        .filter(|p| !p.name.is_empty())
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Directories a dotted module may live under: relative to the file for
/// leading dots, otherwise the file's directory and each ancestor.
fn module_bases(file_dir: &str, module: &str) -> Vec<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    let slashed = module[dots..].replace('.', "/");
    if dots > 0 {
        let mut base = file_dir.to_string();
        for _ in 1..dots {
            base = parent_dir(&base).to_string();
        }
        return join_relative(&base, &slashed).into_iter().collect();
    }
    ancestor_dirs(file_dir)
        .into_iter()
        .filter_map(|dir| join_relative(&dir, &slashed))
        .collect()
}

fn module_files(base: &str, extensions: &[&str]) -> Vec<String> {
    let mut files: Vec<String> = extensions.iter().map(|ext| format!("{base}.{ext}")).collect();
    files.extend(extensions.iter().map(|ext| {
        if base.is_empty() {
            format!("__init__.{ext}")
        } else {
            format!("{base}/__init__.{ext}")
        }
    }));
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_hides_braces_in_strings_and_comments() {
        let masked = mask_strings_and_comments("a = \"{\"; # }\nb {}").unwrap();
        assert_eq!(match_braces(&masked).unwrap().len(), 1);
    }

    #[test]
    fn unbalanced_braces_are_reported() {
        let masked = mask_strings_and_comments("node A {\n has x: int;\n").unwrap();
        assert_eq!(match_braces(&masked), Err(7));
    }

    #[test]
    fn parameters_drop_defaults() {
        let params = parse_parameters("a: int, b: str = \"x\", c");
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(params[0].annotation.as_deref(), Some("int"));
    }
}
