//! Callable handles for registered expressions and methods, plus the
//! rewriting of bracketed data references into backend accessor code.

use ahash::AHashMap;

use crate::document::Document;
use crate::template::ScriptTemplate;

/// Method name bound to every registered calculation expression.
pub const EVALUATOR_METHOD: &str = "CalcExpression";

/// Key prefix for handles registered lazily by method invocation.
pub const METHOD_HANDLE_PREFIX: &str = "method_";

/// A callable handle, created lazily on first reference and kept until the
/// unit is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionHandle {
    pub method_name: String,
}

impl ExpressionHandle {
    pub fn new(method_name: &str) -> Self {
        Self {
            method_name: method_name.to_string(),
        }
    }
}

/// Handles keyed by literal expression text. Dedup is global across the
/// whole unit: unrelated owners sharing identical expression text collapse
/// to one handle.
#[derive(Debug, Default)]
pub struct ExpressionRegistry {
    handles: AHashMap<String, ExpressionHandle>,
}

impl ExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handles.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ExpressionHandle> {
        self.handles.get(key)
    }

    pub fn insert(&mut self, key: String, handle: ExpressionHandle) {
        self.handles.entry(key).or_insert(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Next top-level `[...]` span in `text` at or after byte offset `from`,
/// honoring nesting and double-quoted string literals. Returns the byte
/// range including the brackets.
fn next_bracketed(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut open = 0usize;
    let mut in_string = false;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'[' if !in_string => {
                if depth == 0 {
                    open = i;
                }
                depth += 1;
            }
            b']' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Rewrites every bracketed data reference in `expression` into backend
/// accessor code. Columns, parameters and totals are replaced in place;
/// unresolved sub-expressions are rewritten recursively and re-wrapped in
/// brackets. Scanning resumes immediately after each replaced span.
pub(crate) fn rewrite_references(
    document: &dyn Document,
    template: &dyn ScriptTemplate,
    expression: &str,
) -> String {
    let mut text = expression.to_string();
    let mut from = 0usize;
    while let Some((start, end)) = next_bracketed(&text, from) {
        let inner = text[start + 1..end - 1].to_string();
        let replacement = if document.is_valid_column(&inner) {
            let column_type = document.column_type(&inner);
            template.column_accessor(&inner, column_type.as_deref())
        } else if document.is_valid_parameter(&inner) {
            template.parameter_accessor(&inner)
        } else if document.is_valid_total(&inner) {
            template.total_accessor(&inner)
        } else {
            format!("[{}]", rewrite_references(document, template, &inner))
        };
        text.replace_range(start..end, &replacement);
        from = start + replacement.len();
    }
    text
}
