//! Maps backend diagnostics back to owning objects or skeleton lines,
//! applies security-policy rewriting and suppression, and performs per-kind
//! auto-recovery on the affected display objects.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::backend::{Diagnostic, DiagnosticKind};
use crate::document::Document;
use crate::engine::assembler::{LineAttribution, SourceAssembler};
use crate::engine::{ErrorSink, ScriptEvent};
use crate::policy::{ExceptionBehaviour, SecurityPolicy};

/// Displayed in place of an expression whose evaluation divides by zero.
pub const DIVISION_BY_ZERO_TEXT: &str = "DIVISION BY ZERO!";

fn quoted_identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["'](\S+)["']"#).expect("quoted identifier regex"))
}

/// `n`-th identifier quoted inside a diagnostic message.
fn quoted_identifier(message: &str, n: usize) -> Option<String> {
    quoted_identifier_regex()
        .captures_iter(message)
        .nth(n)
        .map(|c| c[1].to_string())
}

/// Policy pass, active only under hosted/secure mode: duplicate-type
/// diagnostics are dropped; forbidden-type and forbidden-method diagnostics
/// are rewritten into the policy's user-facing message and always surfaced.
fn apply_security_policy(diagnostics: Vec<Diagnostic>, policy: &SecurityPolicy) -> Vec<Diagnostic> {
    if !policy.script_security_active() {
        return diagnostics;
    }
    diagnostics
        .into_iter()
        .filter_map(|mut diagnostic| match diagnostic.kind {
            DiagnosticKind::DuplicateType => None,
            DiagnosticKind::ForbiddenType => {
                if let Some(name) = quoted_identifier(&diagnostic.message, 0) {
                    diagnostic.message = policy.forbidden_type_message.replace("{name}", &name);
                }
                Some(diagnostic)
            }
            DiagnosticKind::ForbiddenMethod => {
                if let Some(name) = quoted_identifier(&diagnostic.message, 1) {
                    diagnostic.message = policy.forbidden_method_message.replace("{name}", &name);
                }
                Some(diagnostic)
            }
            _ => Some(diagnostic),
        })
        .collect()
}

/// Replaces the bracketed expression segment containing the undefined
/// identifier in the owner's displayed text. Returns true when the
/// diagnostic is consumed.
fn recover_undefined_identifier(
    owner: &str,
    diagnostic: &Diagnostic,
    document: &dyn Document,
    policy: &SecurityPolicy,
    sink: &dyn ErrorSink,
) -> bool {
    let Some(object) = document.find_object(owner) else {
        return false;
    };
    let Some(mut text) = object.display_text() else {
        return false;
    };
    let parts: Vec<&str> = diagnostic.message.split('"').collect();
    if parts.len() == 3 {
        let identifier = parts[1];
        let (open, close) = object.brackets();
        for expression in object.expressions() {
            if expression.contains(identifier) && !document.is_valid_column(&expression) {
                let segment = format!("{open}{expression}{close}");
                let replacement = match policy.exception_behaviour {
                    ExceptionBehaviour::ShowMessage | ExceptionBehaviour::ReplaceWithPlaceholder => {
                        policy.placeholder.clone()
                    }
                    ExceptionBehaviour::ReplaceWithMessage => diagnostic.message.clone(),
                    ExceptionBehaviour::Default => return false,
                };
                text = text.replace(&segment, &replacement);
            }
        }
        object.set_display_text(&text);
    }
    // Forwarded even when the message carries no quoted identifier and the
    // text could not be rewritten.
    if policy.exception_behaviour == ExceptionBehaviour::ShowMessage {
        sink.report(ScriptEvent::Message(diagnostic.message.clone()));
    }
    debug!(owner, "recovered undefined identifier");
    true
}

/// Unconditional recovery: the owner grows to fit the warning, gets the
/// error highlight fill and the fixed warning text.
fn recover_division_by_zero(owner: &str, document: &dyn Document) -> bool {
    let Some(object) = document.find_object(owner) else {
        return false;
    };
    object.set_auto_grow(true);
    object.set_error_fill();
    object.set_display_text(DIVISION_BY_ZERO_TEXT);
    debug!(owner, "recovered division by zero");
    true
}

/// Translates backend diagnostics into user-facing lines. Suppressed and
/// recovered diagnostics are consumed here; every surviving line is also
/// forwarded to the error sink.
pub(crate) fn translate(
    diagnostics: Vec<Diagnostic>,
    assembler: &SourceAssembler,
    document: &dyn Document,
    policy: &SecurityPolicy,
    sink: &dyn ErrorSink,
) -> Vec<String> {
    let diagnostics = apply_security_policy(diagnostics, policy);
    let mut surfaced = Vec::new();

    for diagnostic in diagnostics {
        match assembler.map_line(diagnostic.line) {
            LineAttribution::Fragment(owner) => {
                if let Some(line) = translate_inside(owner, &diagnostic, document, policy, sink) {
                    surfaced.push(line);
                }
            }
            // The error is inside own items but in a gap; no owner, no remap.
            LineAttribution::Ambiguous => {
                if let Some(line) = translate_inside(String::new(), &diagnostic, document, policy, sink)
                {
                    surfaced.push(line);
                }
            }
            LineAttribution::Skeleton(line) => {
                surfaced.push(format!(
                    "({line},{column}): {severity} {code}: {message}",
                    column = diagnostic.column,
                    severity = diagnostic.severity_label(),
                    code = diagnostic.code,
                    message = diagnostic.message,
                ));
                sink.report(ScriptEvent::SourceDiagnostic {
                    line,
                    column: diagnostic.column,
                    code: diagnostic.code,
                    message: diagnostic.message,
                });
            }
        }
    }
    surfaced
}

/// One diagnostic attributed inside the inserted fragments. Recovery applies
/// only here; returns the formatted line when the diagnostic survives.
fn translate_inside(
    owner: String,
    diagnostic: &Diagnostic,
    document: &dyn Document,
    policy: &SecurityPolicy,
    sink: &dyn ErrorSink,
) -> Option<String> {
    if diagnostic.kind == DiagnosticKind::UndefinedIdentifier
        && policy.exception_behaviour != ExceptionBehaviour::Default
        && recover_undefined_identifier(&owner, diagnostic, document, policy, sink)
    {
        return None;
    }
    if diagnostic.kind == DiagnosticKind::DivisionByZero
        && recover_division_by_zero(&owner, document)
    {
        return None;
    }
    sink.report(ScriptEvent::ObjectDiagnostic {
        owner: owner.clone(),
        code: diagnostic.code.clone(),
        message: diagnostic.message.clone(),
    });
    Some(format!(
        "({owner}): {severity} {code}: {message}",
        severity = diagnostic.severity_label(),
        code = diagnostic.code,
        message = diagnostic.message,
    ))
}
