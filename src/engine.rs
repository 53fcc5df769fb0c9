pub mod assembler;
pub mod cache;
pub mod compile;
pub mod diagnostics;
pub mod references;
pub mod registry;
pub mod unit;

pub use unit::ScriptUnit;

use std::fmt;

/// Events forwarded to the host's error sink while translating backend
/// diagnostics.
#[derive(Debug, Clone)]
pub enum ScriptEvent {
    /// A diagnostic attributed to a named document object.
    ObjectDiagnostic {
        owner: String,
        code: String,
        message: String,
    },
    /// A diagnostic mapped back to a skeleton source line.
    SourceDiagnostic {
        line: usize,
        column: usize,
        code: String,
        message: String,
    },
    /// A preformatted message line.
    Message(String),
}

/// Receives object-level diagnostics and messages during compilation.
pub trait ErrorSink: Send + Sync {
    fn report(&self, event: ScriptEvent);
}

/// A sink that discards all events. Used by hosts that only care about the
/// aggregated compile error.
pub struct NoopSink;

impl ErrorSink for NoopSink {
    fn report(&self, _event: ScriptEvent) {}
}

#[derive(Debug)]
pub enum CompileErrorKind {
    /// The skeleton template carries no insertion anchor. Raised at unit
    /// construction, before any compile.
    MissingInsertionAnchor,
    /// Aggregated, already-translated compiler diagnostics.
    CompilerErrors(String),
    /// The backend itself failed (not a diagnostic, an invocation error).
    Backend(String),
    /// The compile gate was closed while waiting for exclusive access.
    GateClosed,
}

#[derive(Debug)]
pub struct CompileError {
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub(crate) fn missing_anchor() -> Self {
        Self {
            kind: CompileErrorKind::MissingInsertionAnchor,
        }
    }

    pub(crate) fn compiler(message: String) -> Self {
        Self {
            kind: CompileErrorKind::CompilerErrors(message),
        }
    }

    pub(crate) fn backend(err: anyhow::Error) -> Self {
        Self {
            kind: CompileErrorKind::Backend(format!("{err:#}")),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CompileErrorKind::MissingInsertionAnchor => {
                write!(f, "Cannot find the insertion anchor in the script skeleton")
            }
            CompileErrorKind::CompilerErrors(e) => write!(f, "{e}"),
            CompileErrorKind::Backend(e) => write!(f, "Script backend failed: {e}"),
            CompileErrorKind::GateClosed => write!(f, "Compile gate closed"),
        }
    }
}

impl std::error::Error for CompileError {}
