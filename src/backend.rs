//! Interface to the pluggable language backend.
//!
//! The backend turns source text plus a reference list into a loadable
//! module or diagnostics. The engine depends only on the opaque
//! [`LoadableModule`] / [`ModuleInstance`] capabilities; no runtime type
//! introspection happens on this side of the boundary.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::document::{Document, DocumentObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// Diagnostic categories the engine reacts to. Everything else passes
/// through as [`DiagnosticKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// A referenced module is missing; drives the bounded recompile loop.
    MissingReference,
    /// An identifier does not exist in the compiled scope.
    UndefinedIdentifier,
    /// Constant division by zero.
    DivisionByZero,
    /// A type is defined both in the script and in a referenced module.
    DuplicateType,
    /// Use of a type forbidden by script security.
    ForbiddenType,
    /// Use of a method forbidden by script security.
    ForbiddenMethod,
    Other,
}

/// One backend diagnostic. `line` and `column` are 1-based positions in the
/// assembled source unit.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Backend-specific diagnostic code, e.g. `E0433`.
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, code: &str, message: &str, line: usize, column: usize) -> Self {
        Self {
            kind,
            code: code.to_string(),
            severity: Severity::Error,
            message: message.to_string(),
            line,
            column,
        }
    }

    pub(crate) fn severity_label(&self) -> &'static str {
        match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Immutable snapshot handed to the backend for one compile attempt.
#[derive(Debug, Clone, Serialize)]
pub struct BuildRequest {
    pub source: String,
    /// Resolved module locations, or bare names the backend may resolve
    /// itself.
    pub references: Vec<String>,
    /// Emit the module in memory instead of on disk.
    pub in_memory: bool,
    pub temp_dir: Option<PathBuf>,
}

/// Outcome of one backend compile attempt.
pub struct BuildResult {
    pub module: Option<Arc<dyn LoadableModule>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// External compiler collaborator.
#[async_trait]
pub trait CodeBackend: Send + Sync {
    fn compile(&self, request: &BuildRequest) -> Result<BuildResult>;

    /// Suspend-capable variant. The default delegates to [`Self::compile`];
    /// backends with a native async surface should override it. Dropping the
    /// returned future cancels the compile.
    async fn compile_suspending(&self, request: &BuildRequest) -> Result<BuildResult> {
        self.compile(request)
    }
}

/// A compiled module that can be instantiated.
pub trait LoadableModule: Send + Sync {
    fn instantiate(&self, entry_type: &str) -> Result<Box<dyn ModuleInstance>>;
}

/// A value bound onto a live module instance field.
#[derive(Clone)]
pub enum Binding {
    /// Back-reference to the document being rendered.
    Document(Arc<dyn Document>),
    /// Back-reference to the render engine, resolved by the host.
    Engine,
    /// A live document object, bound under its declared field name.
    Object(Arc<dyn DocumentObject>),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Document(_) => write!(f, "Document"),
            Binding::Engine => write!(f, "Engine"),
            Binding::Object(o) => write!(f, "Object({})", o.name()),
        }
    }
}

/// A live instance of the module's entry type.
pub trait ModuleInstance: Send + Sync {
    /// Binds `value` to the instance field `name`. Unknown names are
    /// ignored; a declared field without a live object stays unbound.
    fn bind(&self, name: &str, value: Binding);

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvokeError>;
}

/// Invocation wrapper error. The engine unwraps it to the original
/// underlying error before surfacing anything to callers.
#[derive(Debug)]
pub struct InvokeError {
    pub method: String,
    source: anyhow::Error,
}

impl InvokeError {
    pub fn new(method: &str, source: anyhow::Error) -> Self {
        Self {
            method: method.to_string(),
            source,
        }
    }

    /// The original error raised inside the invoked method.
    pub fn into_original(self) -> anyhow::Error {
        self.source
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invocation of `{}` failed: {}", self.method, self.source)
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
