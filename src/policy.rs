//! Security and compiler policy configuration.
//!
//! The host reads these flags once and passes them into the engine at unit
//! construction. The engine never consults ambient global state.

use serde::Serialize;
use std::path::PathBuf;

/// How the engine cosmetically resolves undefined-identifier diagnostics
/// for end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExceptionBehaviour {
    /// Surface the diagnostic verbatim.
    #[default]
    Default,
    /// Replace the failing expression with the placeholder and forward the
    /// diagnostic text to the error sink.
    ShowMessage,
    /// Replace the failing expression with the placeholder.
    ReplaceWithPlaceholder,
    /// Replace the failing expression with the diagnostic text itself.
    ReplaceWithMessage,
}

/// Read-once security flags, active in hosted deployments.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityPolicy {
    /// The engine runs inside a hosted (multi-tenant) environment.
    pub hosted_mode: bool,
    /// Script security filtering is enabled.
    pub security_enabled: bool,
    /// Insert the template's stub classes before compiling.
    pub add_stub_classes: bool,
    pub exception_behaviour: ExceptionBehaviour,
    /// Replacement token used by the placeholder exception behaviours.
    pub placeholder: String,
    /// User-facing message template for forbidden-type diagnostics.
    /// `{name}` is substituted with the offending identifier.
    pub forbidden_type_message: String,
    /// User-facing message template for forbidden-method diagnostics.
    pub forbidden_method_message: String,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            hosted_mode: false,
            security_enabled: false,
            add_stub_classes: false,
            exception_behaviour: ExceptionBehaviour::Default,
            placeholder: String::new(),
            forbidden_type_message: String::from("Please don't use the type {name}"),
            forbidden_method_message: String::from("Please don't use the method {name}"),
        }
    }
}

impl SecurityPolicy {
    /// Diagnostic rewriting and suppression only applies under hosted,
    /// security-enabled deployments.
    pub(crate) fn script_security_active(&self) -> bool {
        self.hosted_mode && self.security_enabled
    }
}

/// Engine configuration, passed explicitly into the unit at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub security: SecurityPolicy,
    /// Maximum number of backend compiles per compilation, including the
    /// first attempt. Retries are only driven by missing-reference
    /// diagnostics.
    pub max_retries: usize,
    /// Directory for backend temp files. `None` leaves the choice to the
    /// backend; sometimes the system temp folder is not accessible.
    pub temp_dir: Option<PathBuf>,
    /// Directory searched when resolving a bare module reference.
    pub search_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security: SecurityPolicy::default(),
            max_retries: 3,
            temp_dir: None,
            search_path: PathBuf::from("."),
        }
    }
}
