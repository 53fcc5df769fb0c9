//! Dynamic script compilation engine for document generation.
//!
//! End users attach calculation expressions and event handlers to document
//! objects. At render time a [`engine::ScriptUnit`] assembles one source unit
//! from a template skeleton plus generated field declarations, user
//! expressions and event code, compiles it through a pluggable
//! [`backend::CodeBackend`] into a loadable module, and invokes compiled
//! entry points while rendering.
//!
//! The engine does not parse or type-check source itself. It orchestrates an
//! external backend and post-processes its output: fragment-to-object line
//! tracking, content-addressed caching of compiled modules, bounded retry on
//! missing references, and translation of raw compiler diagnostics into
//! object-level, policy-filtered user messages.

pub mod backend;
pub mod document;
pub mod engine;
pub mod policy;
pub mod template;

pub use engine::{CompileError, ErrorSink, NoopSink, ScriptEvent, ScriptUnit};

#[cfg(test)]
pub(crate) mod testutil;
