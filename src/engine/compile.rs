//! Drives the cache-lookup / compile / bounded-retry sequence for a unit,
//! in a blocking and a suspend-capable variant.

use regex::Regex;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, OnceLock};
use tracing::{Instrument, debug, info_span};

use crate::backend::{BuildRequest, BuildResult, Diagnostic, DiagnosticKind, Severity};
use crate::engine::cache::content_key;
use crate::engine::references::{self, ReferenceSet};
use crate::engine::unit::ScriptUnit;
use crate::engine::{CompileError, CompileErrorKind, diagnostics};

/// At most one blocking compile proceeds at a time, process-wide.
static COMPILE_LOCK: Mutex<()> = Mutex::new(());

fn missing_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["'](\S+),"#).expect("missing reference regex"))
}

/// Module token quoted inside a missing-reference diagnostic.
fn missing_reference_token(message: &str) -> Option<String> {
    missing_reference_regex()
        .captures(message)
        .map(|c| c[1].to_string())
}

struct PreparedBuild {
    request: BuildRequest,
    references: ReferenceSet,
    /// Cache key over the reference set as it was before any retry-driven
    /// additions.
    original_key: String,
}

impl ScriptUnit {
    /// Blocking compile path: acquires the process-wide lock, re-checks the
    /// dirty flag and compiles if still needed.
    pub fn compile(&self) -> Result<(), CompileError> {
        if !self.needs_compile() {
            return Ok(());
        }
        let _guard = COMPILE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if self.needs_compile() {
            self.internal_compile()?;
        }
        Ok(())
    }

    /// Suspend-capable compile path: waits on the per-unit gate without
    /// blocking the thread. The permit is released on every exit path,
    /// including cancellation; dropping the future cancels the backend call.
    pub async fn compile_suspending(&self) -> Result<(), CompileError> {
        if !self.needs_compile() {
            return Ok(());
        }
        let _permit = self.gate.acquire().await.map_err(|_| CompileError {
            kind: CompileErrorKind::GateClosed,
        })?;
        if self.needs_compile() {
            self.internal_compile_suspending().await?;
        }
        Ok(())
    }

    fn prepare_build(&self) -> PreparedBuild {
        self.insert_stub_classes_once();
        let references = references::collect(
            self.document.as_ref(),
            self.locator.as_ref(),
            &self.config.search_path,
        );
        let source = self.source();
        let original_key = content_key(&references, &source);
        let request = BuildRequest {
            source,
            references: references.locations().to_vec(),
            in_memory: true,
            temp_dir: self.config.temp_dir.clone(),
        };
        PreparedBuild {
            request,
            references,
            original_key,
        }
    }

    /// Inserts the template's stub classes once, when the security policy
    /// asks for them. Happens before hashing so stubbed and unstubbed
    /// sources never share a cache entry.
    fn insert_stub_classes_once(&self) {
        let policy = &self.config.security;
        if !(policy.script_security_active() && policy.add_stub_classes) {
            return;
        }
        if self.stubs_inserted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stubs) = self.template.stub_classes() {
            self.insert_fragment(&stubs, "");
        }
    }

    fn internal_compile(&self) -> Result<(), CompileError> {
        let _span = info_span!("script.compile").entered();
        let mut prepared = self.prepare_build();

        if let Some(module) = self.cache.get(&prepared.original_key) {
            debug!(key = %prepared.original_key, "module cache hit");
            self.adopt_module(module)?;
            self.needs_compile.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let mut result = self
            .backend
            .compile(&prepared.request)
            .map_err(CompileError::backend)?;
        let mut attempts = 1;
        while failed(&result)
            && attempts < self.config.max_retries
            && self.augment_references(&mut prepared, &result.diagnostics)
        {
            debug!(attempt = attempts + 1, "recompiling with added references");
            result = self
                .backend
                .compile(&prepared.request)
                .map_err(CompileError::backend)?;
            attempts += 1;
        }
        self.finish_build(prepared, result)
    }

    // An entered span guard is not Send and would pin the future to one
    // thread; the async path attaches the span with `Instrument` instead.
    async fn internal_compile_suspending(&self) -> Result<(), CompileError> {
        async {
            let mut prepared = self.prepare_build();

            if let Some(module) = self.cache.get(&prepared.original_key) {
                debug!(key = %prepared.original_key, "module cache hit");
                self.adopt_module(module)?;
                self.needs_compile.store(false, Ordering::SeqCst);
                return Ok(());
            }

            let mut result = self
                .backend
                .compile_suspending(&prepared.request)
                .await
                .map_err(CompileError::backend)?;
            let mut attempts = 1;
            while failed(&result)
                && attempts < self.config.max_retries
                && self.augment_references(&mut prepared, &result.diagnostics)
            {
                debug!(attempt = attempts + 1, "recompiling with added references");
                result = self
                    .backend
                    .compile_suspending(&prepared.request)
                    .await
                    .map_err(CompileError::backend)?;
                attempts += 1;
            }
            self.finish_build(prepared, result)
        }
        .instrument(info_span!("script.compile_suspending"))
        .await
    }

    /// Extracts the missing module token from every missing-reference
    /// diagnostic and adds its resolved location to the reference set.
    /// Returns true when at least one token was found, which is what drives
    /// another attempt; even an already-known token keeps retrying until
    /// the attempt budget runs out.
    fn augment_references(&self, prepared: &mut PreparedBuild, diagnostics: &[Diagnostic]) -> bool {
        let mut found = false;
        for diagnostic in diagnostics {
            if diagnostic.kind != DiagnosticKind::MissingReference {
                continue;
            }
            if let Some(name) = missing_reference_token(&diagnostic.message) {
                found = true;
                let location =
                    references::resolve(self.locator.as_ref(), &name, &self.config.search_path);
                if prepared.references.add(&location) {
                    debug!(module = %name, "added missing reference");
                }
            }
        }
        if found {
            prepared.request.references = prepared.references.locations().to_vec();
        }
        found
    }

    /// Adopts the module on success and stores it under the original cache
    /// key; on failure hands every remaining diagnostic to the translator
    /// and raises one aggregated error if any survive.
    fn finish_build(&self, prepared: PreparedBuild, result: BuildResult) -> Result<(), CompileError> {
        let compile_failed = failed(&result);
        if !compile_failed {
            let module = result
                .module
                .ok_or_else(|| CompileError::backend(anyhow::anyhow!("backend returned no module")))?;
            self.cache.insert_if_absent(&prepared.original_key, module.clone());
            self.adopt_module(module)?;
        }

        let surfaced = {
            let assembler = self.assembler.lock().unwrap_or_else(|e| e.into_inner());
            diagnostics::translate(
                result.diagnostics,
                &assembler,
                self.document.as_ref(),
                &self.config.security,
                self.sink.as_ref(),
            )
        };
        if compile_failed && !surfaced.is_empty() {
            return Err(CompileError::compiler(surfaced.join("\n")));
        }
        self.needs_compile.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn failed(result: &BuildResult) -> bool {
    result
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error)
}
