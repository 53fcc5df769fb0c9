//! One assembled-source/compile/cache lifecycle tied to a render session.
//!
//! A `ScriptUnit` collects generated fragments and registered expressions,
//! compiles them through the backend (see [`crate::engine::compile`]) and
//! exposes expression/method invocation against the loaded module instance.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;

use crate::backend::{Binding, CodeBackend, LoadableModule, ModuleInstance};
use crate::document::{Document, DocumentObject};
use crate::engine::assembler::SourceAssembler;
use crate::engine::cache::BuildCache;
use crate::engine::references::{DefaultLocator, ModuleLocator};
use crate::engine::registry::{
    self, EVALUATOR_METHOD, ExpressionHandle, ExpressionRegistry, METHOD_HANDLE_PREFIX,
};
use crate::engine::{CompileError, ErrorSink, ScriptEvent};
use crate::policy::EngineConfig;
use crate::template::ScriptTemplate;

/// Owner name recorded for registered custom function fragments.
const FUNCTION_OWNER: &str = "Function";

pub(crate) struct CompiledScript {
    pub module: Arc<dyn LoadableModule>,
    pub instance: Box<dyn ModuleInstance>,
}

pub struct ScriptUnit {
    pub(crate) document: Arc<dyn Document>,
    pub(crate) template: Arc<dyn ScriptTemplate>,
    pub(crate) backend: Arc<dyn CodeBackend>,
    pub(crate) locator: Arc<dyn ModuleLocator>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) cache: Arc<BuildCache>,
    pub(crate) config: EngineConfig,
    pub(crate) assembler: Mutex<SourceAssembler>,
    pub(crate) registry: RwLock<ExpressionRegistry>,
    pub(crate) compiled: RwLock<Option<CompiledScript>>,
    pub(crate) needs_compile: AtomicBool,
    pub(crate) stubs_inserted: AtomicBool,
    /// Exclusive gate for the suspend-capable compile path.
    pub(crate) gate: Semaphore,
}

impl ScriptUnit {
    /// Builds a unit over the template skeleton. Fails with a configuration
    /// error when the skeleton carries no insertion anchor; no compilation
    /// is attempted in that case.
    pub fn new(
        document: Arc<dyn Document>,
        template: Arc<dyn ScriptTemplate>,
        backend: Arc<dyn CodeBackend>,
        sink: Arc<dyn ErrorSink>,
        config: EngineConfig,
    ) -> Result<Self, CompileError> {
        let skeleton = template.skeleton();
        let Some(anchor) = template.insert_anchor(&skeleton) else {
            let error = CompileError::missing_anchor();
            sink.report(ScriptEvent::Message(error.to_string()));
            return Err(error);
        };
        let needs_compile = skeleton != template.empty_skeleton();
        Ok(Self {
            document,
            template,
            backend,
            locator: Arc::new(DefaultLocator),
            sink,
            cache: BuildCache::global(),
            config,
            assembler: Mutex::new(SourceAssembler::new(&skeleton, anchor)),
            registry: RwLock::new(ExpressionRegistry::new()),
            compiled: RwLock::new(None),
            needs_compile: AtomicBool::new(needs_compile),
            stubs_inserted: AtomicBool::new(false),
            gate: Semaphore::new(1),
        })
    }

    /// Replaces the process-wide module locator.
    pub fn with_locator(mut self, locator: Arc<dyn ModuleLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Replaces the build cache; units share compiled modules through it.
    pub fn with_cache(mut self, cache: Arc<BuildCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Current assembled source text.
    pub fn source(&self) -> String {
        let assembler = self.assembler.lock().unwrap_or_else(|e| e.into_inner());
        assembler.source().to_string()
    }

    pub fn needs_compile(&self) -> bool {
        self.needs_compile.load(Ordering::SeqCst)
    }

    pub(crate) fn insert_fragment(&self, fragment: &str, owner: &str) {
        let mut assembler = self.assembler.lock().unwrap_or_else(|e| e.into_inner());
        assembler.insert(fragment, owner);
    }

    /// Inserts field declarations for the document/engine back-references
    /// and every uniquely-named object, then each object's custom script.
    /// Identical custom-script blocks are inserted once.
    pub fn add_objects(&self) {
        let declarations = format!(
            "{}{}",
            self.template.field_declaration("Document", "Document"),
            self.template.field_declaration("Engine", "Engine"),
        );
        self.insert_fragment(&declarations, "Document");

        let mut named: BTreeMap<String, Arc<dyn DocumentObject>> = BTreeMap::new();
        for object in self.document.objects() {
            let name = object.name();
            if !name.is_empty() {
                named.entry(name).or_insert(object);
            }
        }
        for (name, object) in &named {
            self.insert_fragment(&self.template.field_declaration(&object.type_name(), name), name);
        }

        let mut processed = String::new();
        for (name, object) in &named {
            if let Some(script) = object.custom_script() {
                if !script.is_empty() && !processed.contains(&script) {
                    self.insert_fragment(&script, name);
                    processed.push_str(&script);
                    self.needs_compile.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Registers every expression of every document object inside the
    /// template's expression block.
    pub fn add_expressions(&self) {
        self.insert_fragment(&self.template.begin_expression_block(), "");
        for object in self.document.objects() {
            let owner = object.name();
            for expression in object.expressions() {
                self.register_expression(&expression, Some(&owner), false);
            }
        }
        self.insert_fragment(&self.template.end_expression_block(), "");
    }

    /// Registers one expression unconditionally, in its own expression
    /// block. Used when a single expression is evaluated outside a full
    /// render pass.
    pub fn add_single_expression(&self, expression: &str) {
        self.insert_fragment(&self.template.begin_expression_block(), "");
        self.register_expression(expression, None, true);
        self.insert_fragment(&self.template.end_expression_block(), "");
        self.needs_compile.store(true, Ordering::SeqCst);
    }

    /// Inserts the bodies of registered custom functions.
    pub fn add_functions(&self) {
        for body in self.template.function_sources() {
            self.insert_fragment(&body, FUNCTION_OWNER);
        }
    }

    /// Appends the template initializer and returns the source with the
    /// entry class renamed, for designer export. The unit itself keeps
    /// compiling under the template's own entry type.
    pub fn generate_class(&self, class_name: &str) -> String {
        let mut assembler = self.assembler.lock().unwrap_or_else(|e| e.into_inner());
        assembler.insert(&self.template.initializer(), "");
        self.template.rename_entry_class(assembler.source(), class_name)
    }

    /// Registers a callable handle for `expression` and inserts its
    /// generated evaluator method, owned by `owner`.
    ///
    /// Blank and already-registered expressions are skipped; unless `force`,
    /// expressions the render path can evaluate directly (simple columns,
    /// parameters, totals) are skipped as well.
    pub fn register_expression(&self, expression: &str, owner: Option<&str>, force: bool) {
        if expression.trim().is_empty() {
            return;
        }
        {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            if registry.contains(expression) {
                return;
            }
        }

        let stripped = strip_brackets(expression);
        if !force
            && (self.document.is_simple_column(stripped)
                || self.document.is_valid_parameter(stripped)
                || self.document.is_valid_total(stripped))
        {
            return;
        }

        {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.insert(expression.to_string(), ExpressionHandle::new(EVALUATOR_METHOD));
        }

        // Complex expressions and relations go through accessor rewriting.
        let target = if self.document.is_valid_column(stripped) {
            format!("[{stripped}]")
        } else {
            expression.to_string()
        };
        let body = registry::rewrite_references(self.document.as_ref(), self.template.as_ref(), &target);
        self.insert_fragment(
            &self.template.expression_method(expression, &body),
            owner.unwrap_or(""),
        );
        self.needs_compile.store(true, Ordering::SeqCst);
    }

    pub fn contains_expression(&self, expression: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.contains(expression)
    }

    /// Evaluates a registered expression against the loaded instance,
    /// passing `(expression, value)`. Returns `None` when the expression was
    /// never registered or no module is loaded.
    pub fn evaluate(&self, expression: &str, value: Value) -> anyhow::Result<Option<Value>> {
        let method = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            match registry.get(expression) {
                Some(handle) => handle.method_name.clone(),
                None => return Ok(None),
            }
        };
        let compiled = self.compiled.read().unwrap_or_else(|e| e.into_inner());
        let Some(script) = compiled.as_ref() else {
            return Ok(None);
        };
        let args = [Value::String(expression.to_string()), value];
        match script.instance.invoke(&method, &args) {
            Ok(result) => Ok(Some(result)),
            Err(error) => Err(error.into_original()),
        }
    }

    /// Invokes a script method by name, registering a handle on first use.
    /// Invocation failures surface the original underlying error, not the
    /// invocation wrapper.
    pub fn invoke_method(&self, name: &str, args: &[Value]) -> anyhow::Result<Option<Value>> {
        if name.is_empty() {
            return Ok(None);
        }
        let key = format!("{METHOD_HANDLE_PREFIX}{name}");
        let method = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            if !registry.contains(&key) {
                registry.insert(key.clone(), ExpressionHandle::new(name));
            }
            registry
                .get(&key)
                .map(|handle| handle.method_name.clone())
                .unwrap_or_else(|| name.to_string())
        };
        let compiled = self.compiled.read().unwrap_or_else(|e| e.into_inner());
        let Some(script) = compiled.as_ref() else {
            return Ok(None);
        };
        match script.instance.invoke(&method, args) {
            Ok(result) => Ok(Some(result)),
            Err(error) => Err(error.into_original()),
        }
    }

    /// Instantiates the entry type and binds the document, engine and every
    /// named live object onto it. Declared fields without a live object stay
    /// unbound.
    pub(crate) fn adopt_module(&self, module: Arc<dyn LoadableModule>) -> Result<(), CompileError> {
        let instance = module
            .instantiate(&self.template.entry_type())
            .map_err(CompileError::backend)?;
        instance.bind("Document", Binding::Document(self.document.clone()));
        instance.bind("Engine", Binding::Engine);
        for object in self.document.objects() {
            let name = object.name();
            if !name.is_empty() {
                instance.bind(&name, Binding::Object(object));
            }
        }
        let mut compiled = self.compiled.write().unwrap_or_else(|e| e.into_inner());
        *compiled = Some(CompiledScript { module, instance });
        Ok(())
    }
}

/// Strips a single layer of surrounding bracket delimiters.
fn strip_brackets(expression: &str) -> &str {
    if expression.starts_with('[') && expression.ends_with(']') && expression.len() >= 2 {
        &expression[1..expression.len() - 1]
    } else {
        expression
    }
}
