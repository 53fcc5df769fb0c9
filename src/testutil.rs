//! Shared fakes for the engine tests: an in-memory document model, a
//! configurable template, a scriptable backend and a recording sink.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{
    Binding, BuildRequest, BuildResult, CodeBackend, Diagnostic, DiagnosticKind, InvokeError,
    LoadableModule, ModuleInstance,
};
use crate::document::{Document, DocumentObject};
use crate::engine::cache::BuildCache;
use crate::engine::{CompileError, ErrorSink, ScriptEvent, ScriptUnit};
use crate::policy::EngineConfig;
use crate::template::ScriptTemplate;

// ---------------------------------------------------------------------------
// Document model

pub(crate) struct TestObject {
    name: String,
    script: Option<String>,
    expressions: Vec<String>,
    text: Mutex<Option<String>>,
    auto_grow: AtomicBool,
    error_fill: AtomicBool,
}

impl TestObject {
    pub fn text(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }

    pub fn auto_grow(&self) -> bool {
        self.auto_grow.load(Ordering::SeqCst)
    }

    pub fn error_filled(&self) -> bool {
        self.error_fill.load(Ordering::SeqCst)
    }
}

impl DocumentObject for TestObject {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn type_name(&self) -> String {
        String::from("Object")
    }

    fn custom_script(&self) -> Option<String> {
        self.script.clone()
    }

    fn expressions(&self) -> Vec<String> {
        self.expressions.clone()
    }

    fn display_text(&self) -> Option<String> {
        self.text()
    }

    fn set_display_text(&self, text: &str) {
        *self.text.lock().unwrap() = Some(text.to_string());
    }

    fn set_auto_grow(&self, grow: bool) {
        self.auto_grow.store(grow, Ordering::SeqCst);
    }

    fn set_error_fill(&self) {
        self.error_fill.store(true, Ordering::SeqCst);
    }
}

/// A displayed text object carrying expressions.
pub(crate) fn create_text_object(name: &str, text: &str, expressions: &[&str]) -> Arc<TestObject> {
    Arc::new(TestObject {
        name: name.to_string(),
        script: None,
        expressions: expressions.iter().map(|e| e.to_string()).collect(),
        text: Mutex::new(Some(text.to_string())),
        auto_grow: AtomicBool::new(false),
        error_fill: AtomicBool::new(false),
    })
}

/// An object carrying a custom event-handler script and no display text.
pub(crate) fn create_scripted_object(name: &str, script: &str) -> Arc<TestObject> {
    Arc::new(TestObject {
        name: name.to_string(),
        script: Some(script.to_string()),
        expressions: Vec::new(),
        text: Mutex::new(None),
        auto_grow: AtomicBool::new(false),
        error_fill: AtomicBool::new(false),
    })
}

pub(crate) struct TestDocument {
    objects: Mutex<Vec<Arc<TestObject>>>,
}

impl TestDocument {
    pub fn add_object(&self, object: Arc<TestObject>) {
        self.objects.lock().unwrap().push(object);
    }
}

impl Document for TestDocument {
    fn objects(&self) -> Vec<Arc<dyn DocumentObject>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.clone() as Arc<dyn DocumentObject>)
            .collect()
    }

    fn is_valid_column(&self, name: &str) -> bool {
        name == "Items.Amount" || name == "Items.Qty"
    }

    fn is_simple_column(&self, name: &str) -> bool {
        name == "Items.Qty"
    }

    fn is_valid_parameter(&self, name: &str) -> bool {
        name == "TaxRate"
    }

    fn is_valid_total(&self, name: &str) -> bool {
        name == "GrandTotal"
    }

    fn column_type(&self, name: &str) -> Option<String> {
        (name == "Items.Amount").then(|| String::from("f64"))
    }
}

/// Dictionary: columns `Items.Amount` (f64) and `Items.Qty` (simple),
/// parameter `TaxRate`, total `GrandTotal`. No objects until added.
pub(crate) fn create_document() -> Arc<TestDocument> {
    Arc::new(TestDocument {
        objects: Mutex::new(Vec::new()),
    })
}

// ---------------------------------------------------------------------------
// Template

const ANCHOR_MARKER: &str = "// <body>";
const EMPTY_SKELETON: &str = "class ReportScript {\n// <body>\n}\n";

pub(crate) struct TestTemplate {
    skeleton: String,
    anchored: bool,
}

impl ScriptTemplate for TestTemplate {
    fn skeleton(&self) -> String {
        self.skeleton.clone()
    }

    fn empty_skeleton(&self) -> String {
        String::from(EMPTY_SKELETON)
    }

    fn insert_anchor(&self, source: &str) -> Option<usize> {
        if !self.anchored {
            return None;
        }
        source.find(ANCHOR_MARKER)
    }

    fn entry_type(&self) -> String {
        String::from("ReportScript")
    }

    fn field_declaration(&self, type_name: &str, name: &str) -> String {
        format!("field {name}: {type_name};\n")
    }

    fn begin_expression_block(&self) -> String {
        String::from("// begin calc\n")
    }

    fn end_expression_block(&self) -> String {
        String::from("// end calc\n")
    }

    fn expression_method(&self, key: &str, body: &str) -> String {
        format!("calc {key:?} {{ {body} }}\n")
    }

    fn column_accessor(&self, name: &str, column_type: Option<&str>) -> String {
        format!("column::<{}>({name:?})", column_type.unwrap_or("Value"))
    }

    fn parameter_accessor(&self, name: &str) -> String {
        format!("parameter({name:?})")
    }

    fn total_accessor(&self, name: &str) -> String {
        format!("total({name:?})")
    }

    fn initializer(&self) -> String {
        String::from("init();\n")
    }

    fn rename_entry_class(&self, source: &str, class_name: &str) -> String {
        source.replacen("class ReportScript", &format!("class {class_name}"), 1)
    }

    fn stub_classes(&self) -> Option<String> {
        Some(String::from("// stub class Shim\n"))
    }
}

/// Skeleton with one custom line before the entry class; differs from the
/// empty sentinel, so a fresh unit starts dirty. The anchor sits on line 3.
pub(crate) fn create_template() -> Arc<TestTemplate> {
    Arc::new(TestTemplate {
        skeleton: format!("// custom\n{EMPTY_SKELETON}"),
        anchored: true,
    })
}

/// Skeleton equal to the empty sentinel; a fresh unit starts clean.
pub(crate) fn create_empty_template() -> Arc<TestTemplate> {
    Arc::new(TestTemplate {
        skeleton: String::from(EMPTY_SKELETON),
        anchored: true,
    })
}

pub(crate) fn create_template_without_anchor() -> Arc<TestTemplate> {
    Arc::new(TestTemplate {
        skeleton: String::from(EMPTY_SKELETON),
        anchored: false,
    })
}

// ---------------------------------------------------------------------------
// Backend

#[derive(Clone)]
pub(crate) enum FakeOutcome {
    Success,
    Fail(Vec<Diagnostic>),
}

/// Shared between the backend and every instance it produced, so tests can
/// flip invocation behavior after a module is already loaded.
type InvocationFault = Arc<Mutex<Option<String>>>;

pub(crate) struct FakeBackend {
    calls: AtomicUsize,
    requests: Mutex<Vec<BuildRequest>>,
    queued: Mutex<VecDeque<FakeOutcome>>,
    fallback: Mutex<FakeOutcome>,
    hang: AtomicBool,
    fault: InvocationFault,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(FakeOutcome::Success),
            hang: AtomicBool::new(false),
            fault: Arc::default(),
        }
    }
}

impl FakeBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<BuildRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Queues outcomes for the next compiles; once drained, compiles fall
    /// back to the persistent outcome (success unless overridden).
    pub fn queue(&self, outcomes: Vec<FakeOutcome>) {
        self.queued.lock().unwrap().extend(outcomes);
    }

    pub fn set_fallback(&self, outcome: FakeOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Makes every subsequent method invocation on already-loaded instances
    /// fail with `message`.
    pub fn fail_invocations(&self, message: &str) {
        *self.fault.lock().unwrap() = Some(message.to_string());
    }

    /// Makes suspending compiles pend forever, for cancellation tests.
    pub fn hang_suspending_compiles(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl CodeBackend for FakeBackend {
    fn compile(&self, request: &BuildRequest) -> anyhow::Result<BuildResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let outcome = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        Ok(match outcome {
            FakeOutcome::Success => BuildResult {
                module: Some(Arc::new(FakeModule {
                    fault: self.fault.clone(),
                })),
                diagnostics: Vec::new(),
            },
            FakeOutcome::Fail(diagnostics) => BuildResult {
                module: None,
                diagnostics,
            },
        })
    }

    async fn compile_suspending(&self, request: &BuildRequest) -> anyhow::Result<BuildResult> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.compile(request)
    }
}

#[derive(Default)]
pub(crate) struct FakeModule {
    fault: InvocationFault,
}

impl LoadableModule for FakeModule {
    fn instantiate(&self, _entry_type: &str) -> anyhow::Result<Box<dyn ModuleInstance>> {
        Ok(Box::new(FakeInstance {
            fault: self.fault.clone(),
        }))
    }
}

pub(crate) struct FakeInstance {
    fault: InvocationFault,
}

impl ModuleInstance for FakeInstance {
    fn bind(&self, _name: &str, _value: Binding) {}

    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, InvokeError> {
        if let Some(message) = self.fault.lock().unwrap().clone() {
            return Err(InvokeError::new(method, anyhow!(message)));
        }
        Ok(json!("ok"))
    }
}

pub(crate) fn create_module() -> Arc<dyn LoadableModule> {
    Arc::new(FakeModule::default())
}

/// A missing-reference error whose message quotes the module the way real
/// compilers do, so the retry loop can parse it back out.
pub(crate) fn missing_reference(name: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticKind::MissingReference,
        "E0104",
        &format!("the module '{name}, Version=1.0.0' could not be found"),
        1,
        1,
    )
}

// ---------------------------------------------------------------------------
// Sink

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<ScriptEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ScriptEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, event: ScriptEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Unit wiring

/// A unit over the given document and template with a success backend, a
/// recording sink and a cache private to this call.
pub(crate) fn create_unit(
    document: Arc<TestDocument>,
    template: Arc<TestTemplate>,
) -> Result<ScriptUnit, CompileError> {
    UnitBuilder {
        document,
        template,
        ..UnitBuilder::new()
    }
    .build()
}

/// Builds units sharing one backend, cache and sink, so tests can assert
/// cross-unit behavior (cache hits, backend call counts).
pub(crate) struct UnitBuilder {
    pub document: Arc<TestDocument>,
    pub template: Arc<TestTemplate>,
    pub backend: Arc<FakeBackend>,
    pub cache: Arc<BuildCache>,
    pub sink: Arc<RecordingSink>,
    pub config: EngineConfig,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self {
            document: create_document(),
            template: create_template(),
            backend: Arc::new(FakeBackend::default()),
            cache: Arc::new(BuildCache::new()),
            sink: Arc::new(RecordingSink::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_document(mut self, document: Arc<TestDocument>) -> Self {
        self.document = document;
        self
    }

    pub fn with_empty_template(mut self) -> Self {
        self.template = create_empty_template();
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Persistent outcome for every compile.
    pub fn with_backend_outcome(self, outcome: FakeOutcome) -> Self {
        self.backend.set_fallback(outcome);
        self
    }

    /// One-shot outcomes for the next compiles; later compiles succeed.
    pub fn with_backend_outcomes(self, outcomes: Vec<FakeOutcome>) -> Self {
        self.backend.queue(outcomes);
        self
    }

    pub fn build(&self) -> Result<ScriptUnit, CompileError> {
        Ok(ScriptUnit::new(
            self.document.clone(),
            self.template.clone(),
            self.backend.clone(),
            self.sink.clone(),
            self.config.clone(),
        )?
        .with_cache(self.cache.clone()))
    }
}
