//! Interface to the skeleton template and code generation helpers.
//!
//! The concrete language backend supplies the skeleton source, the insertion
//! anchor, and the snippets the assembler splices in. The engine treats all
//! of these as opaque text.

/// Skeleton template plus per-language code generation.
pub trait ScriptTemplate: Send + Sync {
    /// Initial source text the assembler starts from.
    fn skeleton(&self) -> String;

    /// Sentinel skeleton recognized as "no custom code": a unit built from
    /// it never compiles.
    fn empty_skeleton(&self) -> String;

    /// Byte offset where generated fragments are inserted, or `None` when
    /// the skeleton carries no anchor (a fatal configuration error).
    fn insert_anchor(&self, source: &str) -> Option<usize>;

    /// Name of the entry type instantiated from the compiled module.
    fn entry_type(&self) -> String;

    fn field_declaration(&self, type_name: &str, name: &str) -> String;

    fn begin_expression_block(&self) -> String;

    fn end_expression_block(&self) -> String;

    /// An evaluator method computing `body`, dispatched under the literal
    /// expression `key`.
    fn expression_method(&self, key: &str, body: &str) -> String;

    fn column_accessor(&self, name: &str, column_type: Option<&str>) -> String;

    fn parameter_accessor(&self, name: &str) -> String;

    fn total_accessor(&self, name: &str) -> String;

    /// Initialization method appended when exporting a standalone class.
    fn initializer(&self) -> String {
        String::new()
    }

    /// Rewrites the entry class name in `source`, for designer export.
    fn rename_entry_class(&self, source: &str, class_name: &str) -> String;

    /// Stub classes inserted under the add-stub-classes security policy.
    fn stub_classes(&self) -> Option<String> {
        None
    }

    /// Bodies of registered custom functions, inserted by
    /// [`crate::engine::ScriptUnit::add_functions`].
    fn function_sources(&self) -> Vec<String> {
        Vec::new()
    }
}
