//! Interface to the document object model.
//!
//! The document model and rendering pipeline live in the host application;
//! the engine only needs dictionary queries, the set of named objects, the
//! declared reference list, and per-object script/expression sources.

use std::sync::Arc;

/// The document being rendered.
pub trait Document: Send + Sync {
    /// All named objects of the document, including data dictionary items.
    fn objects(&self) -> Vec<Arc<dyn DocumentObject>>;

    fn find_object(&self, name: &str) -> Option<Arc<dyn DocumentObject>> {
        self.objects().into_iter().find(|o| o.name() == name)
    }

    /// External modules the document declares as compile references.
    fn declared_references(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_valid_column(&self, name: &str) -> bool;

    /// A column the render path can evaluate without generated code.
    fn is_simple_column(&self, name: &str) -> bool {
        self.is_valid_column(name)
    }

    fn is_valid_parameter(&self, name: &str) -> bool;

    fn is_valid_total(&self, name: &str) -> bool;

    fn column_type(&self, _name: &str) -> Option<String> {
        None
    }
}

/// A named object of the document. Display mutation hooks are used by
/// diagnostic auto-recovery and are no-ops for objects without a displayed
/// text.
pub trait DocumentObject: Send + Sync {
    fn name(&self) -> String;

    /// Type name used for the generated field declaration.
    fn type_name(&self) -> String;

    /// Custom event-handler code attached to this object.
    fn custom_script(&self) -> Option<String> {
        None
    }

    /// Expressions referenced by this object's properties.
    fn expressions(&self) -> Vec<String> {
        Vec::new()
    }

    fn display_text(&self) -> Option<String> {
        None
    }

    fn set_display_text(&self, _text: &str) {}

    fn set_auto_grow(&self, _grow: bool) {}

    /// Fill the object with the error highlight color.
    fn set_error_fill(&self) {}

    /// Bracket pair delimiting expressions inside this object's text.
    fn brackets(&self) -> (String, String) {
        (String::from("["), String::from("]"))
    }
}
