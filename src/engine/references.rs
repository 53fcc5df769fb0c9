//! Computes the deduplicated set of external modules required to compile a
//! unit: runtime base modules, the document's declared references (after
//! legacy-name migration) and the fixed dynamic-evaluation support modules.

use ahash::AHashSet;
use std::path::{Path, PathBuf};

use crate::document::Document;

/// Old module names still found in documents saved by previous versions,
/// mapped to their current replacements before lookup.
const LEGACY_MODULE_MIGRATIONS: &[(&str, &str)] = &[
    ("ReportScript.WinForms", "ReportScript.Compat"),
    ("ReportScript.WinCharts", "ReportScript.Charting"),
];

/// Required for late-bound / dynamic-typing expression evaluation.
const DYNAMIC_SUPPORT_MODULES: &[&str] = &["Scripting.Core", "Scripting.Dynamic"];

/// Locates modules in the running process. Low-level discovery heuristics
/// live on the host side; the defaults make the backend resolve bare names
/// itself.
pub trait ModuleLocator: Send + Sync {
    /// Runtime-provided base modules every script compilation references.
    fn base_modules(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Full location of a module already loaded in the running process.
    fn loaded_module(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    /// Metadata-only load of a declared transitive reference that is not
    /// loaded yet.
    fn load_declared(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Locator with no process knowledge; every name passes through to the
/// backend unresolved.
pub struct DefaultLocator;

impl ModuleLocator for DefaultLocator {}

/// Reference locations deduplicated by file name, case-insensitive.
#[derive(Debug, Default)]
pub struct ReferenceSet {
    locations: Vec<String>,
    seen: AHashSet<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `location` unless a reference with the same file name is already
    /// present. Blank locations are ignored.
    pub fn add(&mut self, location: &str) -> bool {
        let key = file_name_key(location);
        if key.is_empty() || !self.seen.insert(key) {
            return false;
        }
        self.locations.push(location.to_string());
        true
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// File names in sorted order, for order-insensitive cache keying.
    pub fn file_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locations.iter().map(|l| file_name_key(l)).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

fn file_name_key(location: &str) -> String {
    Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub(crate) fn migrate_legacy_name(name: &str) -> String {
    for (old, new) in LEGACY_MODULE_MIGRATIONS {
        if name.contains(old) {
            return (*new).to_string();
        }
    }
    name.to_string()
}

/// Resolution order: already loaded in the process, then a declared but
/// unloaded transitive reference, then a file under `search_path`, then the
/// bare name passed through for the backend to resolve.
pub(crate) fn resolve(locator: &dyn ModuleLocator, name: &str, search_path: &Path) -> String {
    if name.trim().is_empty() {
        return String::new();
    }
    if let Some(location) = locator.loaded_module(name) {
        return location.to_string_lossy().into_owned();
    }
    if let Some(location) = locator.load_declared(name) {
        return location.to_string_lossy().into_owned();
    }
    let candidate = search_path.join(name);
    if candidate.exists() {
        return candidate.to_string_lossy().into_owned();
    }
    name.to_string()
}

/// The full reference set for one compile: base modules, migrated declared
/// references, dynamic support modules.
pub(crate) fn collect(
    document: &dyn Document,
    locator: &dyn ModuleLocator,
    search_path: &Path,
) -> ReferenceSet {
    let mut references = ReferenceSet::new();
    for module in locator.base_modules() {
        references.add(&module.to_string_lossy());
    }
    for declared in document.declared_references() {
        let name = migrate_legacy_name(&declared);
        references.add(&resolve(locator, &name, search_path));
    }
    for support in DYNAMIC_SUPPORT_MODULES {
        references.add(&resolve(locator, support, search_path));
    }
    references
}
