use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use lol_html::Selector;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    directive::{ComponentDirective, Directive},
    error::ModuleError,
    expr::{FilterFn, Filters},
};

/// Name of the module every runtime loads first.
pub const CORE_MODULE: &str = "core";

/// Extension module requested by a runtime.
///
/// With a `path`, the manifest at that location (relative to the process
/// working directory) is loaded and must declare the same `name`. Without
/// one, the module must already be registered in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl ModuleDescriptor {
    pub fn registered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }

    pub fn manifest(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }
}

/// A named bundle of directives, filters and constants.
pub struct Module {
    name: String,
    directives: Vec<Arc<dyn Directive>>,
    filters: Filters,
    constants: Map<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directives: Vec::new(),
            filters: Filters::default(),
            constants: Map::new(),
        }
    }

    pub fn with_directive(mut self, directive: impl Directive + 'static) -> Result<Self, ModuleError> {
        directive
            .selector()
            .parse::<Selector>()
            .map_err(|err| ModuleError::InvalidSelector {
                directive: directive.name().to_string(),
                selector: directive.selector().to_string(),
                message: err.to_string(),
            })?;
        self.directives.push(Arc::new(directive));
        Ok(self)
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: FilterFn) -> Self {
        self.filters.insert(name, filter);
        self
    }

    pub fn with_filters(mut self, filters: &Filters) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn with_constant(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constants.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directives(&self) -> &[Arc<dyn Directive>] {
        &self.directives
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn constants(&self) -> &Map<String, Value> {
        &self.constants
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field(
                "directives",
                &self.directives.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .field("constants", &self.constants.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ModuleManifest {
    name: String,
    #[serde(default)]
    constants: Map<String, Value>,
    #[serde(default)]
    components: BTreeMap<String, String>,
}

impl ModuleManifest {
    fn into_module(self, path: &Path) -> Result<Module, ModuleError> {
        let mut module = Module::new(self.name);
        for (key, value) in self.constants {
            module = module.with_constant(key, value);
        }
        for (tag, template) in self.components {
            if tag.is_empty() || !tag.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') {
                return Err(ModuleError::Manifest {
                    path: path.to_path_buf(),
                    message: format!("invalid component tag `{tag}`"),
                });
            }
            module = module.with_directive(ComponentDirective::new(tag, template))?;
        }
        Ok(module)
    }
}

/// Process-wide module namespace shared by every runtime of an environment.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a module under its own name.
    pub fn register(&self, module: Module) -> Arc<Module> {
        let module = Arc::new(module);
        let replaced = self
            .modules
            .insert(module.name().to_string(), Arc::clone(&module))
            .is_some();
        debug!(
            target = "vellum::render::module",
            module = module.name(),
            directives = module.directives().len(),
            replaced,
            "module registered"
        );
        module
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Make the module a descriptor names available, loading its manifest
    /// when the descriptor carries a path.
    pub fn load_descriptor(
        &self,
        descriptor: &ModuleDescriptor,
        base_dir: &Path,
    ) -> Result<(), ModuleError> {
        let Some(relative) = descriptor.path.as_ref() else {
            return if self.contains(&descriptor.name) {
                Ok(())
            } else {
                Err(ModuleError::unknown(&descriptor.name))
            };
        };

        let path = base_dir.join(relative);
        let text = std::fs::read_to_string(&path).map_err(|source| ModuleError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: ModuleManifest =
            toml::from_str(&text).map_err(|err| ModuleError::Manifest {
                path: path.clone(),
                message: err.to_string(),
            })?;

        if manifest.name != descriptor.name {
            return Err(ModuleError::NameMismatch {
                expected: descriptor.name.clone(),
                found: manifest.name,
            });
        }

        self.register(manifest.into_module(&path)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[test]
    fn manifest_registers_constants_and_components() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("site.toml"),
            r#"
name = "site"

[constants]
site_name = "Demo"
years = [2024, 2025]

[components]
site-footer = "<footer>{{ site_name }}</footer>"
"#,
        )
        .unwrap();

        let registry = ModuleRegistry::new();
        registry
            .load_descriptor(&ModuleDescriptor::manifest("site", "site.toml"), dir.path())
            .expect("manifest loads");

        let module = registry.get("site").expect("registered");
        assert_eq!(module.constants().get("site_name"), Some(&json!("Demo")));
        assert_eq!(module.constants().get("years"), Some(&json!([2024, 2025])));
        assert_eq!(module.directives().len(), 1);
        assert_eq!(module.directives()[0].selector(), "site-footer");
    }

    #[test]
    fn manifest_name_must_match_descriptor() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("other.toml"), "name = \"other\"\n").unwrap();

        let registry = ModuleRegistry::new();
        let err = registry
            .load_descriptor(&ModuleDescriptor::manifest("site", "other.toml"), dir.path())
            .unwrap_err();

        assert!(matches!(
            err,
            ModuleError::NameMismatch { ref expected, ref found } if expected == "site" && found == "other"
        ));
        assert!(!registry.contains("other"));
    }

    #[test]
    fn pathless_descriptor_requires_prior_registration() {
        let registry = ModuleRegistry::new();
        let descriptor = ModuleDescriptor::registered("cms");
        assert!(matches!(
            registry.load_descriptor(&descriptor, Path::new(".")),
            Err(ModuleError::Unknown { .. })
        ));

        registry.register(Module::new("cms"));
        registry
            .load_descriptor(&descriptor, Path::new("."))
            .expect("registered module resolves");
    }

    #[test]
    fn missing_manifest_reports_path() {
        let registry = ModuleRegistry::new();
        let err = registry
            .load_descriptor(
                &ModuleDescriptor::manifest("site", "does-not-exist.toml"),
                Path::new("/nonexistent"),
            )
            .unwrap_err();
        assert!(matches!(err, ModuleError::Io { .. }));
    }
}
