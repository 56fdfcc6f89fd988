//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Named modules with their initializers, visibility, and dependencies."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use stagehand_services::SharedService;

use crate::error::{ModuleError, Result};

/// Builds the service of a module. `Ok(None)` means the module has nothing to run.
pub type Initializer = Box<dyn Fn() -> anyhow::Result<Option<SharedService>> + Send + Sync>;

/// A named unit of configuration.
pub struct Module {
    name: String,
    initializer: Option<Initializer>,
    visible: bool,
    dependencies: IndexSet<String>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("grouping", &self.is_grouping())
            .field("visible", &self.visible)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the module may be requested directly as a target.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Grouping modules have no initializer and only pull in their dependencies.
    pub fn is_grouping(&self) -> bool {
        self.initializer.is_none()
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> + '_ {
        self.dependencies.iter().map(String::as_str)
    }

    /// Run the initializer. Grouping modules yield `Ok(None)`.
    pub fn initialize(&self) -> anyhow::Result<Option<SharedService>> {
        match &self.initializer {
            Some(initializer) => initializer(),
            None => Ok(None),
        }
    }
}

/// Insertion-ordered set of modules, keyed by name.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module. Names are unique; registering an existing name fails.
    pub fn register<I, S>(
        &mut self,
        name: impl Into<String>,
        initializer: Option<Initializer>,
        visible: bool,
        dependencies: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(ModuleError::Duplicate { module: name });
        }
        self.insert(name, initializer, visible, dependencies);
        Ok(())
    }

    /// Insert or overwrite a module, returning the entry it displaced.
    pub fn replace<I, S>(
        &mut self,
        name: impl Into<String>,
        initializer: Option<Initializer>,
        visible: bool,
        dependencies: I,
    ) -> Option<Module>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name.into(), initializer, visible, dependencies)
    }

    fn insert<I, S>(
        &mut self,
        name: String,
        initializer: Option<Initializer>,
        visible: bool,
        dependencies: I,
    ) -> Option<Module>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let module = Module {
            name: name.clone(),
            initializer,
            visible,
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        };
        self.modules.insert(name, module)
    }

    /// Declare additional dependencies of an already registered module.
    ///
    /// Dependencies do not need to exist yet; they are checked at resolution time.
    pub fn add_dependency<I, S>(&mut self, name: &str, dependencies: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let module = self
            .modules
            .get_mut(name)
            .ok_or_else(|| ModuleError::UnknownModule {
                module: name.to_owned(),
            })?;
        module
            .dependencies
            .extend(dependencies.into_iter().map(Into::into));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&IndexSet<String>> {
        self.modules.get(name).map(|module| &module.dependencies)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All modules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> + '_ {
        self.modules.values()
    }

    /// Modules that may be requested as targets, in registration order.
    pub fn visible_modules(&self) -> impl Iterator<Item = &Module> + '_ {
        self.iter().filter(|module| module.is_visible())
    }
}
