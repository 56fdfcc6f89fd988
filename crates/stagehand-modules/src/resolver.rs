//! ---
//! sh_section: "03-module-orchestration"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Depth-first topological resolution of requested modules."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use std::collections::HashMap;

use tracing::debug;

use crate::error::{ModuleError, Result};
use crate::registry::{Module, ModuleRegistry};

/// Initialization order of every module required by a set of targets.
///
/// Each module appears once and strictly after all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<String>,
}

impl ExecutionPlan {
    pub fn modules(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|module| module == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.order
    }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current traversal path.
    Visiting,
    /// Already recorded in the plan.
    Done,
}

/// Compute the execution plan for `targets`.
///
/// Targets are visited in the given order, dependencies in declaration order, and every
/// module is recorded after its dependencies (post-order). Visibility is not checked
/// here.
pub fn resolve<S: AsRef<str>>(registry: &ModuleRegistry, targets: &[S]) -> Result<ExecutionPlan> {
    let mut walk = Walk {
        marks: HashMap::with_capacity(registry.len()),
        path: Vec::new(),
        order: Vec::new(),
        registry,
    };
    for target in targets {
        let target = target.as_ref();
        let module = registry
            .lookup(target)
            .ok_or_else(|| ModuleError::UnknownTarget {
                target: target.to_owned(),
            })?;
        walk.visit(module)?;
    }
    debug!(plan = ?walk.order, "resolved execution plan");
    Ok(ExecutionPlan { order: walk.order })
}

struct Walk<'a> {
    registry: &'a ModuleRegistry,
    marks: HashMap<&'a str, Mark>,
    path: Vec<&'a str>,
    order: Vec<String>,
}

impl<'a> Walk<'a> {
    fn visit(&mut self, module: &'a Module) -> Result<()> {
        let name = module.name();
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(self.cycle_through(name)),
            None => {}
        }

        self.marks.insert(name, Mark::Visiting);
        self.path.push(name);
        for dependency in module.dependencies() {
            let next = self
                .registry
                .lookup(dependency)
                .ok_or_else(|| ModuleError::MissingDependency {
                    module: name.to_owned(),
                    dependency: dependency.to_owned(),
                })?;
            self.visit(next)?;
        }
        self.path.pop();
        self.marks.insert(name, Mark::Done);
        self.order.push(name.to_owned());
        Ok(())
    }

    /// The portion of the current path that loops back to `name`.
    fn cycle_through(&self, name: &str) -> ModuleError {
        let start = self
            .path
            .iter()
            .position(|member| *member == name)
            .unwrap_or(0);
        let mut path: Vec<String> = self.path[start..].iter().map(|m| (*m).to_owned()).collect();
        path.push(name.to_owned());
        ModuleError::Cycle { path }
    }
}
