//! Dependency resolution memoized for one planning session.

use super::error::MigrationError;
use crate::component::{ComponentSet, Dependency, Version};
use std::collections::HashMap;

/// Remembers which version each dependency resolved to.
///
/// A cache belongs to one planning run and is handed to every graph
/// expansion of that run; it is dropped with the run.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    resolved: HashMap<Dependency, Option<Version>>,
    hits: usize,
}

impl ResolutionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// [`Dependency::best_version`], computed once per dependency.
    pub fn best_version(
        &mut self,
        dependency: &Dependency,
        components: &ComponentSet,
    ) -> Result<Option<Version>, MigrationError> {
        if let Some(found) = self.resolved.get(dependency) {
            self.hits += 1;
            return Ok(found.clone());
        }
        let found = dependency.best_version(components)?;
        self.resolved.insert(dependency.clone(), found.clone());
        Ok(found)
    }

    /// Versions `version` depends on that belong to `components`.
    ///
    /// Requirements on anything outside the set are skipped.
    pub fn successors(
        &mut self,
        version: &Version,
        components: &ComponentSet,
    ) -> Result<Vec<Version>, MigrationError> {
        let mut found = Vec::with_capacity(version.dependencies().len());
        for dependency in version.dependencies() {
            if let Some(best) = self.best_version(dependency, components)? {
                found.push(best);
            }
        }
        Ok(found)
    }

    /// Number of distinct dependencies resolved so far.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Lookups answered without resolving again.
    pub fn hits(&self) -> usize {
        self.hits
    }
}
