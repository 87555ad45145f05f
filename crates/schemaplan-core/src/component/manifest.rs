//! Declarative component metadata loaded from JSON.
//!
//! ```json
//! {
//!   "components": {
//!     "blog": {
//!       "versions": {
//!         "1.0": { "dependencies": ["accounts>=1.0,<2.0"], "migrations": ["create_posts"] }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Migration references are names looked up in a [`MigrationRegistry`].

use super::registry::{ComponentDef, ComponentSet, MigrationUnit, VersionDef};
use crate::error::Error;
use crate::migration::{Migration, MigrationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Metadata for every component, keyed by component name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifest {
    /// Components by name.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentManifestEntry>,
}

/// Versions declared by one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifestEntry {
    /// Versions by version string.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionManifestEntry>,
}

/// Requirements and migrations of one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifestEntry {
    /// Requirements such as `"accounts>=1.0,<2.0"`.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Names of migrations, resolved through a [`MigrationRegistry`].
    #[serde(default)]
    pub migrations: Vec<String>,
}

impl ComponentManifest {
    /// Parse a manifest from JSON.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the manifest to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Turn the manifest into component declarations, resolving migration
    /// references through `registry`.
    pub fn into_definitions(
        self,
        registry: &MigrationRegistry,
    ) -> Result<Vec<ComponentDef>, MigrationError> {
        let mut defs = Vec::with_capacity(self.components.len());
        for (name, entry) in self.components {
            let mut def = ComponentDef::new(name.as_str());
            for (version, declared) in entry.versions {
                let mut version_def = VersionDef::new(version.as_str());
                for spec in declared.dependencies {
                    version_def = version_def.with_dependency(spec);
                }
                for reference in declared.migrations {
                    let unit = registry.resolve(&reference).ok_or_else(|| {
                        MigrationError::UnknownMigration {
                            component: name.clone(),
                            version: version.clone(),
                            reference: reference.clone(),
                        }
                    })?;
                    version_def = version_def.with_unit(unit);
                }
                def = def.with_version(version_def);
            }
            defs.push(def);
        }
        Ok(defs)
    }

    /// Build a validated [`ComponentSet`] from the manifest.
    pub fn load(self, registry: &MigrationRegistry) -> Result<ComponentSet, MigrationError> {
        ComponentSet::new(self.into_definitions(registry)?)
    }
}

/// Named migrations that manifests may refer to.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    units: HashMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, migration: impl Migration + 'static) -> &mut Self {
        self.units.insert(name.into(), Arc::new(migration));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, migration: impl Migration + 'static) -> Self {
        self.register(name, migration);
        self
    }

    /// Look up a migration by name.
    pub fn resolve(&self, name: &str) -> Option<MigrationUnit> {
        self.units
            .get(name)
            .map(|migration| MigrationUnit::shared(name, Arc::clone(migration)))
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.units.keys().collect();
        names.sort();
        f.debug_struct("MigrationRegistry").field("units", &names).finish()
    }
}
