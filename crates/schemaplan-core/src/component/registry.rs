//! Components, their declared versions, and the set they are resolved in.

use super::dependency::Dependency;
use super::version::{VersionNumber, NOT_INSTALLED};
use crate::migration::{Migration, MigrationError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A named migration attached to the version step that introduces it.
#[derive(Clone)]
pub struct MigrationUnit {
    name: String,
    migration: Arc<dyn Migration>,
}

impl MigrationUnit {
    /// Wrap a migration under a name used in diagnostics.
    pub fn new(name: impl Into<String>, migration: impl Migration + 'static) -> Self {
        Self::shared(name, Arc::new(migration))
    }

    /// Wrap an already shared migration.
    pub fn shared(name: impl Into<String>, migration: Arc<dyn Migration>) -> Self {
        Self {
            name: name.into(),
            migration,
        }
    }

    /// Name of the unit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The migration itself.
    pub fn migration(&self) -> &dyn Migration {
        self.migration.as_ref()
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MigrationUnit").field(&self.name).finish()
    }
}

/// Declaration of one version of a component.
#[derive(Debug, Clone)]
pub struct VersionDef {
    version: String,
    dependencies: Vec<String>,
    migrations: Vec<MigrationUnit>,
}

impl VersionDef {
    /// Declare a version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            dependencies: Vec::new(),
            migrations: Vec::new(),
        }
    }

    /// Add a dependency such as `"other>=1.0,<2.0"`.
    pub fn with_dependency(mut self, spec: impl Into<String>) -> Self {
        self.dependencies.push(spec.into());
        self
    }

    /// Add a migration run when upgrading to this version.
    pub fn with_migration(self, name: impl Into<String>, migration: impl Migration + 'static) -> Self {
        self.with_unit(MigrationUnit::new(name, migration))
    }

    /// Add a prepared migration unit.
    pub fn with_unit(mut self, unit: MigrationUnit) -> Self {
        self.migrations.push(unit);
        self
    }
}

/// Declaration of a component and its version history.
#[derive(Debug, Clone)]
pub struct ComponentDef {
    name: String,
    versions: Vec<VersionDef>,
}

impl ComponentDef {
    /// Declare a component.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
        }
    }

    /// Add a version.
    pub fn with_version(mut self, version: VersionDef) -> Self {
        self.versions.push(version);
        self
    }
}

#[derive(Debug)]
struct VersionEntry {
    number: VersionNumber,
    dependencies: Vec<Dependency>,
    migrations: Vec<MigrationUnit>,
}

/// A component with its versions sorted in ascending order.
#[derive(Debug)]
pub struct Component {
    name: String,
    versions: Vec<VersionEntry>,
}

impl Component {
    fn from_def(def: ComponentDef) -> Result<Self, MigrationError> {
        let invalid = |reason: String| MigrationError::InvalidComponent {
            component: def.name.clone(),
            reason,
        };

        if def.versions.is_empty() {
            return Err(invalid("no versions declared".to_string()));
        }

        let mut versions = Vec::with_capacity(def.versions.len());
        for version in &def.versions {
            let dependencies = version
                .dependencies
                .iter()
                .map(|spec| Dependency::parse(spec))
                .collect::<Result<Vec<_>, _>>()?;
            versions.push(VersionEntry {
                number: VersionNumber::parse(&version.version)?,
                dependencies,
                migrations: version.migrations.clone(),
            });
        }

        versions.sort_by(|a, b| a.number.cmp(&b.number));
        if let Some(pair) = versions.windows(2).find(|pair| pair[0].number == pair[1].number) {
            return Err(invalid(format!("version {} declared more than once", pair[1].number)));
        }

        Ok(Self {
            name: def.name,
            versions,
        })
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared versions.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

/// Handle to one declared version of a component.
///
/// Cheap to clone; equality and hashing go by component name and position
/// in the version history.
#[derive(Clone)]
pub struct Version {
    component: Arc<Component>,
    index: usize,
}

impl Version {
    fn entry(&self) -> &VersionEntry {
        &self.component.versions[self.index]
    }

    /// The owning component.
    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    /// Name of the owning component.
    pub fn component_name(&self) -> &str {
        &self.component.name
    }

    /// Version number.
    pub fn number(&self) -> &VersionNumber {
        &self.entry().number
    }

    /// Requirements declared by this version.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.entry().dependencies
    }

    /// Migrations run when upgrading to this version, in declaration order.
    pub fn migrations(&self) -> &[MigrationUnit] {
        &self.entry().migrations
    }

    /// The greatest version of the same component below this one.
    pub fn previous(&self) -> Option<Version> {
        self.index.checked_sub(1).map(|index| Version {
            component: Arc::clone(&self.component),
            index,
        })
    }

    /// Whether this version directly precedes `other` in the same component.
    pub fn is_previous_of(&self, other: &Version) -> bool {
        other.previous().as_ref() == Some(self)
    }

    /// Whether a schema installed at `installed` already includes this version.
    ///
    /// Compares `(major, minor)` only; patch and prerelease markers on either
    /// side are ignored. A component recorded as [`NOT_INSTALLED`] (or with an
    /// empty record) includes no version, not even a `0.0` prerelease.
    pub fn is_up_to_date(&self, installed: &str) -> Result<bool, MigrationError> {
        let installed = installed.trim();
        if installed.is_empty() || installed == NOT_INSTALLED {
            return Ok(false);
        }
        Ok(VersionNumber::major_minor_of(installed)? >= self.number().major_minor())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.component.name == other.component.name
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.component.name.hash(state);
        self.index.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.component_name()
            .cmp(other.component_name())
            .then_with(|| self.number().cmp(other.number()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.component_name(), self.number())
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({self})")
    }
}

/// Every component known to a planning run.
#[derive(Debug, Default)]
pub struct ComponentSet {
    components: Vec<Arc<Component>>,
    by_name: HashMap<String, usize>,
}

impl ComponentSet {
    /// Validate and index component declarations.
    pub fn new(defs: impl IntoIterator<Item = ComponentDef>) -> Result<Self, MigrationError> {
        let mut set = Self::default();
        for def in defs {
            let component = Component::from_def(def)?;
            if set.by_name.contains_key(&component.name) {
                return Err(MigrationError::InvalidComponent {
                    component: component.name,
                    reason: "declared more than once".to_string(),
                });
            }
            set.by_name.insert(component.name.clone(), set.components.len());
            set.components.push(Arc::new(component));
        }
        Ok(set)
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Component>> {
        self.by_name.get(name).map(|&idx| &self.components[idx])
    }

    /// Whether a component with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All versions of a component in ascending order.
    pub fn versions_of(&self, name: &str) -> Vec<Version> {
        self.get(name)
            .map(|component| {
                (0..component.versions.len())
                    .map(|index| Version {
                        component: Arc::clone(component),
                        index,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest declared version of a component.
    pub fn latest(&self, name: &str) -> Option<Version> {
        self.versions_of(name).pop()
    }

    /// A specific declared version.
    pub fn version(&self, name: &str, number: &str) -> Option<Version> {
        let number = VersionNumber::parse(number).ok()?;
        self.versions_of(name)
            .into_iter()
            .find(|version| *version.number() == number)
    }

    /// Components in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &Arc<Component>> {
        self.components.iter()
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> ComponentSet {
        ComponentSet::new([
            ComponentDef::new("domain")
                .with_version(VersionDef::new("2.0").with_dependency("component>=2.0,<2.1"))
                .with_version(VersionDef::new("1.0"))
                .with_version(VersionDef::new("2.0a1")),
            ComponentDef::new("component")
                .with_version(VersionDef::new("2.0")),
        ])
        .unwrap()
    }

    #[test]
    fn test_versions_are_sorted() {
        let set = history();
        let numbers: Vec<String> = set
            .versions_of("domain")
            .iter()
            .map(|v| v.number().to_string())
            .collect();
        assert_eq!(numbers, vec!["1.0", "2.0a1", "2.0"]);
        assert_eq!(set.latest("domain").unwrap().to_string(), "domain 2.0");
    }

    #[test]
    fn test_dependencies_are_per_version() {
        let set = history();
        let latest = set.version("domain", "2.0").unwrap();
        let first = set.version("domain", "1.0").unwrap();
        assert_eq!(latest.dependencies().len(), 1);
        assert_eq!(latest.dependencies()[0].component(), "component");
        assert!(first.dependencies().is_empty());
    }

    #[test]
    fn test_previous_chain() {
        let set = history();
        let latest = set.version("domain", "2.0").unwrap();
        let alpha = latest.previous().unwrap();
        let first = alpha.previous().unwrap();

        assert_eq!(alpha.to_string(), "domain 2.0a1");
        assert!(first.previous().is_none());
        assert!(alpha.is_previous_of(&latest));
        assert!(!first.is_previous_of(&latest));
        assert!(!latest.is_previous_of(&alpha));

        let other = set.version("component", "2.0").unwrap();
        assert!(!alpha.is_previous_of(&other));
    }

    #[test]
    fn test_is_up_to_date() {
        let set = history();
        let latest = set.version("domain", "2.0").unwrap();
        let alpha = set.version("domain", "2.0a1").unwrap();

        assert!(latest.is_up_to_date("2.0").unwrap());
        assert!(latest.is_up_to_date("2.0.5").unwrap());
        assert!(latest.is_up_to_date("3.1").unwrap());
        assert!(!latest.is_up_to_date("1.0").unwrap());
        assert!(latest.is_up_to_date("2.0a1").unwrap());
        assert!(alpha.is_up_to_date("2.0").unwrap());
        assert!(alpha.is_up_to_date("2.0a1").unwrap());
        assert!(!alpha.is_up_to_date("1.9").unwrap());
        assert!(!alpha.is_up_to_date(NOT_INSTALLED).unwrap());
        assert!(!alpha.is_up_to_date("").unwrap());
    }

    #[test]
    fn test_not_installed_includes_no_zero_version() {
        let set = ComponentSet::new([ComponentDef::new("seed")
            .with_version(VersionDef::new("0.0a1"))
            .with_version(VersionDef::new("0.1"))])
        .unwrap();
        let early = set.version("seed", "0.0a1").unwrap();

        assert!(!early.is_up_to_date(NOT_INSTALLED).unwrap());
        assert!(early.is_up_to_date("0.0.3").unwrap());
    }

    #[test]
    fn test_prereleases_sort_dev_first() {
        let set = ComponentSet::new([ComponentDef::new("app")
            .with_version(VersionDef::new("2.0"))
            .with_version(VersionDef::new("2.0a1"))
            .with_version(VersionDef::new("2.0.dev1"))
            .with_version(VersionDef::new("2.0rc1"))
            .with_version(VersionDef::new("2.0b1"))])
        .unwrap();

        let order: Vec<String> = set.versions_of("app").iter().map(ToString::to_string).collect();
        assert_eq!(order, ["app 2.0.dev1", "app 2.0a1", "app 2.0b1", "app 2.0rc1", "app 2.0"]);
        let dev = set.version("app", "2.0.dev1").unwrap();
        assert!(dev.is_previous_of(&set.version("app", "2.0a1").unwrap()));
        assert!(dev.previous().is_none());
    }

    #[test]
    fn test_invalid_declarations() {
        let duplicate_version = ComponentSet::new([ComponentDef::new("web")
            .with_version(VersionDef::new("1.0"))
            .with_version(VersionDef::new("1.0"))]);
        assert!(matches!(
            duplicate_version,
            Err(MigrationError::InvalidComponent { .. })
        ));

        let duplicate_component = ComponentSet::new([
            ComponentDef::new("web").with_version(VersionDef::new("1.0")),
            ComponentDef::new("web").with_version(VersionDef::new("2.0")),
        ]);
        assert!(matches!(
            duplicate_component,
            Err(MigrationError::InvalidComponent { .. })
        ));

        let no_versions = ComponentSet::new([ComponentDef::new("web")]);
        assert!(matches!(no_versions, Err(MigrationError::InvalidComponent { .. })));

        let bad_comparator = ComponentSet::new([ComponentDef::new("web")
            .with_version(VersionDef::new("1.0").with_dependency("domain==1.0"))]);
        assert!(matches!(
            bad_comparator,
            Err(MigrationError::IllegalComparator { .. })
        ));
    }
}
