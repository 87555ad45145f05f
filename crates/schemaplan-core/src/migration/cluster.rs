//! Sets of versions that must be installed together.

use super::error::{ImplicatedVersion, MigrationError};
use crate::component::Version;
use crate::graph::DependencyGraph;
use std::collections::BTreeMap;
use std::fmt;

/// A root version together with every version it transitively requires.
///
/// A valid cluster names each component at most once.
#[derive(Debug, Clone)]
pub struct DependencyCluster {
    root: Version,
    versions: Vec<Version>,
}

impl DependencyCluster {
    /// Collect the versions reachable from `root` in `graph` and check that no
    /// component is required at two different versions.
    pub fn build(graph: &mut DependencyGraph<Version>, root: &Version) -> Result<Self, MigrationError> {
        let versions = graph.reachable_from(root)?;

        let mut by_component: BTreeMap<&str, Vec<&Version>> = BTreeMap::new();
        for version in &versions {
            by_component
                .entry(version.component_name())
                .or_default()
                .push(version);
        }

        let duplicates: Vec<(&str, Vec<&Version>)> = by_component
            .into_iter()
            .filter(|(_, found)| found.len() > 1)
            .collect();
        if !duplicates.is_empty() {
            let mut implicated = Vec::new();
            for (_, found) in &duplicates {
                for version in found {
                    implicated.push(ImplicatedVersion {
                        version: version.to_string(),
                        dependencies: version.dependencies().iter().map(ToString::to_string).collect(),
                        path: graph
                            .path_between(root, version)?
                            .iter()
                            .map(ToString::to_string)
                            .collect(),
                    });
                }
            }
            return Err(MigrationError::InvalidDependencySpecification {
                root: root.to_string(),
                duplicates: duplicates.iter().map(|(name, _)| name.to_string()).collect(),
                implicated,
            });
        }

        Ok(Self {
            root: root.clone(),
            versions,
        })
    }

    /// The version the cluster was built from.
    pub fn root(&self) -> &Version {
        &self.root
    }

    /// Every member, root first, each before the versions it requires.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Names of the member components.
    pub fn component_names(&self) -> Vec<&str> {
        self.versions.iter().map(Version::component_name).collect()
    }

    /// The member version of `component`, if any.
    pub fn version_of(&self, component: &str) -> Option<&Version> {
        self.versions
            .iter()
            .find(|version| version.component_name() == component)
    }

    /// Whether `version` is a member.
    pub fn contains(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }

    /// Whether some member of this cluster is directly superseded by a member
    /// of `other`, so this cluster has to be installed first.
    pub fn is_dependent_on(&self, other: &DependencyCluster) -> bool {
        self.versions
            .iter()
            .any(|mine| other.versions.iter().any(|theirs| mine.is_previous_of(theirs)))
    }
}

impl PartialEq for DependencyCluster {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for DependencyCluster {}

impl fmt::Display for DependencyCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster({})", self.root)
    }
}
