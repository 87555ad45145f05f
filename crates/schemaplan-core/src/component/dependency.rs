//! Version-range requirements on other components.

use super::registry::{ComponentSet, Version};
use super::version::VersionNumber;
use crate::migration::MigrationError;
use std::fmt;
use std::str::FromStr;

/// A requirement for a version of another component within `[min, max)`.
///
/// Written as `"name>=1.0,<2.0"`; either bound may be omitted. Only the `>=`
/// and `<` comparators are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    component: String,
    min: Option<VersionNumber>,
    max: Option<VersionNumber>,
}

impl Dependency {
    /// Create a dependency from explicit bounds.
    pub fn new(
        component: impl Into<String>,
        min: Option<VersionNumber>,
        max: Option<VersionNumber>,
    ) -> Self {
        Self {
            component: component.into(),
            min,
            max,
        }
    }

    /// Parse a requirement such as `"reahl-component>=2.0,<2.1"`.
    pub fn parse(spec: &str) -> Result<Self, MigrationError> {
        let is_comparator = |c: char| matches!(c, '<' | '>' | '=' | '!' | '~');
        let trimmed = spec.trim();
        let split = trimmed.find(is_comparator).unwrap_or(trimmed.len());
        let (name, constraints) = trimmed.split_at(split);
        let name = name.trim();
        if name.is_empty() {
            return Err(MigrationError::InvalidDependency {
                spec: spec.to_string(),
                reason: "missing component name".to_string(),
            });
        }

        let mut dependency = Self::new(name, None, None);
        for constraint in constraints.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let op_end = constraint
                .find(|c: char| !is_comparator(c))
                .unwrap_or(constraint.len());
            let (comparator, version) = constraint.split_at(op_end);
            let bound = match comparator {
                ">=" => &mut dependency.min,
                "<" => &mut dependency.max,
                other => {
                    return Err(MigrationError::IllegalComparator {
                        spec: spec.to_string(),
                        comparator: other.to_string(),
                    })
                }
            };
            if bound.is_some() {
                return Err(MigrationError::InvalidDependency {
                    spec: spec.to_string(),
                    reason: format!("bound {comparator} given more than once"),
                });
            }
            *bound = Some(VersionNumber::parse(version)?);
        }

        Ok(dependency)
    }

    /// Name of the required component.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Inclusive lower bound.
    pub fn min(&self) -> Option<&VersionNumber> {
        self.min.as_ref()
    }

    /// Exclusive upper bound.
    pub fn max(&self) -> Option<&VersionNumber> {
        self.max.as_ref()
    }

    /// Whether `version` lies within `[min, max)`.
    pub fn admits(&self, version: &VersionNumber) -> bool {
        self.min.as_ref().map_or(true, |min| version >= min)
            && self.max.as_ref().map_or(true, |max| version < max)
    }

    /// The highest declared version of the required component that satisfies
    /// the bounds.
    ///
    /// Returns `Ok(None)` when the component is not part of `components`
    /// (a third-party requirement with no migrations of its own), and fails
    /// when it is but no version matches.
    pub fn best_version(&self, components: &ComponentSet) -> Result<Option<Version>, MigrationError> {
        if !components.contains(&self.component) {
            return Ok(None);
        }

        components
            .versions_of(&self.component)
            .into_iter()
            .rev()
            .find(|version| self.admits(version.number()))
            .map(Some)
            .ok_or_else(|| MigrationError::UnsatisfiableDependency {
                dependency: self.to_string(),
            })
    }
}

impl FromStr for Dependency {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.component)?;
        let mut separator = "";
        if let Some(min) = &self.min {
            write!(f, ">={min}")?;
            separator = ",";
        }
        if let Some(max) = &self.max {
            write!(f, "{separator}<{max}")?;
        }
        Ok(())
    }
}
