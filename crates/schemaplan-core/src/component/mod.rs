//! Component metadata: versions, dependencies and their declarations.

pub mod dependency;
pub mod manifest;
pub mod registry;
pub mod version;

pub use dependency::Dependency;
pub use manifest::{ComponentManifest, ComponentManifestEntry, MigrationRegistry, VersionManifestEntry};
pub use registry::{Component, ComponentDef, ComponentSet, MigrationUnit, Version, VersionDef};
pub use version::{VersionNumber, NOT_INSTALLED};
