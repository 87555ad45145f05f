//! schemaplan core - dependency-aware schema migration planning.
//!
//! Components declare versions, the versions they require of other
//! components, and the migrations that introduce each version. This crate
//! resolves those declarations into clusters of versions that must coexist,
//! merges every component's upgrade path into ordered waves and runs each
//! wave's operations in a fixed sequence of phases.

pub mod component;
pub mod error;
pub mod graph;
pub mod migration;
pub mod render;

pub use component::{
    Component, ComponentDef, ComponentManifest, ComponentSet, Dependency, MigrationRegistry,
    MigrationUnit, Version, VersionDef, VersionNumber, NOT_INSTALLED,
};
pub use error::Error;
pub use graph::{DependencyGraph, GraphError};
pub use migration::{
    from_fn, DependencyCluster, MemorySchemaStore, Migration, MigrationConfig, MigrationContext,
    MigrationError, MigrationExecutor, MigrationPlan, MigrationResult, MigrationSchedule, Phase,
    PlanStatus, SchemaStore, SchemaVersionStore,
};
