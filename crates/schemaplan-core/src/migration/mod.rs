//! Migration engine.
//!
//! This module turns component declarations into executed schema changes:
//! - Dependency clusters with duplicate-version detection
//! - Per-component upgrade paths merged into ordered waves
//! - Phase-ordered operation scheduling within a wave
//! - Transactional recording of installed schema versions
//!
//! # Phases
//!
//! | Phase | Typical use |
//! |-------|-------------|
//! | `drop_fk` | Drop foreign keys that would block later changes |
//! | `drop_pk` | Drop primary keys |
//! | `pre_alter` | Prepare columns before they change |
//! | `alter` | Alter tables and columns |
//! | `create_pk` | Create primary keys |
//! | `indexes` | Create indexes |
//! | `data` | Move or transform data |
//! | `create_fk` | Create foreign keys |
//! | `cleanup` | Drop what is no longer used |
//!
//! # Example
//!
//! ```
//! use schemaplan_core::component::{ComponentDef, ComponentSet, VersionDef};
//! use schemaplan_core::migration::{from_fn, MemorySchemaStore, MigrationExecutor, Phase};
//! use std::sync::Arc;
//!
//! let components = ComponentSet::new([ComponentDef::new("blog").with_version(
//!     VersionDef::new("1.0").with_migration(
//!         "create_posts",
//!         from_fn(|ctx| {
//!             ctx.schedule(Phase::Alter, || Ok(()));
//!             Ok(())
//!         }),
//!     ),
//! )])?;
//!
//! let mut executor = MigrationExecutor::new(Arc::new(components), "blog", MemorySchemaStore::new());
//! let result = executor.migrate_db()?;
//! assert_eq!(result.operations_executed, 1);
//! assert_eq!(executor.store().installed("blog"), Some("1.0"));
//! # Ok::<(), schemaplan_core::migration::MigrationError>(())
//! ```

pub mod cache;
pub mod cluster;
pub mod error;
pub mod executor;
pub mod phase;
pub mod plan;
pub mod schedule;
pub mod state;

// Re-export main types

pub use cache::ResolutionCache;
pub use cluster::DependencyCluster;
pub use error::{ImplicatedVersion, MigrationError, OperationError};
pub use executor::{MigrationConfig, MigrationExecutor, MigrationResult, PlanStatus};
pub use phase::Phase;
pub use plan::{MigrationPlan, UpgradePath, Wave};
pub use schedule::{from_fn, CallSite, FnMigration, Migration, MigrationContext, MigrationSchedule, Operation};
pub use state::{MemorySchemaStore, SchemaStore, SchemaVersionRecord, SchemaVersionStore};
