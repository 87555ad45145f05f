//! Migration executor - drives planning and runs the waves.
//!
//! Every wave runs inside one transaction of the [`SchemaStore`]: either all
//! waves and their version records are committed together, or nothing is.

use super::error::MigrationError;
use super::plan::MigrationPlan;
use super::state::SchemaStore;
use crate::component::{ComponentSet, NOT_INSTALLED};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Migration executor configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Upper bound on versions in the dependency graph.
    pub max_graph_vertices: usize,
    /// Whether to run in dry-run mode (schedules are built but nothing runs).
    pub dry_run: bool,
    /// Whether to delete records of components that are no longer live.
    pub prune_orphans: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_graph_vertices: 10_000,
            dry_run: false,
            prune_orphans: true,
        }
    }
}

impl MigrationConfig {
    /// Set the graph size limit.
    pub fn with_max_graph_vertices(mut self, limit: usize) -> Self {
        self.max_graph_vertices = limit;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable pruning of orphaned records.
    pub fn with_prune_orphans(mut self, prune: bool) -> Self {
        self.prune_orphans = prune;
        self
    }
}

/// Where an executor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// Nothing planned yet.
    Unplanned,
    /// A plan is ready to run.
    Planned,
    /// The plan has run.
    Executed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Unplanned => write!(f, "unplanned"),
            PlanStatus::Planned => write!(f, "planned"),
            PlanStatus::Executed => write!(f, "executed"),
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// Final status.
    pub status: PlanStatus,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Waves executed.
    pub waves_executed: usize,
    /// Operations scheduled across all waves.
    pub operations_scheduled: usize,
    /// Operations executed.
    pub operations_executed: usize,
    /// Version steps recorded, as `"<component> <version>"`.
    pub advanced: Vec<String>,
    /// Components whose records were pruned.
    pub pruned: Vec<String>,
}

impl MigrationResult {
    fn empty(dry_run: bool) -> Self {
        Self {
            status: PlanStatus::Executed,
            dry_run,
            waves_executed: 0,
            operations_scheduled: 0,
            operations_executed: 0,
            advanced: Vec::new(),
            pruned: Vec::new(),
        }
    }
}

/// Migration executor - plans and migrates one root component.
pub struct MigrationExecutor<S> {
    components: Arc<ComponentSet>,
    root: String,
    store: S,
    config: MigrationConfig,
    status: PlanStatus,
    plan: Option<MigrationPlan>,
}

impl<S: SchemaStore> MigrationExecutor<S> {
    /// Create an executor for `root` with the default configuration.
    pub fn new(components: Arc<ComponentSet>, root: impl Into<String>, store: S) -> Self {
        Self {
            components,
            root: root.into(),
            store,
            config: MigrationConfig::default(),
            status: PlanStatus::Unplanned,
            plan: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Current lifecycle state.
    pub fn status(&self) -> PlanStatus {
        self.status
    }

    /// The plan, once computed.
    pub fn plan(&self) -> Option<&MigrationPlan> {
        self.plan.as_ref()
    }

    /// The schema store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the executor and return its store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Resolve the dependency graph and compute the waves.
    #[instrument(skip(self), fields(root = %self.root))]
    pub fn do_planning(&mut self) -> Result<&MigrationPlan, MigrationError> {
        if self.status != PlanStatus::Unplanned {
            return Err(self.invalid_state(PlanStatus::Unplanned));
        }

        let store = &self.store;
        let plan = MigrationPlan::build(
            &self.components,
            &self.root,
            self.config.max_graph_vertices,
            |component| store.schema_version_for(component, NOT_INSTALLED),
        )?;
        self.status = PlanStatus::Planned;
        Ok(&*self.plan.insert(plan))
    }

    /// Run every wave, planning first if that has not happened yet.
    #[instrument(skip(self), fields(root = %self.root, dry_run = self.config.dry_run))]
    pub fn migrate_db(&mut self) -> Result<MigrationResult, MigrationError> {
        match self.status {
            PlanStatus::Unplanned => {
                self.do_planning()?;
            }
            PlanStatus::Planned => {}
            PlanStatus::Executed => return Err(self.invalid_state(PlanStatus::Planned)),
        }

        let plan = self
            .plan
            .take()
            .ok_or_else(|| self.invalid_state(PlanStatus::Planned))?;
        let outcome = self.run(&plan);
        self.plan = Some(plan);

        let result = outcome?;
        self.status = PlanStatus::Executed;
        info!(
            waves = result.waves_executed,
            operations = result.operations_executed,
            pruned = result.pruned.len(),
            "migration complete"
        );
        Ok(result)
    }

    fn run(&mut self, plan: &MigrationPlan) -> Result<MigrationResult, MigrationError> {
        if plan.is_up_to_date() {
            info!("schema is up to date");
            return Ok(MigrationResult::empty(self.config.dry_run));
        }

        if self.config.dry_run {
            let mut result = MigrationResult::empty(true);
            for wave in plan.waves() {
                let schedule = plan.schedule_wave(wave)?;
                info!(wave = wave.number(), operations = schedule.len(), "dry run: wave not executed");
                result.operations_scheduled += schedule.len();
            }
            return Ok(result);
        }

        let prune = self.config.prune_orphans;
        self.store.managed_transaction(|store| {
            let mut result = MigrationResult::empty(false);
            for wave in plan.waves() {
                let schedule = plan.schedule_wave(wave)?;
                result.operations_scheduled += schedule.len();
                result.operations_executed += schedule.execute_all()?;

                for step in wave.steps() {
                    let first_install = wave.number() == 1
                        && plan
                            .upgrade_path(step.component_name())
                            .is_some_and(|path| path.is_first_install());
                    if first_install {
                        store.initialise_schema_version_for(step.component_name(), step.number())?;
                    } else {
                        store.set_schema_version_for(step)?;
                    }
                    result.advanced.push(step.to_string());
                }
                result.waves_executed += 1;
                info!(wave = wave.number(), components = wave.steps().len(), "wave executed");
            }

            if prune {
                result.pruned = store.prune_schemas_to_only(plan.live_versions())?;
            }
            Ok(result)
        })
    }

    fn invalid_state(&self, expected: PlanStatus) -> MigrationError {
        MigrationError::InvalidPlanState {
            expected: expected.to_string(),
            actual: self.status.to_string(),
        }
    }
}
