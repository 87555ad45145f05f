//! Phase-ordered scheduling of migration operations.
//!
//! Migration units never run their changes directly. They register closures
//! into a [`MigrationSchedule`] through a [`MigrationContext`]; the schedule
//! then runs them grouped by [`Phase`], first-in first-out within a phase.

use super::error::{MigrationError, OperationError};
use super::phase::Phase;
use crate::component::{MigrationUnit, Version};
use std::fmt;
use std::panic::Location;
use tracing::{debug, warn};

/// A deferred change to the database.
pub type Operation = Box<dyn FnOnce() -> Result<(), OperationError>>;

/// Where an operation was scheduled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    origin: Option<String>,
    location: &'static Location<'static>,
}

impl CallSite {
    /// The version step that scheduled the operation, as `"<component> <version>"`.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Source location of the `schedule` call.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{origin} at {}", self.location),
            None => write!(f, "{}", self.location),
        }
    }
}

struct ScheduledCall {
    call_site: CallSite,
    operation: Operation,
}

/// Operations of one wave, bucketed by phase.
#[derive(Default)]
pub struct MigrationSchedule {
    phases: [Vec<ScheduledCall>; 9],
}

impl MigrationSchedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `operation` in `phase`.
    #[track_caller]
    pub fn schedule<F>(&mut self, phase: Phase, operation: F)
    where
        F: FnOnce() -> Result<(), OperationError> + 'static,
    {
        self.push(phase, None, Location::caller(), Box::new(operation));
    }

    /// Queue `operation` in the phase called `name`.
    #[track_caller]
    pub fn schedule_named<F>(&mut self, name: &str, operation: F) -> Result<(), MigrationError>
    where
        F: FnOnce() -> Result<(), OperationError> + 'static,
    {
        let phase = name.parse()?;
        self.push(phase, None, Location::caller(), Box::new(operation));
        Ok(())
    }

    fn push(
        &mut self,
        phase: Phase,
        origin: Option<String>,
        location: &'static Location<'static>,
        operation: Operation,
    ) {
        self.phases[phase.index()].push(ScheduledCall {
            call_site: CallSite { origin, location },
            operation,
        });
    }

    /// Let `unit` schedule its operations for `version`.
    ///
    /// Returns how many operations the unit added. A unit that adds none is
    /// logged and otherwise ignored.
    pub fn add_unit(&mut self, version: &Version, unit: &MigrationUnit) -> Result<usize, MigrationError> {
        let mut ctx = MigrationContext::new(std::mem::take(self), version.clone());
        let outcome = unit.migration().schedule_upgrades(&mut ctx);
        let added = ctx.scheduled;
        *self = ctx.schedule;
        outcome?;

        if added == 0 {
            warn!(
                component = version.component_name(),
                version = %version.number(),
                unit = unit.name(),
                "migration unit scheduled no operations, treating it as a no-op"
            );
        }
        Ok(added)
    }

    /// Total number of queued operations.
    pub fn len(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.phases.iter().all(Vec::is_empty)
    }

    /// Call sites queued in `phase`, in execution order.
    pub fn call_sites(&self, phase: Phase) -> impl Iterator<Item = &CallSite> {
        self.phases[phase.index()].iter().map(|call| &call.call_site)
    }

    /// Run every operation, phase by phase.
    ///
    /// Stops at the first failure, which is returned with the phase and call
    /// site of the failing operation. Returns the number of operations run.
    pub fn execute_all(self) -> Result<usize, MigrationError> {
        let mut executed = 0;
        for (phase, calls) in Phase::ALL.into_iter().zip(self.phases) {
            for ScheduledCall { call_site, operation } in calls {
                debug!(phase = %phase, call_site = %call_site, "running operation");
                operation().map_err(|source| MigrationError::OperationFailed {
                    phase,
                    call_site: call_site.to_string(),
                    source,
                })?;
                executed += 1;
            }
        }
        Ok(executed)
    }
}

impl fmt::Debug for MigrationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for phase in Phase::ALL {
            map.entry(&phase.as_str(), &self.phases[phase.index()].len());
        }
        map.finish()
    }
}

/// What a migration unit sees while scheduling its operations.
///
/// Every operation scheduled here is tagged with the version step it belongs
/// to, so failures point back at the component that registered them.
pub struct MigrationContext {
    schedule: MigrationSchedule,
    version: Version,
    origin: String,
    scheduled: usize,
}

impl MigrationContext {
    pub(crate) fn new(schedule: MigrationSchedule, version: Version) -> Self {
        let origin = version.to_string();
        Self {
            schedule,
            version,
            origin,
            scheduled: 0,
        }
    }

    /// The version step being migrated to.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Queue `operation` in `phase`.
    #[track_caller]
    pub fn schedule<F>(&mut self, phase: Phase, operation: F)
    where
        F: FnOnce() -> Result<(), OperationError> + 'static,
    {
        self.schedule.push(
            phase,
            Some(self.origin.clone()),
            Location::caller(),
            Box::new(operation),
        );
        self.scheduled += 1;
    }

    /// Queue `operation` in the phase called `name`.
    #[track_caller]
    pub fn schedule_named<F>(&mut self, name: &str, operation: F) -> Result<(), MigrationError>
    where
        F: FnOnce() -> Result<(), OperationError> + 'static,
    {
        let phase = name.parse()?;
        self.schedule(phase, operation);
        Ok(())
    }

    /// Operations scheduled through this context so far.
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }
}

/// Upgrade logic for one version step of a component.
pub trait Migration: Send + Sync {
    /// Register this step's operations. Nothing may touch the database here.
    fn schedule_upgrades(&self, ctx: &mut MigrationContext) -> Result<(), MigrationError>;
}

/// A [`Migration`] backed by a closure. See [`from_fn`].
#[derive(Clone)]
pub struct FnMigration<F>(F);

/// Build a migration from a closure.
///
/// ```
/// use schemaplan_core::migration::{from_fn, Phase};
///
/// let add_column = from_fn(|ctx| {
///     ctx.schedule(Phase::Alter, || Ok(()));
///     Ok(())
/// });
/// # let _ = add_column;
/// ```
pub fn from_fn<F>(f: F) -> FnMigration<F>
where
    F: Fn(&mut MigrationContext) -> Result<(), MigrationError> + Send + Sync,
{
    FnMigration(f)
}

impl<F> Migration for FnMigration<F>
where
    F: Fn(&mut MigrationContext) -> Result<(), MigrationError> + Send + Sync,
{
    fn schedule_upgrades(&self, ctx: &mut MigrationContext) -> Result<(), MigrationError> {
        (self.0)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDef, ComponentSet, VersionDef};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn record(&self, label: &str) -> impl FnOnce() -> Result<(), OperationError> + 'static {
            let journal = self.clone();
            let label = label.to_string();
            move || {
                journal.0.lock().unwrap().push(label);
                Ok(())
            }
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn blog_version() -> Version {
        ComponentSet::new([ComponentDef::new("blog").with_version(VersionDef::new("1.0"))])
            .unwrap()
            .version("blog", "1.0")
            .unwrap()
    }

    #[test]
    fn test_phases_run_in_fixed_order() {
        let journal = Journal::default();
        let mut schedule = MigrationSchedule::new();
        let phases = [
            "cleanup", "create_fk", "data", "indexes", "create_pk", "alter", "drop_pk", "pre_alter",
            "drop_pk", "alter",
        ];
        let labels = ["1", "2", "3", "4", "5", "c1", "a1", "b", "a2", "c2"];
        for (phase, label) in phases.iter().zip(labels) {
            schedule.schedule_named(phase, journal.record(label)).unwrap();
        }

        assert_eq!(schedule.len(), 10);
        assert_eq!(schedule.execute_all().unwrap(), 10);
        assert_eq!(
            journal.entries(),
            vec!["a1", "a2", "b", "c1", "c2", "5", "4", "3", "2", "1"]
        );
    }

    #[test]
    fn test_fifo_within_phase() {
        let journal = Journal::default();
        let mut schedule = MigrationSchedule::new();
        schedule.schedule(Phase::Data, journal.record("data-1"));
        for label in ["1", "2", "3"] {
            schedule.schedule(Phase::DropFk, journal.record(label));
        }
        schedule.execute_all().unwrap();
        assert_eq!(journal.entries(), vec!["1", "2", "3", "data-1"]);
    }

    #[test]
    fn test_unknown_phase_is_rejected_at_scheduling() {
        let mut schedule = MigrationSchedule::new();
        let err = schedule.schedule_named("drop_table", || Ok(())).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownPhase { .. }));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_failure_stops_and_names_call_site() {
        let journal = Journal::default();
        let mut schedule = MigrationSchedule::new();
        schedule.schedule(Phase::DropFk, journal.record("first"));
        let line = line!() + 1;
        schedule.schedule(Phase::Alter, || Err("column is locked".into()));
        schedule.schedule(Phase::Alter, journal.record("after-failure"));
        schedule.schedule(Phase::Cleanup, journal.record("cleanup"));

        let err = schedule.execute_all().unwrap_err();
        match err {
            MigrationError::OperationFailed {
                phase,
                call_site,
                source,
            } => {
                assert_eq!(phase, Phase::Alter);
                assert!(call_site.contains(file!()), "{call_site}");
                assert!(call_site.contains(&format!(":{line}:")), "{call_site}");
                assert_eq!(source.to_string(), "column is locked");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(journal.entries(), vec!["first"]);
    }

    #[test]
    fn test_context_tags_operations_with_origin() {
        let journal = Journal::default();
        let recorder = journal.clone();
        let unit = MigrationUnit::new(
            "create_posts",
            from_fn(move |ctx| {
                ctx.schedule(Phase::CreatePk, recorder.record("pk"));
                ctx.schedule_named("create_fk", recorder.record("fk"))?;
                Ok(())
            }),
        );

        let version = blog_version();
        let mut schedule = MigrationSchedule::new();
        assert_eq!(schedule.add_unit(&version, &unit).unwrap(), 2);
        assert_eq!(schedule.add_unit(&version, &unit).unwrap(), 2);

        let sites: Vec<&CallSite> = schedule.call_sites(Phase::CreatePk).collect();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].origin(), Some("blog 1.0"));
        assert!(sites[0].to_string().starts_with("blog 1.0 at "));

        schedule.execute_all().unwrap();
        assert_eq!(journal.entries(), vec!["pk", "pk", "fk", "fk"]);
    }

    #[test]
    fn test_unit_scheduling_nothing_is_a_no_op() {
        let unit = MigrationUnit::new("empty", from_fn(|_ctx| Ok(())));
        let mut schedule = MigrationSchedule::new();
        schedule.schedule(Phase::Data, || Ok(()));

        assert_eq!(schedule.add_unit(&blog_version(), &unit).unwrap(), 0);
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn test_unit_error_keeps_earlier_operations() {
        let unit = MigrationUnit::new(
            "typo",
            from_fn(|ctx| {
                ctx.schedule(Phase::Data, || Ok(()));
                ctx.schedule_named("datta", || Ok(()))
            }),
        );
        let mut schedule = MigrationSchedule::new();
        let err = schedule.add_unit(&blog_version(), &unit).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownPhase { .. }));
        assert_eq!(schedule.len(), 1);
    }
}
