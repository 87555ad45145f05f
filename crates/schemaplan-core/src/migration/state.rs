//! Installed schema versions and the stores that keep them.
//!
//! A [`SchemaStore`] is the only durable state of the planner: which version
//! of each component's schema is installed. Writes made between
//! [`begin`](SchemaStore::begin) and [`commit`](SchemaStore::commit) become
//! visible to other readers together or not at all.

use super::error::MigrationError;
use crate::component::{Version, VersionNumber};
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}

/// The installed schema version of one component.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SchemaVersionRecord {
    /// Component name.
    pub component: String,
    /// Installed version string.
    pub version: String,
    /// When the record was last written (microseconds since epoch).
    pub updated_at: u64,
}

impl SchemaVersionRecord {
    /// Create a record stamped with the current time.
    pub fn new(component: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            version: version.into(),
            updated_at: current_timestamp(),
        }
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Where installed schema versions are read from and written to.
pub trait SchemaStore {
    /// Installed version of `component`, or `default` if it has no record.
    fn schema_version_for(&self, component: &str, default: &str) -> Result<String, MigrationError>;

    /// Record `version` as installed for its component.
    fn set_schema_version_for(&mut self, version: &Version) -> Result<(), MigrationError>;

    /// Create the first record for a component that had none.
    fn initialise_schema_version_for(
        &mut self,
        component: &str,
        version: &VersionNumber,
    ) -> Result<(), MigrationError>;

    /// Delete the records of every component not among `live`.
    ///
    /// Returns the names of the pruned components.
    fn prune_schemas_to_only(&mut self, live: &[Version]) -> Result<Vec<String>, MigrationError>;

    /// Open a transaction.
    fn begin(&mut self) -> Result<(), MigrationError>;

    /// Make the writes of the open transaction durable.
    fn commit(&mut self) -> Result<(), MigrationError>;

    /// Discard the writes of the open transaction.
    fn rollback(&mut self) -> Result<(), MigrationError>;

    /// Run `f` inside a transaction: committed if it succeeds, rolled back
    /// if it fails.
    fn managed_transaction<T, F>(&mut self, f: F) -> Result<T, MigrationError>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T, MigrationError>,
    {
        self.begin()?;
        let outcome = f(self).and_then(|value| {
            self.commit()?;
            Ok(value)
        });
        if outcome.is_err() {
            if let Err(e) = self.rollback() {
                warn!(error = %e, "failed to roll back schema version changes");
            }
        }
        outcome
    }
}

fn no_transaction() -> MigrationError {
    Error::Transaction("no transaction is open".to_string()).into()
}

fn already_open() -> MigrationError {
    Error::Transaction("a transaction is already open".to_string()).into()
}

fn live_components(live: &[Version]) -> BTreeSet<&str> {
    live.iter().map(Version::component_name).collect()
}

/// Schema versions kept in a sled tree.
///
/// Writes outside a transaction are applied immediately. Inside one they are
/// staged and applied as a single [`sled::Batch`] on commit.
pub struct SchemaVersionStore {
    tree: sled::Tree,
    staged: Option<BTreeMap<String, Option<SchemaVersionRecord>>>,
}

impl SchemaVersionStore {
    /// Tree name for schema version records.
    pub const TREE_NAME: &'static str = "schema:versions";

    /// Open or create the store.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree, staged: None })
    }

    /// Load the committed record of a component.
    pub fn load(&self, component: &str) -> Result<Option<SchemaVersionRecord>, MigrationError> {
        match self.tree.get(component.as_bytes())? {
            Some(bytes) => Ok(Some(SchemaVersionRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every committed record, ordered by component name.
    pub fn list(&self) -> Result<Vec<SchemaVersionRecord>, MigrationError> {
        let mut records = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            records.push(SchemaVersionRecord::from_bytes(&value)?);
        }
        Ok(records)
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn current(&self, component: &str) -> Result<Option<SchemaVersionRecord>, MigrationError> {
        if let Some(staged) = self.staged.as_ref().and_then(|staged| staged.get(component)) {
            return Ok(staged.clone());
        }
        self.load(component)
    }

    fn write(&mut self, component: &str, record: Option<SchemaVersionRecord>) -> Result<(), MigrationError> {
        if let Some(staged) = self.staged.as_mut() {
            staged.insert(component.to_string(), record);
            return Ok(());
        }
        match record {
            Some(record) => {
                self.tree.insert(component.as_bytes(), record.to_bytes()?)?;
            }
            None => {
                self.tree.remove(component.as_bytes())?;
            }
        }
        Ok(())
    }

    fn visible_components(&self) -> Result<BTreeSet<String>, MigrationError> {
        let mut names = BTreeSet::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            names.insert(String::from_utf8_lossy(&key).into_owned());
        }
        if let Some(staged) = &self.staged {
            for (component, record) in staged {
                if record.is_some() {
                    names.insert(component.clone());
                } else {
                    names.remove(component);
                }
            }
        }
        Ok(names)
    }
}

impl SchemaStore for SchemaVersionStore {
    fn schema_version_for(&self, component: &str, default: &str) -> Result<String, MigrationError> {
        Ok(self
            .current(component)?
            .map(|record| record.version)
            .unwrap_or_else(|| default.to_string()))
    }

    fn set_schema_version_for(&mut self, version: &Version) -> Result<(), MigrationError> {
        let record = SchemaVersionRecord::new(version.component_name(), version.number().as_str());
        self.write(version.component_name(), Some(record))
    }

    fn initialise_schema_version_for(
        &mut self,
        component: &str,
        version: &VersionNumber,
    ) -> Result<(), MigrationError> {
        if let Some(existing) = self.current(component)? {
            warn!(
                component,
                installed = %existing.version,
                "replacing existing schema version record on initialisation"
            );
        }
        self.write(component, Some(SchemaVersionRecord::new(component, version.as_str())))
    }

    fn prune_schemas_to_only(&mut self, live: &[Version]) -> Result<Vec<String>, MigrationError> {
        let keep = live_components(live);
        let pruned: Vec<String> = self
            .visible_components()?
            .into_iter()
            .filter(|component| !keep.contains(component.as_str()))
            .collect();
        for component in &pruned {
            debug!(component = %component, "pruning schema version record");
            self.write(component, None)?;
        }
        Ok(pruned)
    }

    fn begin(&mut self) -> Result<(), MigrationError> {
        if self.staged.is_some() {
            return Err(already_open());
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MigrationError> {
        let staged = self.staged.take().ok_or_else(no_transaction)?;
        let mut batch = sled::Batch::default();
        for (component, record) in &staged {
            match record {
                Some(record) => batch.insert(component.as_bytes(), record.to_bytes()?),
                None => batch.remove(component.as_bytes()),
            }
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        debug!(writes = staged.len(), "committed schema version changes");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MigrationError> {
        let staged = self.staged.take().ok_or_else(no_transaction)?;
        debug!(discarded = staged.len(), "rolled back schema version changes");
        Ok(())
    }
}

/// A [`SchemaStore`] held in memory.
///
/// Counts commits and rollbacks, which makes it convenient for checking what
/// a run did.
#[derive(Debug, Default, Clone)]
pub struct MemorySchemaStore {
    committed: BTreeMap<String, String>,
    staged: Option<BTreeMap<String, Option<String>>>,
    commits: usize,
    rollbacks: usize,
}

impl MemorySchemaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder that records `component` as installed at `version`.
    pub fn with_installed(mut self, component: impl Into<String>, version: impl Into<String>) -> Self {
        self.committed.insert(component.into(), version.into());
        self
    }

    /// Committed version of `component`.
    pub fn installed(&self, component: &str) -> Option<&str> {
        self.committed.get(component).map(String::as_str)
    }

    /// Committed records, ordered by component name.
    pub fn records(&self) -> &BTreeMap<String, String> {
        &self.committed
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of rollbacks.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn write(&mut self, component: &str, version: Option<String>) {
        match (&mut self.staged, version) {
            (Some(staged), version) => {
                staged.insert(component.to_string(), version);
            }
            (None, Some(version)) => {
                self.committed.insert(component.to_string(), version);
            }
            (None, None) => {
                self.committed.remove(component);
            }
        }
    }
}

impl SchemaStore for MemorySchemaStore {
    fn schema_version_for(&self, component: &str, default: &str) -> Result<String, MigrationError> {
        let staged = self.staged.as_ref().and_then(|staged| staged.get(component));
        let found = match staged {
            Some(version) => version.clone(),
            None => self.committed.get(component).cloned(),
        };
        Ok(found.unwrap_or_else(|| default.to_string()))
    }

    fn set_schema_version_for(&mut self, version: &Version) -> Result<(), MigrationError> {
        self.write(version.component_name(), Some(version.number().to_string()));
        Ok(())
    }

    fn initialise_schema_version_for(
        &mut self,
        component: &str,
        version: &VersionNumber,
    ) -> Result<(), MigrationError> {
        self.write(component, Some(version.to_string()));
        Ok(())
    }

    fn prune_schemas_to_only(&mut self, live: &[Version]) -> Result<Vec<String>, MigrationError> {
        let keep = live_components(live);
        let mut visible: BTreeSet<String> = self.committed.keys().cloned().collect();
        if let Some(staged) = &self.staged {
            for (component, version) in staged {
                if version.is_some() {
                    visible.insert(component.clone());
                } else {
                    visible.remove(component);
                }
            }
        }

        let pruned: Vec<String> = visible
            .into_iter()
            .filter(|component| !keep.contains(component.as_str()))
            .collect();
        for component in &pruned {
            self.write(component, None);
        }
        Ok(pruned)
    }

    fn begin(&mut self) -> Result<(), MigrationError> {
        if self.staged.is_some() {
            return Err(already_open());
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MigrationError> {
        let staged = self.staged.take().ok_or_else(no_transaction)?;
        for (component, version) in staged {
            match version {
                Some(version) => self.committed.insert(component, version),
                None => self.committed.remove(&component),
            };
        }
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MigrationError> {
        self.staged.take().ok_or_else(no_transaction)?;
        self.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDef, ComponentSet, VersionDef};

    fn components() -> ComponentSet {
        ComponentSet::new([
            ComponentDef::new("blog")
                .with_version(VersionDef::new("1.0"))
                .with_version(VersionDef::new("1.1")),
            ComponentDef::new("accounts").with_version(VersionDef::new("2.0")),
        ])
        .unwrap()
    }

    fn open_temp() -> (tempfile::TempDir, sled::Db, SchemaVersionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = SchemaVersionStore::open(&db).unwrap();
        (dir, db, store)
    }

    #[test]
    fn test_record_bytes_round_trip() {
        let record = SchemaVersionRecord::new("blog", "1.1");
        let decoded = SchemaVersionRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert!(SchemaVersionRecord::from_bytes(b"garbage").is_err());
    }

    #[test]
    fn test_sled_store_defaults_and_writes() {
        let set = components();
        let (_dir, _db, mut store) = open_temp();

        assert_eq!(store.schema_version_for("blog", "0.0").unwrap(), "0.0");
        store.set_schema_version_for(&set.version("blog", "1.1").unwrap()).unwrap();
        assert_eq!(store.schema_version_for("blog", "0.0").unwrap(), "1.1");
        assert_eq!(store.load("blog").unwrap().unwrap().version, "1.1");
    }

    #[test]
    fn test_sled_store_transaction_commit_and_rollback() {
        let set = components();
        let (_dir, _db, mut store) = open_temp();

        store
            .managed_transaction(|store| {
                store.initialise_schema_version_for("accounts", set.version("accounts", "2.0").unwrap().number())?;
                store.set_schema_version_for(&set.version("blog", "1.0").unwrap())?;
                assert_eq!(store.schema_version_for("blog", "0.0")?, "1.0");
                assert!(store.load("blog")?.is_none());
                Ok(())
            })
            .unwrap();
        assert!(!store.in_transaction());
        assert_eq!(store.list().unwrap().len(), 2);

        let err = store
            .managed_transaction(|store| -> Result<(), MigrationError> {
                store.set_schema_version_for(&set.version("blog", "1.1").unwrap())?;
                Err(MigrationError::UnknownComponent {
                    component: "wiki".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnknownComponent { .. }));
        assert!(!store.in_transaction());
        assert_eq!(store.schema_version_for("blog", "0.0").unwrap(), "1.0");
    }

    #[test]
    fn test_sled_store_prunes_to_live_components() {
        let set = components();
        let (_dir, _db, mut store) = open_temp();
        store.set_schema_version_for(&set.version("blog", "1.1").unwrap()).unwrap();
        store.set_schema_version_for(&set.version("accounts", "2.0").unwrap()).unwrap();
        store
            .initialise_schema_version_for("legacy", &VersionNumber::parse("3.0").unwrap())
            .unwrap();

        let pruned = store
            .managed_transaction(|store| store.prune_schemas_to_only(&[set.version("blog", "1.1").unwrap()]))
            .unwrap();
        assert_eq!(pruned, vec!["accounts", "legacy"]);

        let remaining: Vec<String> = store.list().unwrap().into_iter().map(|r| r.component).collect();
        assert_eq!(remaining, vec!["blog"]);
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let set = components();
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let mut store = SchemaVersionStore::open(&db).unwrap();
            store
                .managed_transaction(|store| store.set_schema_version_for(&set.version("blog", "1.1").unwrap()))
                .unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let store = SchemaVersionStore::open(&db).unwrap();
        assert_eq!(store.schema_version_for("blog", "0.0").unwrap(), "1.1");
    }

    #[test]
    fn test_transaction_misuse() {
        let mut store = MemorySchemaStore::new();
        assert!(matches!(
            store.commit(),
            Err(MigrationError::Core(Error::Transaction(_)))
        ));
        store.begin().unwrap();
        assert!(store.begin().is_err());
        store.rollback().unwrap();
        assert!(store.rollback().is_err());
    }

    #[test]
    fn test_memory_store_counts_outcomes() {
        let set = components();
        let mut store = MemorySchemaStore::new().with_installed("legacy", "1.0");

        store
            .managed_transaction(|store| {
                store.set_schema_version_for(&set.version("blog", "1.0").unwrap())?;
                store.prune_schemas_to_only(&[set.version("blog", "1.0").unwrap()])
            })
            .unwrap();
        assert_eq!(store.commits(), 1);
        assert_eq!(store.installed("blog"), Some("1.0"));
        assert_eq!(store.installed("legacy"), None);

        let _ = store.managed_transaction(|store| -> Result<(), MigrationError> {
            store.set_schema_version_for(&set.version("blog", "1.1").unwrap())?;
            Err(MigrationError::UnknownPhase { name: "x".to_string() })
        });
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(store.installed("blog"), Some("1.0"));
        assert_eq!(store.records().len(), 1);
    }
}
