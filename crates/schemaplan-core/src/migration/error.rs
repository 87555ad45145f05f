//! Migration-specific error types.

use super::phase::Phase;
use crate::graph::GraphError;
use thiserror::Error;

/// Error returned by a scheduled operation.
pub type OperationError = Box<dyn std::error::Error + Send + Sync>;

/// A version implicated in a cluster that needs two versions of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplicatedVersion {
    /// The version, as `"<component> <number>"`.
    pub version: String,
    /// Its declared dependencies.
    pub dependencies: Vec<String>,
    /// How the cluster root reaches it.
    pub path: Vec<String>,
}

fn describe_conflict(root: &str, duplicates: &[String], implicated: &[ImplicatedVersion]) -> String {
    let mut message = format!(
        "cluster rooted at {root} requires more than one version of: {}",
        duplicates.join(", ")
    );
    for version in implicated {
        message.push_str(&format!(
            "\n  {} (via {}) depends on [{}]",
            version.version,
            version.path.join(" -> "),
            version.dependencies.join(", ")
        ));
    }
    message
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A version string is not `major.minor` (or a prerelease of one).
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion {
        /// The offending version string.
        version: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A dependency specification could not be understood.
    #[error("invalid dependency {spec:?}: {reason}")]
    InvalidDependency {
        /// The offending specification.
        spec: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A dependency uses a comparator other than `>=` or `<`.
    #[error("illegal comparator {comparator:?} in dependency {spec:?}: only >= and < are allowed")]
    IllegalComparator {
        /// The offending specification.
        spec: String,
        /// The comparator found.
        comparator: String,
    },

    /// A component declaration is inconsistent.
    #[error("invalid component {component}: {reason}")]
    InvalidComponent {
        /// The component.
        component: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The requested component is not declared.
    #[error("unknown component: {component}")]
    UnknownComponent {
        /// The component name.
        component: String,
    },

    /// A manifest refers to a migration that was never registered.
    #[error("{component} {version} refers to unknown migration {reference:?}")]
    UnknownMigration {
        /// Component declaring the reference.
        component: String,
        /// Version declaring the reference.
        version: String,
        /// The unresolved name.
        reference: String,
    },

    /// No declared version satisfies a dependency.
    #[error("no version satisfies dependency {dependency}")]
    UnsatisfiableDependency {
        /// The dependency, as written.
        dependency: String,
    },

    /// Cycle detection or path reconstruction failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A cluster requires two different versions of the same component.
    #[error("{}", describe_conflict(.root, .duplicates, .implicated))]
    InvalidDependencySpecification {
        /// Root version of the offending cluster.
        root: String,
        /// Components required at more than one version.
        duplicates: Vec<String>,
        /// Every version of a duplicated component, with its dependencies.
        implicated: Vec<ImplicatedVersion>,
    },

    /// An operation was scheduled into a phase that does not exist.
    #[error("no such phase: {name}")]
    UnknownPhase {
        /// The requested phase name.
        name: String,
    },

    /// A scheduled operation failed while executing.
    #[error("operation scheduled at {call_site} failed during {phase}: {source}")]
    OperationFailed {
        /// Phase that was running.
        phase: Phase,
        /// Where the operation was scheduled.
        call_site: String,
        /// The error raised by the operation.
        #[source]
        source: OperationError,
    },

    /// The planner was driven out of order.
    #[error("migration plan is {actual}, expected {expected}")]
    InvalidPlanState {
        /// State required by the call.
        expected: String,
        /// State the planner was in.
        actual: String,
    },

    /// Storage, serialization or manifest error.
    #[error(transparent)]
    Core(#[from] crate::error::Error),
}

impl From<sled::Error> for MigrationError {
    fn from(err: sled::Error) -> Self {
        MigrationError::Core(err.into())
    }
}
