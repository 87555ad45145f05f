//! The fixed sequence of phases a wave executes in.

use super::error::MigrationError;
use std::fmt;
use std::str::FromStr;

/// One of the nine ordered buckets operations are scheduled into.
///
/// Foreign keys are dropped before the primary keys they reference and before
/// columns are altered; primary keys are created before the indexes and
/// foreign keys that need them; data moves once the structure is in place and
/// cleanup runs last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    DropFk,
    DropPk,
    PreAlter,
    Alter,
    CreatePk,
    Indexes,
    Data,
    CreateFk,
    Cleanup,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 9] = [
        Phase::DropFk,
        Phase::DropPk,
        Phase::PreAlter,
        Phase::Alter,
        Phase::CreatePk,
        Phase::Indexes,
        Phase::Data,
        Phase::CreateFk,
        Phase::Cleanup,
    ];

    /// Canonical name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::DropFk => "drop_fk",
            Phase::DropPk => "drop_pk",
            Phase::PreAlter => "pre_alter",
            Phase::Alter => "alter",
            Phase::CreatePk => "create_pk",
            Phase::Indexes => "indexes",
            Phase::Data => "data",
            Phase::CreateFk => "create_fk",
            Phase::Cleanup => "cleanup",
        }
    }

    /// Position in [`Phase::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| MigrationError::UnknownPhase { name: s.to_string() })
    }
}
