//! Read-only probes over a node set
//!
//! Probes query every node concurrently, wait for all answers and never
//! fail because one node could not be read: a failed read becomes an
//! explicit `Observed::Unknown` sentinel. Deciding whether a sentinel
//! breaks a phase is left to the orchestrator.

pub mod finality;
pub mod version;

pub use finality::{FinalityEntry, FinalityProbe, FinalizationSnapshot};
pub use version::{VersionConflict, VersionEntry, VersionProbe, VersionReport};

use std::fmt;

/// Value read from a node, or the reason it could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed<T> {
    /// Value the node reported
    Known(T),
    /// Read failed; holds the error text
    Unknown(String),
}

impl<T> Observed<T> {
    /// Build from a fallible read
    pub fn from_result<E: fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Known(value),
            Err(err) => Self::Unknown(err.to_string()),
        }
    }

    /// Value if known
    #[inline]
    pub fn known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown(_) => None,
        }
    }

    /// Whether this is the unknown sentinel
    #[inline]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl<T: fmt::Display> fmt::Display for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => value.fmt(f),
            Self::Unknown(_) => f.write_str("ERROR"),
        }
    }
}
