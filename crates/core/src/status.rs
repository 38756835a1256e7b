//! Artifact and operation status state machines.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a cached artifact row.
///
/// ```text
/// NEW ──claim──▶ PROCESSING ──▶ SUCCESS ──ttl──▶ STALE
///  ▲                 │    ▲         │              │
///  │                 ▼    └─claim───┴──────────────┘
///  │              FAILURE ──claim──▶ PROCESSING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    /// Tracked but never fetched.
    New,
    /// Claimed by a refresher; the upstream call is in flight.
    Processing,
    /// Last fetch resolved a URL.
    Success,
    /// Last fetch failed; the row carries the reason.
    Failure,
    /// A success that outlived the cache TTL.
    Stale,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Stale => "stale",
        }
    }

    /// SUCCESS and FAILURE are terminal for a refresh attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// States from which a refresher may claim the row unconditionally.
    pub const CLAIMABLE: [ArtifactStatus; 3] = [Self::New, Self::Failure, Self::Stale];
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "stale" => Ok(Self::Stale),
            other => Err(Error::InvalidStatus(format!("unknown artifact status '{other}'"))),
        }
    }
}

/// Lifecycle of a batch operation. Everything except PROCESSING is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Processing,
    Success,
    PartialSuccess,
    Failure,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "partial_success" => Ok(Self::PartialSuccess),
            "failure" => Ok(Self::Failure),
            other => Err(Error::InvalidStatus(format!(
                "unknown operation status '{other}'"
            ))),
        }
    }
}

/// Per-row outcome tally used to derive an operation's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

impl OutcomeCounts {
    /// Record one artifact row's status.
    pub fn record(&mut self, status: ArtifactStatus) {
        match status {
            ArtifactStatus::Success => self.succeeded += 1,
            ArtifactStatus::Failure => self.failed += 1,
            _ => self.pending += 1,
        }
    }

    /// Record a referenced row that could not be loaded.
    pub fn record_missing(&mut self) {
        self.pending += 1;
    }

    /// Apply the aggregation decision table.
    ///
    /// Any pending row keeps the operation open.
    pub fn status(&self) -> OperationStatus {
        if self.pending > 0 {
            return OperationStatus::Processing;
        }
        match (self.succeeded > 0, self.failed > 0) {
            (true, false) => OperationStatus::Success,
            (true, true) => OperationStatus::PartialSuccess,
            (false, true) => OperationStatus::Failure,
            (false, false) => OperationStatus::Processing,
        }
    }
}
