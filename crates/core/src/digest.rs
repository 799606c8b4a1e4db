//! Digest kinds and the digest status state machine.
//!
//! ```text
//! pending -> sent            (terminal)
//! pending -> failed          (retry budget exhausted)
//! failed  -> pending         (operator requeue)
//! ```
//!
//! A failed dispatch that still has attempts left keeps the digest
//! `pending`; the scheduler retries it on its next sweep.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::preferences::BatchFrequency;

// ---------------------------------------------------------------------------
// DigestType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestType {
    Daily,
    Weekly,
}

impl DigestType {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestType::Daily => "daily",
            DigestType::Weekly => "weekly",
        }
    }

    /// Digest type produced for a batching frequency. `Immediate` batching
    /// is reported as a daily digest.
    pub fn for_frequency(frequency: BatchFrequency) -> Self {
        match frequency {
            BatchFrequency::Weekly => DigestType::Weekly,
            BatchFrequency::Immediate | BatchFrequency::Daily => DigestType::Daily,
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(DigestType::Daily),
            "weekly" => Ok(DigestType::Weekly),
            other => Err(format!("Unknown digest type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// DigestStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Pending,
    Sent,
    Failed,
}

impl DigestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestStatus::Pending => "pending",
            DigestStatus::Sent => "sent",
            DigestStatus::Failed => "failed",
        }
    }

    /// A digest that has not reached `sent` still owns its items.
    pub fn is_unresolved(self) -> bool {
        !matches!(self, DigestStatus::Sent)
    }
}

impl fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DigestStatus::Pending),
            "sent" => Ok(DigestStatus::Sent),
            "failed" => Ok(DigestStatus::Failed),
            other => Err(format!("Unknown digest status: {other}")),
        }
    }
}

pub mod state_machine {
    use super::DigestStatus;

    /// Returns the set of statuses reachable from `from`.
    pub fn valid_transitions(from: DigestStatus) -> &'static [DigestStatus] {
        match from {
            DigestStatus::Pending => &[DigestStatus::Sent, DigestStatus::Failed],
            DigestStatus::Failed => &[DigestStatus::Pending],
            DigestStatus::Sent => &[],
        }
    }

    pub fn can_transition(from: DigestStatus, to: DigestStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning an error message for invalid ones.
    pub fn validate_transition(from: DigestStatus, to: DigestStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid digest transition: {from} -> {to}"))
        }
    }
}
