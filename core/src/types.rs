//! Shared primitive types used across the entire simulation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Patient identifier. Assigned 1..=cohort_size in generation order.
pub type PatientId = u32;

/// The canonical run identifier.
pub type RunId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Drug {
    A,
    B,
}

impl Drug {
    pub const ALL: [Drug; 2] = [Drug::A, Drug::B];

    pub fn start_event(&self) -> EventType {
        match self {
            Self::A => EventType::DrugAStart,
            Self::B => EventType::DrugBStart,
        }
    }
}

/// Clinical event kinds. Declaration order is the per-patient record order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Diagnosis,
    DrugAStart,
    DrugBStart,
    Death,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Diagnosis,
        EventType::DrugAStart,
        EventType::DrugBStart,
        EventType::Death,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagnosis  => "diagnosis",
            Self::DrugAStart => "drug_a_start",
            Self::DrugBStart => "drug_b_start",
            Self::Death      => "death",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown event type `{0}`")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Retrospective iff diagnosed before the study start date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CohortMembership {
    Retrospective,
    Prospective,
}
