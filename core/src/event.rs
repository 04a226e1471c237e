//! The run event log: a typed, ordered trace of what each stage did.
//!
//! RULE: Stages report through SimEvent only; the log is what gets
//! persisted and what the determinism tests compare.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::RunId;

/// Every event emitted during a run.
/// Variants are added over time; never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Run lifecycle ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    RunCompleted {
        observed_records: usize,
        abstracted_records: usize,
        backlog: usize,
    },

    // ── True layer ─────────────────────────────────
    CohortGenerated {
        patients: usize,
        true_events: usize,
        retrospective: usize,
        prospective: usize,
        drug_a_treated: usize,
        drug_b_treated: usize,
        deaths: usize,
        starts_after_death: usize,
    },

    // ── Observed layer ─────────────────────────────
    EventsRecorded {
        recorded: usize,
        truncated: usize,
    },
    AbstractionMonthClosed {
        month_start: NaiveDate,
        newly_queued: usize,
        abstracted: usize,
        backlog: usize,
    },
    SanityCheckPassed {
        patients: usize,
        records: usize,
    },
}

impl SimEvent {
    /// Stable string name, used for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            SimEvent::RunInitialized { .. }         => "run_initialized",
            SimEvent::RunCompleted { .. }           => "run_completed",
            SimEvent::CohortGenerated { .. }        => "cohort_generated",
            SimEvent::EventsRecorded { .. }         => "events_recorded",
            SimEvent::AbstractionMonthClosed { .. } => "abstraction_month_closed",
            SimEvent::SanityCheckPassed { .. }      => "sanity_check_passed",
        }
    }

    /// The stage that emitted this event.
    pub fn stage(&self) -> &'static str {
        match self {
            SimEvent::RunInitialized { .. }
            | SimEvent::RunCompleted { .. }
            | SimEvent::SanityCheckPassed { .. } => "simulation",
            SimEvent::CohortGenerated { .. } => "cohort",
            SimEvent::EventsRecorded { .. } => "recording",
            SimEvent::AbstractionMonthClosed { .. } => "abstraction",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub sequence: u64,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized SimEvent
}
