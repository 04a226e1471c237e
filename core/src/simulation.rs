//! The simulation driver.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Cohort generation      (treatment plan, then one timeline per patient)
//!   2. Recording              (latency + DB-update snapping)
//!   3. Abstraction            (monthly capacity-limited queue)
//!   4. Sanity check           (cross-layer date ordering)
//!   5. Report
//!
//! RULES:
//!   - All randomness flows through the RngBank built from `seed`.
//!   - Every stage reports into the run's event log.
//!   - Any invariant failure aborts the whole run; no patient is skipped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    abstraction::{AbstractionPipeline, ObservedRecord, PipelineOutput},
    cohort::{Cohort, CohortGenerator},
    config::SimulationConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    patient::{Patient, TrueEvent},
    report::SimulationReport,
    rng::RngBank,
    types::RunId,
};

pub struct Simulation {
    pub run_id: RunId,
    config:     SimulationConfig,
    rng_bank:   RngBank,
    seed:       u64,
    event_log:  Vec<SimEvent>,
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub cohort:   Cohort,
    pub pipeline: PipelineOutput,
    pub report:   SimulationReport,
}

impl SimulationOutput {
    /// The true dataset: one row per true event.
    pub fn true_dataset(&self) -> &[TrueEvent] {
        &self.cohort.true_events
    }

    /// The observed dataset: one row per emitted record.
    pub fn observed_dataset(&self) -> &[ObservedRecord] {
        &self.pipeline.records
    }
}

/// Serialisable pair of datasets, as exported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datasets {
    pub true_events: Vec<TrueEvent>,
    pub observed: Vec<ObservedRecord>,
}

impl Simulation {
    pub fn new(run_id: RunId, seed: u64, config: SimulationConfig) -> Self {
        Self {
            run_id,
            config,
            rng_bank: RngBank::new(seed),
            seed,
            event_log: Vec::new(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn event_log(&self) -> &[SimEvent] {
        &self.event_log
    }

    pub fn run(&mut self) -> SimResult<SimulationOutput> {
        self.event_log.clear();
        self.event_log.push(SimEvent::RunInitialized {
            run_id: self.run_id.clone(),
            seed:   self.seed,
        });

        let cohort = CohortGenerator::new(&self.config).generate(&self.rng_bank)?;
        self.event_log.push(SimEvent::CohortGenerated {
            patients:       cohort.stats.cohort_size,
            true_events:    cohort.true_events.len(),
            retrospective:  cohort.stats.retrospective,
            prospective:    cohort.stats.prospective,
            drug_a_treated: cohort.stats.drug_a_treated,
            drug_b_treated: cohort.stats.drug_b_treated,
            deaths:         cohort.stats.deaths,
            starts_after_death: cohort.stats.starts_after_death,
        });

        let pipeline = AbstractionPipeline::new(&self.config).run(&cohort.true_events, &self.rng_bank)?;
        self.event_log.push(SimEvent::EventsRecorded {
            recorded:  pipeline.records.len(),
            truncated: pipeline.truncated_events,
        });
        self.event_log.extend(pipeline.monthly.iter().map(|m| SimEvent::AbstractionMonthClosed {
            month_start:  m.month_start,
            newly_queued: m.newly_queued,
            abstracted:   m.abstracted,
            backlog:      m.backlog,
        }));

        check_output(&cohort.patients, &pipeline.records)?;
        self.event_log.push(SimEvent::SanityCheckPassed {
            patients: cohort.patients.len(),
            records:  pipeline.records.len(),
        });

        let report = SimulationReport::build(&self.config, &cohort, &pipeline);
        self.event_log.push(SimEvent::RunCompleted {
            observed_records:   report.observed_records,
            abstracted_records: report.abstracted_records,
            backlog:            pipeline.backlog_at_end,
        });
        log::info!(
            "run {}: {} patients, {} observed records, {} fully abstracted patients",
            self.run_id,
            report.num_patients,
            report.observed_records,
            report.fully_abstracted_patients,
        );

        Ok(SimulationOutput { cohort, pipeline, report })
    }
}

/// Cross-layer consistency: every record matches its patient's true
/// event, and dates only move forward through the stages.
pub fn check_output(patients: &[Patient], records: &[ObservedRecord]) -> SimResult<()> {
    let by_id: HashMap<_, _> = patients.iter().map(|p| (p.id, p)).collect();
    for r in records {
        let patient = by_id
            .get(&r.patient_id)
            .ok_or_else(|| SimError::invariant(r.patient_id, "observed record for unknown patient"))?;
        if patient.event_date(r.event_type) != Some(r.true_date) {
            return Err(SimError::invariant(
                r.patient_id,
                format!("{} record does not match the true event", r.event_type),
            ));
        }
        if r.recorded_in_db_date < r.true_date {
            return Err(SimError::invariant(
                r.patient_id,
                format!("{} recorded {} before it occurred {}", r.event_type, r.recorded_in_db_date, r.true_date),
            ));
        }
        if let Some(started) = r.abstraction_started_date {
            if started < r.recorded_in_db_date {
                return Err(SimError::invariant(
                    r.patient_id,
                    format!("{} abstraction started {started} before DB record {}", r.event_type, r.recorded_in_db_date),
                ));
            }
        }
        if let Some(abstracted) = r.abstracted_date {
            if r.abstraction_started_date.map_or(true, |s| abstracted < s) {
                return Err(SimError::invariant(
                    r.patient_id,
                    format!("{} abstracted {abstracted} before abstraction started", r.event_type),
                ));
            }
        }
    }
    Ok(())
}

impl From<&SimulationOutput> for Datasets {
    fn from(output: &SimulationOutput) -> Self {
        Self {
            true_events: output.true_dataset().to_vec(),
            observed:    output.observed_dataset().to_vec(),
        }
    }
}
