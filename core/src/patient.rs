//! Patient timeline generator: one patient's true clinical events.
//!
//! Treatment assignment is decided at cohort level and injected here;
//! this module only turns an assignment into dates.
//!
//! Draw order on the patient's stream (fixed, never reordered):
//!   1. diagnosis date
//!   2. drug A start latency (only if assigned)
//!   3. drug B start latency (only if assigned)
//!   4. death time

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    clock::{add_days, add_years, days_between},
    config::SimulationConfig,
    error::{SimError, SimResult},
    rng::RandomSource,
    sampler::{sample_date_between, sample_death_time, sample_uniform_range},
    types::{CohortMembership, Drug, EventType, PatientId},
};

/// Pre-decided treatment assignment for one patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreatmentAssignment {
    pub drug_a: bool,
    pub drug_b: bool,
}

impl TreatmentAssignment {
    pub fn is_assigned(&self, drug: Drug) -> bool {
        match drug {
            Drug::A => self.drug_a,
            Drug::B => self.drug_b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patient {
    pub id: PatientId,
    pub diagnosis_date: NaiveDate,
    pub cohort: CohortMembership,
    pub drug_a_start_date: Option<NaiveDate>,
    pub drug_b_start_date: Option<NaiveDate>,
    /// `None` means alive at the end of the survival horizon (censored).
    pub death_date: Option<NaiveDate>,
}

impl Patient {
    pub fn drug_start_date(&self, drug: Drug) -> Option<NaiveDate> {
        match drug {
            Drug::A => self.drug_a_start_date,
            Drug::B => self.drug_b_start_date,
        }
    }

    pub fn drug_a_assigned(&self) -> bool {
        self.drug_a_start_date.is_some()
    }

    pub fn drug_b_assigned(&self) -> bool {
        self.drug_b_start_date.is_some()
    }

    /// Assigned drugs whose start date falls after the patient's death.
    pub fn drugs_started_after_death(&self) -> Vec<Drug> {
        let Some(death) = self.death_date else {
            return Vec::new();
        };
        Drug::ALL
            .into_iter()
            .filter(|&drug| self.drug_start_date(drug).is_some_and(|start| start > death))
            .collect()
    }

    pub fn is_retrospective(&self) -> bool {
        self.cohort == CohortMembership::Retrospective
    }

    /// Alive at `date`: no death, or death strictly after it.
    pub fn is_alive_on(&self, date: NaiveDate) -> bool {
        self.death_date.map_or(true, |d| d > date)
    }

    pub fn event_date(&self, event_type: EventType) -> Option<NaiveDate> {
        match event_type {
            EventType::Diagnosis  => Some(self.diagnosis_date),
            EventType::DrugAStart => self.drug_a_start_date,
            EventType::DrugBStart => self.drug_b_start_date,
            EventType::Death      => self.death_date,
        }
    }

    /// One TrueEvent per event that occurred, in `EventType` order.
    pub fn true_events(&self) -> Vec<TrueEvent> {
        EventType::ALL
            .into_iter()
            .filter_map(|event_type| {
                self.event_date(event_type).map(|true_date| TrueEvent {
                    patient_id: self.id,
                    event_type,
                    true_date,
                })
            })
            .collect()
    }
}

/// A clinical event at the date it actually happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrueEvent {
    pub patient_id: PatientId,
    pub event_type: EventType,
    pub true_date: NaiveDate,
}

impl TrueEvent {
    /// Only events inside the observation window can ever be discovered.
    pub fn is_observable(&self, config: &SimulationConfig) -> bool {
        self.true_date >= config.observation_start() && self.true_date <= config.observation_end()
    }
}

pub struct PatientTimelineGenerator<'a> {
    config: &'a SimulationConfig,
}

impl<'a> PatientTimelineGenerator<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self { config }
    }

    pub fn generate<R: RandomSource + ?Sized>(
        &self,
        id: PatientId,
        assignment: TreatmentAssignment,
        rng: &mut R,
    ) -> SimResult<Patient> {
        let diagnosis_date = sample_date_between(
            rng,
            self.config.observation_start(),
            self.config.observation_end(),
        )?;

        let drug_a_start_date = self.drug_start_date(diagnosis_date, Drug::A, assignment, rng)?;
        let drug_b_start_date = self.drug_start_date(diagnosis_date, Drug::B, assignment, rng)?;

        let death_date = match sample_death_time(
            rng,
            self.config.survival(),
            self.config.survival_horizon_years(),
        ) {
            Some(years) => Some(add_years(diagnosis_date, years)?),
            None => None,
        };

        let cohort = if diagnosis_date < self.config.study_start() {
            CohortMembership::Retrospective
        } else {
            CohortMembership::Prospective
        };

        let patient = Patient {
            id,
            diagnosis_date,
            cohort,
            drug_a_start_date,
            drug_b_start_date,
            death_date,
        };
        self.check_invariants(&patient)?;
        Ok(patient)
    }

    /// Start date for an assigned drug; `None` when not assigned.
    pub fn drug_start_date<R: RandomSource + ?Sized>(
        &self,
        diagnosis_date: NaiveDate,
        drug: Drug,
        assignment: TreatmentAssignment,
        rng: &mut R,
    ) -> SimResult<Option<NaiveDate>> {
        if !assignment.is_assigned(drug) {
            return Ok(None);
        }
        let latency = sample_uniform_range(rng, self.config.drug(drug).start_latency);
        add_days(diagnosis_date, latency).map(Some)
    }

    /// A breach here is a sampling defect, not bad input: abort the run.
    pub fn check_invariants(&self, patient: &Patient) -> SimResult<()> {
        let cfg = self.config;
        if patient.diagnosis_date < cfg.observation_start() || patient.diagnosis_date > cfg.observation_end() {
            return Err(SimError::invariant(
                patient.id,
                format!("diagnosis {} outside observation window", patient.diagnosis_date),
            ));
        }
        for drug in Drug::ALL {
            if let Some(start) = patient.drug_start_date(drug) {
                let latency = days_between(patient.diagnosis_date, start);
                let range = cfg.drug(drug).start_latency;
                if !range.contains(latency) {
                    return Err(SimError::invariant(
                        patient.id,
                        format!("drug {drug:?} latency {latency}d outside [{}, {}]", range.min, range.max),
                    ));
                }
            }
        }
        if let Some(death) = patient.death_date {
            if death < patient.diagnosis_date {
                return Err(SimError::invariant(
                    patient.id,
                    format!("death {death} precedes diagnosis {}", patient.diagnosis_date),
                ));
            }
        }
        let retrospective = patient.diagnosis_date < cfg.study_start();
        if retrospective != patient.is_retrospective() {
            return Err(SimError::invariant(patient.id, "cohort membership disagrees with diagnosis date"));
        }
        Ok(())
    }
}
