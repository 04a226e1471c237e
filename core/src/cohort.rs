//! Cohort generator: the full true population.
//!
//! Treatment fractions are cohort-level targets: for each drug one
//! fraction f is drawn from its range and exactly round(f × N) patients
//! are picked without replacement. Drug A and drug B are picked
//! independently, so a patient may get neither, either or both.

use serde::{Deserialize, Serialize};

use crate::{
    config::SimulationConfig,
    error::SimResult,
    patient::{Patient, PatientTimelineGenerator, TreatmentAssignment, TrueEvent},
    rng::{RandomSource, RngBank, StreamSlot},
    sampler::{choose_without_replacement, sample_fraction},
    types::{Drug, PatientId},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CohortStats {
    pub cohort_size: usize,
    pub retrospective: usize,
    pub prospective: usize,
    pub drug_a_target_fraction: f64,
    pub drug_b_target_fraction: f64,
    pub drug_a_treated: usize,
    pub drug_b_treated: usize,
    pub both_treated: usize,
    pub untreated: usize,
    pub deaths: usize,
    pub censored: usize,
    /// Drug starts dated after the patient's death. They stay in the
    /// true layer so treated counts keep matching the targets.
    pub starts_after_death: usize,
}

impl CohortStats {
    pub fn drug_a_fraction(&self) -> f64 {
        self.drug_a_treated as f64 / self.cohort_size as f64
    }

    pub fn drug_b_fraction(&self) -> f64 {
        self.drug_b_treated as f64 / self.cohort_size as f64
    }
}

#[derive(Debug, Clone)]
pub struct Cohort {
    /// In generation order; `patients[i].id == i + 1`.
    pub patients: Vec<Patient>,
    pub true_events: Vec<TrueEvent>,
    pub stats: CohortStats,
}

/// Per-drug target fractions plus the resulting per-patient assignments.
#[derive(Debug, Clone)]
pub struct TreatmentPlan {
    pub drug_a_target_fraction: f64,
    pub drug_b_target_fraction: f64,
    pub assignments: Vec<TreatmentAssignment>,
}

pub struct CohortGenerator<'a> {
    config: &'a SimulationConfig,
}

impl<'a> CohortGenerator<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self { config }
    }

    /// Decide which patient slots receive each drug.
    pub fn plan_treatments<R: RandomSource + ?Sized>(&self, rng: &mut R) -> TreatmentPlan {
        let n = self.config.cohort_size() as usize;
        let mut assignments = vec![TreatmentAssignment::default(); n];
        let mut targets = [0.0; 2];

        for (slot, drug) in Drug::ALL.into_iter().enumerate() {
            let fraction = sample_fraction(rng, self.config.drug(drug).treatment_fraction);
            let k = ((fraction * n as f64).round() as usize).min(n);
            targets[slot] = fraction;
            for index in choose_without_replacement(rng, n, k) {
                match drug {
                    Drug::A => assignments[index].drug_a = true,
                    Drug::B => assignments[index].drug_b = true,
                }
            }
        }

        TreatmentPlan {
            drug_a_target_fraction: targets[0],
            drug_b_target_fraction: targets[1],
            assignments,
        }
    }

    pub fn generate(&self, bank: &RngBank) -> SimResult<Cohort> {
        let plan = self.plan_treatments(&mut bank.for_stage(StreamSlot::TreatmentAssignment));
        let timeline = PatientTimelineGenerator::new(self.config);

        let mut patients = Vec::with_capacity(plan.assignments.len());
        for (index, assignment) in plan.assignments.iter().enumerate() {
            let id = (index + 1) as PatientId;
            let mut rng = bank.for_patient(id);
            patients.push(timeline.generate(id, *assignment, &mut rng)?);
        }

        let true_events: Vec<TrueEvent> = patients.iter().flat_map(Patient::true_events).collect();
        let stats = compute_stats(&patients, &plan);

        log::info!(
            "cohort: generated {} patients ({} retrospective / {} prospective), {} true events",
            stats.cohort_size,
            stats.retrospective,
            stats.prospective,
            true_events.len(),
        );
        log::debug!(
            "cohort: drug A {} (target {:.3}), drug B {} (target {:.3}), deaths {}",
            stats.drug_a_treated,
            stats.drug_a_target_fraction,
            stats.drug_b_treated,
            stats.drug_b_target_fraction,
            stats.deaths,
        );
        if stats.starts_after_death > 0 {
            log::warn!(
                "cohort: {} drug starts fall after the patient's death",
                stats.starts_after_death,
            );
        }

        Ok(Cohort { patients, true_events, stats })
    }
}

fn compute_stats(patients: &[Patient], plan: &TreatmentPlan) -> CohortStats {
    let count = |pred: &dyn Fn(&Patient) -> bool| patients.iter().filter(|p| pred(p)).count();
    let retrospective = count(&|p| p.is_retrospective());
    let deaths = count(&|p| p.death_date.is_some());
    CohortStats {
        cohort_size: patients.len(),
        retrospective,
        prospective: patients.len() - retrospective,
        drug_a_target_fraction: plan.drug_a_target_fraction,
        drug_b_target_fraction: plan.drug_b_target_fraction,
        drug_a_treated: count(&|p| p.drug_a_assigned()),
        drug_b_treated: count(&|p| p.drug_b_assigned()),
        both_treated: count(&|p| p.drug_a_assigned() && p.drug_b_assigned()),
        untreated: count(&|p| !p.drug_a_assigned() && !p.drug_b_assigned()),
        deaths,
        censored: patients.len() - deaths,
        starts_after_death: patients.iter().map(|p| p.drugs_started_after_death().len()).sum(),
    }
}
