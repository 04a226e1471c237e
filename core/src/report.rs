//! Run statistics and the monthly discovery report.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    abstraction::{ObservedRecord, PipelineOutput},
    clock::{add_days, days_between, month_bucket_start},
    cohort::Cohort,
    config::SimulationConfig,
    error::{SimError, SimResult},
    types::{Drug, EventType, PatientId},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateStage {
    Occurred,
    RecordedInDb,
    Abstracted,
}

/// Earliest and latest date seen for one event type at one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventDateSpan {
    pub event_type: EventType,
    pub stage: DateStage,
    pub count: usize,
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationReport {
    pub num_patients: usize,
    pub retrospective: usize,
    pub prospective: usize,
    pub drug_a_fraction: f64,
    pub drug_b_fraction: f64,
    pub treated_fraction: f64,
    /// Share of patients alive at the observation end date.
    pub survival_fraction: f64,
    pub observed_records: usize,
    pub abstracted_records: usize,
    pub censored_abstractions: usize,
    pub truncated_events: usize,
    pub fully_abstracted_patients: usize,
    pub mean_diagnosis_to_db_days: Option<f64>,
    pub mean_treatment_to_db_days: Option<f64>,
    pub mean_treatment_to_abstraction_days: Option<f64>,
    pub mean_db_to_abstraction_days: Option<f64>,
    pub date_spans: Vec<EventDateSpan>,
}

impl SimulationReport {
    pub fn build(config: &SimulationConfig, cohort: &Cohort, pipeline: &PipelineOutput) -> Self {
        let patients = &cohort.patients;
        let n = patients.len().max(1) as f64;
        let records = &pipeline.records;

        let treated = patients
            .iter()
            .filter(|p| p.drug_a_assigned() || p.drug_b_assigned())
            .count();
        let alive = patients
            .iter()
            .filter(|p| p.is_alive_on(config.observation_end()))
            .count();
        let abstracted_records = records.iter().filter(|r| r.is_abstracted()).count();

        let mut abstracted_per_patient: BTreeMap<PatientId, usize> = BTreeMap::new();
        for r in records.iter().filter(|r| r.is_abstracted()) {
            *abstracted_per_patient.entry(r.patient_id).or_default() += 1;
        }
        let fully_abstracted_patients = patients
            .iter()
            .filter(|p| abstracted_per_patient.get(&p.id).copied().unwrap_or(0) == p.true_events().len())
            .count();

        let is_drug = |r: &&ObservedRecord| {
            matches!(r.event_type, EventType::DrugAStart | EventType::DrugBStart)
        };
        let is_diagnosis = |r: &&ObservedRecord| r.event_type == EventType::Diagnosis;

        Self {
            num_patients: patients.len(),
            retrospective: cohort.stats.retrospective,
            prospective: cohort.stats.prospective,
            drug_a_fraction: cohort.stats.drug_a_treated as f64 / n,
            drug_b_fraction: cohort.stats.drug_b_treated as f64 / n,
            treated_fraction: treated as f64 / n,
            survival_fraction: alive as f64 / n,
            observed_records: records.len(),
            abstracted_records,
            censored_abstractions: records.len() - abstracted_records,
            truncated_events: pipeline.truncated_events,
            fully_abstracted_patients,
            mean_diagnosis_to_db_days: mean_days(
                records.iter().filter(is_diagnosis).map(|r| (r.true_date, Some(r.recorded_in_db_date))),
            ),
            mean_treatment_to_db_days: mean_days(
                records.iter().filter(is_drug).map(|r| (r.true_date, Some(r.recorded_in_db_date))),
            ),
            mean_treatment_to_abstraction_days: mean_days(
                records.iter().filter(is_drug).map(|r| (r.true_date, r.abstracted_date)),
            ),
            mean_db_to_abstraction_days: mean_days(
                records.iter().map(|r| (r.recorded_in_db_date, r.abstracted_date)),
            ),
            date_spans: date_spans(cohort, records),
        }
    }
}

fn mean_days(pairs: impl Iterator<Item = (NaiveDate, Option<NaiveDate>)>) -> Option<f64> {
    let (sum, count) = pairs
        .filter_map(|(from, to)| to.map(|to| days_between(from, to)))
        .fold((0i64, 0usize), |(s, c), d| (s + d, c + 1));
    (count > 0).then(|| sum as f64 / count as f64)
}

fn date_spans(cohort: &Cohort, records: &[ObservedRecord]) -> Vec<EventDateSpan> {
    let span = |event_type, stage, dates: Vec<NaiveDate>| EventDateSpan {
        event_type,
        stage,
        count: dates.len(),
        min: dates.iter().min().copied(),
        max: dates.iter().max().copied(),
    };
    let mut spans = Vec::with_capacity(EventType::ALL.len() * 3);
    for event_type in EventType::ALL {
        let occurred = cohort
            .true_events
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| e.true_date)
            .collect();
        let of_type: Vec<&ObservedRecord> = records.iter().filter(|r| r.event_type == event_type).collect();
        spans.push(span(event_type, DateStage::Occurred, occurred));
        spans.push(span(
            event_type,
            DateStage::RecordedInDb,
            of_type.iter().map(|r| r.recorded_in_db_date).collect(),
        ));
        spans.push(span(
            event_type,
            DateStage::Abstracted,
            of_type.iter().filter_map(|r| r.abstracted_date).collect(),
        ));
    }
    spans
}

/// What a data consumer knows at `report_date` from abstracted records only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySnapshot {
    pub report_date: NaiveDate,
    pub known_patients: usize,
    pub new_patients: usize,
    pub treated_known: usize,
    pub deaths_known: usize,
}

/// One snapshot per month bucket from observation start to the terminal date.
pub fn monthly_discovery(
    config: &SimulationConfig,
    records: &[ObservedRecord],
) -> SimResult<Vec<DiscoverySnapshot>> {
    let known_before = |event_types: &[EventType], date: NaiveDate| -> BTreeSet<PatientId> {
        records
            .iter()
            .filter(|r| event_types.contains(&r.event_type))
            .filter(|r| r.abstracted_date.is_some_and(|d| d < date))
            .map(|r| r.patient_id)
            .collect()
    };

    let mut snapshots = Vec::new();
    let mut previous_known = 0usize;
    let mut index = 0u32;
    loop {
        let report_date = month_bucket_start(config.observation_start(), index)?;
        if report_date > config.simulation_end() {
            break;
        }
        let known_patients = known_before(&[EventType::Diagnosis], report_date).len();
        snapshots.push(DiscoverySnapshot {
            report_date,
            known_patients,
            new_patients: known_patients - previous_known,
            treated_known: known_before(&[EventType::DrugAStart, EventType::DrugBStart], report_date).len(),
            deaths_known: known_before(&[EventType::Death], report_date).len(),
        });
        previous_known = known_patients;
        index += 1;
    }
    Ok(snapshots)
}

/// One report row as a data consumer would compute it on `as_of`, from
/// records abstracted before that date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CohortReport {
    pub name: String,
    pub as_of: NaiveDate,
    pub num_patients: usize,
    pub dx_db_delta_days: Option<f64>,
    pub tx_db_delta_days: Option<f64>,
    pub tx_abst_delta_days: Option<f64>,
    pub db_abst_delta_days: Option<f64>,
    pub treated_fraction: f64,
    pub survival_fraction: f64,
}

/// Report over the patients known on `as_of`. An empty `drugs` slice
/// covers the whole known cohort; otherwise only patients known to have
/// started one of `drugs` are counted.
pub fn report_for_drugs(
    records: &[ObservedRecord],
    as_of: NaiveDate,
    drugs: &[Drug],
    name: impl Into<String>,
) -> CohortReport {
    let visible: Vec<&ObservedRecord> = records
        .iter()
        .filter(|r| r.abstracted_date.is_some_and(|d| d < as_of))
        .collect();
    let known: BTreeSet<PatientId> = visible
        .iter()
        .filter(|r| r.event_type == EventType::Diagnosis)
        .map(|r| r.patient_id)
        .collect();

    let all = Drug::ALL;
    let considered: &[Drug] = if drugs.is_empty() { &all } else { drugs };
    let starts: Vec<EventType> = considered.iter().map(Drug::start_event).collect();
    let is_start = |r: &&&ObservedRecord| starts.contains(&r.event_type);

    let treated: BTreeSet<PatientId> = visible
        .iter()
        .filter(is_start)
        .map(|r| r.patient_id)
        .filter(|id| known.contains(id))
        .collect();
    let scope = if drugs.is_empty() { &known } else { &treated };
    let scoped: Vec<&ObservedRecord> = visible
        .into_iter()
        .filter(|r| scope.contains(&r.patient_id))
        .collect();

    let n = scope.len();
    let deaths = scoped.iter().filter(|r| r.event_type == EventType::Death).count();
    let share = |count: usize| if n == 0 { 0.0 } else { count as f64 / n as f64 };

    CohortReport {
        name: name.into(),
        as_of,
        num_patients: n,
        dx_db_delta_days: mean_days(
            scoped
                .iter()
                .filter(|r| r.event_type == EventType::Diagnosis)
                .map(|r| (r.true_date, Some(r.recorded_in_db_date))),
        ),
        tx_db_delta_days: mean_days(
            scoped.iter().filter(is_start).map(|r| (r.true_date, Some(r.recorded_in_db_date))),
        ),
        tx_abst_delta_days: mean_days(
            scoped.iter().filter(is_start).map(|r| (r.true_date, r.abstracted_date)),
        ),
        db_abst_delta_days: mean_days(
            scoped.iter().map(|r| (r.recorded_in_db_date, r.abstracted_date)),
        ),
        treated_fraction: share(treated.len()),
        survival_fraction: if n == 0 { 0.0 } else { 1.0 - share(deaths) },
    }
}

/// Reports for `drugs` every `every_days` days from `start`. Without
/// `max_reports`, stops after the first report dated past the last
/// abstraction, since nothing can change after it.
pub fn periodic_reports(
    records: &[ObservedRecord],
    drugs: &[Drug],
    label: &str,
    start: NaiveDate,
    every_days: u32,
    max_reports: Option<usize>,
) -> SimResult<Vec<CohortReport>> {
    if every_days == 0 {
        return Err(SimError::config("report_every_days", "must be a positive integer"));
    }
    let last_change = records.iter().filter_map(|r| r.abstracted_date).max();

    let mut reports = Vec::new();
    let mut as_of = start;
    loop {
        if max_reports.is_some_and(|max| reports.len() >= max) {
            break;
        }
        reports.push(report_for_drugs(records, as_of, drugs, format!("{label}: {as_of}")));
        if max_reports.is_none() && last_change.map_or(true, |d| as_of > d) {
            break;
        }
        as_of = add_days(as_of, every_days)?;
    }
    Ok(reports)
}

/// Whole cohort and per drug once everything is known, then periodic
/// per-drug reports from study start.
pub fn standard_reports(
    config: &SimulationConfig,
    records: &[ObservedRecord],
    every_days: u32,
    max_reports: Option<usize>,
) -> SimResult<Vec<CohortReport>> {
    let final_date = add_days(config.simulation_end(), 1)?;
    let mut reports = vec![report_for_drugs(records, final_date, &[], "Whole Cohort")];
    for drug in Drug::ALL {
        reports.push(report_for_drugs(records, final_date, &[drug], format!("Drug {drug:?}")));
    }
    for drug in Drug::ALL {
        reports.extend(periodic_reports(
            records,
            &[drug],
            &format!("Drug {drug:?}"),
            config.study_start(),
            every_days,
            max_reports,
        )?);
    }
    Ok(reports)
}
