//! Simulation parameters.
//!
//! `RawSimParams` is the serde shape of a parameter file. It becomes a
//! `SimulationConfig` only through `SimulationConfig::new`, which
//! validates every field; a config that exists is a valid config.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    error::{SimError, SimResult},
    sampler::{DayRange, FractionRange, SurvivalTable},
    types::{Drug, EventType},
};

/// What `patients_abstracted_per_month` counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapacityUnit {
    /// At most N events leave the queue per month.
    #[default]
    Events,
    /// At most N distinct patients are worked per month; all of an
    /// admitted patient's queued events are abstracted together.
    Patients,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawSimParams {
    pub observation_start_date: NaiveDate,
    pub observation_end_date: NaiveDate,
    pub study_start_date: NaiveDate,
    pub cohort_size: u32,
    pub drug_a_treatment_fraction_range: (f64, f64),
    pub drug_b_treatment_fraction_range: (f64, f64),
    pub drug_a_start_date_range: (i64, i64),
    pub drug_b_start_date_range: (i64, i64),
    pub survival_probabilities_per_year: BTreeMap<u32, f64>,
    pub db_update_frequency_in_months: u32,
    pub death_date_recording_latency_range: (i64, i64),
    #[serde(default)]
    pub diagnosis_recording_latency_range: (i64, i64),
    #[serde(default)]
    pub drug_a_recording_latency_range: (i64, i64),
    #[serde(default)]
    pub drug_b_recording_latency_range: (i64, i64),
    pub diagnosis_date_abstraction_latency_range: (i64, i64),
    pub drug_a_date_abstraction_latency_range: (i64, i64),
    pub drug_b_date_abstraction_latency_range: (i64, i64),
    pub death_date_abstraction_latency_range: (i64, i64),
    pub patients_abstracted_per_month: u32,
    #[serde(default)]
    pub abstraction_capacity_unit: CapacityUnit,
    #[serde(default)]
    pub simulation_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub survival_horizon_years: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrugParams {
    pub treatment_fraction:  FractionRange,
    pub start_latency:       DayRange,
    pub recording_latency:   DayRange,
    pub abstraction_latency: DayRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    observation_start:     NaiveDate,
    observation_end:       NaiveDate,
    study_start:           NaiveDate,
    simulation_end:        NaiveDate,
    cohort_size:           u32,
    drug_a:                DrugParams,
    drug_b:                DrugParams,
    survival:              SurvivalTable,
    survival_horizon_years: u32,
    db_update_frequency_months: u32,
    diagnosis_recording_latency:   DayRange,
    death_recording_latency:       DayRange,
    diagnosis_abstraction_latency: DayRange,
    death_abstraction_latency:     DayRange,
    abstraction_capacity:  u32,
    capacity_unit:         CapacityUnit,
}

impl SimulationConfig {
    pub fn new(raw: RawSimParams) -> SimResult<Self> {
        if raw.observation_start_date > raw.observation_end_date {
            return Err(SimError::config(
                "observation_end_date",
                format!("{} precedes observation_start_date {}", raw.observation_end_date, raw.observation_start_date),
            ));
        }
        if raw.study_start_date < raw.observation_start_date
            || raw.study_start_date > raw.observation_end_date
        {
            return Err(SimError::config(
                "study_start_date",
                format!(
                    "{} lies outside the observation window {}..={}",
                    raw.study_start_date, raw.observation_start_date, raw.observation_end_date
                ),
            ));
        }
        let simulation_end = raw.simulation_end_date.unwrap_or(raw.observation_end_date);
        if simulation_end < raw.observation_end_date {
            return Err(SimError::config(
                "simulation_end_date",
                format!("{simulation_end} precedes observation_end_date {}", raw.observation_end_date),
            ));
        }
        if raw.cohort_size == 0 {
            return Err(SimError::config("cohort_size", "must be a positive integer"));
        }
        if raw.db_update_frequency_in_months == 0 {
            return Err(SimError::config("db_update_frequency_in_months", "must be a positive integer"));
        }
        if raw.patients_abstracted_per_month == 0 {
            return Err(SimError::config("patients_abstracted_per_month", "must be a positive integer"));
        }

        let survival = SurvivalTable::new("survival_probabilities_per_year", &raw.survival_probabilities_per_year)?;
        let survival_horizon_years = match raw.survival_horizon_years {
            Some(0) => return Err(SimError::config("survival_horizon_years", "must be at least 1")),
            Some(years) => years,
            None => survival.last_year(),
        };

        let drug_a = DrugParams {
            treatment_fraction:  FractionRange::from_pair("drug_a_treatment_fraction_range", raw.drug_a_treatment_fraction_range)?,
            start_latency:       DayRange::from_pair("drug_a_start_date_range", raw.drug_a_start_date_range)?,
            recording_latency:   DayRange::from_pair("drug_a_recording_latency_range", raw.drug_a_recording_latency_range)?,
            abstraction_latency: DayRange::from_pair("drug_a_date_abstraction_latency_range", raw.drug_a_date_abstraction_latency_range)?,
        };
        let drug_b = DrugParams {
            treatment_fraction:  FractionRange::from_pair("drug_b_treatment_fraction_range", raw.drug_b_treatment_fraction_range)?,
            start_latency:       DayRange::from_pair("drug_b_start_date_range", raw.drug_b_start_date_range)?,
            recording_latency:   DayRange::from_pair("drug_b_recording_latency_range", raw.drug_b_recording_latency_range)?,
            abstraction_latency: DayRange::from_pair("drug_b_date_abstraction_latency_range", raw.drug_b_date_abstraction_latency_range)?,
        };

        Ok(Self {
            observation_start: raw.observation_start_date,
            observation_end:   raw.observation_end_date,
            study_start:       raw.study_start_date,
            simulation_end,
            cohort_size:       raw.cohort_size,
            drug_a,
            drug_b,
            survival,
            survival_horizon_years,
            db_update_frequency_months: raw.db_update_frequency_in_months,
            diagnosis_recording_latency:   DayRange::from_pair("diagnosis_recording_latency_range", raw.diagnosis_recording_latency_range)?,
            death_recording_latency:       DayRange::from_pair("death_date_recording_latency_range", raw.death_date_recording_latency_range)?,
            diagnosis_abstraction_latency: DayRange::from_pair("diagnosis_date_abstraction_latency_range", raw.diagnosis_date_abstraction_latency_range)?,
            death_abstraction_latency:     DayRange::from_pair("death_date_abstraction_latency_range", raw.death_date_abstraction_latency_range)?,
            abstraction_capacity: raw.patients_abstracted_per_month,
            capacity_unit:        raw.abstraction_capacity_unit,
        })
    }

    pub fn from_json_str(content: &str) -> SimResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(content);
        let raw = raw_params(&mut deserializer)?;
        deserializer.end()?;
        Self::new(raw)
    }

    /// Parse a key/value parameter file:
    ///
    /// ```text
    /// [SimParams]
    /// observation_start_date = 2010-01-01
    /// drug_a_start_date_range = 10, 90
    /// survival_probabilities_per_year = 1: 0.85, 3: 0.45
    /// ```
    pub fn from_kv_str(content: &str) -> SimResult<Self> {
        let mut object = serde_json::Map::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(SimError::config(
                    format!("line {}", line_no + 1),
                    format!("expected `key = value`, got `{line}`"),
                ));
            };
            let key = key.trim();
            object.insert(key.to_string(), kv_value_to_json(key, value.trim())?);
        }
        Self::new(raw_params(serde_json::Value::Object(object))?)
    }

    /// Load by extension: `.json` as JSON, anything else as key/value.
    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_kv_str(&content)
        }
    }

    /// Small, fully deterministic parameter set for tests.
    pub fn default_test() -> Self {
        Self::new(RawSimParams::default_test())
            .unwrap_or_else(|e| panic!("default_test config must be valid: {e}"))
    }

    pub fn observation_start(&self) -> NaiveDate { self.observation_start }
    pub fn observation_end(&self) -> NaiveDate { self.observation_end }
    pub fn study_start(&self) -> NaiveDate { self.study_start }
    /// Terminal date of the simulation; nothing is recorded or abstracted after it.
    pub fn simulation_end(&self) -> NaiveDate { self.simulation_end }
    pub fn cohort_size(&self) -> u32 { self.cohort_size }
    pub fn survival(&self) -> &SurvivalTable { &self.survival }
    pub fn survival_horizon_years(&self) -> u32 { self.survival_horizon_years }
    pub fn db_update_frequency_months(&self) -> u32 { self.db_update_frequency_months }
    pub fn abstraction_capacity(&self) -> u32 { self.abstraction_capacity }
    pub fn capacity_unit(&self) -> CapacityUnit { self.capacity_unit }

    pub fn drug(&self, drug: Drug) -> &DrugParams {
        match drug {
            Drug::A => &self.drug_a,
            Drug::B => &self.drug_b,
        }
    }

    pub fn recording_latency(&self, event_type: EventType) -> DayRange {
        match event_type {
            EventType::Diagnosis  => self.diagnosis_recording_latency,
            EventType::DrugAStart => self.drug_a.recording_latency,
            EventType::DrugBStart => self.drug_b.recording_latency,
            EventType::Death      => self.death_recording_latency,
        }
    }

    pub fn abstraction_latency(&self, event_type: EventType) -> DayRange {
        match event_type {
            EventType::Diagnosis  => self.diagnosis_abstraction_latency,
            EventType::DrugAStart => self.drug_a.abstraction_latency,
            EventType::DrugBStart => self.drug_b.abstraction_latency,
            EventType::Death      => self.death_abstraction_latency,
        }
    }
}

impl TryFrom<RawSimParams> for SimulationConfig {
    type Error = SimError;

    fn try_from(raw: RawSimParams) -> SimResult<Self> {
        Self::new(raw)
    }
}

impl RawSimParams {
    pub fn default_test() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
        Self {
            observation_start_date: date(2010, 1, 1),
            observation_end_date:   date(2014, 12, 31),
            study_start_date:       date(2012, 1, 1),
            cohort_size: 200,
            drug_a_treatment_fraction_range: (0.4, 0.6),
            drug_b_treatment_fraction_range: (0.2, 0.3),
            drug_a_start_date_range: (14, 90),
            drug_b_start_date_range: (30, 180),
            survival_probabilities_per_year: [(1, 0.85), (3, 0.45), (5, 0.32)].into(),
            db_update_frequency_in_months: 3,
            death_date_recording_latency_range: (14, 60),
            diagnosis_recording_latency_range: (0, 0),
            drug_a_recording_latency_range: (0, 0),
            drug_b_recording_latency_range: (0, 0),
            diagnosis_date_abstraction_latency_range: (7, 30),
            drug_a_date_abstraction_latency_range: (7, 30),
            drug_b_date_abstraction_latency_range: (7, 30),
            death_date_abstraction_latency_range: (14, 45),
            patients_abstracted_per_month: 40,
            abstraction_capacity_unit: CapacityUnit::Events,
            simulation_end_date: None,
            survival_horizon_years: None,
        }
    }
}

/// Deserialize `RawSimParams`, naming the top-level key that failed.
fn raw_params<'de, D>(deserializer: D) -> SimResult<RawSimParams>
where
    D: serde::Deserializer<'de, Error = serde_json::Error>,
{
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let reason = err.inner().to_string();
        let field = match err.path().iter().next() {
            Some(serde_path_to_error::Segment::Map { key }) => key.clone(),
            _ => missing_field(&reason).unwrap_or("parameters").to_string(),
        };
        SimError::config(field, reason)
    })
}

/// The key named by serde's "missing field" message.
fn missing_field(message: &str) -> Option<&str> {
    message.strip_prefix("missing field `")?.split('`').next()
}

/// Map one key/value right-hand side onto the JSON shape serde expects:
/// `y: p, ...` → object, `a, b` → array, numbers → numbers, else string.
fn kv_value_to_json(key: &str, value: &str) -> SimResult<serde_json::Value> {
    use serde_json::Value;

    let number = |s: &str| -> SimResult<Value> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Ok(Value::from(i));
        }
        s.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| SimError::config(key, format!("`{s}` is not a number")))
    };

    if value.contains(':') {
        let mut map = serde_json::Map::new();
        for part in value.split(',') {
            let (k, v) = part
                .split_once(':')
                .ok_or_else(|| SimError::config(key, format!("expected `year: probability`, got `{part}`")))?;
            map.insert(k.trim().to_string(), number(v)?);
        }
        return Ok(Value::Object(map));
    }
    if value.contains(',') {
        let items = value.split(',').map(number).collect::<SimResult<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }
    if let Ok(v) = number(value) {
        return Ok(v);
    }
    Ok(Value::String(value.to_string()))
}
