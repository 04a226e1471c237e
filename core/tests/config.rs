//! Parameter validation and loading tests.

use chrono::NaiveDate;
use rwdsim_core::{
    config::{CapacityUnit, RawSimParams, SimulationConfig},
    error::SimError,
    types::{Drug, EventType},
};

fn rejected_field(raw: RawSimParams) -> String {
    match SimulationConfig::new(raw) {
        Err(SimError::Configuration { field, .. }) => field,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn default_test_parameters_are_valid() {
    let config = SimulationConfig::default_test();
    assert_eq!(config.cohort_size(), 200);
    assert_eq!(config.simulation_end(), config.observation_end());
    assert_eq!(config.survival_horizon_years(), 5);
    assert_eq!(config.capacity_unit(), CapacityUnit::Events);
    assert_eq!(config.recording_latency(EventType::Diagnosis).max, 0);
    assert_eq!(config.recording_latency(EventType::Death).min, 14);
    assert_eq!(config.drug(Drug::B).start_latency.max, 180);
}

#[test]
fn each_malformed_field_is_named() {
    let mut raw = RawSimParams::default_test();
    raw.cohort_size = 0;
    assert_eq!(rejected_field(raw), "cohort_size");

    let mut raw = RawSimParams::default_test();
    raw.study_start_date = NaiveDate::from_ymd_opt(2009, 6, 1).unwrap();
    assert_eq!(rejected_field(raw), "study_start_date");

    let mut raw = RawSimParams::default_test();
    raw.observation_end_date = NaiveDate::from_ymd_opt(2009, 12, 31).unwrap();
    assert_eq!(rejected_field(raw), "observation_end_date");

    let mut raw = RawSimParams::default_test();
    raw.drug_a_start_date_range = (90, 14);
    assert_eq!(rejected_field(raw), "drug_a_start_date_range");

    let mut raw = RawSimParams::default_test();
    raw.death_date_recording_latency_range = (-1, 5);
    assert_eq!(rejected_field(raw), "death_date_recording_latency_range");

    let mut raw = RawSimParams::default_test();
    raw.drug_b_treatment_fraction_range = (0.2, 1.5);
    assert_eq!(rejected_field(raw), "drug_b_treatment_fraction_range");

    let mut raw = RawSimParams::default_test();
    raw.survival_probabilities_per_year = [(1, 0.5), (2, 0.6)].into();
    assert_eq!(rejected_field(raw), "survival_probabilities_per_year");

    let mut raw = RawSimParams::default_test();
    raw.survival_probabilities_per_year.clear();
    assert_eq!(rejected_field(raw), "survival_probabilities_per_year");

    let mut raw = RawSimParams::default_test();
    raw.db_update_frequency_in_months = 0;
    assert_eq!(rejected_field(raw), "db_update_frequency_in_months");

    let mut raw = RawSimParams::default_test();
    raw.patients_abstracted_per_month = 0;
    assert_eq!(rejected_field(raw), "patients_abstracted_per_month");

    let mut raw = RawSimParams::default_test();
    raw.simulation_end_date = NaiveDate::from_ymd_opt(2013, 1, 1);
    assert_eq!(rejected_field(raw), "simulation_end_date");
}

#[test]
fn study_start_may_sit_on_either_window_edge() {
    let mut raw = RawSimParams::default_test();
    raw.study_start_date = raw.observation_start_date;
    assert!(SimulationConfig::new(raw.clone()).is_ok());
    raw.study_start_date = raw.observation_end_date;
    assert!(SimulationConfig::new(raw).is_ok());
}

const KV: &str = "\
[SimParams]
# window
observation_start_date = 2010-01-01
observation_end_date = 2014-12-31
study_start_date = 2012-01-01
cohort_size = 200
drug_a_treatment_fraction_range = 0.4, 0.6
drug_b_treatment_fraction_range = 0.2, 0.3
drug_a_start_date_range = 14, 90
drug_b_start_date_range = 30, 180
survival_probabilities_per_year = 1: 0.85, 3: 0.45, 5: 0.32
db_update_frequency_in_months = 3
death_date_recording_latency_range = 14, 60
diagnosis_date_abstraction_latency_range = 7, 30
drug_a_date_abstraction_latency_range = 7, 30
drug_b_date_abstraction_latency_range = 7, 30
death_date_abstraction_latency_range = 14, 45
patients_abstracted_per_month = 40
";

#[test]
fn key_value_file_matches_test_parameters() {
    let config = SimulationConfig::from_kv_str(KV).unwrap();
    assert_eq!(config, SimulationConfig::default_test());
}

#[test]
fn json_file_matches_key_value_file() {
    let json = serde_json::to_string_pretty(&RawSimParams::default_test()).unwrap();
    assert_eq!(
        SimulationConfig::from_json_str(&json).unwrap(),
        SimulationConfig::from_kv_str(KV).unwrap()
    );
}

#[test]
fn key_value_optional_keys_are_honoured() {
    let extra = format!(
        "{KV}abstraction_capacity_unit = patients\nsimulation_end_date = 2016-06-30\nsurvival_horizon_years = 10\n"
    );
    let config = SimulationConfig::from_kv_str(&extra).unwrap();
    assert_eq!(config.capacity_unit(), CapacityUnit::Patients);
    assert_eq!(config.simulation_end(), NaiveDate::from_ymd_opt(2016, 6, 30).unwrap());
    assert_eq!(config.survival_horizon_years(), 10);
}

#[test]
fn key_value_line_without_equals_is_rejected() {
    let broken = format!("{KV}cohort_size 200\n");
    assert!(matches!(
        SimulationConfig::from_kv_str(&broken),
        Err(SimError::Configuration { .. })
    ));
}

#[test]
fn load_dispatches_on_extension() {
    let dir = std::env::temp_dir().join(format!("rwdsim-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let ini = dir.join("simparams.ini");
    let json = dir.join("simparams.json");
    std::fs::write(&ini, KV).unwrap();
    std::fs::write(&json, serde_json::to_string(&RawSimParams::default_test()).unwrap()).unwrap();

    assert_eq!(SimulationConfig::load(&ini).unwrap(), SimulationConfig::load(&json).unwrap());
    assert!(matches!(SimulationConfig::load(dir.join("missing.ini")), Err(SimError::Io(_))));

    std::fs::remove_dir_all(&dir).ok();
}

fn kv_rejected_field(content: &str) -> String {
    match SimulationConfig::from_kv_str(content) {
        Err(SimError::Configuration { field, .. }) => field,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn unparseable_key_value_entries_are_named() {
    assert_eq!(kv_rejected_field(&format!("{KV}cohort_size = -5\n")), "cohort_size");
    assert_eq!(
        kv_rejected_field(&format!("{KV}drug_a_start_date_range = 14\n")),
        "drug_a_start_date_range"
    );
    assert_eq!(
        kv_rejected_field(&format!("{KV}drug_b_start_date_range = 30,\n")),
        "drug_b_start_date_range"
    );
    assert_eq!(kv_rejected_field(&format!("{KV}study_start_date = 2012-13-01\n")), "study_start_date");
    assert_eq!(
        kv_rejected_field(&KV.replace("patients_abstracted_per_month = 40\n", "")),
        "patients_abstracted_per_month"
    );
}

#[test]
fn unparseable_json_entries_are_named() {
    let mut value = serde_json::to_value(RawSimParams::default_test()).unwrap();
    value["drug_b_start_date_range"] = serde_json::json!([30]);
    match SimulationConfig::from_json_str(&value.to_string()) {
        Err(SimError::Configuration { field, .. }) => assert_eq!(field, "drug_b_start_date_range"),
        other => panic!("expected a configuration error, got {other:?}"),
    }

    let mut value = serde_json::to_value(RawSimParams::default_test()).unwrap();
    value["observation_end_date"] = serde_json::json!("31/12/2014");
    match SimulationConfig::from_json_str(&value.to_string()) {
        Err(SimError::Configuration { field, .. }) => assert_eq!(field, "observation_end_date"),
        other => panic!("expected a configuration error, got {other:?}"),
    }
}
