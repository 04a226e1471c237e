//! Point-in-time cohort report tests.

use rwdsim_core::{
    clock::add_days,
    config::SimulationConfig,
    error::SimError,
    report::{periodic_reports, report_for_drugs, standard_reports, CohortReport},
    simulation::{Simulation, SimulationOutput},
    types::{Drug, EventType},
};

fn run(seed: u64) -> (SimulationConfig, SimulationOutput) {
    let mut sim = Simulation::new(format!("report-{seed}"), seed, SimulationConfig::default_test());
    let output = sim.run().expect("simulation run");
    (sim.config().clone(), output)
}

fn same_figures(a: &CohortReport, b: &CohortReport) -> bool {
    CohortReport { name: String::new(), as_of: b.as_of, ..a.clone() } == CohortReport { name: String::new(), ..b.clone() }
}

#[test]
fn whole_cohort_report_counts_every_abstracted_diagnosis() {
    let (config, output) = run(42);
    let after_end = add_days(config.simulation_end(), 1).unwrap();
    let whole = report_for_drugs(output.observed_dataset(), after_end, &[], "Whole Cohort");

    let abstracted_diagnoses = output
        .observed_dataset()
        .iter()
        .filter(|r| r.event_type == EventType::Diagnosis && r.is_abstracted())
        .count();
    assert!(abstracted_diagnoses > 0);
    assert_eq!(whole.num_patients, abstracted_diagnoses);
    assert!((0.0..=1.0).contains(&whole.treated_fraction));
    assert!((0.0..=1.0).contains(&whole.survival_fraction));
    assert!(whole.dx_db_delta_days.is_some_and(|d| d >= 0.0));

    for drug in Drug::ALL {
        let by_drug = report_for_drugs(output.observed_dataset(), after_end, &[drug], format!("Drug {drug:?}"));
        assert!(by_drug.num_patients <= whole.num_patients);
        assert!(by_drug.num_patients > 0, "no patient known to start drug {drug:?}");
        assert_eq!(by_drug.treated_fraction, 1.0);
        assert!(by_drug.tx_abst_delta_days.is_some_and(|d| d >= 0.0));
    }
}

#[test]
fn nothing_is_known_before_abstraction_starts() {
    let (config, output) = run(7);
    let report = report_for_drugs(output.observed_dataset(), config.study_start(), &[], "start");
    assert_eq!(report.num_patients, 0);
    assert_eq!(report.treated_fraction, 0.0);
    assert_eq!(report.survival_fraction, 0.0);
    assert_eq!(report.dx_db_delta_days, None);
}

#[test]
fn bounded_periodic_reports_are_evenly_spaced() {
    let (config, output) = run(3);
    let reports =
        periodic_reports(output.observed_dataset(), &[Drug::A], "Drug A", config.study_start(), 90, Some(3)).unwrap();

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].as_of, config.study_start());
    for pair in reports.windows(2) {
        assert_eq!(pair[1].as_of, add_days(pair[0].as_of, 90).unwrap());
        assert!(pair[1].num_patients >= pair[0].num_patients);
    }
    assert_eq!(reports[1].name, format!("Drug A: {}", reports[1].as_of));
}

#[test]
fn unbounded_periodic_reports_end_once_everything_is_known() {
    let (config, output) = run(11);
    let reports =
        periodic_reports(output.observed_dataset(), &[Drug::B], "Drug B", config.study_start(), 120, None).unwrap();
    let last_abstraction = output.observed_dataset().iter().filter_map(|r| r.abstracted_date).max().unwrap();

    let last = reports.last().unwrap();
    assert!(last.as_of > last_abstraction);
    assert!(reports[..reports.len() - 1].iter().all(|r| r.as_of <= last_abstraction));

    let after_end = add_days(config.simulation_end(), 1).unwrap();
    let final_b = report_for_drugs(output.observed_dataset(), after_end, &[Drug::B], "Drug B");
    assert!(same_figures(last, &final_b), "last periodic row {last:?} differs from {final_b:?}");
}

#[test]
fn zero_report_interval_is_rejected() {
    let (config, output) = run(1);
    assert!(matches!(
        periodic_reports(output.observed_dataset(), &[Drug::A], "Drug A", config.study_start(), 0, None),
        Err(SimError::Configuration { .. })
    ));
}

#[test]
fn standard_reports_lead_with_final_summaries() {
    let (config, output) = run(5);
    let reports = standard_reports(&config, output.observed_dataset(), 365, Some(2)).unwrap();

    assert_eq!(reports.len(), 3 + 2 * Drug::ALL.len());
    assert_eq!(reports[0].name, "Whole Cohort");
    assert_eq!(reports[1].name, "Drug A");
    assert_eq!(reports[2].name, "Drug B");
    assert!(reports[3].name.starts_with("Drug A: "));
    assert!(reports.last().unwrap().name.starts_with("Drug B: "));
}
