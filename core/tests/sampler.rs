//! Distribution sampler tests.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rwdsim_core::{
    rng::{RandomSource, SimRng},
    sampler::{
        choose_without_replacement, sample_date_between, sample_death_time,
        sample_from_survival_table, sample_uniform_range, DayRange, SurvivalTable,
    },
};

/// Replays a fixed list of uniforms, cycling.
struct ScriptedSource {
    values: Vec<f64>,
    next: usize,
}

impl ScriptedSource {
    fn new(values: &[f64]) -> Self {
        Self { values: values.to_vec(), next: 0 }
    }
}

impl RandomSource for ScriptedSource {
    fn next_u64(&mut self) -> u64 {
        let u = self.values[self.next % self.values.len()];
        self.next += 1;
        ((u * (1u64 << 53) as f64) as u64) << 11
    }
}

fn table() -> SurvivalTable {
    let anchors: BTreeMap<u32, f64> = [(1, 0.85), (3, 0.45), (5, 0.32)].into();
    SurvivalTable::new("survival_probabilities_per_year", &anchors).unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn survival_interpolates_between_anchors() {
    let t = table();
    assert!(close(sample_from_survival_table(&t, 2.0), 0.65));
    assert!(close(sample_from_survival_table(&t, 4.0), 0.385));
}

#[test]
fn survival_hits_anchors_exactly_and_clamps_outside() {
    let t = table();
    assert!(close(sample_from_survival_table(&t, 1.0), 0.85));
    assert!(close(sample_from_survival_table(&t, 3.0), 0.45));
    assert!(close(sample_from_survival_table(&t, 5.0), 0.32));
    assert!(close(sample_from_survival_table(&t, 0.25), 0.85));
    assert!(close(sample_from_survival_table(&t, 12.0), 0.32));
}

#[test]
fn death_year_is_first_year_survival_falls_to_draw() {
    let t = table();
    // S(1)=0.85, S(2)=0.65, S(3)=0.45, S(4)=0.385, S(5)=0.32
    assert_eq!(sample_death_time(&mut ScriptedSource::new(&[0.9]), &t, 5), Some(1));
    assert_eq!(sample_death_time(&mut ScriptedSource::new(&[0.7]), &t, 5), Some(2));
    assert_eq!(sample_death_time(&mut ScriptedSource::new(&[0.5]), &t, 5), Some(3));
    assert_eq!(sample_death_time(&mut ScriptedSource::new(&[0.1]), &t, 5), None);
}

#[test]
fn death_beyond_horizon_is_censored() {
    let t = table();
    // Would die in year 3, but the horizon stops at 2.
    assert_eq!(sample_death_time(&mut ScriptedSource::new(&[0.5]), &t, 2), None);
}

#[test]
fn death_time_consumes_exactly_one_draw() {
    let t = table();
    let mut source = ScriptedSource::new(&[0.9, 0.1]);
    sample_death_time(&mut source, &t, 5);
    assert_eq!(source.next, 1);
}

#[test]
fn uniform_range_is_inclusive_on_both_ends() {
    let mut rng = SimRng::new(11, 0);
    let range = DayRange { min: 3, max: 7 };
    let seen: BTreeSet<u32> = (0..2_000).map(|_| sample_uniform_range(&mut rng, range)).collect();
    assert_eq!(seen, (3..=7).collect::<BTreeSet<_>>());
}

#[test]
fn degenerate_range_always_returns_its_value() {
    let mut rng = SimRng::new(5, 0);
    let range = DayRange { min: 14, max: 14 };
    assert!((0..100).all(|_| sample_uniform_range(&mut rng, range) == 14));
}

#[test]
fn date_between_covers_both_endpoints() {
    let mut rng = SimRng::new(3, 0);
    let start = NaiveDate::from_ymd_opt(2012, 2, 27).unwrap();
    let end = NaiveDate::from_ymd_opt(2012, 3, 1).unwrap();
    let seen: BTreeSet<NaiveDate> = (0..500)
        .map(|_| sample_date_between(&mut rng, start, end).unwrap())
        .collect();
    assert_eq!(seen.len(), 4, "expected 27 Feb, 28 Feb, 29 Feb and 1 Mar: {seen:?}");
    assert!(seen.contains(&start) && seen.contains(&end));
}

#[test]
fn choose_without_replacement_yields_distinct_indices() {
    let mut rng = SimRng::new(99, 1);
    let picked = choose_without_replacement(&mut rng, 50, 20);
    assert_eq!(picked.len(), 20);
    assert_eq!(picked.iter().collect::<BTreeSet<_>>().len(), 20);
    assert!(picked.iter().all(|&i| i < 50));

    let all = choose_without_replacement(&mut rng, 10, 10);
    assert_eq!(all.into_iter().collect::<BTreeSet<_>>(), (0..10).collect());
}

#[test]
fn survival_table_rejects_bad_anchors() {
    let rising: BTreeMap<u32, f64> = [(1, 0.5), (2, 0.6)].into();
    assert!(SurvivalTable::new("s", &rising).is_err());
    let zero_year: BTreeMap<u32, f64> = [(0, 0.9)].into();
    assert!(SurvivalTable::new("s", &zero_year).is_err());
    let zero_prob: BTreeMap<u32, f64> = [(1, 0.0)].into();
    assert!(SurvivalTable::new("s", &zero_prob).is_err());
    assert!(SurvivalTable::new("s", &BTreeMap::new()).is_err());
}
