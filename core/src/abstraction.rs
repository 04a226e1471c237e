//! Abstraction pipeline: turns true events into observed records.
//!
//! Three delays, composed in order:
//!   1. Recording latency, per event type, sampled once per event.
//!   2. DB-update cadence: the recorded date snaps forward to the next
//!      boundary (every N months from observation start).
//!   3. Abstraction, a capacity-limited monthly pass over one global
//!      queue ordered by recorded date then patient id.
//!
//! RULES:
//!   - The queue is global across patients, so this runs as ONE ordered
//!     pass after every recorded date is known. Never parallelise it.
//!   - Each event moves PendingRecording → QueuedForAbstraction →
//!     Abstracted, and never back.
//!   - Events outside the observation window, or recorded after the
//!     terminal date, are not emitted at all.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::{
    clock::{add_days, first_bucket_on_or_after, month_bucket_start, DbUpdateSchedule},
    config::{CapacityUnit, SimulationConfig},
    error::{SimError, SimResult},
    patient::TrueEvent,
    rng::{RandomSource, RngBank, StreamSlot},
    sampler::sample_uniform_range,
    types::{EventType, PatientId},
};

/// One row of the observed dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedRecord {
    pub patient_id: PatientId,
    pub event_type: EventType,
    pub true_date: NaiveDate,
    pub recorded_in_db_date: NaiveDate,
    /// Month bucket in which the event left the queue.
    pub abstraction_started_date: Option<NaiveDate>,
    /// `None` when abstraction did not complete by the terminal date.
    pub abstracted_date: Option<NaiveDate>,
}

impl ObservedRecord {
    pub fn is_abstracted(&self) -> bool {
        self.abstracted_date.is_some()
    }
}

/// Per-event lifecycle inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStage {
    PendingRecording,
    QueuedForAbstraction,
    Abstracted,
}

impl EventStage {
    fn successor(self) -> Option<EventStage> {
        match self {
            Self::PendingRecording     => Some(Self::QueuedForAbstraction),
            Self::QueuedForAbstraction => Some(Self::Abstracted),
            Self::Abstracted           => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueEntry {
    pub recorded_in_db_date: NaiveDate,
    pub patient_id: PatientId,
    pub event_type: EventType,
    record_index: usize,
}

/// Backlog of recorded-but-not-abstracted events, earliest recorded
/// date first, ties broken by patient id.
#[derive(Debug, Default)]
pub struct AbstractionQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
}

impl AbstractionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(Reverse(entry));
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Queue activity for one month bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonthlyThroughput {
    pub month_start: NaiveDate,
    pub newly_queued: usize,
    pub abstracted: usize,
    pub patients_worked: usize,
    pub backlog: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Ordered by patient id, then event type.
    pub records: Vec<ObservedRecord>,
    pub monthly: Vec<MonthlyThroughput>,
    /// True events dropped by the observation window or terminal date.
    pub truncated_events: usize,
    /// Emitted records still waiting (queued or not yet eligible) at the end.
    pub backlog_at_end: usize,
}

struct TrackedEvent {
    record: ObservedRecord,
    stage: EventStage,
    eligible_date: Option<NaiveDate>,
}

impl TrackedEvent {
    fn advance(&mut self, next: EventStage) -> SimResult<()> {
        if self.stage.successor() != Some(next) {
            return Err(SimError::invariant(
                self.record.patient_id,
                format!("{} event cannot move from {:?} to {next:?}", self.record.event_type, self.stage),
            ));
        }
        self.stage = next;
        Ok(())
    }
}

struct MonthlyBudget {
    unit: CapacityUnit,
    capacity: u32,
    events: u32,
    patients: BTreeSet<PatientId>,
}

impl MonthlyBudget {
    fn new(unit: CapacityUnit, capacity: u32) -> Self {
        Self { unit, capacity, events: 0, patients: BTreeSet::new() }
    }

    fn try_admit(&mut self, patient_id: PatientId) -> bool {
        let admitted = match self.unit {
            CapacityUnit::Events => self.events < self.capacity,
            CapacityUnit::Patients => {
                self.patients.contains(&patient_id) || (self.patients.len() as u32) < self.capacity
            }
        };
        if admitted {
            self.events += 1;
            self.patients.insert(patient_id);
        }
        admitted
    }
}

pub struct AbstractionPipeline<'a> {
    config: &'a SimulationConfig,
    schedule: DbUpdateSchedule,
}

impl<'a> AbstractionPipeline<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self {
            config,
            schedule: DbUpdateSchedule::new(config.observation_start(), config.db_update_frequency_months()),
        }
    }

    pub fn run(&self, true_events: &[TrueEvent], bank: &RngBank) -> SimResult<PipelineOutput> {
        let (mut tracked, truncated_events) =
            self.record_events(true_events, &mut bank.for_stage(StreamSlot::Recording))?;
        let (monthly, backlog_at_end) =
            self.abstract_events(&mut tracked, &mut bank.for_stage(StreamSlot::Abstraction))?;

        let records: Vec<ObservedRecord> = tracked.into_iter().map(|t| t.record).collect();
        let abstracted = records.iter().filter(|r| r.is_abstracted()).count();
        log::info!(
            "abstraction: {} observed records ({} abstracted), {} truncated, backlog {} over {} months",
            records.len(),
            abstracted,
            truncated_events,
            backlog_at_end,
            monthly.len(),
        );
        if backlog_at_end > 0 {
            log::warn!(
                "abstraction: {backlog_at_end} records still waiting at terminal date {}",
                self.config.simulation_end()
            );
        }

        Ok(PipelineOutput { records, monthly, truncated_events, backlog_at_end })
    }

    /// Recorded-in-DB date for one event, or `None` when the event is
    /// cut off by the observation window or the terminal date.
    pub fn record_event<R: RandomSource + ?Sized>(
        &self,
        event: &TrueEvent,
        rng: &mut R,
    ) -> SimResult<Option<NaiveDate>> {
        if !event.is_observable(self.config) {
            return Ok(None);
        }
        let latency = sample_uniform_range(rng, self.config.recording_latency(event.event_type));
        let entered = add_days(event.true_date, latency)?;
        let recorded = self.schedule.next_boundary_on_or_after(entered)?;
        Ok((recorded <= self.config.simulation_end()).then_some(recorded))
    }

    fn record_events<R: RandomSource + ?Sized>(
        &self,
        true_events: &[TrueEvent],
        rng: &mut R,
    ) -> SimResult<(Vec<TrackedEvent>, usize)> {
        let mut ordered = true_events.to_vec();
        ordered.sort();

        let mut tracked = Vec::with_capacity(ordered.len());
        let mut truncated = 0usize;
        for event in &ordered {
            let Some(recorded_in_db_date) = self.record_event(event, rng)? else {
                truncated += 1;
                continue;
            };
            tracked.push(TrackedEvent {
                record: ObservedRecord {
                    patient_id: event.patient_id,
                    event_type: event.event_type,
                    true_date: event.true_date,
                    recorded_in_db_date,
                    abstraction_started_date: None,
                    abstracted_date: None,
                },
                stage: EventStage::PendingRecording,
                eligible_date: None,
            });
        }

        // A patient's events are eligible once the patient is in the DB,
        // i.e. once the diagnosis itself has been recorded.
        let diagnosis_recorded: HashMap<PatientId, NaiveDate> = tracked
            .iter()
            .filter(|t| t.record.event_type == EventType::Diagnosis)
            .map(|t| (t.record.patient_id, t.record.recorded_in_db_date))
            .collect();
        for t in &mut tracked {
            t.eligible_date = diagnosis_recorded
                .get(&t.record.patient_id)
                .map(|&dx| dx.max(t.record.recorded_in_db_date));
        }

        Ok((tracked, truncated))
    }

    /// The monthly loop. Returns per-month throughput and the final backlog.
    fn abstract_events<R: RandomSource + ?Sized>(
        &self,
        tracked: &mut [TrackedEvent],
        rng: &mut R,
    ) -> SimResult<(Vec<MonthlyThroughput>, usize)> {
        let origin = self.config.observation_start();
        let terminal = self.config.simulation_end();

        let mut pending: Vec<usize> = (0..tracked.len())
            .filter(|&i| tracked[i].eligible_date.is_some())
            .collect();
        pending.sort_by_key(|&i| {
            let r = &tracked[i].record;
            (tracked[i].eligible_date, r.recorded_in_db_date, r.patient_id, r.event_type)
        });

        let mut queue = AbstractionQueue::new();
        let mut cursor = 0usize;
        let mut monthly = Vec::new();
        let mut bucket = first_bucket_on_or_after(origin, self.config.study_start())?;

        loop {
            let month_start = month_bucket_start(origin, bucket)?;
            if month_start > terminal {
                break;
            }

            let mut newly_queued = 0usize;
            while let Some(&index) = pending.get(cursor) {
                if tracked[index].eligible_date.is_some_and(|d| d > month_start) {
                    break;
                }
                let t = &mut tracked[index];
                t.advance(EventStage::QueuedForAbstraction)?;
                queue.push(QueueEntry {
                    recorded_in_db_date: t.record.recorded_in_db_date,
                    patient_id: t.record.patient_id,
                    event_type: t.record.event_type,
                    record_index: index,
                });
                cursor += 1;
                newly_queued += 1;
            }

            let mut budget = MonthlyBudget::new(self.config.capacity_unit(), self.config.abstraction_capacity());
            let mut deferred = Vec::new();
            let mut abstracted = 0usize;
            while let Some(entry) = queue.pop() {
                if !budget.try_admit(entry.patient_id) {
                    deferred.push(entry);
                    match budget.unit {
                        CapacityUnit::Events => break,
                        CapacityUnit::Patients => continue,
                    }
                }
                let t = &mut tracked[entry.record_index];
                t.advance(EventStage::Abstracted)?;
                let latency = sample_uniform_range(rng, self.config.abstraction_latency(entry.event_type));
                let done = add_days(month_start, latency)?;
                t.record.abstraction_started_date = Some(month_start);
                t.record.abstracted_date = (done <= terminal).then_some(done);
                abstracted += 1;
            }
            for entry in deferred {
                queue.push(entry);
            }

            log::debug!(
                "month={month_start} abstraction: queued={newly_queued} abstracted={abstracted} patients={} backlog={}",
                budget.patients.len(),
                queue.len(),
            );
            monthly.push(MonthlyThroughput {
                month_start,
                newly_queued,
                abstracted,
                patients_worked: budget.patients.len(),
                backlog: queue.len(),
            });

            if cursor == pending.len() && queue.is_empty() {
                break;
            }
            bucket += 1;
        }

        let never_eligible = tracked.len() - pending.len();
        let backlog_at_end = queue.len() + (pending.len() - cursor) + never_eligible;
        Ok((monthly, backlog_at_end))
    }
}
