//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database.
//! The simulation never depends on the store; callers hand finished
//! datasets and event logs to it after a run.

use rusqlite::{params, Connection};

use crate::{
    abstraction::ObservedRecord,
    error::SimResult,
    event::{EventLogEntry, SimEvent},
    patient::TrueEvent,
    simulation::{Simulation, SimulationOutput},
    types::EventType,
};

pub struct SimStore {
    conn: Connection,
}

impl SimStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        seed: u64,
        version: &str,
        config_json: Option<&str>,
    ) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, config_json) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, config_json],
        )?;
        Ok(())
    }

    /// Persist both datasets and the event log of a finished run.
    pub fn save_run_output(&self, sim: &Simulation, output: &SimulationOutput) -> SimResult<()> {
        self.save_true_events(&sim.run_id, output.true_dataset())?;
        self.save_observed_records(&sim.run_id, output.observed_dataset())?;
        self.append_events(&sim.run_id, sim.event_log())?;
        log::info!(
            "store: saved run {} ({} true events, {} observed records)",
            sim.run_id,
            output.true_dataset().len(),
            output.observed_dataset().len(),
        );
        Ok(())
    }

    // ── True dataset ───────────────────────────────────────────

    pub fn save_true_events(&self, run_id: &str, events: &[TrueEvent]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO true_event (run_id, patient_id, event_type, true_date)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for e in events {
                stmt.execute(params![run_id, e.patient_id, e.event_type.as_str(), e.true_date])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn true_event_count(&self, run_id: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM true_event WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?)
    }

    // ── Observed dataset ───────────────────────────────────────

    pub fn save_observed_records(&self, run_id: &str, records: &[ObservedRecord]) -> SimResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO observed_record
                   (run_id, patient_id, event_type, true_date, recorded_in_db_date,
                    abstraction_started_date, abstracted_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    run_id,
                    r.patient_id,
                    r.event_type.as_str(),
                    r.true_date,
                    r.recorded_in_db_date,
                    r.abstraction_started_date,
                    r.abstracted_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn observed_records(&self, run_id: &str) -> SimResult<Vec<ObservedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT patient_id, event_type, true_date, recorded_in_db_date,
                    abstraction_started_date, abstracted_date
             FROM observed_record WHERE run_id = ?1
             ORDER BY patient_id ASC, event_type ASC",
        )?;
        let mut records = stmt
            .query_map(params![run_id], |row| {
                let event_type: String = row.get(1)?;
                let event_type = event_type.parse::<EventType>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(ObservedRecord {
                    patient_id:               row.get(0)?,
                    event_type,
                    true_date:                row.get(2)?,
                    recorded_in_db_date:      row.get(3)?,
                    abstraction_started_date: row.get(4)?,
                    abstracted_date:          row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        // Text ordering of event_type is alphabetical; restore record order.
        records.sort_by_key(|r| (r.patient_id, r.event_type));
        Ok(records)
    }

    /// Records whose abstraction completed on or before `date`.
    pub fn abstracted_count_by(&self, run_id: &str, date: chrono::NaiveDate) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM observed_record
             WHERE run_id = ?1 AND abstracted_date IS NOT NULL AND abstracted_date <= ?2",
            params![run_id, date],
            |row| row.get(0),
        )?)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, sequence, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.sequence as i64,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn append_events(&self, run_id: &str, events: &[SimEvent]) -> SimResult<()> {
        for (sequence, event) in events.iter().enumerate() {
            let entry = EventLogEntry {
                id:         None,
                run_id:     run_id.to_string(),
                sequence:   sequence as u64,
                stage:      event.stage().to_string(),
                event_type: event.type_name().to_string(),
                payload:    serde_json::to_string(event)?,
            };
            self.append_event(&entry)?;
        }
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, sequence, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY sequence ASC, id ASC",
        )?;
        let entries = stmt.query_map(params![run_id], |row| {
            Ok(EventLogEntry {
                id:         Some(row.get(0)?),
                run_id:     row.get(1)?,
                sequence:   row.get::<_, i64>(2)? as u64,
                stage:      row.get(3)?,
                event_type: row.get(4)?,
                payload:    row.get(5)?,
            })
        })?.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
