//! rwdsim-core: synthetic real-world-data cohorts and the abstraction
//! process that discovers them.
//!
//! Two layers. The true layer holds clinical events as they happened
//! (`cohort`, `patient`). The observed layer holds the same events as a
//! registry sees them after recording latency, periodic DB updates and
//! capacity-limited human abstraction (`abstraction`).

pub mod abstraction;
pub mod clock;
pub mod cohort;
pub mod config;
pub mod error;
pub mod event;
pub mod patient;
pub mod report;
pub mod rng;
pub mod sampler;
pub mod simulation;
pub mod store;
pub mod types;
