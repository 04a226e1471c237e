use crate::types::PatientId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid configuration for `{field}`: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Generation invariant violated for patient {patient_id}: {detail}")]
    InvariantViolation { patient_id: PatientId, detail: String },

    #[error("Date arithmetic overflow: {0}")]
    DateOverflow(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field:  field.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(patient_id: PatientId, detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            patient_id,
            detail: detail.into(),
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
