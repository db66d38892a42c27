use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::PointKind;

/// One rejected field and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// Field-level rejection produced by the validator. Never empty when returned as an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        let mut err = Self::default();
        err.push(field, reason);
        err
    }

    pub fn push(&mut self, field: &'static str, reason: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.field).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", err.field, err.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Chunk sealed: {kind} chunk starting {chunk_start} is compressed")]
    ChunkSealed {
        kind: PointKind,
        chunk_start: DateTime<Utc>,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status the ingestion/query surface reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::UnsupportedGranularity(_) | Error::JsonError(_) => 400,
            Error::NotFound(_) => 404,
            Error::DuplicateKey(_) | Error::ChunkSealed { .. } => 409,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
