//! Embeddable time-series engine for drone fleet telemetry and mission progress.
//!
//! Points are validated, stored in time-partitioned chunks, compressed into
//! Arrow IPC segments once their interval has settled, rolled up into
//! continuous aggregates and dropped past their retention horizon.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod engine;
pub mod query;
pub mod scheduler;
pub mod storage;

pub use config::{EngineConfig, SchedulerConfig};
pub use engine::{Engine, RetentionReport};
pub use query::{Granularity, QueryFilter, QueryResult};
pub use storage::{Error, PointKind, Result};
