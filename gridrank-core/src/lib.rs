pub mod alerts;
pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod lifecycle;
pub mod logs;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod service;

pub use alerts::{AlertPolicy, Observation, ThresholdPolicy};
pub use config::EngineConfig;
pub use data::Database;
pub use error::{CoreError, Result};
pub use grid::generate_grid;
pub use lifecycle::{Lifecycle, RunOutcome, RunTicket};
pub use logs::EventLog;
pub use model::{
    Alert, AlertKind, Frequency, LogEntry, LogFilter, LogLevel, RankResult, Scan, ScanShape,
    ScanStatus, ScanUpdate, ShapeKind,
};
pub use orchestrator::{Orchestrator, RunSummary};
pub use scheduler::Scheduler;
pub use service::{CreateScanRequest, Envelope, Launched, ScanDetails, ScanService};
