//! Zillow ETL
//!
//! A small batch pipeline for real-estate listings: one search API call, raw
//! JSON staged in object storage, an event-driven JSON-to-CSV transform, and
//! a bulk load into a warehouse table.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod etl;
pub mod handlers;
pub mod listings;
pub mod orchestrator;
pub mod run_context;
pub mod scheduler;
pub mod storage;
pub mod warehouse;

// Re-exports for convenience
pub use client::{ApiCredentials, SearchClient};
pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError};
pub use etl::{Extractor, Loader, Pipeline, Transformer};
pub use handlers::{EventRouter, Replicator, TransformHandler};
pub use orchestrator::{MainChain, RunReport, RunState, Step};
pub use run_context::RunContext;
pub use storage::{ExistenceGate, LocalObjectStore, ObjectLocation, ObjectStore, S3ObjectStore};
pub use warehouse::{LocalWarehouse, RedshiftWarehouse, Warehouse, WarehouseLoader};
