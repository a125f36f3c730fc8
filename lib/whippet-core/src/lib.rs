//! Client-side metric buffering and aggregation engine.
//!
//! Producers record raw measurements against logical metric keys. The engine buffers them per (key, source) pair,
//! periodically reduces each key's buffered samples with its configured aggregation function, and hands the reduced
//! results to a [`Transport`][whippet_transport::Transport] collaborator on independent per-key schedules.
//!
//! The engine is instance-owned: multiple engines can coexist in one process without sharing any state.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod schedule;
pub mod stats;
mod time;

pub use self::aggregate::AggregatedMetric;
pub use self::config::EngineConfiguration;
pub use self::definitions::{
    ClientAggFunction, DeclaredDefinition, DefinitionRegistry, MetricDefinition, MetricKind, ServerAggFunction,
};
pub use self::engine::Engine;
