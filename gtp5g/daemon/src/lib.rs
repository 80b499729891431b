//! gtp5g Probe Userspace Library
//!
//! Provides reusable components for loading the gtp5g capture programs,
//! the host ring channel, and report generation.

pub mod channel;
pub mod clock;
pub mod collector;
pub mod events;
pub mod exporter;
pub mod loader;
pub mod simulator;
pub mod types;

pub use channel::{RingChannel, RingConsumer};
pub use collector::EventCollector;
pub use events::EventProcessor;
pub use exporter::{ExporterType, JsonExporter, MetricsExporter, PrometheusExporter};
pub use loader::{ProbeLoader, StatsReader};
pub use simulator::Simulator;
pub use types::*;
