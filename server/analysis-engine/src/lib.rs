//! Incident analysis engine — deterministic, rule-based.
//!
//! Normalizes raw telemetry (logs, metrics, cluster events) into canonical
//! records, adapts everything into a unified Signal envelope, aligns signals
//! into fixed time windows, detects correlations (heuristic or externally
//! delegated with silent fallback), and infers a causal chain ending in
//! ranked root-cause hypotheses.
//!
//! Pure computation over in-memory collections; deterministic given the same
//! inputs and an injected "now".

pub mod align;
pub mod causality;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod events;
pub mod ids;
pub mod logs;
pub mod metrics;
pub mod types;

pub use config::{CorrelationConfig, EventStreamConfig, LogParserConfig, MetricConfig};
pub use engine::{CorrelationEngine, NotificationSink};
pub use error::AnalysisError;
pub use events::EventStream;
pub use logs::LogParser;
pub use metrics::{MetricProcessor, MetricsSource};
pub use types::{CorrelationResult, Evidence, EventTimeline, LogParserResult, MetricProcessorResult, Signal};
