//! Core types for the analysis engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ---------------------------------------------------------------------------
// Log model
// ---------------------------------------------------------------------------

/// Detected input format of a raw log batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  Json,
  Kubernetes,
  Plaintext,
}

/// Canonical five-value log level. Input vocabularies are folded into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
}

impl LogLevel {
  /// Fold alternate vocabularies ("WARNING", "crit", "err", ...) into the
  /// canonical set. Unrecognized values map to Info.
  pub fn from_str_loose(s: &str) -> Self {
    match s.to_ascii_lowercase().as_str() {
      "debug" | "dbg" | "trace" => Self::Debug,
      "info" | "information" | "notice" => Self::Info,
      "warn" | "warning" => Self::Warn,
      "error" | "err" => Self::Error,
      "fatal" | "critical" | "crit" | "panic" => Self::Fatal,
      _ => Self::Info,
    }
  }

  /// Severity rank for dominant-level selection (fatal > error > warn > info > debug).
  pub fn rank(self) -> u8 {
    match self {
      Self::Debug => 0,
      Self::Info => 1,
      Self::Warn => 2,
      Self::Error => 3,
      Self::Fatal => 4,
    }
  }

  pub fn is_error(self) -> bool {
    matches!(self, Self::Error | Self::Fatal)
  }
}

/// Canonical log record after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLog {
  pub id: String,
  pub timestamp: DateTime<Utc>,
  pub level: LogLevel,
  pub source: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub metadata: HashMap<String, serde_json::Value>,
  pub raw: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stack_trace: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trace_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub span_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pod_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub container_name: Option<String>,
}

/// Error/fatal logs grouped by error type.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLog {
  pub error_type: String,
  pub occurrences: u64,
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  pub affected_pods: Vec<String>,
  pub sample_message: String,
}

/// Consecutive fixed time window of logs.
#[derive(Debug, Clone, Serialize)]
pub struct LogGroup {
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub logs: Vec<NormalizedLog>,
  pub error_count: u64,
  pub warn_count: u64,
}

/// A window whose error rate exceeded the rolling baseline.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSpike {
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub error_rate: f64,
  pub baseline_rate: f64,
  /// error_rate / baseline_rate (error count when the baseline was zero).
  pub multiplier: f64,
  /// Distinct error types present in the spiking window.
  pub types: Vec<String>,
  /// Up to 5 sample logs from the window.
  pub sample_logs: Vec<NormalizedLog>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
  pub total: u64,
  pub error_count: u64,
  pub warn_count: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dominant_level: Option<LogLevel>,
  pub format: LogFormat,
}

/// End-to-end log analysis output.
#[derive(Debug, Clone, Serialize)]
pub struct LogParserResult {
  pub logs: Vec<NormalizedLog>,
  pub errors: Vec<ErrorLog>,
  pub summary: LogSummary,
}

// ---------------------------------------------------------------------------
// Metric model
// ---------------------------------------------------------------------------

/// One metric sample. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
  pub name: String,
  pub timestamp: DateTime<Utc>,
  pub value: f64,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricAnomaly {
  pub metric: String,
  pub timestamp: DateTime<Utc>,
  pub value: f64,
  /// (low, high): mean ± threshold·stddev over the baseline.
  pub expected_range: (f64, f64),
  /// Deviation from the baseline mean, in stddevs.
  pub deviation: f64,
  pub severity: SignalSeverity,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
  Increasing,
  Decreasing,
  Volatile,
  Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
  pub name: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
  pub min: f64,
  pub max: f64,
  pub avg: f64,
  pub current: f64,
  pub data_points: u64,
  pub trend: Trend,
  /// Normalized z-score of the latest value, clipped to [0, 1].
  pub anomaly_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
  Up,
  Down,
  Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricComparison {
  pub name: String,
  pub current: f64,
  pub baseline: f64,
  pub change_percent: f64,
  pub direction: ChangeDirection,
}

/// End-to-end metric analysis output.
#[derive(Debug, Clone, Serialize)]
pub struct MetricProcessorResult {
  pub metrics: Vec<MetricSample>,
  pub summaries: Vec<MetricSummary>,
  pub anomalies: Vec<MetricAnomaly>,
  pub comparisons: Vec<MetricComparison>,
}

// ---------------------------------------------------------------------------
// Infrastructure event model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraEventType {
  Deploy,
  Scale,
  ConfigChange,
  Restart,
  Rollback,
  Alert,
  GitPush,
  K8sEvent,
  PodCrash,
  OomKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
  Info,
  Warning,
  Critical,
}

/// Canonical infrastructure event (deploys, scaling, cluster lifecycle, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraEvent {
  pub id: String,
  pub event_type: InfraEventType,
  pub timestamp: DateTime<Utc>,
  pub description: String,
  pub actor: String,
  pub target: String,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub metadata: HashMap<String, serde_json::Value>,
  pub severity: EventSeverity,
}

/// Pre-structured source-control commit record (inbound contract).
#[derive(Debug, Clone, Deserialize)]
pub struct CommitRecord {
  pub id: String,
  pub message: String,
  #[serde(default)]
  pub author: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub repository: Option<String>,
}

/// Pre-structured deployment record (inbound contract).
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRecord {
  pub id: String,
  pub service: String,
  #[serde(default)]
  pub version: Option<String>,
  pub status: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub actor: Option<String>,
}

/// Intermediate Kubernetes event shape (from JSON-lines or tabular kubectl output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sEvent {
  /// "Normal" or "Warning" as emitted by the cluster.
  pub event_type: String,
  pub reason: String,
  pub object_kind: String,
  pub object_name: String,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

/// Deployment projection extracted from a timeline.
#[derive(Debug, Clone, Serialize)]
pub struct Deploy {
  pub id: String,
  pub service: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub actor: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineSummary {
  pub total: u64,
  pub deploys: u64,
  pub warnings: u64,
  pub critical: u64,
}

/// Bounded, chronologically sorted event timeline.
#[derive(Debug, Clone, Serialize)]
pub struct EventTimeline {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub events: Vec<InfraEvent>,
  pub deploys: Vec<Deploy>,
  pub summary: TimelineSummary,
}

/// An event scored as a potential incident trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerCandidate {
  pub event: InfraEvent,
  pub trigger_score: f64,
  pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Signal model (unified envelope over all modalities)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
  Visual,
  Log,
  Metric,
  Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSeverity {
  Low,
  Medium,
  High,
  Critical,
}

impl SignalSeverity {
  /// Fold free-text severity vocabularies into the canonical set.
  pub fn from_str_loose(s: &str) -> Self {
    match s.to_ascii_lowercase().as_str() {
      "critical" | "fatal" => Self::Critical,
      "high" | "error" => Self::High,
      "medium" | "warning" | "warn" => Self::Medium,
      _ => Self::Low,
    }
  }

  /// Numeric weight used by confidence and root-cause scoring.
  pub fn score(self) -> f64 {
    match self {
      Self::Low => 0.25,
      Self::Medium => 0.5,
      Self::High => 0.75,
      Self::Critical => 1.0,
    }
  }

  pub fn is_high(self) -> bool {
    matches!(self, Self::High | Self::Critical)
  }
}

impl From<LogLevel> for SignalSeverity {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Fatal => Self::Critical,
      LogLevel::Error => Self::High,
      LogLevel::Warn => Self::Medium,
      LogLevel::Info | LogLevel::Debug => Self::Low,
    }
  }
}

impl From<EventSeverity> for SignalSeverity {
  fn from(sev: EventSeverity) -> Self {
    match sev {
      EventSeverity::Critical => Self::Critical,
      EventSeverity::Warning => Self::Medium,
      EventSeverity::Info => Self::Low,
    }
  }
}

/// Unified envelope wrapping a log, metric, event, or visual observation.
///
/// `data` carries the full per-modality record as JSON so downstream
/// consumers can render or persist it without this crate's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
  pub id: String,
  pub kind: SignalKind,
  pub timestamp: DateTime<Utc>,
  pub source: String,
  pub severity: SignalSeverity,
  pub description: String,
  #[serde(default)]
  pub data: serde_json::Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f64>,
}

impl Signal {
  /// Clamp confidence into [0, 1] (invariant on the envelope).
  pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
    self.confidence = confidence.map(|c| c.clamp(0.0, 1.0));
    self
  }

  pub fn from_log(log: &NormalizedLog) -> Self {
    Self {
      id: crate::ids::stable_id("sig", &["log", &log.id]),
      kind: SignalKind::Log,
      timestamp: log.timestamp,
      source: log.source.clone(),
      severity: log.level.into(),
      description: log.message.clone(),
      data: serde_json::to_value(log).unwrap_or(serde_json::Value::Null),
      confidence: None,
    }
  }

  pub fn from_metric_anomaly(anomaly: &MetricAnomaly) -> Self {
    Self {
      id: crate::ids::stable_id(
        "sig",
        &["metric", &anomaly.metric, &anomaly.timestamp.to_rfc3339()],
      ),
      kind: SignalKind::Metric,
      timestamp: anomaly.timestamp,
      source: anomaly.metric.clone(),
      severity: anomaly.severity,
      description: format!(
        "{} deviated {:.1} stddevs from baseline (value {})",
        anomaly.metric, anomaly.deviation, anomaly.value
      ),
      data: serde_json::to_value(anomaly).unwrap_or(serde_json::Value::Null),
      confidence: None,
    }
  }

  pub fn from_infra_event(event: &InfraEvent) -> Self {
    Self {
      id: crate::ids::stable_id("sig", &["event", &event.id]),
      kind: SignalKind::Event,
      timestamp: event.timestamp,
      source: event.target.clone(),
      severity: event.severity.into(),
      description: event.description.clone(),
      data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
      confidence: None,
    }
  }
}

// ---------------------------------------------------------------------------
// Alignment, correlation, causality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeSpan {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub duration_ms: i64,
}

impl TimeSpan {
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self {
      start,
      end,
      duration_ms: (end - start).num_milliseconds(),
    }
  }
}

/// One fixed-width time bucket of aligned signals. Buckets with zero signals
/// are never materialized.
#[derive(Debug, Clone, Serialize)]
pub struct AlignedWindow {
  pub timestamp: DateTime<Utc>,
  pub window: TimeSpan,
  pub visual: Vec<Signal>,
  pub logs: Vec<Signal>,
  pub metrics: Vec<Signal>,
  pub events: Vec<Signal>,
  pub signal_count: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dominant_signal_type: Option<SignalKind>,
}

impl AlignedWindow {
  /// All signals in the bucket, modality order: visual, log, metric, event.
  pub fn all_signals(&self) -> impl Iterator<Item = &Signal> {
    self
      .visual
      .iter()
      .chain(self.logs.iter())
      .chain(self.metrics.iter())
      .chain(self.events.iter())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
  Causal,
  Temporal,
  Symptomatic,
  Sequential,
}

/// A scored, typed relationship between two or more signals.
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
  pub id: String,
  pub timestamp: DateTime<Utc>,
  pub signals: Vec<Signal>,
  pub correlation_type: CorrelationType,
  pub confidence: f64,
  pub description: String,
  pub reasoning: String,
  pub time_span: TimeSpan,
}

impl Correlation {
  pub fn contains(&self, signal_id: &str) -> bool {
    self.signals.iter().any(|s| s.id == signal_id)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct CausalStep {
  pub signal: Signal,
  pub relationship: String,
  pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
  pub timestamp: DateTime<Utc>,
  pub signal: Signal,
  pub relationship: String,
}

/// A root-cause signal plus the ordered downstream effects inferred from it.
/// A chain with no effects is never materialized ("no chain found").
#[derive(Debug, Clone, Serialize)]
pub struct CausalChain {
  pub id: String,
  pub root_cause: Signal,
  pub effects: Vec<Signal>,
  pub intermediate_steps: Vec<CausalStep>,
  pub confidence: f64,
  pub reasoning: String,
  pub timeline: Vec<TimelineEntry>,
}

// ---------------------------------------------------------------------------
// Evidence (inbound boundary contract)
// ---------------------------------------------------------------------------

/// Externally persisted evidence record, the one inbound contract the
/// correlation engine adapts. Unknown fields are silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
  pub id: String,
  pub incident_id: String,
  /// "video_frame" | "log" | "metric" | "k8s_event" (others are skipped).
  #[serde(rename = "type")]
  pub evidence_type: String,
  pub source: String,
  #[serde(default)]
  pub content: serde_json::Value,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub confidence: Option<f64>,
  #[serde(default)]
  pub metadata: serde_json::Value,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Correlation engine output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RootCauseHypothesis {
  pub signal: Signal,
  pub confidence: f64,
  pub supporting_signals: Vec<Signal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
  pub total_signals: u64,
  pub time_windows: u64,
  pub correlations_found: u64,
  pub has_causal_chain: bool,
  pub avg_correlation_confidence: f64,
}

/// Full output of one correlation analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
  pub incident_id: String,
  pub correlations: Vec<Correlation>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub causal_chain: Option<CausalChain>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trigger_event: Option<Signal>,
  pub root_cause_hypotheses: Vec<RootCauseHypothesis>,
  pub summary: AnalysisSummary,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
