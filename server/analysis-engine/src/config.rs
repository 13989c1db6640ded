//! Engine configuration with sane defaults.
//!
//! The scoring constants in `correlation.rs` / `causality.rs` are behavioral
//! contracts and intentionally not configurable; these structs hold the
//! window sizes and thresholds that legitimately vary per deployment.

/// Tunables for log parsing and spike detection.
#[derive(Debug, Clone)]
pub struct LogParserConfig {
  /// Logs older than this (relative to the injected "now") are dropped during parse.
  pub max_log_age_ms: i64,
  /// Window width used to bucket logs for error-rate spike detection.
  pub spike_window_ms: i64,
}

impl Default for LogParserConfig {
  fn default() -> Self {
    Self {
      max_log_age_ms: 3_600_000, // 1 hour
      spike_window_ms: 60_000,
    }
  }
}

/// Tunables for metric anomaly detection and baseline comparison.
#[derive(Debug, Clone)]
pub struct MetricConfig {
  /// Z-score threshold: latest value is anomalous when |z| exceeds this.
  pub anomaly_z_threshold: f64,
  /// Metric names containing any of these substrings get a one-level severity boost.
  pub critical_metrics: Vec<String>,
  /// Percent change below which a baseline comparison reads as "stable".
  pub significance_percent: f64,
}

impl Default for MetricConfig {
  fn default() -> Self {
    Self {
      anomaly_z_threshold: 3.0,
      critical_metrics: vec![
        "error".into(),
        "cpu".into(),
        "memory".into(),
        "latency".into(),
        "restart".into(),
      ],
      significance_percent: 5.0,
    }
  }
}

/// Tunables for the infrastructure event stream.
#[derive(Debug, Clone)]
pub struct EventStreamConfig {
  /// Events older than this (relative to "now") are excluded from timelines.
  pub max_event_age_ms: i64,
  /// Pre-incident window for event correlation and trigger proximity scoring.
  pub correlation_window_ms: i64,
}

impl Default for EventStreamConfig {
  fn default() -> Self {
    Self {
      max_event_age_ms: 86_400_000, // 24 hours
      correlation_window_ms: 600_000,
    }
  }
}

/// Tunables for cross-modal alignment, correlation, and causality.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
  /// Fixed bucket width for time-window alignment.
  pub window_ms: i64,
  /// Temporal correlations below this confidence are not emitted.
  pub min_correlation_confidence: f64,
  /// Global cap on emitted correlations (highest confidence first).
  pub max_correlations: usize,
  /// Max gap between a root cause and a signal still counted as its effect.
  pub causality_time_threshold_ms: i64,
}

impl Default for CorrelationConfig {
  fn default() -> Self {
    Self {
      window_ms: 30_000,
      min_correlation_confidence: 0.5,
      max_correlations: 20,
      causality_time_threshold_ms: 300_000,
    }
  }
}
