//! Metric ingestion: exposition-format parsing, statistical anomaly
//! detection, series summaries, and baseline comparison.
//!
//! All computations are per (name, labels) series. Series with fewer than two
//! points carry no baseline and are never flagged.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::MetricConfig;
use crate::error::AnalysisError;
use crate::types::{
  ChangeDirection, MetricAnomaly, MetricComparison, MetricProcessorResult, MetricSample,
  MetricSummary, SignalSeverity, Trend,
};

// Floor for stddev so a flat baseline followed by a jump still yields a
// finite (large) deviation instead of being skipped.
const STDDEV_FLOOR: f64 = 1e-9;

const TREND_SLOPE_THRESHOLD: f64 = 0.05;
const VOLATILITY_CV_THRESHOLD: f64 = 0.5;

/// External metrics backend (Prometheus endpoint, kubelet summary API, ...).
/// Implementations own their transport and time-bounding.
pub trait MetricsSource {
  fn query(&self, expr: &str) -> Result<Vec<MetricSample>, AnalysisError>;
  /// Resource metrics for pods/nodes matching the selector
  /// (metrics-server shape).
  fn k8s_metrics(&self, selector: &str) -> Result<Vec<MetricSample>, AnalysisError>;
}

pub struct MetricProcessor {
  config: MetricConfig,
  source: Option<Box<dyn MetricsSource>>,
  exposition_line: Regex,
  label_pair: Regex,
}

impl MetricProcessor {
  pub fn new(config: MetricConfig) -> Self {
    Self {
      config,
      source: None,
      // name{label="value",...} number [timestamp_ms]
      exposition_line: Regex::new(
        r#"^(?P<name>[a-zA-Z_:][a-zA-Z0-9_:]*)(?:\{(?P<labels>[^}]*)\})?\s+(?P<value>[^\s]+)(?:\s+(?P<ts>\d+))?$"#,
      )
      .expect("static regex"),
      label_pair: Regex::new(r#"(?P<key>[a-zA-Z_][a-zA-Z0-9_]*)="(?P<value>[^"]*)""#)
        .expect("static regex"),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(MetricConfig::default())
  }

  /// Attach an external metrics backend for `query_prometheus` and
  /// `k8s_metrics`.
  pub fn with_source(mut self, source: Box<dyn MetricsSource>) -> Self {
    self.source = Some(source);
    self
  }

  /// Parse exposition-format text using the wall clock for lines without an
  /// explicit timestamp.
  pub fn ingest_prometheus_format(&self, text: &str) -> Vec<MetricSample> {
    self.ingest_prometheus_format_at(text, Utc::now())
  }

  /// Parse `name{label="value",...} number [timestamp_ms]` lines. Comments,
  /// blanks, and lines that fail to match are skipped.
  pub fn ingest_prometheus_format_at(&self, text: &str, now: DateTime<Utc>) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    for (idx, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let caps = match self.exposition_line.captures(line) {
        Some(c) => c,
        None => {
          debug!(line = idx, "skipping unparsable exposition line");
          continue;
        }
      };
      let value: f64 = match caps["value"].parse() {
        Ok(v) => v,
        Err(_) => {
          debug!(line = idx, "skipping exposition line with non-numeric value");
          continue;
        }
      };

      let labels: BTreeMap<String, String> = caps
        .name("labels")
        .map(|l| {
          self
            .label_pair
            .captures_iter(l.as_str())
            .map(|c| (c["key"].to_string(), c["value"].to_string()))
            .collect()
        })
        .unwrap_or_default();

      // An explicit timestamp (ms) overrides "now".
      let timestamp = caps
        .name("ts")
        .and_then(|t| t.as_str().parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(now);

      samples.push(MetricSample {
        name: caps["name"].to_string(),
        timestamp,
        value,
        labels,
      });
    }
    samples
  }

  /// Flag each series' latest value when its z-score against the rest of the
  /// series exceeds the configured threshold.
  pub fn detect_anomalies(&self, metrics: &[MetricSample]) -> Vec<MetricAnomaly> {
    let mut anomalies = Vec::new();
    for (_, series) in group_series(metrics) {
      if series.len() < 2 {
        continue;
      }
      let latest = series[series.len() - 1];
      let baseline: Vec<f64> = series[..series.len() - 1].iter().map(|m| m.value).collect();
      let (mean, stddev) = mean_stddev(&baseline);
      let sd = stddev.max(STDDEV_FLOOR);
      let z = (latest.value - mean).abs() / sd;
      if z <= self.config.anomaly_z_threshold {
        continue;
      }

      let mut severity = self.severity_for(z);
      if self.is_critical_metric(&latest.name) {
        severity = boost(severity);
      }

      let spread = self.config.anomaly_z_threshold * stddev;
      anomalies.push(MetricAnomaly {
        metric: latest.name.clone(),
        timestamp: latest.timestamp,
        value: latest.value,
        expected_range: (mean - spread, mean + spread),
        deviation: z,
        severity,
        labels: latest.labels.clone(),
      });
    }

    // Largest deviation first; metric name breaks ties for determinism.
    anomalies.sort_by(|a, b| {
      b.deviation
        .partial_cmp(&a.deviation)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.metric.cmp(&b.metric))
    });
    anomalies
  }

  fn severity_for(&self, z: f64) -> SignalSeverity {
    let ratio = z / self.config.anomaly_z_threshold;
    if ratio >= 3.0 {
      SignalSeverity::Critical
    } else if ratio >= 2.0 {
      SignalSeverity::High
    } else if ratio >= 1.5 {
      SignalSeverity::Medium
    } else {
      SignalSeverity::Low
    }
  }

  fn is_critical_metric(&self, name: &str) -> bool {
    let lower = name.to_lowercase();
    self
      .config
      .critical_metrics
      .iter()
      .any(|c| lower.contains(&c.to_lowercase()))
  }

  /// Per-series min/max/avg/current with a trend classification and a
  /// normalized anomaly score.
  pub fn summarize(&self, metrics: &[MetricSample]) -> Vec<MetricSummary> {
    let mut summaries = Vec::new();
    for (_, series) in group_series(metrics) {
      let values: Vec<f64> = series.iter().map(|m| m.value).collect();
      let min = values.iter().copied().fold(f64::INFINITY, f64::min);
      let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
      let avg = values.iter().sum::<f64>() / values.len() as f64;
      let current = *values.last().unwrap_or(&0.0);

      let (mean, stddev) = mean_stddev(&values);
      let cv = if mean.abs() > f64::EPSILON {
        stddev / mean.abs()
      } else {
        0.0
      };

      let trend = if cv > VOLATILITY_CV_THRESHOLD {
        Trend::Volatile
      } else {
        let slope = normalized_slope(&values, avg);
        if slope > TREND_SLOPE_THRESHOLD {
          Trend::Increasing
        } else if slope < -TREND_SLOPE_THRESHOLD {
          Trend::Decreasing
        } else {
          Trend::Stable
        }
      };

      // Same z-score computation as anomaly detection, clipped to [0, 1].
      let anomaly_score = if values.len() >= 2 {
        let baseline = &values[..values.len() - 1];
        let (bmean, bstddev) = mean_stddev(baseline);
        let z = (current - bmean).abs() / bstddev.max(STDDEV_FLOOR);
        (z / (2.0 * self.config.anomaly_z_threshold)).min(1.0)
      } else {
        0.0
      };

      let sample = series[0];
      summaries.push(MetricSummary {
        name: sample.name.clone(),
        labels: sample.labels.clone(),
        min,
        max,
        avg,
        current,
        data_points: series.len() as u64,
        trend,
        anomaly_score,
      });
    }
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
  }

  /// Compare current metrics against a baseline set, matched by name.
  /// Metrics absent from the baseline (or with a zero baseline) are skipped.
  pub fn compare_to_baseline(
    &self,
    current: &[MetricSample],
    baseline: &[MetricSample],
  ) -> Vec<MetricComparison> {
    let mut comparisons = Vec::new();
    for metric in current {
      let base = match baseline.iter().find(|b| b.name == metric.name) {
        Some(b) if b.value.abs() > f64::EPSILON => b,
        _ => continue,
      };
      let change_percent = (metric.value - base.value) / base.value * 100.0;
      let direction = if change_percent.abs() <= self.config.significance_percent {
        ChangeDirection::Stable
      } else if change_percent > 0.0 {
        ChangeDirection::Up
      } else {
        ChangeDirection::Down
      };
      comparisons.push(MetricComparison {
        name: metric.name.clone(),
        current: metric.value,
        baseline: base.value,
        change_percent,
        direction,
      });
    }
    comparisons
  }

  /// End-to-end convenience over a pre-parsed sample set.
  pub fn analyze(
    &self,
    metrics: &[MetricSample],
    baseline: Option<&[MetricSample]>,
  ) -> MetricProcessorResult {
    MetricProcessorResult {
      metrics: metrics.to_vec(),
      summaries: self.summarize(metrics),
      anomalies: self.detect_anomalies(metrics),
      comparisons: baseline
        .map(|b| self.compare_to_baseline(metrics, b))
        .unwrap_or_default(),
    }
  }

  /// Query the external metrics backend. Degrades to empty when no backend is
  /// configured or the backend errors — never fails the caller.
  pub fn query_prometheus(&self, expr: &str) -> Vec<MetricSample> {
    let source = match &self.source {
      Some(s) => s,
      None => return Vec::new(),
    };
    match source.query(expr) {
      Ok(samples) => samples,
      Err(e) => {
        warn!(error = %e, expr, "metrics backend query failed; returning empty");
        Vec::new()
      }
    }
  }

  /// Fetch cluster resource metrics for a pod/node selector. Same degrade
  /// contract as `query_prometheus`: empty when unconfigured or on error.
  pub fn k8s_metrics(&self, selector: &str) -> Vec<MetricSample> {
    let source = match &self.source {
      Some(s) => s,
      None => return Vec::new(),
    };
    match source.k8s_metrics(selector) {
      Ok(samples) => samples,
      Err(e) => {
        warn!(error = %e, selector, "cluster metrics query failed; returning empty");
        Vec::new()
      }
    }
  }
}

/// One-level escalation for critical-named metrics, saturating at critical.
fn boost(severity: SignalSeverity) -> SignalSeverity {
  match severity {
    SignalSeverity::Low => SignalSeverity::Medium,
    SignalSeverity::Medium => SignalSeverity::High,
    SignalSeverity::High | SignalSeverity::Critical => SignalSeverity::Critical,
  }
}

/// Group samples by (name, labels), each series sorted by timestamp.
fn group_series(metrics: &[MetricSample]) -> BTreeMap<String, Vec<&MetricSample>> {
  let mut groups: BTreeMap<String, Vec<&MetricSample>> = BTreeMap::new();
  for metric in metrics {
    let mut key = metric.name.clone();
    for (k, v) in &metric.labels {
      key.push('|');
      key.push_str(k);
      key.push('=');
      key.push_str(v);
    }
    groups.entry(key).or_default().push(metric);
  }
  for series in groups.values_mut() {
    series.sort_by_key(|m| m.timestamp);
  }
  groups
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
  if values.is_empty() {
    return (0.0, 0.0);
  }
  let mean = values.iter().sum::<f64>() / values.len() as f64;
  let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
  (mean, variance.sqrt())
}

/// Least-squares slope over sample indices, normalized by the series average
/// so the ±0.05 trend threshold is scale-free.
fn normalized_slope(values: &[f64], avg: f64) -> f64 {
  let n = values.len();
  if n < 2 || avg.abs() < f64::EPSILON {
    return 0.0;
  }
  let x_mean = (n - 1) as f64 / 2.0;
  let y_mean = values.iter().sum::<f64>() / n as f64;
  let mut num = 0.0;
  let mut den = 0.0;
  for (i, v) in values.iter().enumerate() {
    let dx = i as f64 - x_mean;
    num += dx * (v - y_mean);
    den += dx * dx;
  }
  if den.abs() < f64::EPSILON {
    return 0.0;
  }
  (num / den) / avg.abs()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
  }

  fn sample(name: &str, minute: u32, value: f64) -> MetricSample {
    MetricSample {
      name: name.into(),
      timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 11, minute, 0).unwrap(),
      value,
      labels: BTreeMap::new(),
    }
  }

  #[test]
  fn ingest_exposition_lines() {
    let processor = MetricProcessor::with_defaults();
    let text = concat!(
      "# HELP http_requests_total Total requests\n",
      "# TYPE http_requests_total counter\n",
      "http_requests_total{method=\"get\",code=\"200\"} 1027 1705318200000\n",
      "node_cpu_seconds 2.5e3\n",
      "\n",
      "garbage line that does not parse\n",
      "http_requests_total{method=\"post\"} 3\n",
    );
    let samples = processor.ingest_prometheus_format_at(text, fixed_now());
    assert_eq!(samples.len(), 3);

    assert_eq!(samples[0].name, "http_requests_total");
    assert_eq!(samples[0].value, 1027.0);
    assert_eq!(samples[0].labels.get("method").map(String::as_str), Some("get"));
    assert_eq!(
      samples[0].timestamp,
      Utc.with_ymd_and_hms(2024, 1, 15, 11, 30, 0).unwrap()
    );

    // Scientific notation, no labels, no explicit timestamp -> "now".
    assert_eq!(samples[1].value, 2500.0);
    assert_eq!(samples[1].timestamp, fixed_now());
  }

  #[test]
  fn anomaly_detected_on_large_jump() {
    let processor = MetricProcessor::with_defaults();
    let mut metrics = Vec::new();
    for (i, v) in [100.0, 101.0, 99.0, 100.5, 99.5, 100.2, 100.8, 99.2, 100.1, 99.9]
      .iter()
      .enumerate()
    {
      metrics.push(sample("request_duration", i as u32, *v));
    }
    metrics.push(sample("request_duration", 10, 500.0));

    let anomalies = processor.detect_anomalies(&metrics);
    assert!(!anomalies.is_empty());
    let anomaly = &anomalies[0];
    assert_eq!(anomaly.value, 500.0);
    assert_eq!(anomaly.metric, "request_duration");
    assert!(anomaly.deviation > processor.config.anomaly_z_threshold);
    assert!(anomaly.expected_range.0 < 100.0 && anomaly.expected_range.1 > 100.0);
    assert!(anomaly.expected_range.1 < 500.0);
  }

  #[test]
  fn stable_series_not_flagged() {
    let processor = MetricProcessor::with_defaults();
    let metrics: Vec<MetricSample> = (0..10)
      .map(|i| sample("steady", i, 100.0 + (i % 2) as f64))
      .collect();
    assert!(processor.detect_anomalies(&metrics).is_empty());
  }

  #[test]
  fn critical_metric_name_boosts_severity() {
    let processor = MetricProcessor::with_defaults();
    let build = |name: &str| {
      let mut m: Vec<MetricSample> = (0..10).map(|i| sample(name, i, 100.0 + (i % 3) as f64)).collect();
      // z ~= 3.7 against the ~0.83 stddev baseline: low severity before any boost.
      m.push(sample(name, 10, 104.0));
      m
    };
    let plain = processor.detect_anomalies(&build("queue_depth"));
    let critical = processor.detect_anomalies(&build("cpu_usage"));
    assert_eq!(plain.len(), 1);
    assert_eq!(critical.len(), 1);
    assert!(critical[0].severity > plain[0].severity);
  }

  #[test]
  fn series_with_one_point_skipped() {
    let processor = MetricProcessor::with_defaults();
    let metrics = vec![sample("lonely", 0, 42.0)];
    assert!(processor.detect_anomalies(&metrics).is_empty());
  }

  #[test]
  fn labels_separate_series() {
    let processor = MetricProcessor::with_defaults();
    let mut metrics = Vec::new();
    for i in 0..5 {
      let mut m = sample("latency", i, 100.0 + i as f64 * 0.1);
      m.labels.insert("pod".into(), "a".into());
      metrics.push(m);
    }
    // A single point for pod b; would be a wild anomaly if merged into pod a's series.
    let mut other = sample("latency", 2, 9000.0);
    other.labels.insert("pod".into(), "b".into());
    metrics.push(other);

    assert!(processor.detect_anomalies(&metrics).is_empty());
    assert_eq!(processor.summarize(&metrics).len(), 2);
  }

  #[test]
  fn summarize_trends() {
    let processor = MetricProcessor::with_defaults();

    let rising: Vec<MetricSample> = (0..10).map(|i| sample("up", i, 100.0 + i as f64 * 10.0)).collect();
    let falling: Vec<MetricSample> = (0..10).map(|i| sample("down", i, 200.0 - i as f64 * 10.0)).collect();
    let flat: Vec<MetricSample> = (0..10).map(|i| sample("flat", i, 100.0)).collect();
    let wild: Vec<MetricSample> = (0..10)
      .map(|i| sample("wild", i, if i % 2 == 0 { 10.0 } else { 400.0 }))
      .collect();

    assert_eq!(processor.summarize(&rising)[0].trend, Trend::Increasing);
    assert_eq!(processor.summarize(&falling)[0].trend, Trend::Decreasing);
    assert_eq!(processor.summarize(&flat)[0].trend, Trend::Stable);
    assert_eq!(processor.summarize(&wild)[0].trend, Trend::Volatile);
  }

  #[test]
  fn summarize_basic_stats() {
    let processor = MetricProcessor::with_defaults();
    let metrics = vec![
      sample("m", 0, 10.0),
      sample("m", 1, 30.0),
      sample("m", 2, 20.0),
    ];
    let summaries = processor.summarize(&metrics);
    assert_eq!(summaries.len(), 1);
    let s = &summaries[0];
    assert_eq!(s.min, 10.0);
    assert_eq!(s.max, 30.0);
    assert_eq!(s.avg, 20.0);
    assert_eq!(s.current, 20.0);
    assert_eq!(s.data_points, 3);
    assert!(s.anomaly_score >= 0.0 && s.anomaly_score <= 1.0);
  }

  #[test]
  fn baseline_comparison_directions() {
    let processor = MetricProcessor::with_defaults();
    let current = vec![
      sample("up", 0, 120.0),
      sample("down", 0, 80.0),
      sample("flat", 0, 101.0),
      sample("unmatched", 0, 5.0),
      sample("zero_base", 0, 5.0),
    ];
    let baseline = vec![
      sample("up", 0, 100.0),
      sample("down", 0, 100.0),
      sample("flat", 0, 100.0),
      sample("zero_base", 0, 0.0),
    ];
    let comparisons = processor.compare_to_baseline(&current, &baseline);
    // Unmatched and zero-baseline metrics are skipped, not errored.
    assert_eq!(comparisons.len(), 3);
    assert_eq!(comparisons[0].direction, ChangeDirection::Up);
    assert!((comparisons[0].change_percent - 20.0).abs() < 1e-9);
    assert_eq!(comparisons[1].direction, ChangeDirection::Down);
    assert_eq!(comparisons[2].direction, ChangeDirection::Stable);
  }

  #[test]
  fn severity_boost_is_one_level_and_saturates() {
    assert_eq!(boost(SignalSeverity::Low), SignalSeverity::Medium);
    assert_eq!(boost(SignalSeverity::Medium), SignalSeverity::High);
    assert_eq!(boost(SignalSeverity::High), SignalSeverity::Critical);
    assert_eq!(boost(SignalSeverity::Critical), SignalSeverity::Critical);
  }

  #[test]
  fn query_without_source_is_empty() {
    let processor = MetricProcessor::with_defaults();
    assert!(processor.query_prometheus("up").is_empty());
    assert!(processor.k8s_metrics("namespace=prod").is_empty());
  }

  #[test]
  fn query_with_failing_source_degrades_to_empty() {
    struct Failing;
    impl MetricsSource for Failing {
      fn query(&self, _expr: &str) -> Result<Vec<MetricSample>, AnalysisError> {
        Err(AnalysisError::external("timeout"))
      }
      fn k8s_metrics(&self, _selector: &str) -> Result<Vec<MetricSample>, AnalysisError> {
        Err(AnalysisError::external("timeout"))
      }
    }
    let processor = MetricProcessor::with_defaults().with_source(Box::new(Failing));
    assert!(processor.query_prometheus("up").is_empty());
    assert!(processor.k8s_metrics("namespace=prod").is_empty());
  }

  #[test]
  fn k8s_metrics_pass_through_configured_source() {
    struct Fixed;
    impl MetricsSource for Fixed {
      fn query(&self, _expr: &str) -> Result<Vec<MetricSample>, AnalysisError> {
        Ok(Vec::new())
      }
      fn k8s_metrics(&self, _selector: &str) -> Result<Vec<MetricSample>, AnalysisError> {
        Ok(vec![MetricSample {
          name: "pod_cpu_usage".into(),
          timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 11, 30, 0).unwrap(),
          value: 0.75,
          labels: BTreeMap::new(),
        }])
      }
    }
    let processor = MetricProcessor::with_defaults().with_source(Box::new(Fixed));
    let samples = processor.k8s_metrics("namespace=prod");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, "pod_cpu_usage");
  }

  #[test]
  fn analyze_composes_everything() {
    let processor = MetricProcessor::with_defaults();
    let mut metrics: Vec<MetricSample> = (0..10).map(|i| sample("error_rate", i, 1.0 + (i % 2) as f64 * 0.1)).collect();
    metrics.push(sample("error_rate", 10, 50.0));
    let baseline = vec![sample("error_rate", 0, 1.0)];

    let result = processor.analyze(&metrics, Some(&baseline));
    assert_eq!(result.metrics.len(), 11);
    assert_eq!(result.summaries.len(), 1);
    assert!(!result.anomalies.is_empty());
    assert!(!result.comparisons.is_empty());
  }
}
