//! Correlation detection over aligned signal windows.
//!
//! Two strategies behind one seam: the built-in heuristics, and an external
//! reasoning collaborator that silently falls back to the heuristics on any
//! failure or shape mismatch. Callers never see the fallback happen.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::CorrelationConfig;
use crate::error::AnalysisError;
use crate::ids;
use crate::types::{AlignedWindow, Correlation, CorrelationType, Signal, TimeSpan};

/// Pluggable correlation detection.
pub trait CorrelationStrategy {
  fn find_correlations(&self, aligned: &[AlignedWindow], incident_id: &str) -> Vec<Correlation>;
}

// ---------------------------------------------------------------------------
// Heuristic strategy
// ---------------------------------------------------------------------------

pub struct HeuristicStrategy {
  config: CorrelationConfig,
}

impl HeuristicStrategy {
  pub fn new(config: CorrelationConfig) -> Self {
    Self { config }
  }

  pub fn with_defaults() -> Self {
    Self::new(CorrelationConfig::default())
  }

  /// Emit up to three correlation candidates per non-trivial window:
  ///
  /// 1. temporal over all signals, confidence `min(0.3 + avg_sev·0.2, 0.8)`,
  ///    gated by the configured minimum confidence;
  /// 2. symptomatic (0.6) when high/critical signals co-occur with metrics;
  /// 3. causal (0.7) when event signals strictly precede the window's
  ///    earliest high/critical signal.
  fn correlate_window(&self, window: &AlignedWindow, out: &mut Vec<Correlation>) {
    if window.signal_count < 2 {
      return;
    }
    let all: Vec<&Signal> = window.all_signals().collect();

    // 1. Temporal co-occurrence.
    let avg_severity =
      all.iter().map(|s| s.severity.score()).sum::<f64>() / all.len() as f64;
    let temporal_confidence = (0.3 + avg_severity * 0.2).min(0.8);
    if temporal_confidence >= self.config.min_correlation_confidence {
      out.push(self.build(
        window,
        CorrelationType::Temporal,
        temporal_confidence,
        all.iter().map(|s| (*s).clone()).collect(),
        format!("{} signals co-occurred within one window", all.len()),
        format!(
          "Signals of average severity {:.2} fell inside the same {}ms window",
          avg_severity, self.config.window_ms
        ),
      ));
    }

    // 2. Symptomatic: severe signals alongside metric movement.
    let severe: Vec<&Signal> = all.iter().copied().filter(|s| s.severity.is_high()).collect();
    if !severe.is_empty() && !window.metrics.is_empty() {
      let mut signals: Vec<Signal> = severe.iter().map(|s| (*s).clone()).collect();
      for metric in &window.metrics {
        if !signals.iter().any(|s| s.id == metric.id) {
          signals.push(metric.clone());
        }
      }
      out.push(self.build(
        window,
        CorrelationType::Symptomatic,
        0.6,
        signals,
        "High-severity signals coincided with metric movement".into(),
        "Metric deviation in the same window as high/critical signals suggests a shared symptom".into(),
      ));
    }

    // 3. Causal: events strictly before the earliest severe signal.
    if let Some(earliest_severe) = severe.iter().min_by_key(|s| s.timestamp) {
      let preceding: Vec<&Signal> = window
        .events
        .iter()
        .filter(|e| e.timestamp < earliest_severe.timestamp)
        .collect();
      if !preceding.is_empty() {
        let mut signals: Vec<Signal> = preceding.iter().map(|s| (*s).clone()).collect();
        signals.push((*earliest_severe).clone());
        out.push(self.build(
          window,
          CorrelationType::Causal,
          0.7,
          signals,
          "Infrastructure events preceded high-severity signals".into(),
          "Event signals occurred strictly before the window's first high/critical signal".into(),
        ));
      }
    }
  }

  fn build(
    &self,
    window: &AlignedWindow,
    correlation_type: CorrelationType,
    confidence: f64,
    signals: Vec<Signal>,
    description: String,
    reasoning: String,
  ) -> Correlation {
    let start = signals.iter().map(|s| s.timestamp).min().unwrap_or(window.timestamp);
    let end = signals.iter().map(|s| s.timestamp).max().unwrap_or(window.timestamp);
    Correlation {
      id: ids::stable_id(
        "cor",
        &[
          &window.timestamp.to_rfc3339(),
          &format!("{:?}", correlation_type),
        ],
      ),
      timestamp: window.timestamp,
      signals,
      correlation_type,
      confidence,
      description,
      reasoning,
      time_span: TimeSpan::new(start, end),
    }
  }
}

impl CorrelationStrategy for HeuristicStrategy {
  fn find_correlations(&self, aligned: &[AlignedWindow], _incident_id: &str) -> Vec<Correlation> {
    let mut correlations = Vec::new();
    for window in aligned {
      self.correlate_window(window, &mut correlations);
    }
    // Highest confidence first; timestamp and id break ties for determinism.
    correlations.sort_by(|a, b| {
      b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
    });
    correlations.truncate(self.config.max_correlations);
    correlations
  }
}

// ---------------------------------------------------------------------------
// External reasoning strategy
// ---------------------------------------------------------------------------

/// Correlation groupings returned by the external reasoning collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningResponse {
  pub groups: Vec<ReasoningGroup>,
  /// Advisory only; causal-chain inference re-derives the root cause
  /// deterministically from the correlations.
  #[serde(default)]
  pub root_cause_signal_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningGroup {
  pub signal_ids: Vec<String>,
  pub correlation_type: String,
  pub confidence: f64,
  pub description: String,
  #[serde(default)]
  pub reasoning: Option<String>,
}

/// External reasoning collaborator. Implementations own their transport and
/// must time-bound the call, returning `Err` on timeout.
pub trait ReasoningClient {
  fn correlate(
    &self,
    incident_id: &str,
    aligned: &[AlignedWindow],
  ) -> Result<ReasoningResponse, AnalysisError>;
}

/// Tries the external collaborator first; any error, unparsable response, or
/// empty conversion falls back to the heuristics. The fallback is logged but
/// invisible to callers.
pub struct ExternalReasoningStrategy {
  client: Box<dyn ReasoningClient>,
  fallback: HeuristicStrategy,
}

impl ExternalReasoningStrategy {
  pub fn new(client: Box<dyn ReasoningClient>, config: CorrelationConfig) -> Self {
    Self {
      client,
      fallback: HeuristicStrategy::new(config),
    }
  }

  fn convert(&self, response: ReasoningResponse, aligned: &[AlignedWindow]) -> Vec<Correlation> {
    let by_id: HashMap<&str, &Signal> = aligned
      .iter()
      .flat_map(|w| w.all_signals())
      .map(|s| (s.id.as_str(), s))
      .collect();

    let mut correlations = Vec::new();
    for group in response.groups {
      let signals: Vec<Signal> = group
        .signal_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).map(|s| (*s).clone()))
        .collect();
      if signals.len() < 2 {
        debug!(
          resolved = signals.len(),
          requested = group.signal_ids.len(),
          "dropping reasoning group with fewer than two resolvable signals"
        );
        continue;
      }

      let correlation_type = match group.correlation_type.to_ascii_lowercase().as_str() {
        "causal" => CorrelationType::Causal,
        "symptomatic" => CorrelationType::Symptomatic,
        "sequential" => CorrelationType::Sequential,
        _ => CorrelationType::Temporal,
      };
      let start = signals.iter().map(|s| s.timestamp).min().unwrap_or_else(Utc::now);
      let end = signals.iter().map(|s| s.timestamp).max().unwrap_or(start);

      correlations.push(Correlation {
        id: ids::stable_id("cor", &[&start.to_rfc3339(), "external", &group.description]),
        timestamp: start,
        signals,
        correlation_type,
        confidence: group.confidence.clamp(0.0, 1.0),
        description: group.description,
        reasoning: group
          .reasoning
          .unwrap_or_else(|| "Reported by external reasoning collaborator".into()),
        time_span: TimeSpan::new(start, end),
      });
    }
    correlations
  }
}

impl CorrelationStrategy for ExternalReasoningStrategy {
  fn find_correlations(&self, aligned: &[AlignedWindow], incident_id: &str) -> Vec<Correlation> {
    match self.client.correlate(incident_id, aligned) {
      Ok(response) => {
        let correlations = self.convert(response, aligned);
        if correlations.is_empty() {
          warn!(incident_id, "reasoning response yielded no usable correlations; using heuristics");
          self.fallback.find_correlations(aligned, incident_id)
        } else {
          correlations
        }
      }
      Err(e) => {
        warn!(incident_id, error = %e, "reasoning collaborator failed; using heuristics");
        self.fallback.find_correlations(aligned, incident_id)
      }
    }
  }
}
