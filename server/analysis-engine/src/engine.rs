//! The correlation engine: full pipeline from raw evidence records to a
//! ranked, confidence-scored analysis result.
//!
//! `analyze` never fails. Bad telemetry degrades to an empty result with a
//! logged diagnostic; this feeds an automated response loop that must not
//! crash on malformed input.

use tracing::{debug, info};

use crate::align::{align_by_time, evidence_to_signals};
use crate::causality::{infer_causality, score_root_cause};
use crate::config::CorrelationConfig;
use crate::correlation::{CorrelationStrategy, HeuristicStrategy};
use crate::types::{
  AnalysisSummary, CausalChain, Correlation, CorrelationResult, Evidence, RootCauseHypothesis,
  Signal, SignalKind,
};
use chrono::Duration;

/// Lifecycle observer for analysis runs. Sinks are passed in, not inherited;
/// downstream layers register whatever notification transport they own.
pub trait NotificationSink {
  fn analysis_started(&self, incident_id: &str, evidence_count: usize);
  fn analysis_completed(&self, result: &CorrelationResult);
}

pub struct CorrelationEngine {
  config: CorrelationConfig,
  strategy: Box<dyn CorrelationStrategy>,
  sinks: Vec<Box<dyn NotificationSink>>,
}

impl CorrelationEngine {
  pub fn new(config: CorrelationConfig, strategy: Box<dyn CorrelationStrategy>) -> Self {
    Self {
      config,
      strategy,
      sinks: Vec::new(),
    }
  }

  pub fn with_defaults() -> Self {
    let config = CorrelationConfig::default();
    let strategy = Box::new(HeuristicStrategy::new(config.clone()));
    Self::new(config, strategy)
  }

  pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
    self.sinks.push(sink);
  }

  /// Run the full pipeline: adapt evidence, align into time windows, detect
  /// correlations, infer the causal chain, and rank root-cause hypotheses.
  pub fn analyze(&self, evidence: &[Evidence], incident_id: &str) -> CorrelationResult {
    for sink in &self.sinks {
      sink.analysis_started(incident_id, evidence.len());
    }

    let signals = evidence_to_signals(evidence);
    let aligned = align_by_time(&signals, self.config.window_ms);
    let correlations = self.strategy.find_correlations(&aligned, incident_id);
    let all = signals.all_chronological();
    let causal_chain = infer_causality(&correlations, &all, &self.config);

    debug!(
      incident_id,
      signals = all.len(),
      windows = aligned.len(),
      correlations = correlations.len(),
      has_chain = causal_chain.is_some(),
      "analysis pipeline complete"
    );

    let trigger_event = self.trigger_event(causal_chain.as_ref(), &all);
    let root_cause_hypotheses =
      self.root_cause_hypotheses(causal_chain.as_ref(), &all, &correlations);

    let avg_correlation_confidence = if correlations.is_empty() {
      0.0
    } else {
      correlations.iter().map(|c| c.confidence).sum::<f64>() / correlations.len() as f64
    };

    let result = CorrelationResult {
      incident_id: incident_id.to_string(),
      summary: AnalysisSummary {
        total_signals: all.len() as u64,
        time_windows: aligned.len() as u64,
        correlations_found: correlations.len() as u64,
        has_causal_chain: causal_chain.is_some(),
        avg_correlation_confidence,
      },
      correlations,
      causal_chain,
      trigger_event,
      root_cause_hypotheses,
    };

    info!(
      incident_id,
      correlations = result.summary.correlations_found,
      has_chain = result.summary.has_causal_chain,
      hypotheses = result.root_cause_hypotheses.len(),
      "incident analysis finished"
    );
    for sink in &self.sinks {
      sink.analysis_completed(&result);
    }
    result
  }

  /// The chain's root cause when one was inferred; otherwise the earliest
  /// high/critical event signal; otherwise the first event signal.
  fn trigger_event(&self, chain: Option<&CausalChain>, all: &[Signal]) -> Option<Signal> {
    if let Some(chain) = chain {
      return Some(chain.root_cause.clone());
    }
    // `all` is chronologically sorted, so find() yields the earliest match.
    all
      .iter()
      .find(|s| s.kind == SignalKind::Event && s.severity.is_high())
      .or_else(|| all.iter().find(|s| s.kind == SignalKind::Event))
      .cloned()
  }

  /// The chain's root cause leads; up to three further high-severity or
  /// event-typed candidates follow, each paired with the signals that
  /// occurred after it inside the causality window.
  fn root_cause_hypotheses(
    &self,
    chain: Option<&CausalChain>,
    all: &[Signal],
    correlations: &[Correlation],
  ) -> Vec<RootCauseHypothesis> {
    let mut hypotheses = Vec::new();
    let chain_root_id = chain.map(|c| c.root_cause.id.clone());

    if let Some(chain) = chain {
      hypotheses.push(RootCauseHypothesis {
        signal: chain.root_cause.clone(),
        confidence: chain.confidence,
        supporting_signals: chain.effects.clone(),
      });
    }

    let mut candidates: Vec<(f64, &Signal)> = all
      .iter()
      .enumerate()
      .filter(|(_, s)| {
        (s.severity.is_high() || s.kind == SignalKind::Event)
          && chain_root_id.as_deref() != Some(s.id.as_str())
      })
      .map(|(i, s)| (score_root_cause(s, i, all.len(), correlations), s))
      .collect();
    candidates.sort_by(|a, b| {
      b.0
        .partial_cmp(&a.0)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.1.timestamp.cmp(&b.1.timestamp))
        .then_with(|| a.1.id.cmp(&b.1.id))
    });

    for (score, candidate) in candidates.into_iter().take(3) {
      let cutoff =
        candidate.timestamp + Duration::milliseconds(self.config.causality_time_threshold_ms);
      let supporting: Vec<Signal> = all
        .iter()
        .filter(|s| s.timestamp > candidate.timestamp && s.timestamp <= cutoff)
        .cloned()
        .collect();
      hypotheses.push(RootCauseHypothesis {
        signal: candidate.clone(),
        confidence: score.clamp(0.0, 1.0),
        supporting_signals: supporting,
      });
    }
    hypotheses
  }
}
