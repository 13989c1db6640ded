//! Causal-chain inference: pick the most plausible root-cause signal and
//! walk the downstream effects that follow it.

use crate::config::CorrelationConfig;
use crate::ids;
use crate::types::{
  CausalChain, CausalStep, Correlation, CorrelationType, Signal, SignalKind, TimelineEntry,
};
use chrono::Duration;

/// Infer a single causal chain from the detected correlations.
///
/// Returns `None` when there is nothing to chain: no correlations, no
/// signals, or no effect follows the chosen root within the causality
/// threshold. A root with zero effects is not a chain.
pub fn infer_causality(
  correlations: &[Correlation],
  signals: &[Signal],
  config: &CorrelationConfig,
) -> Option<CausalChain> {
  if correlations.is_empty() || signals.is_empty() {
    return None;
  }

  let mut ordered: Vec<&Signal> = signals.iter().collect();
  ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

  let root = select_root(&ordered, correlations)?;

  let cutoff = root.timestamp + Duration::milliseconds(config.causality_time_threshold_ms);
  let effects: Vec<&Signal> = ordered
    .iter()
    .copied()
    .filter(|s| s.timestamp > root.timestamp && s.timestamp <= cutoff)
    .collect();
  if effects.is_empty() {
    return None;
  }

  // Each step relates an effect to the signal immediately before it in the
  // chain (the root for the first effect).
  let mut steps = Vec::with_capacity(effects.len());
  let mut prev = root;
  for effect in &effects {
    let (relationship, confidence) = relate(prev, effect, correlations);
    steps.push(CausalStep {
      signal: (*effect).clone(),
      relationship,
      confidence,
    });
    prev = effect;
  }

  let confidence = steps.iter().map(|s| s.confidence).sum::<f64>() / steps.len() as f64;

  let mut timeline = Vec::with_capacity(effects.len() + 1);
  timeline.push(TimelineEntry {
    timestamp: root.timestamp,
    signal: root.clone(),
    relationship: "root_cause".into(),
  });
  for step in &steps {
    timeline.push(TimelineEntry {
      timestamp: step.signal.timestamp,
      signal: step.signal.clone(),
      relationship: step.relationship.clone(),
    });
  }

  Some(CausalChain {
    id: ids::stable_id("chain", &[&root.id]),
    root_cause: root.clone(),
    effects: effects.into_iter().cloned().collect(),
    intermediate_steps: steps,
    confidence,
    reasoning: format!(
      "{} was followed by {} downstream signal(s) within {}ms",
      root.description,
      timeline.len() - 1,
      config.causality_time_threshold_ms
    ),
    timeline,
  })
}

/// Score every signal as a root-cause candidate and keep the best.
///
/// Components: earliness up to 0.3, a flat 0.3 for infrastructure events,
/// severity weight up to 0.2, and 0.2 per causal correlation the signal
/// appears in. Ties resolve to the earlier signal, then the smaller id.
pub fn score_root_cause(
  signal: &Signal,
  position: usize,
  total: usize,
  correlations: &[Correlation],
) -> f64 {
  let earliness = if total <= 1 {
    0.3
  } else {
    0.3 * (1.0 - position as f64 / (total - 1) as f64)
  };
  let event_bonus = if signal.kind == SignalKind::Event { 0.3 } else { 0.0 };
  let severity = signal.severity.score() * 0.2;
  let causal_bonus = correlations
    .iter()
    .filter(|c| c.correlation_type == CorrelationType::Causal && c.contains(&signal.id))
    .count() as f64
    * 0.2;
  earliness + event_bonus + severity + causal_bonus
}

fn select_root<'a>(ordered: &[&'a Signal], correlations: &[Correlation]) -> Option<&'a Signal> {
  let mut best: Option<(&Signal, f64)> = None;
  for (i, signal) in ordered.iter().enumerate() {
    let score = score_root_cause(signal, i, ordered.len(), correlations);
    let better = match best {
      None => true,
      // Ordered iteration means earlier timestamp/id wins ties.
      Some((_, best_score)) => score > best_score,
    };
    if better {
      best = Some((signal, score));
    }
  }
  best.map(|(s, _)| s)
}

/// Relationship label and confidence between two consecutive chain members.
/// A shared correlation outranks the modality-pair defaults.
fn relate(from: &Signal, to: &Signal, correlations: &[Correlation]) -> (String, f64) {
  if let Some(shared) = correlations
    .iter()
    .find(|c| c.contains(&from.id) && c.contains(&to.id))
  {
    return (
      format!("Correlated ({:?})", shared.correlation_type).to_lowercase(),
      shared.confidence,
    );
  }
  match (from.kind, to.kind) {
    (SignalKind::Event, SignalKind::Log) => ("Event triggered error logs".into(), 0.6),
    (SignalKind::Event, SignalKind::Metric) => ("Event caused metric change".into(), 0.5),
    (SignalKind::Log, SignalKind::Visual) => ("Errors manifested in dashboard".into(), 0.7),
    _ => ("Sequential occurrence".into(), 0.4),
  }
}
