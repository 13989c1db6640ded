//! Cross-modal signal alignment: adapt external evidence records into the
//! unified Signal envelope and bucket signals into fixed time windows.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use crate::ids;
use crate::types::{AlignedWindow, Evidence, Signal, SignalKind, SignalSeverity, TimeSpan};

/// Signals partitioned by modality, ready for alignment.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
  pub visual: Vec<Signal>,
  pub logs: Vec<Signal>,
  pub metrics: Vec<Signal>,
  pub events: Vec<Signal>,
}

impl SignalSet {
  pub fn total(&self) -> usize {
    self.visual.len() + self.logs.len() + self.metrics.len() + self.events.len()
  }

  /// All signals across modalities, sorted chronologically (id breaks ties).
  pub fn all_chronological(&self) -> Vec<Signal> {
    let mut all: Vec<Signal> = self
      .visual
      .iter()
      .chain(self.logs.iter())
      .chain(self.metrics.iter())
      .chain(self.events.iter())
      .cloned()
      .collect();
    all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    all
  }
}

/// Adapt externally persisted evidence records into typed signals.
///
/// Evidence tags map `video_frame`→visual, `log`→log, `metric`→metric,
/// `k8s_event`→event; records with any other tag are skipped with a warning.
pub fn evidence_to_signals(evidence: &[Evidence]) -> SignalSet {
  let mut set = SignalSet::default();
  for record in evidence {
    let kind = match record.evidence_type.as_str() {
      "video_frame" => SignalKind::Visual,
      "log" => SignalKind::Log,
      "metric" => SignalKind::Metric,
      "k8s_event" => SignalKind::Event,
      other => {
        warn!(evidence_id = %record.id, evidence_type = other, "skipping evidence with unknown type");
        continue;
      }
    };

    let severity = severity_from_evidence(record);
    let description = description_from_evidence(record);

    let signal = Signal {
      id: ids::stable_id("sig", &["evidence", &record.id]),
      kind,
      timestamp: record.timestamp,
      source: record.source.clone(),
      severity,
      description,
      data: record.content.clone(),
      confidence: None,
    }
    .with_confidence(record.confidence);

    match kind {
      SignalKind::Visual => set.visual.push(signal),
      SignalKind::Log => set.logs.push(signal),
      SignalKind::Metric => set.metrics.push(signal),
      SignalKind::Event => set.events.push(signal),
    }
  }
  set
}

fn severity_from_evidence(record: &Evidence) -> SignalSeverity {
  let lookup = |value: &serde_json::Value| {
    value
      .get("severity")
      .or_else(|| value.get("level"))
      .and_then(|v| v.as_str())
      .map(SignalSeverity::from_str_loose)
  };
  lookup(&record.content)
    .or_else(|| lookup(&record.metadata))
    .unwrap_or(SignalSeverity::Low)
}

fn description_from_evidence(record: &Evidence) -> String {
  record
    .content
    .get("description")
    .or_else(|| record.content.get("message"))
    .and_then(|v| v.as_str())
    .map(String::from)
    .unwrap_or_else(|| record.source.clone())
}

/// Bucket all signals into fixed-width windows anchored at the global minimum
/// timestamp. Empty buckets are never materialized.
pub fn align_by_time(signals: &SignalSet, window_ms: i64) -> Vec<AlignedWindow> {
  if signals.total() == 0 || window_ms <= 0 {
    return Vec::new();
  }

  let min_ts = signals
    .all_chronological()
    .first()
    .map(|s| s.timestamp)
    .unwrap_or_else(Utc::now);

  let mut buckets: BTreeMap<i64, AlignedWindow> = BTreeMap::new();
  let mut place = |signal: &Signal| {
    let k = (signal.timestamp - min_ts).num_milliseconds() / window_ms;
    let bucket = buckets.entry(k).or_insert_with(|| {
      let start = min_ts + Duration::milliseconds(k * window_ms);
      let end = start + Duration::milliseconds(window_ms);
      AlignedWindow {
        timestamp: start,
        window: TimeSpan::new(start, end),
        visual: Vec::new(),
        logs: Vec::new(),
        metrics: Vec::new(),
        events: Vec::new(),
        signal_count: 0,
        dominant_signal_type: None,
      }
    });
    bucket.signal_count += 1;
    match signal.kind {
      SignalKind::Visual => bucket.visual.push(signal.clone()),
      SignalKind::Log => bucket.logs.push(signal.clone()),
      SignalKind::Metric => bucket.metrics.push(signal.clone()),
      SignalKind::Event => bucket.events.push(signal.clone()),
    }
  };

  for signal in signals
    .visual
    .iter()
    .chain(signals.logs.iter())
    .chain(signals.metrics.iter())
    .chain(signals.events.iter())
  {
    place(signal);
  }

  let mut windows: Vec<AlignedWindow> = buckets.into_values().collect();
  for window in &mut windows {
    window.dominant_signal_type = dominant_type(window);
    // Chronological order within each modality.
    window.visual.sort_by_key(|s| s.timestamp);
    window.logs.sort_by_key(|s| s.timestamp);
    window.metrics.sort_by_key(|s| s.timestamp);
    window.events.sort_by_key(|s| s.timestamp);
  }
  windows
}

/// Modality with the most signals; ties resolve in the counting order
/// visual > log > metric > event.
fn dominant_type(window: &AlignedWindow) -> Option<SignalKind> {
  let counts = [
    (SignalKind::Visual, window.visual.len()),
    (SignalKind::Log, window.logs.len()),
    (SignalKind::Metric, window.metrics.len()),
    (SignalKind::Event, window.events.len()),
  ];
  let mut best: Option<(SignalKind, usize)> = None;
  for (kind, n) in counts {
    // Strictly greater keeps the first modality in counting order on ties.
    if n > 0 && best.map_or(true, |(_, bn)| n > bn) {
      best = Some((kind, n));
    }
  }
  best.map(|(kind, _)| kind)
}
