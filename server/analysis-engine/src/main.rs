//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an AnalysisRequest tagged by "op". Output lines are the
//! corresponding result record, or an ErrorOutput when the line cannot be
//! parsed. Diagnostics go to stderr via tracing (RUST_LOG controls the level).

use analysis_engine::types::{Deploy, ErrorOutput, EventTimeline, TriggerCandidate};
use analysis_engine::{CorrelationEngine, EventStream, Evidence, LogParser, MetricProcessor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum AnalysisRequest {
  /// Normalize raw log text and report errors, groups, and spikes.
  Logs { source: String, raw: String },
  /// Parse exposition-format metrics; optional second payload as baseline.
  Metrics {
    raw: String,
    #[serde(default)]
    baseline: Option<String>,
  },
  /// Parse cluster events, build a timeline, and score triggers when an
  /// incident time is supplied.
  Events {
    raw: String,
    #[serde(default)]
    incident_time: Option<DateTime<Utc>>,
  },
  /// Full correlation analysis over persisted evidence records.
  Correlate {
    incident_id: String,
    evidence: Vec<Evidence>,
  },
}

#[derive(Debug, Serialize)]
struct EventsOutput {
  timeline: EventTimeline,
  #[serde(skip_serializing_if = "Option::is_none")]
  preceding_deployment: Option<Deploy>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  triggers: Vec<TriggerCandidate>,
}

fn handle(request: AnalysisRequest, out: &mut impl Write) -> io::Result<()> {
  match request {
    AnalysisRequest::Logs { source, raw } => {
      let parser = LogParser::with_defaults();
      let result = parser.analyze(&raw, &source);
      serde_json::to_writer(&mut *out, &result)?;
    }
    AnalysisRequest::Metrics { raw, baseline } => {
      let processor = MetricProcessor::with_defaults();
      let samples = processor.ingest_prometheus_format(&raw);
      let baseline_samples = baseline.map(|b| processor.ingest_prometheus_format(&b));
      let result = processor.analyze(&samples, baseline_samples.as_deref());
      serde_json::to_writer(&mut *out, &result)?;
    }
    AnalysisRequest::Events { raw, incident_time } => {
      let stream = EventStream::with_defaults();
      let parsed = stream.parse_kubernetes_events(&raw);
      let events = stream.convert_k8s_events(&parsed);

      let start = events.iter().map(|e| e.timestamp).min().unwrap_or_else(Utc::now);
      let end = events.iter().map(|e| e.timestamp).max().unwrap_or(start);
      let timeline = stream.build_event_timeline(&events, start, end);

      let (preceding_deployment, triggers) = match incident_time {
        Some(t) => (
          stream.find_preceding_deployment(&events, t),
          stream.find_potential_triggers(&events, t),
        ),
        None => (None, Vec::new()),
      };
      serde_json::to_writer(
        &mut *out,
        &EventsOutput {
          timeline,
          preceding_deployment,
          triggers,
        },
      )?;
    }
    AnalysisRequest::Correlate {
      incident_id,
      evidence,
    } => {
      let engine = CorrelationEngine::with_defaults();
      let result = engine.analyze(&evidence, &incident_id);
      serde_json::to_writer(&mut *out, &result)?;
    }
  }
  writeln!(out)
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    )
    .with_writer(io::stderr)
    .init();

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "analysis-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let request: AnalysisRequest = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        let err = ErrorOutput::new(format!("json parse: {}", e));
        let _ = serde_json::to_writer(&mut out, &err);
        let _ = writeln!(out);
        continue;
      }
    };

    if let Err(e) = handle(request, &mut out) {
      let _ = writeln!(io::stderr(), "analysis-engine: write error: {}", e);
      std::process::exit(1);
    }
  }

  let _ = out.flush();
}
