//! Integration tests for the analysis engine.

use analysis_engine::types::InfraEventType;
use analysis_engine::{CorrelationEngine, EventStream, Evidence, LogParser, MetricProcessor};
use chrono::{TimeZone, Utc};

fn fixture_evidence() -> Vec<Evidence> {
  // A deployment event, then a critical error log, then a metric spike,
  // all inside one alignment window. Extra fields must be ignored.
  let json = r#"[
    {
      "id": "ev-deploy",
      "incident_id": "inc-42",
      "type": "k8s_event",
      "source": "kubernetes",
      "content": {"description": "ScalingReplicaSet: scaled up api to 5", "severity": "warning"},
      "timestamp": "2024-01-15T11:00:00Z",
      "metadata": {"namespace": "prod"},
      "collector_version": "2.1.0"
    },
    {
      "id": "ev-log",
      "incident_id": "inc-42",
      "type": "log",
      "source": "api",
      "content": {"message": "connection refused to payments service", "severity": "critical"},
      "timestamp": "2024-01-15T11:00:10Z"
    },
    {
      "id": "ev-metric",
      "incident_id": "inc-42",
      "type": "metric",
      "source": "prometheus",
      "content": {"description": "http_errors_total spiked", "severity": "high"},
      "timestamp": "2024-01-15T11:00:20Z",
      "confidence": 0.9
    },
    {
      "id": "ev-bogus",
      "incident_id": "inc-42",
      "type": "screenshot",
      "source": "browser",
      "timestamp": "2024-01-15T11:00:25Z"
    }
  ]"#;
  serde_json::from_str(json).unwrap()
}

#[test]
fn full_analysis_roots_chain_at_the_event() {
  let engine = CorrelationEngine::with_defaults();
  let result = engine.analyze(&fixture_evidence(), "inc-42");

  assert_eq!(result.incident_id, "inc-42");
  // The screenshot record is skipped; three signals survive.
  assert_eq!(result.summary.total_signals, 3);
  assert_eq!(result.summary.time_windows, 1);
  assert!(result.summary.correlations_found > 0);

  let chain = result.causal_chain.as_ref().expect("causal chain");
  assert_eq!(chain.root_cause.description, "ScalingReplicaSet: scaled up api to 5");
  assert!(chain.effects.len() >= 1);
  assert!(chain.confidence > 0.0 && chain.confidence <= 1.0);

  let trigger = result.trigger_event.as_ref().expect("trigger event");
  assert_eq!(trigger.id, chain.root_cause.id);

  assert!(!result.root_cause_hypotheses.is_empty());
  assert_eq!(result.root_cause_hypotheses[0].signal.id, chain.root_cause.id);
  assert!(!result.root_cause_hypotheses[0].supporting_signals.is_empty());
}

#[test]
fn deterministic_output_across_runs() {
  let evidence = fixture_evidence();

  let engine1 = CorrelationEngine::with_defaults();
  let json1 = serde_json::to_string(&engine1.analyze(&evidence, "inc-42")).unwrap();

  let engine2 = CorrelationEngine::with_defaults();
  let json2 = serde_json::to_string(&engine2.analyze(&evidence, "inc-42")).unwrap();

  assert_eq!(json1, json2, "Same inputs must produce identical JSON output");
}

#[test]
fn empty_evidence_yields_empty_result_not_error() {
  let engine = CorrelationEngine::with_defaults();
  let result = engine.analyze(&[], "inc-0");
  assert_eq!(result.summary.total_signals, 0);
  assert!(result.correlations.is_empty());
  assert!(result.causal_chain.is_none());
  assert!(result.root_cause_hypotheses.is_empty());
}

#[test]
fn k8s_event_dump_round_trips_into_known_types() {
  let stream = EventStream::with_defaults();
  let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
  let dump = r#"
{"involvedObject": {"kind": "Pod", "name": "api-7d9f"}, "reason": "BackOff", "type": "Warning", "message": "Back-off restarting failed container", "lastTimestamp": "2024-01-15T11:58:00Z"}
{"involvedObject": {"kind": "Pod", "name": "api-7d9f"}, "reason": "OOMKilled", "type": "Warning", "message": "Container api was OOM killed", "lastTimestamp": "2024-01-15T11:59:00Z"}
{"involvedObject": {"kind": "Deployment", "name": "api"}, "reason": "ScalingReplicaSet", "type": "Normal", "message": "Scaled up replica set", "lastTimestamp": "2024-01-15T11:57:00Z"}
"#;
  let parsed = stream.parse_kubernetes_events_at(dump, now);
  assert_eq!(parsed.len(), 3);

  let events = stream.convert_k8s_events(&parsed);
  assert_eq!(events.len(), 3);
  assert!(events.iter().any(|e| e.event_type == InfraEventType::OomKill));
  assert!(events.iter().any(|e| e.event_type == InfraEventType::PodCrash));
  assert!(events.iter().any(|e| e.event_type == InfraEventType::Scale));

  // The OOM kill sits closest to the incident and carries critical severity,
  // so it must outrank the earlier crash and scale events.
  let triggers = stream.find_potential_triggers(&events, now);
  assert!(!triggers.is_empty());
  assert_eq!(triggers[0].event.event_type, InfraEventType::OomKill);
}

#[test]
fn raw_log_text_flows_through_the_parser() {
  let parser = LogParser::with_defaults();
  let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
  let raw = r#"{"timestamp": "2024-01-15T11:55:00Z", "level": "error", "message": "DatabaseError: connection pool exhausted", "pod": "api-7d9f"}
{"timestamp": "2024-01-15T11:55:05Z", "level": "error", "message": "DatabaseError: connection pool exhausted", "pod": "api-8e1a"}
{"timestamp": "2024-01-15T11:55:10Z", "level": "info", "message": "health check ok"}"#;

  let result = parser.analyze_at(raw, "api", now);
  assert_eq!(result.logs.len(), 3);
  assert_eq!(result.errors.len(), 1);
  assert_eq!(result.errors[0].error_type, "DatabaseError");
  assert_eq!(result.errors[0].occurrences, 2);
  assert_eq!(result.errors[0].affected_pods.len(), 2);
}

#[test]
fn raw_metric_text_flows_through_the_processor() {
  let processor = MetricProcessor::with_defaults();
  let mut lines = String::new();
  // Ten quiet points near 100, then a jump to 500.
  for i in 0..10 {
    lines.push_str(&format!(
      "http_request_duration_ms{{service=\"api\"}} {} {}\n",
      100 + (i % 3),
      1_705_316_400_000_i64 + i * 60_000
    ));
  }
  lines.push_str("http_request_duration_ms{service=\"api\"} 500 1705317000000\n");

  let samples = processor.ingest_prometheus_format(&lines);
  assert_eq!(samples.len(), 11);

  let anomalies = processor.detect_anomalies(&samples);
  assert!(anomalies.iter().any(|a| a.value == 500.0));
}
