//! Infrastructure event stream: git/deploy ingestion, Kubernetes event
//! parsing, bounded timelines, and incident trigger scoring.
//!
//! Reason and severity mappings are plain lookup tables so the behavior is
//! auditable and testable in isolation.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::config::EventStreamConfig;
use crate::ids;
use crate::types::{
  CommitRecord, Deploy, DeployRecord, EventSeverity, EventTimeline, InfraEvent, InfraEventType,
  K8sEvent, TimelineSummary, TriggerCandidate,
};

/// Kubernetes event reason -> canonical event type. Unlisted reasons map to
/// the generic `k8s_event`.
static REASON_EVENT_TYPES: &[(&str, InfraEventType)] = &[
  ("OOMKilled", InfraEventType::OomKill),
  ("OOMKilling", InfraEventType::OomKill),
  ("BackOff", InfraEventType::PodCrash),
  ("CrashLoopBackOff", InfraEventType::PodCrash),
  ("Failed", InfraEventType::PodCrash),
  ("ScaledUp", InfraEventType::Scale),
  ("ScaledDown", InfraEventType::Scale),
  ("ScalingReplicaSet", InfraEventType::Scale),
  ("Killing", InfraEventType::Restart),
  ("Unhealthy", InfraEventType::Alert),
];

/// Warning-type reasons that escalate to critical severity.
static CRITICAL_REASONS: &[&str] = &["OOMKilling", "OOMKilled", "Failed", "BackOff", "Unhealthy"];

/// Trigger score floor; candidates below this are discarded.
const MIN_TRIGGER_SCORE: f64 = 0.2;

pub struct EventStream {
  config: EventStreamConfig,
  age_token: Regex,
}

impl EventStream {
  pub fn new(config: EventStreamConfig) -> Self {
    Self {
      config,
      // kubectl age column: "5m23s", "2h", "3d1h", "90s", ...
      age_token: Regex::new(r"^(?:(?P<d>\d+)d)?(?:(?P<h>\d+)h)?(?:(?P<m>\d+)m)?(?:(?P<s>\d+)s)?$")
        .expect("static regex"),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(EventStreamConfig::default())
  }

  /// Convert pre-structured commit and deployment records into canonical
  /// events. Failed deploys are critical; everything else is informational.
  pub fn ingest_git_events(
    &self,
    commits: &[CommitRecord],
    deploys: &[DeployRecord],
  ) -> Vec<InfraEvent> {
    let mut events = Vec::new();

    for commit in commits {
      events.push(InfraEvent {
        id: format!("git-{}", commit.id),
        event_type: InfraEventType::GitPush,
        timestamp: commit.timestamp,
        description: commit.message.clone(),
        actor: commit.author.clone().unwrap_or_else(|| "unknown".into()),
        target: commit.repository.clone().unwrap_or_default(),
        metadata: HashMap::new(),
        severity: EventSeverity::Info,
      });
    }

    for deploy in deploys {
      let severity = if deploy.status == "failed" {
        EventSeverity::Critical
      } else {
        EventSeverity::Info
      };
      let mut metadata = HashMap::new();
      metadata.insert("status".into(), serde_json::Value::String(deploy.status.clone()));
      if let Some(version) = &deploy.version {
        metadata.insert("version".into(), serde_json::Value::String(version.clone()));
      }
      events.push(InfraEvent {
        id: format!("deploy-{}", deploy.id),
        event_type: InfraEventType::Deploy,
        timestamp: deploy.timestamp,
        description: format!(
          "Deployment of {}{} ({})",
          deploy.service,
          deploy.version.as_deref().map(|v| format!(" {}", v)).unwrap_or_default(),
          deploy.status
        ),
        actor: deploy.actor.clone().unwrap_or_else(|| "ci".into()),
        target: deploy.service.clone(),
        metadata,
        severity,
      });
    }

    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    events
  }

  /// Parse cluster event output using the wall clock to resolve age columns.
  pub fn parse_kubernetes_events(&self, output: &str) -> Vec<K8sEvent> {
    self.parse_kubernetes_events_at(output, Utc::now())
  }

  /// Accepts either one-JSON-object-per-line or tabular `kubectl get events`
  /// text (with or without a header row). Unparsable rows are skipped.
  pub fn parse_kubernetes_events_at(&self, output: &str, now: DateTime<Utc>) -> Vec<K8sEvent> {
    let mut events = Vec::new();
    for (idx, line) in output.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let parsed = if line.starts_with('{') {
        self.parse_json_event(line, now)
      } else {
        self.parse_tabular_event(line, now)
      };
      match parsed {
        Some(event) => events.push(event),
        None => debug!(line = idx, "skipping unparsable kubernetes event line"),
      }
    }
    events
  }

  fn parse_json_event(&self, line: &str, now: DateTime<Utc>) -> Option<K8sEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let str_field = |keys: &[&str]| -> Option<String> {
      keys
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(String::from)
    };

    let event_type = str_field(&["type"]).unwrap_or_else(|| "Normal".into());
    let reason = str_field(&["reason"])?;
    let message = str_field(&["message"]).unwrap_or_default();

    // Object reference: either "kind/name" or a nested involvedObject.
    let (object_kind, object_name) = if let Some(involved) =
      obj.get("involvedObject").or_else(|| obj.get("involved_object")).and_then(|v| v.as_object())
    {
      (
        involved.get("kind").and_then(|v| v.as_str()).unwrap_or("Pod").to_string(),
        involved.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
      )
    } else {
      split_object_ref(&str_field(&["object"]).unwrap_or_default())
    };

    let timestamp = str_field(&["lastTimestamp", "last_timestamp", "firstTimestamp", "eventTime"])
      .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
      .map(|ts| ts.with_timezone(&Utc))
      .unwrap_or(now);

    Some(K8sEvent {
      event_type,
      reason,
      object_kind,
      object_name,
      message,
      timestamp,
    })
  }

  /// Tabular rows are located by finding the Normal/Warning token; reason,
  /// object, and message are read relative to it. The leading token, when
  /// shaped like a kubectl age, backdates the event from "now".
  fn parse_tabular_event(&self, line: &str, now: DateTime<Utc>) -> Option<K8sEvent> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let type_idx = tokens.iter().position(|t| *t == "Normal" || *t == "Warning")?;
    if tokens.len() < type_idx + 3 {
      return None;
    }

    let reason = tokens[type_idx + 1].to_string();
    let (object_kind, object_name) = split_object_ref(tokens[type_idx + 2]);
    let message = tokens[type_idx + 3..].join(" ");

    let timestamp = tokens
      .first()
      .and_then(|t| self.parse_age(t))
      .map(|age| now - age)
      .unwrap_or(now);

    Some(K8sEvent {
      event_type: tokens[type_idx].to_string(),
      reason,
      object_kind,
      object_name,
      message,
      timestamp,
    })
  }

  fn parse_age(&self, token: &str) -> Option<Duration> {
    let caps = self.age_token.captures(token)?;
    let part = |name: &str| {
      caps
        .name(name)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(0)
    };
    let total =
      Duration::days(part("d")) + Duration::hours(part("h")) + Duration::minutes(part("m")) + Duration::seconds(part("s"));
    (total > Duration::zero()).then_some(total)
  }

  /// Map intermediate Kubernetes events into canonical infrastructure events
  /// via the fixed reason and severity tables.
  pub fn convert_k8s_events(&self, events: &[K8sEvent]) -> Vec<InfraEvent> {
    events
      .iter()
      .map(|event| {
        let event_type = REASON_EVENT_TYPES
          .iter()
          .find(|(reason, _)| *reason == event.reason)
          .map(|(_, ty)| *ty)
          .unwrap_or(InfraEventType::K8sEvent);

        let severity = if event.event_type == "Warning" {
          if CRITICAL_REASONS.contains(&event.reason.as_str()) {
            EventSeverity::Critical
          } else {
            EventSeverity::Warning
          }
        } else {
          EventSeverity::Info
        };

        let target = format!("{}/{}", event.object_kind, event.object_name);
        InfraEvent {
          id: ids::stable_id(
            "evt",
            &[&event.reason, &target, &event.timestamp.to_rfc3339(), &event.message],
          ),
          event_type,
          timestamp: event.timestamp,
          description: format!("{}: {}", event.reason, event.message),
          actor: "kubernetes".into(),
          target,
          metadata: HashMap::new(),
          severity,
        }
      })
      .collect()
  }

  /// Build a bounded timeline using the wall clock for the max-age cutoff.
  pub fn build_event_timeline(
    &self,
    events: &[InfraEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> EventTimeline {
    self.build_event_timeline_at(events, start, end, Utc::now())
  }

  /// Filter to `[start, end]` AND newer than `now - max_event_age`, sorted
  /// ascending, with a deploy projection and summary counts.
  pub fn build_event_timeline_at(
    &self,
    events: &[InfraEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> EventTimeline {
    let age_cutoff = now - Duration::milliseconds(self.config.max_event_age_ms);
    let mut filtered: Vec<InfraEvent> = events
      .iter()
      .filter(|e| e.timestamp >= start && e.timestamp <= end && e.timestamp > age_cutoff)
      .cloned()
      .collect();
    filtered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let deploys: Vec<Deploy> = filtered
      .iter()
      .filter(|e| e.event_type == InfraEventType::Deploy)
      .map(to_deploy)
      .collect();

    let summary = TimelineSummary {
      total: filtered.len() as u64,
      deploys: deploys.len() as u64,
      warnings: filtered.iter().filter(|e| e.severity == EventSeverity::Warning).count() as u64,
      critical: filtered.iter().filter(|e| e.severity == EventSeverity::Critical).count() as u64,
    };

    EventTimeline {
      start,
      end,
      events: filtered,
      deploys,
      summary,
    }
  }

  /// Most recent deploy strictly before the incident, if any.
  pub fn find_preceding_deployment(
    &self,
    events: &[InfraEvent],
    incident_time: DateTime<Utc>,
  ) -> Option<Deploy> {
    events
      .iter()
      .filter(|e| e.event_type == InfraEventType::Deploy && e.timestamp < incident_time)
      .max_by_key(|e| e.timestamp)
      .map(to_deploy)
  }

  /// Events inside `[incident - window, incident + window/4]`, sorted
  /// ascending. The post-incident tolerance is deliberately a quarter of the
  /// pre-incident window.
  pub fn find_correlated_events(
    &self,
    events: &[InfraEvent],
    incident_time: DateTime<Utc>,
    window_ms: Option<i64>,
  ) -> Vec<InfraEvent> {
    let window = window_ms.unwrap_or(self.config.correlation_window_ms);
    let lower = incident_time - Duration::milliseconds(window);
    let upper = incident_time + Duration::milliseconds(window / 4);

    let mut matched: Vec<InfraEvent> = events
      .iter()
      .filter(|e| e.timestamp >= lower && e.timestamp <= upper)
      .cloned()
      .collect();
    matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    matched
  }

  /// Score events as potential incident triggers.
  ///
  /// Additive: deploy +0.4, config_change +0.3, scale +0.2,
  /// pod_crash/oom_kill +0.3, critical +0.2, warning +0.1, plus a proximity
  /// bonus up to +0.2 that decays linearly over the correlation window.
  pub fn find_potential_triggers(
    &self,
    events: &[InfraEvent],
    incident_time: DateTime<Utc>,
  ) -> Vec<TriggerCandidate> {
    let mut candidates: Vec<TriggerCandidate> = events
      .iter()
      .filter_map(|event| {
        let mut score = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        match event.event_type {
          InfraEventType::Deploy => {
            score += 0.4;
            reasons.push("deployment".into());
          }
          InfraEventType::ConfigChange => {
            score += 0.3;
            reasons.push("configuration change".into());
          }
          InfraEventType::Scale => {
            score += 0.2;
            reasons.push("scaling operation".into());
          }
          InfraEventType::PodCrash | InfraEventType::OomKill => {
            score += 0.3;
            reasons.push("pod failure".into());
          }
          _ => {}
        }

        match event.severity {
          EventSeverity::Critical => {
            score += 0.2;
            reasons.push("critical severity".into());
          }
          EventSeverity::Warning => {
            score += 0.1;
            reasons.push("warning severity".into());
          }
          EventSeverity::Info => {}
        }

        let delta_ms = (incident_time - event.timestamp).num_milliseconds().abs();
        let proximity =
          (0.2 * (1.0 - delta_ms as f64 / self.config.correlation_window_ms as f64)).max(0.0);
        if proximity > 0.0 {
          score += proximity;
          reasons.push(format!("{}s from incident", delta_ms / 1000));
        }

        if score < MIN_TRIGGER_SCORE {
          return None;
        }
        Some(TriggerCandidate {
          event: event.clone(),
          trigger_score: (score * 1000.0).round() / 1000.0,
          reasoning: reasons.join("; "),
        })
      })
      .collect();

    // Deterministic sort: score desc, then timestamp asc, then id asc.
    candidates.sort_by(|a, b| {
      b.trigger_score
        .partial_cmp(&a.trigger_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.event.timestamp.cmp(&b.event.timestamp))
        .then_with(|| a.event.id.cmp(&b.event.id))
    });
    candidates
  }
}

/// "kind/name" splits accordingly; bare names default to kind Pod.
fn split_object_ref(object: &str) -> (String, String) {
  match object.split_once('/') {
    Some((kind, name)) => (kind.to_string(), name.to_string()),
    None => ("Pod".to_string(), object.to_string()),
  }
}

fn to_deploy(event: &InfraEvent) -> Deploy {
  let meta_str = |key: &str| {
    event
      .metadata
      .get(key)
      .and_then(|v| v.as_str())
      .map(String::from)
  };
  Deploy {
    id: event.id.clone(),
    service: event.target.clone(),
    version: meta_str("version"),
    status: meta_str("status"),
    timestamp: event.timestamp,
    actor: event.actor.clone(),
  }
}
