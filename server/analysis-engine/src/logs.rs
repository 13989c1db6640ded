//! Log ingestion: format detection, normalization, error grouping, and
//! error-rate spike detection.
//!
//! Parsing never fails a batch: unparsable lines are skipped with a debug
//! diagnostic. Logs older than the configured max age (relative to the
//! injected "now") are dropped during parse.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::debug;

use crate::config::LogParserConfig;
use crate::ids;
use crate::types::{
  ErrorLog, ErrorSpike, LogFormat, LogGroup, LogLevel, LogParserResult, LogSummary, NormalizedLog,
};

const TS_KEYS: [&str; 4] = ["timestamp", "time", "@timestamp", "ts"];
const LEVEL_KEYS: [&str; 3] = ["level", "severity", "lvl"];
const MESSAGE_KEYS: [&str; 3] = ["message", "msg", "text"];

/// Max sample logs attached to a detected spike.
const SPIKE_SAMPLE_LIMIT: usize = 5;

pub struct LogParser {
  config: LogParserConfig,
  k8s_bracket: Regex,
  k8s_colon: Regex,
  k8s_body: Regex,
  plaintext_head: Regex,
  error_type: Regex,
}

impl LogParser {
  pub fn new(config: LogParserConfig) -> Self {
    Self {
      config,
      // [pod-name] 2024-01-15T10:00:00Z LEVEL message
      k8s_bracket: Regex::new(r"^\[(?P<pod>[^\]\s]+)\]\s+(?P<rest>.+)$").expect("static regex"),
      // pod-name: 2024-01-15T10:00:00Z LEVEL message
      k8s_colon: Regex::new(r"^(?P<pod>[A-Za-z][\w.-]*):\s+(?P<rest>.+)$").expect("static regex"),
      k8s_body: Regex::new(r"^(?P<ts>\S+)\s+(?P<level>[A-Za-z]+)\s+(?P<msg>.*)$")
        .expect("static regex"),
      plaintext_head: Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(?P<rest>.*)$",
      )
      .expect("static regex"),
      error_type: Regex::new(r"^(?P<ty>[A-Za-z_][A-Za-z0-9_]*):").expect("static regex"),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(LogParserConfig::default())
  }

  /// Detect the format of a raw log sample. Empty input reads as plaintext.
  pub fn detect_format(&self, sample: &str) -> LogFormat {
    let first = match sample.lines().find(|l| !l.trim().is_empty()) {
      Some(l) => l.trim(),
      None => return LogFormat::Plaintext,
    };

    if first.starts_with('{') {
      if let Ok(serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(first) {
        return LogFormat::Json;
      }
    }

    if self.k8s_bracket.is_match(first) || self.k8s_colon.is_match(first) {
      return LogFormat::Kubernetes;
    }

    LogFormat::Plaintext
  }

  /// Parse raw log text into normalized records using the wall clock as "now".
  pub fn parse(&self, raw: &str, format: LogFormat, source: &str) -> Vec<NormalizedLog> {
    self.parse_at(raw, format, source, Utc::now())
  }

  /// Parse raw log text into normalized records.
  ///
  /// Unparsable lines are skipped; logs older than `max_log_age_ms` relative
  /// to `now` are dropped.
  pub fn parse_at(
    &self,
    raw: &str,
    format: LogFormat,
    source: &str,
    now: DateTime<Utc>,
  ) -> Vec<NormalizedLog> {
    let mut logs = match format {
      LogFormat::Json => self.parse_json(raw, source, now),
      LogFormat::Kubernetes => self.parse_kubernetes(raw, source),
      LogFormat::Plaintext => self.parse_plaintext(raw, source),
    };

    let cutoff = now - Duration::milliseconds(self.config.max_log_age_ms);
    logs.retain(|log| log.timestamp >= cutoff);
    logs
  }

  fn parse_json(&self, raw: &str, source: &str, now: DateTime<Utc>) -> Vec<NormalizedLog> {
    let mut logs = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let obj = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
          debug!(line = idx, "skipping non-JSON log line");
          continue;
        }
      };

      let timestamp = TS_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(timestamp_from_value))
        .unwrap_or(now);
      let level = LEVEL_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(LogLevel::from_str_loose)
        .unwrap_or(LogLevel::Info);
      let message = MESSAGE_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();

      let get_str = |key: &str| obj.get(key).and_then(|v| v.as_str()).map(String::from);

      let consumed: Vec<&str> = TS_KEYS
        .iter()
        .chain(LEVEL_KEYS.iter())
        .chain(MESSAGE_KEYS.iter())
        .copied()
        .chain(["trace_id", "span_id", "pod", "pod_name", "container", "container_name"])
        .collect();
      let metadata: HashMap<String, serde_json::Value> = obj
        .iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

      let error_type = if level.is_error() {
        self.extract_error_type(&message)
      } else {
        None
      };

      logs.push(NormalizedLog {
        id: ids::stable_id("log", &[source, &idx.to_string(), line]),
        timestamp,
        level,
        source: source.to_string(),
        message,
        metadata,
        raw: line.to_string(),
        error_type,
        stack_trace: get_str("stack_trace").or_else(|| get_str("stacktrace")),
        trace_id: get_str("trace_id"),
        span_id: get_str("span_id"),
        pod_name: get_str("pod_name").or_else(|| get_str("pod")),
        container_name: get_str("container_name").or_else(|| get_str("container")),
      });
    }
    logs
  }

  fn parse_kubernetes(&self, raw: &str, source: &str) -> Vec<NormalizedLog> {
    let mut logs = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
      if line.trim().is_empty() {
        continue;
      }

      let (pod, rest) = match self
        .k8s_bracket
        .captures(line)
        .or_else(|| self.k8s_colon.captures(line))
      {
        Some(caps) => (caps["pod"].to_string(), caps["rest"].to_string()),
        None => {
          debug!(line = idx, "skipping unrecognized kubernetes log line");
          continue;
        }
      };

      let caps = match self.k8s_body.captures(&rest) {
        Some(c) => c,
        None => {
          debug!(line = idx, "skipping kubernetes log line without timestamp/level");
          continue;
        }
      };
      let timestamp = match parse_iso_timestamp(&caps["ts"]) {
        Some(ts) => ts,
        None => {
          debug!(line = idx, "skipping kubernetes log line with bad timestamp");
          continue;
        }
      };
      let level = LogLevel::from_str_loose(&caps["level"]);
      let message = caps["msg"].to_string();

      let error_type = if level.is_error() {
        self.extract_error_type(&message)
      } else {
        None
      };

      logs.push(NormalizedLog {
        id: ids::stable_id("log", &[source, &idx.to_string(), line]),
        timestamp,
        level,
        source: source.to_string(),
        message,
        metadata: HashMap::new(),
        raw: line.to_string(),
        error_type,
        stack_trace: None,
        trace_id: None,
        span_id: None,
        pod_name: Some(pod),
        container_name: None,
      });
    }
    logs
  }

  fn parse_plaintext(&self, raw: &str, source: &str) -> Vec<NormalizedLog> {
    let mut logs: Vec<NormalizedLog> = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
      if line.trim().is_empty() {
        continue;
      }

      // Indented continuation lines directly after an error fold into its stack trace.
      if line.starts_with(' ') || line.starts_with('\t') {
        if let Some(prev) = logs.last_mut() {
          if prev.level.is_error() {
            let trace = prev.stack_trace.get_or_insert_with(String::new);
            if !trace.is_empty() {
              trace.push('\n');
            }
            trace.push_str(line.trim_end());
            continue;
          }
        }
        debug!(line = idx, "skipping indented line with no preceding error");
        continue;
      }

      let caps = match self.plaintext_head.captures(line) {
        Some(c) => c,
        None => {
          debug!(line = idx, "skipping plaintext line without leading timestamp");
          continue;
        }
      };
      let timestamp = match parse_iso_timestamp(&caps["ts"]) {
        Some(ts) => ts,
        None => {
          debug!(line = idx, "skipping plaintext line with bad timestamp");
          continue;
        }
      };

      let rest = caps["rest"].to_string();
      let level = infer_level(&rest);

      // Strip a leading level keyword so the message reads clean.
      let message = match rest.split_once(char::is_whitespace) {
        Some((first, tail)) if is_level_token(first) => tail.trim_start().to_string(),
        _ => rest.clone(),
      };

      let error_type = if level.is_error() {
        self.extract_error_type(&message)
      } else {
        None
      };

      logs.push(NormalizedLog {
        id: ids::stable_id("log", &[source, &idx.to_string(), line]),
        timestamp,
        level,
        source: source.to_string(),
        message,
        metadata: HashMap::new(),
        raw: line.to_string(),
        error_type,
        stack_trace: None,
        trace_id: None,
        span_id: None,
        pod_name: None,
        container_name: None,
      });
    }
    logs
  }

  fn extract_error_type(&self, message: &str) -> Option<String> {
    self
      .error_type
      .captures(message)
      .map(|caps| caps["ty"].to_string())
  }

  /// Group error/fatal logs by error type, tracking spread and affected pods.
  pub fn extract_errors(&self, logs: &[NormalizedLog]) -> Vec<ErrorLog> {
    let mut groups: HashMap<String, ErrorLog> = HashMap::new();
    for log in logs.iter().filter(|l| l.level.is_error()) {
      let key = log.error_type.clone().unwrap_or_else(|| "Unknown".into());
      let entry = groups.entry(key.clone()).or_insert_with(|| ErrorLog {
        error_type: key,
        occurrences: 0,
        first_seen: log.timestamp,
        last_seen: log.timestamp,
        affected_pods: Vec::new(),
        sample_message: log.message.clone(),
      });
      entry.occurrences += 1;
      entry.first_seen = entry.first_seen.min(log.timestamp);
      entry.last_seen = entry.last_seen.max(log.timestamp);
      if let Some(pod) = &log.pod_name {
        if !entry.affected_pods.contains(pod) {
          entry.affected_pods.push(pod.clone());
        }
      }
    }

    let mut errors: Vec<ErrorLog> = groups.into_values().collect();
    // Most frequent first; error type breaks ties for determinism.
    errors.sort_by(|a, b| {
      b.occurrences
        .cmp(&a.occurrences)
        .then_with(|| a.error_type.cmp(&b.error_type))
    });
    errors
  }

  /// Partition chronologically sorted logs into consecutive fixed windows.
  ///
  /// A new group starts whenever a log's gap from the current group's start
  /// exceeds `window_ms`.
  pub fn group_by_time_window(&self, logs: &[NormalizedLog], window_ms: i64) -> Vec<LogGroup> {
    let mut sorted: Vec<NormalizedLog> = logs.to_vec();
    sorted.sort_by_key(|l| l.timestamp);

    let mut groups: Vec<LogGroup> = Vec::new();
    let mut current: Vec<NormalizedLog> = Vec::new();
    let mut group_start: Option<DateTime<Utc>> = None;

    for log in sorted {
      let start = *group_start.get_or_insert(log.timestamp);
      if (log.timestamp - start).num_milliseconds() > window_ms {
        groups.push(make_group(current, start, window_ms));
        current = Vec::new();
        group_start = Some(log.timestamp);
      }
      current.push(log);
    }
    if let Some(start) = group_start {
      if !current.is_empty() {
        groups.push(make_group(current, start, window_ms));
      }
    }
    groups
  }

  /// Flag windows whose error rate exceeds the rolling baseline by the given
  /// multiplier. The baseline for window k is the mean error rate of all
  /// preceding windows; errors appearing over a zero baseline also flag.
  pub fn detect_error_spikes(
    &self,
    logs: &[NormalizedLog],
    threshold_multiplier: f64,
  ) -> Vec<ErrorSpike> {
    let groups = self.group_by_time_window(logs, self.config.spike_window_ms);
    if groups.len() < 2 {
      return Vec::new();
    }

    let rates: Vec<f64> = groups
      .iter()
      .map(|g| g.error_count as f64 / g.logs.len() as f64)
      .collect();

    let mut spikes = Vec::new();
    for k in 1..groups.len() {
      let baseline = rates[..k].iter().sum::<f64>() / k as f64;
      let rate = rates[k];
      let spiking = if baseline > 0.0 {
        rate >= baseline * threshold_multiplier
      } else {
        rate > 0.0
      };
      if !spiking {
        continue;
      }

      let group = &groups[k];
      let mut types: Vec<String> = group
        .logs
        .iter()
        .filter(|l| l.level.is_error())
        .filter_map(|l| l.error_type.clone())
        .collect();
      types.sort();
      types.dedup();

      let sample_logs: Vec<NormalizedLog> = group
        .logs
        .iter()
        .filter(|l| l.level.is_error())
        .take(SPIKE_SAMPLE_LIMIT)
        .cloned()
        .collect();

      spikes.push(ErrorSpike {
        window_start: group.window_start,
        window_end: group.window_end,
        error_rate: rate,
        baseline_rate: baseline,
        multiplier: if baseline > 0.0 {
          rate / baseline
        } else {
          group.error_count as f64
        },
        types,
        sample_logs,
      });
    }
    spikes
  }

  /// Case-insensitive regex match against messages; falls back to substring
  /// match when the pattern is not a valid regex.
  pub fn find_matching(&self, logs: &[NormalizedLog], pattern: &str) -> Vec<NormalizedLog> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
      Ok(re) => logs.iter().filter(|l| re.is_match(&l.message)).cloned().collect(),
      Err(_) => {
        let needle = pattern.to_lowercase();
        logs
          .iter()
          .filter(|l| l.message.to_lowercase().contains(&needle))
          .cloned()
          .collect()
      }
    }
  }

  /// End-to-end convenience: detect format, parse, extract errors, summarize.
  pub fn analyze(&self, raw: &str, source: &str) -> LogParserResult {
    self.analyze_at(raw, source, Utc::now())
  }

  pub fn analyze_at(&self, raw: &str, source: &str, now: DateTime<Utc>) -> LogParserResult {
    let format = self.detect_format(raw);
    let logs = self.parse_at(raw, format, source, now);
    let errors = self.extract_errors(&logs);

    let error_count = logs.iter().filter(|l| l.level.is_error()).count() as u64;
    let warn_count = logs.iter().filter(|l| l.level == LogLevel::Warn).count() as u64;
    let dominant_level = logs.iter().map(|l| l.level).max_by_key(|l| l.rank());

    LogParserResult {
      summary: LogSummary {
        total: logs.len() as u64,
        error_count,
        warn_count,
        dominant_level,
        format,
      },
      logs,
      errors,
    }
  }
}

fn make_group(logs: Vec<NormalizedLog>, start: DateTime<Utc>, window_ms: i64) -> LogGroup {
  let error_count = logs.iter().filter(|l| l.level.is_error()).count() as u64;
  let warn_count = logs.iter().filter(|l| l.level == LogLevel::Warn).count() as u64;
  LogGroup {
    window_start: start,
    window_end: start + Duration::milliseconds(window_ms),
    logs,
    error_count,
    warn_count,
  }
}

fn is_level_token(token: &str) -> bool {
  matches!(
    token.to_ascii_uppercase().trim_matches(|c: char| !c.is_ascii_alphabetic()),
    "FATAL" | "CRITICAL" | "CRIT" | "ERROR" | "ERR" | "WARN" | "WARNING" | "INFO" | "DEBUG" | "TRACE"
  )
}

/// Infer a level from level-keyword tokens anywhere in the line, most severe wins.
fn infer_level(text: &str) -> LogLevel {
  let upper = text.to_ascii_uppercase();
  let has = |kw: &str| {
    upper
      .split(|c: char| !c.is_ascii_alphabetic())
      .any(|tok| tok == kw)
  };
  if has("FATAL") || has("CRITICAL") || has("CRIT") {
    LogLevel::Fatal
  } else if has("ERROR") || has("ERR") {
    LogLevel::Error
  } else if has("WARN") || has("WARNING") {
    LogLevel::Warn
  } else if has("DEBUG") || has("TRACE") {
    LogLevel::Debug
  } else {
    LogLevel::Info
  }
}

/// Parse an ISO-8601-ish timestamp, tolerating a missing zone or a space separator.
fn parse_iso_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
    return Some(ts.with_timezone(&Utc));
  }
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(naive.and_utc());
    }
  }
  None
}

/// Read a timestamp from a JSON value: ISO string, unix seconds, or unix
/// millis (disambiguated by magnitude).
fn timestamp_from_value(v: &serde_json::Value) -> Option<DateTime<Utc>> {
  match v {
    serde_json::Value::String(s) => parse_iso_timestamp(s),
    serde_json::Value::Number(n) => {
      let f = n.as_f64()?;
      if f >= 1e12 {
        Utc.timestamp_millis_opt(f as i64).single()
      } else {
        Utc.timestamp_millis_opt((f * 1000.0) as i64).single()
      }
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
  }

  #[test]
  fn detect_format_empty_is_plaintext() {
    let parser = LogParser::with_defaults();
    assert_eq!(parser.detect_format(""), LogFormat::Plaintext);
  }

  #[test]
  fn detect_format_json_lines() {
    let parser = LogParser::with_defaults();
    let sample = r#"{"timestamp":"2024-01-15T11:50:00Z","level":"info","message":"ok"}"#;
    assert_eq!(parser.detect_format(sample), LogFormat::Json);
  }

  #[test]
  fn detect_format_bracketed_pod_is_kubernetes() {
    let parser = LogParser::with_defaults();
    let sample = "[api-7d9f8] 2024-01-15T11:50:00Z ERROR connection refused";
    assert_eq!(parser.detect_format(sample), LogFormat::Kubernetes);
  }

  #[test]
  fn detect_format_plain_line_is_plaintext() {
    let parser = LogParser::with_defaults();
    let sample = "2024-01-15T11:50:00Z INFO started listener";
    assert_eq!(parser.detect_format(sample), LogFormat::Plaintext);
  }

  #[test]
  fn json_levels_map_to_canonical_set() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      r#"{"timestamp":"2024-01-15T11:50:00Z","level":"FATAL","message":"a"}"#, "\n",
      r#"{"timestamp":"2024-01-15T11:50:01Z","severity":"Error","msg":"b"}"#, "\n",
      r#"{"timestamp":"2024-01-15T11:50:02Z","lvl":"warning","text":"c"}"#, "\n",
      r#"{"timestamp":"2024-01-15T11:50:03Z","level":"dbg","message":"d"}"#, "\n",
      r#"{"timestamp":"2024-01-15T11:50:04Z","level":"whatever","message":"e"}"#, "\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Json, "api", fixed_now());
    assert_eq!(logs.len(), 5);
    assert_eq!(logs[0].level, LogLevel::Fatal);
    assert_eq!(logs[1].level, LogLevel::Error);
    assert_eq!(logs[2].level, LogLevel::Warn);
    assert_eq!(logs[3].level, LogLevel::Debug);
    // Unrecognized defaults to info.
    assert_eq!(logs[4].level, LogLevel::Info);
  }

  #[test]
  fn json_unix_timestamps_disambiguated_by_magnitude() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      r#"{"ts":1705318200,"level":"info","message":"seconds"}"#, "\n",
      r#"{"ts":1705318200000,"level":"info","message":"millis"}"#, "\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Json, "api", fixed_now());
    assert_eq!(logs.len(), 2);
    // 1705318200 == 2024-01-15T11:30:00Z either way.
    assert_eq!(logs[0].timestamp, logs[1].timestamp);
    assert_eq!(logs[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 11, 30, 0).unwrap());
  }

  #[test]
  fn json_trace_and_span_ids_populated() {
    let parser = LogParser::with_defaults();
    let raw = r#"{"timestamp":"2024-01-15T11:50:00Z","level":"error","message":"boom","trace_id":"t1","span_id":"s1"}"#;
    let logs = parser.parse_at(raw, LogFormat::Json, "api", fixed_now());
    assert_eq!(logs[0].trace_id.as_deref(), Some("t1"));
    assert_eq!(logs[0].span_id.as_deref(), Some("s1"));
  }

  #[test]
  fn old_logs_dropped_by_max_age() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      r#"{"timestamp":"2024-01-15T10:00:00Z","level":"info","message":"too old"}"#, "\n",
      r#"{"timestamp":"2024-01-15T11:30:00Z","level":"info","message":"recent"}"#, "\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Json, "api", fixed_now());
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "recent");
  }

  #[test]
  fn kubernetes_lines_capture_pod_name() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "[payments-6b9c] 2024-01-15T11:50:00Z ERROR DbError: connection refused\n",
      "worker-1: 2024-01-15T11:51:00Z INFO job done\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Kubernetes, "cluster", fixed_now());
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].pod_name.as_deref(), Some("payments-6b9c"));
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].error_type.as_deref(), Some("DbError"));
    assert_eq!(logs[1].pod_name.as_deref(), Some("worker-1"));
  }

  #[test]
  fn plaintext_stack_trace_folding_and_error_type() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "2024-01-15T11:50:00Z ERROR NullPointerException: oh no\n",
      "    at com.example.Handler.handle(Handler.java:42)\n",
      "    at com.example.Main.main(Main.java:10)\n",
      "2024-01-15T11:51:00Z INFO recovered\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Plaintext, "app", fixed_now());
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].error_type.as_deref(), Some("NullPointerException"));
    let trace = logs[0].stack_trace.as_deref().unwrap();
    assert!(trace.contains("Handler.java:42"));
    assert!(trace.contains("Main.java:10"));
    assert!(logs[1].stack_trace.is_none());
  }

  #[test]
  fn plaintext_level_inferred_from_tokens() {
    let parser = LogParser::with_defaults();
    let raw = "2024-01-15T11:50:00Z something FATAL happened\n";
    let logs = parser.parse_at(raw, LogFormat::Plaintext, "app", fixed_now());
    assert_eq!(logs[0].level, LogLevel::Fatal);
  }

  #[test]
  fn extract_errors_groups_by_type() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "[pod-a] 2024-01-15T11:50:00Z ERROR DbError: refused\n",
      "[pod-b] 2024-01-15T11:52:00Z ERROR DbError: refused\n",
      "[pod-a] 2024-01-15T11:53:00Z FATAL OomError: out of memory\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Kubernetes, "cluster", fixed_now());
    let errors = parser.extract_errors(&logs);
    assert_eq!(errors.len(), 2);
    let db = errors.iter().find(|e| e.error_type == "DbError").unwrap();
    assert_eq!(db.occurrences, 2);
    assert_eq!(db.affected_pods, vec!["pod-a".to_string(), "pod-b".to_string()]);
    assert!(db.first_seen < db.last_seen);
  }

  #[test]
  fn group_by_time_window_splits_on_gap_from_group_start() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "2024-01-15T11:50:00Z INFO a\n",
      "2024-01-15T11:50:30Z INFO b\n",
      "2024-01-15T11:52:00Z INFO c\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Plaintext, "app", fixed_now());
    let groups = parser.group_by_time_window(&logs, 60_000);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].logs.len(), 2);
    assert_eq!(groups[1].logs.len(), 1);
  }

  #[test]
  fn error_spike_flagged_with_types() {
    let parser = LogParser::with_defaults();
    // Two quiet windows (1 error in 10 logs each), then a window at 80% errors.
    // Windows are 4 minutes apart so the 60s grouping never merges them.
    let mut raw = String::new();
    for m in [40, 44] {
      for i in 0..9 {
        raw.push_str(&format!("2024-01-15T11:{}:{:02}Z INFO ok\n", m, i));
      }
      raw.push_str(&format!("2024-01-15T11:{}:09Z ERROR DbError: refused\n", m));
    }
    for i in 0..8 {
      raw.push_str(&format!("2024-01-15T11:48:{:02}Z ERROR DbError: refused\n", i));
    }
    raw.push_str("2024-01-15T11:48:08Z INFO ok\n");
    raw.push_str("2024-01-15T11:48:09Z INFO ok\n");

    let logs = parser.parse_at(&raw, LogFormat::Plaintext, "app", fixed_now());
    let spikes = parser.detect_error_spikes(&logs, 3.0);
    assert_eq!(spikes.len(), 1);
    let spike = &spikes[0];
    assert!(spike.error_rate >= spike.baseline_rate * 3.0);
    assert!(spike.types.contains(&"DbError".to_string()));
    assert!(spike.sample_logs.len() <= 5 && !spike.sample_logs.is_empty());
  }

  #[test]
  fn find_matching_substring_and_regex() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "2024-01-15T11:50:00Z ERROR Connection Refused by db-1\n",
      "2024-01-15T11:51:00Z INFO all good\n",
    );
    let logs = parser.parse_at(raw, LogFormat::Plaintext, "app", fixed_now());
    assert_eq!(parser.find_matching(&logs, "connection refused").len(), 1);
    assert_eq!(parser.find_matching(&logs, r"refused by db-\d").len(), 1);
    // Invalid regex falls back to substring.
    assert_eq!(parser.find_matching(&logs, "all good (").len(), 0);
    assert_eq!(parser.find_matching(&logs, "ALL GOOD").len(), 1);
  }

  #[test]
  fn analyze_dominant_level_is_most_severe_present() {
    let parser = LogParser::with_defaults();
    let raw = concat!(
      "2024-01-15T11:50:00Z INFO a\n",
      "2024-01-15T11:50:01Z WARN b\n",
      "2024-01-15T11:50:02Z ERROR DbError: c\n",
    );
    let result = parser.analyze_at(raw, "app", fixed_now());
    assert_eq!(result.summary.dominant_level, Some(LogLevel::Error));
    assert_eq!(result.summary.error_count, 1);
    assert_eq!(result.summary.warn_count, 1);
    assert_eq!(result.summary.format, LogFormat::Plaintext);
    assert_eq!(result.errors.len(), 1);
  }

  #[test]
  fn analyze_empty_input_is_empty_result() {
    let parser = LogParser::with_defaults();
    let result = parser.analyze_at("", "app", fixed_now());
    assert!(result.logs.is_empty());
    assert!(result.errors.is_empty());
    assert_eq!(result.summary.dominant_level, None);
  }
}
