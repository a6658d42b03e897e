//! Structured logging contract for scenario runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use stabilis_engine::error::Degradation;
use stabilis_engine::monitor::TickRecord;
use stabilis_engine::vrps::Component;
use stabilis_engine::SystemStatus;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Outcome of a harness step (replay check, log validation, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Error,
}

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];
const OUTCOMES: [&str; 4] = ["pass", "fail", "skip", "error"];
const STATUSES: [&str; 3] = ["HEALTHY", "DEGRADED", "CRITICAL"];
const DEGRADATIONS: [Degradation; 6] = [
    Degradation::InsufficientBaseline,
    Degradation::Saturated,
    Degradation::MttaUndefined,
    Degradation::StationaryNotConverged,
    Degradation::NonFiniteInput,
    Degradation::EmptyArrivalWindow,
];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
/// Tick events additionally carry the decision fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tick counter within the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    /// Simulated time of the tick (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_time: Option<f64>,
    /// Response mode number, 1..=9.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sust: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Wall-clock duration of a harness step (milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Paths of run outputs the entry refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            session_id: None,
            tick: None,
            sim_time: None,
            mode: None,
            action: None,
            status: None,
            sust: None,
            triggering_component: None,
            valid: None,
            degradations: None,
            outcome: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Fill the decision fields from one tick record. Degraded ticks are
    /// logged at `warn`, critical ones at `error`.
    #[must_use]
    pub fn with_tick(mut self, record: &TickRecord) -> Self {
        let d = &record.decision;
        self.tick = Some(record.tick);
        self.sim_time = Some(record.timestamp);
        self.mode = Some(d.mode.number());
        self.action = Some(d.mode.action().to_string());
        self.status = Some(d.status.as_str().to_string());
        self.sust = Some(record.vector.sust);
        self.triggering_component = Some(d.triggering_component.symbol().to_string());
        self.valid = Some(d.valid);
        self.degradations = Some(d.degradations.iter().map(|g| g.as_str().to_string()).collect());
        self.level = match d.status {
            SystemStatus::Critical => LogLevel::Error,
            SystemStatus::Degraded => LogLevel::Warn,
            SystemStatus::Healthy if !d.valid => LogLevel::Debug,
            SystemStatus::Healthy => LogLevel::Info,
        };
        let s = &record.snapshot;
        self.details = Some(serde_json::json!({
            "lambda": s.arrival_rate,
            "rho": s.utilization,
            "p_wait": s.wait_probability,
            "p_block": s.blocking_probability,
            "d_loss": s.loss_fraction,
            "expected_wait": finite_or_null(s.expected_wait),
            "markov_state": record.markov.state.as_str(),
            "anomaly": record.anomaly.is_anomaly(),
            "z_score": record.anomaly.z_score(),
            "reason": d.reason(),
        }));
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn finite_or_null(x: f64) -> serde_json::Value {
    if x.is_finite() {
        serde_json::Value::from(x)
    } else {
        serde_json::Value::Null
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

enum Sink {
    File(BufWriter<File>),
    Buffer(Vec<u8>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::File(w) => w,
            Self::Buffer(b) => b,
        }
    }
}

/// Writes structured JSONL log entries with sequential trace ids
/// `<run_id>::<session>::<seq>`.
pub struct LogEmitter {
    sink: Sink,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            seq: 0,
            run_id: run_id.to_string(),
        })
    }

    /// Create an emitter that keeps lines in memory.
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    /// Buffered output; `None` for file emitters.
    #[must_use]
    pub fn buffer(&self) -> Option<&str> {
        match &self.sink {
            Sink::Buffer(b) => std::str::from_utf8(b).ok(),
            Sink::File(_) => None,
        }
    }

    fn next_trace_id(&mut self, session: Option<&str>) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.run_id, session.unwrap_or("-"), self.seq)
    }

    fn write(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(self.sink.writer(), "{line}")
    }

    /// Emit a run-level entry with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id(None);
        let entry = LogEntry::new(trace_id, level, event);
        self.write(&entry)?;
        Ok(entry)
    }

    /// Emit one `tick` event for a session.
    pub fn emit_tick(&mut self, session: &str, record: &TickRecord) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id(Some(session));
        let entry = LogEntry::new(trace_id, LogLevel::Info, "tick")
            .with_session(session)
            .with_tick(record);
        self.write(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated entry; an empty trace id is filled in.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id(entry.session_id.as_deref());
        }
        self.write(&entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.sink.writer().flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message,
        });
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            fail("<json>", format!("invalid JSON: {e}"));
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        fail("<root>", "expected JSON object".to_string());
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            fail(field, "required field missing".to_string());
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LEVELS.contains(&level)
    {
        fail("level", format!("invalid level: '{level}'"));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        fail(
            "trace_id",
            format!("trace_id should follow <run_id>::<session>::<seq> format, got: '{trace_id}'"),
        );
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !OUTCOMES.contains(&outcome)
    {
        fail("outcome", format!("invalid outcome: '{outcome}'"));
    }

    let status = obj.get("status").and_then(|v| v.as_str());
    if let Some(s) = status
        && !STATUSES.contains(&s)
    {
        fail("status", format!("invalid status: '{s}'"));
    }

    if let Some(mode) = obj.get("mode") {
        match mode.as_u64() {
            Some(m @ 1..=9) => {
                // Mode rows are fixed per status: 1-3, 4-6, 7-9.
                let expected = STATUSES[((m - 1) / 3) as usize];
                match status {
                    Some(s) if s == expected => {}
                    Some(s) => fail(
                        "mode",
                        format!("mode {m} belongs to status {expected}, got '{s}'"),
                    ),
                    None => fail("status", "tick events with a mode need a status".to_string()),
                }
            }
            _ => fail("mode", format!("mode must be an integer in 1..=9, got {mode}")),
        }
    }

    if let Some(c) = obj.get("triggering_component").and_then(|v| v.as_str())
        && !Component::ALL.iter().any(|k| k.symbol() == c)
    {
        fail("triggering_component", format!("invalid component: '{c}'"));
    }

    if let Some(sust) = obj.get("sust") {
        match sust.as_f64() {
            Some(x) if (0.0..=1.0).contains(&x) => {}
            _ => fail("sust", format!("sust must lie in [0, 1], got {sust}")),
        }
    }

    if let Some(list) = obj.get("degradations") {
        match list.as_array() {
            Some(items) => {
                for item in items {
                    let known = item
                        .as_str()
                        .is_some_and(|s| DEGRADATIONS.iter().any(|d| d.as_str() == s));
                    if !known {
                        fail("degradations", format!("unknown degradation: {item}"));
                    }
                }
                if let Some(valid) = obj.get("valid").and_then(|v| v.as_bool())
                    && valid != items.is_empty()
                {
                    fail(
                        "valid",
                        "valid must be true exactly when degradations is empty".to_string(),
                    );
                }
            }
            None => fail("degradations", "expected an array".to_string()),
        }
    }

    if let Some(refs) = obj.get("artifact_refs") {
        let ok = refs
            .as_array()
            .is_some_and(|items| items.iter().all(|r| r.as_str().is_some_and(|s| !s.is_empty())));
        if !ok {
            fail("artifact_refs", "expected an array of non-empty paths".to_string());
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<deserialization>".to_string(),
                message: format!("failed to deserialize: {e}"),
            });
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    Ok(validate_log_text(&content))
}

/// Validate JSONL text already in memory.
#[must_use]
pub fn validate_log_text(content: &str) -> (usize, Vec<LogValidationError>) {
    let mut all_errors = Vec::new();
    let mut line_count = 0;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }
    (line_count, all_errors)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RFC 3339 UTC timestamp with millisecond precision.
pub(crate) fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    // Civil date from days since 1970-01-01 (proleptic Gregorian).
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}
