//! Integration tests: scenario runs and their artifacts.
//!
//! Validates:
//! 1. A logged run produces a log that passes schema validation.
//! 2. Exported trajectory rows read back identical to the in-memory rows.
//! 3. The artifact index detects tampering.
//! 4. The CLI replay check and log validation succeed on a sample scenario.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use stabilis_harness::scenario::{AnomalySpec, TrafficSpec};
use stabilis_harness::structured_log::{LogEmitter, validate_log_file, validate_log_text};
use stabilis_harness::trajectory_export::{self, ArtifactIndex};
use stabilis_harness::{ScenarioFile, run_scenario, run_scenario_with_artifacts};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn burst_scenario() -> ScenarioFile {
    ScenarioFile {
        name: "burst".to_string(),
        end: 300.0,
        traffic: TrafficSpec {
            anomaly: Some(AnomalySpec {
                distribution: "pareto".to_string(),
                start_time: 150.0,
                duration: 60.0,
                total_volume: 20_000.0,
                ..AnomalySpec::default()
            }),
            ..TrafficSpec::default()
        },
        ..ScenarioFile::default()
    }
}

#[test]
fn logged_run_passes_schema_validation() {
    let mut log = LogEmitter::to_buffer("it-run");
    let run = run_scenario(&burst_scenario(), Some(&mut log)).expect("scenario runs");
    let text = log.buffer().expect("buffer sink");
    let (lines, errors) = validate_log_text(text);
    assert!(errors.is_empty(), "schema errors: {errors:?}");
    // scenario_start + one line per tick + scenario_end
    assert_eq!(lines, run.report.ticks + 2);
    assert!(text.lines().all(|l| l.contains("\"trace_id\":\"it-run::burst::")));
}

#[test]
fn file_log_and_trajectory_round_trip() {
    let dir = unique_tmp_dir("stabilis-export");
    let log_path = dir.join("events.jsonl");
    let mut log = LogEmitter::to_file(&log_path, "it-file").expect("open log");
    let run = run_scenario(&burst_scenario(), Some(&mut log)).expect("scenario runs");
    log.flush().expect("flush");

    let (lines, errors) = validate_log_file(&log_path).expect("read log");
    assert!(errors.is_empty(), "schema errors: {errors:?}");
    assert_eq!(lines, run.report.ticks + 2);

    let trajectory_path = dir.join("trajectory.jsonl");
    trajectory_export::write_jsonl(&trajectory_path, &run.rows).expect("write rows");
    let back = trajectory_export::read_jsonl(&trajectory_path).expect("read rows");
    assert_eq!(back.len(), run.rows.len());
    let close = |a: f64, b: f64| a == b || (a - b).abs() <= 1e-12 * a.abs().max(b.abs());
    for ((row, orig), record) in back.iter().zip(&run.rows).zip(&run.records) {
        assert_eq!(row.tick, record.tick);
        assert_eq!(row.mode, orig.mode);
        assert_eq!(row.status, orig.status);
        assert_eq!(row.degradations, orig.degradations);
        assert!(close(row.sust, orig.sust), "tick {}: {} vs {}", row.tick, row.sust, orig.sust);
        assert!(close(row.expected_wait_or_inf(), record.snapshot.expected_wait));
    }
}

#[test]
fn burst_lowers_anomaly_component() {
    let run = run_scenario(&burst_scenario(), None).expect("scenario runs");
    assert!(run.report.anomalous_ticks > 0, "report: {:?}", run.report);
    let during = run
        .rows
        .iter()
        .filter(|r| (160.0..=190.0).contains(&r.timestamp))
        .collect::<Vec<_>>();
    assert!(!during.is_empty());
    assert!(during.iter().all(|r| r.anomaly < 1.0));
    let quiet = run.rows.iter().find(|r| r.timestamp == 100.0).expect("tick at 100");
    assert_eq!(quiet.anomaly, 1.0);
}

#[test]
fn scenario_end_lists_artifacts() {
    let refs = vec!["out/trajectory.jsonl".to_string(), "out/report.json".to_string()];
    let mut log = LogEmitter::to_buffer("it-refs");
    run_scenario_with_artifacts(&burst_scenario(), Some(&mut log), &refs).expect("scenario runs");
    let text = log.buffer().expect("buffer sink");
    let (_, errors) = validate_log_text(text);
    assert!(errors.is_empty(), "schema errors: {errors:?}");

    let entries: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    let end = entries.last().expect("scenario_end");
    assert_eq!(end["event"], "scenario_end");
    assert_eq!(end["artifact_refs"], serde_json::json!(refs));
    assert!(
        entries[..entries.len() - 1]
            .iter()
            .all(|e| e.get("artifact_refs").is_none())
    );

    let mut plain = LogEmitter::to_buffer("it-norefs");
    run_scenario(&burst_scenario(), Some(&mut plain)).expect("scenario runs");
    let last = plain.buffer().expect("buffer sink").lines().last().expect("line");
    assert!(!last.contains("artifact_refs"));
}

#[test]
fn artifact_index_detects_tampering() {
    let dir = unique_tmp_dir("stabilis-index");
    let run = run_scenario(&burst_scenario(), None).expect("scenario runs");
    let trajectory_path = dir.join("trajectory.jsonl");
    trajectory_export::write_jsonl(&trajectory_path, &run.rows).expect("write rows");

    let mut index = ArtifactIndex::new("it-index");
    index.fingerprint = Some(run.report.fingerprint.clone());
    index.add_file(&trajectory_path, "trajectory").expect("hash file");
    assert!(index.verify().is_empty());

    std::fs::write(&trajectory_path, "tampered\n").expect("overwrite");
    assert_eq!(index.verify(), vec![trajectory_path.display().to_string()]);
}

#[test]
fn cli_simulate_then_validate_and_replay() {
    let dir = unique_tmp_dir("stabilis-cli");
    let scenario_path = dir.join("scenario.json");
    std::fs::write(
        &scenario_path,
        serde_json::to_string_pretty(&burst_scenario()).expect("serialize scenario"),
    )
    .expect("write scenario");
    let out_dir = dir.join("out");
    let bin = env!("CARGO_BIN_EXE_harness");

    let status = Command::new(bin)
        .arg("simulate")
        .arg("--scenario")
        .arg(&scenario_path)
        .arg("--out-dir")
        .arg(&out_dir)
        .status()
        .expect("run simulate");
    assert!(status.success());
    for name in ["events.jsonl", "trajectory.jsonl", "report.json", "artifact_index.json"] {
        assert!(out_dir.join(name).exists(), "missing {name}");
    }
    let events = std::fs::read_to_string(out_dir.join("events.jsonl")).expect("read log");
    let end: serde_json::Value =
        serde_json::from_str(events.lines().last().expect("scenario_end")).expect("json line");
    let refs = end["artifact_refs"].as_array().expect("artifact refs");
    assert_eq!(refs.len(), 3);
    for r in refs {
        let path = PathBuf::from(r.as_str().expect("path string"));
        assert!(path.exists(), "dangling ref {}", path.display());
    }

    let status = Command::new(bin)
        .arg("validate-log")
        .arg("--log")
        .arg(out_dir.join("events.jsonl"))
        .status()
        .expect("run validate-log");
    assert!(status.success());

    let status = Command::new(bin)
        .arg("verify-artifacts")
        .arg("--index")
        .arg(out_dir.join("artifact_index.json"))
        .status()
        .expect("run verify-artifacts");
    assert!(status.success());

    let status = Command::new(bin)
        .arg("replay-check")
        .arg("--scenario")
        .arg(&scenario_path)
        .status()
        .expect("run replay-check");
    assert!(status.success());
}

#[test]
fn cli_rejects_broken_log() {
    let dir = unique_tmp_dir("stabilis-badlog");
    let log_path = dir.join("bad.jsonl");
    std::fs::write(&log_path, "{\"timestamp\":\"x\",\"level\":\"loud\"}\n").expect("write log");
    let status = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("validate-log")
        .arg("--log")
        .arg(&log_path)
        .status()
        .expect("run validate-log");
    assert!(!status.success());
}
