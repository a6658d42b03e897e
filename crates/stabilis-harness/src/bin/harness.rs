//! CLI entrypoint for the stabilis scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stabilis_harness::structured_log::{LogEmitter, validate_log_file};
use stabilis_harness::trajectory_export::{self, ArtifactIndex};
use stabilis_harness::{ScenarioFile, run_scenario, run_scenario_with_artifacts};

/// Scenario tooling for the stabilis engine.
#[derive(Debug, Parser)]
#[command(name = "stabilis-harness")]
#[command(about = "Deterministic scenario runner for the stabilis engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scenario and write the trajectory, log, report and artifact index.
    Simulate {
        /// Scenario JSON path.
        #[arg(long)]
        scenario: PathBuf,
        /// Output directory for run artifacts.
        #[arg(long, default_value = "target/stabilis")]
        out_dir: PathBuf,
        /// Run identifier used in trace ids (defaults to the scenario name).
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Structured JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
    /// Run a scenario repeatedly and compare trajectory fingerprints.
    ReplayCheck {
        /// Scenario JSON path.
        #[arg(long)]
        scenario: PathBuf,
        /// Number of runs.
        #[arg(long, default_value_t = 2)]
        runs: u32,
    },
    /// Re-hash every artifact listed in an index.
    VerifyArtifacts {
        /// Artifact index JSON path.
        #[arg(long)]
        index: PathBuf,
    },
    /// Print the default scenario as JSON.
    InitScenario {
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            scenario,
            out_dir,
            run_id,
        } => {
            let file = ScenarioFile::from_path(&scenario)?;
            let run_id = run_id.unwrap_or_else(|| file.name.clone());
            std::fs::create_dir_all(&out_dir)?;

            let log_path = out_dir.join("events.jsonl");
            let trajectory_path = out_dir.join("trajectory.jsonl");
            let report_path = out_dir.join("report.json");
            let index_path = out_dir.join("artifact_index.json");
            let refs: Vec<String> = [&trajectory_path, &report_path, &index_path]
                .iter()
                .map(|p| p.display().to_string())
                .collect();

            let mut log = LogEmitter::to_file(&log_path, &run_id)?;
            let run = run_scenario_with_artifacts(&file, Some(&mut log), &refs)?;
            log.flush()?;

            trajectory_export::write_jsonl(&trajectory_path, &run.rows)?;
            std::fs::write(&report_path, serde_json::to_string_pretty(&run.report)?)?;

            let mut index = ArtifactIndex::new(run_id);
            index.fingerprint = Some(run.report.fingerprint.clone());
            index
                .add_file(&trajectory_path, "trajectory")?
                .add_file(&log_path, "log")?
                .add_file(&report_path, "report")?;
            std::fs::write(&index_path, index.to_json()?)?;

            eprintln!(
                "Scenario '{}' complete: ticks={}, final_status={}, mean_sust={:.4}, fingerprint={}",
                run.report.name,
                run.report.ticks,
                run.report.final_status.as_deref().unwrap_or("-"),
                run.report.mean_sust,
                run.report.fingerprint
            );
            eprintln!("Wrote artifacts to {}", out_dir.display());
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            eprintln!("Validated {lines} line(s), {} error(s)", errors.len());
            if !errors.is_empty() {
                return Err(format!("{} invalid log line(s) in {}", errors.len(), log.display()).into());
            }
        }
        Command::ReplayCheck { scenario, runs } => {
            if runs < 2 {
                return Err("replay-check needs at least 2 runs".into());
            }
            let file = ScenarioFile::from_path(&scenario)?;
            let reference = run_scenario(&file, None)?.report.fingerprint;
            for i in 1..runs {
                let again = run_scenario(&file, None)?.report.fingerprint;
                if again != reference {
                    return Err(format!(
                        "replay mismatch on run {}: {again} != {reference}",
                        i + 1
                    )
                    .into());
                }
            }
            eprintln!("Replay stable across {runs} runs: {reference}");
        }
        Command::VerifyArtifacts { index } => {
            let body = std::fs::read_to_string(&index)?;
            let parsed: ArtifactIndex = serde_json::from_str(&body)?;
            let bad = parsed.verify();
            for path in &bad {
                eprintln!("digest mismatch: {path}");
            }
            if !bad.is_empty() {
                return Err(format!("{} artifact(s) failed verification", bad.len()).into());
            }
            eprintln!("All {} artifact(s) verified", parsed.artifacts.len());
        }
        Command::InitScenario { output } => {
            let body = serde_json::to_string_pretty(&ScenarioFile::default())?;
            if let Some(path) = output {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, body)?;
                eprintln!("Wrote default scenario to {}", path.display());
            } else {
                println!("{body}");
            }
        }
    }

    Ok(())
}
