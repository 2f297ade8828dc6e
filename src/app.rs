use anyhow::{bail, ensure, Context, Result};
use bart_core::{SessionRecord, SessionStatus};
use bart_experiment::sim::{LogTriggers, SimulatedParticipant};
use bart_experiment::{Protocol, SessionEngine, TaskSettings};
use bart_timing::{HighPrecisionTimer, ManualTimer, Timer};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "bart", version)]
#[command(about = "Balloon Analogue Risk Task session runner with a simulated participant")]
pub struct Args {
    /// Task settings (JSON). Built-in defaults when omitted.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the session seed from the settings
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seed of the simulated participant
    #[arg(long, default_value_t = 1)]
    pub participant_seed: u64,

    /// Probability that the simulated participant lets a balloon window lapse
    #[arg(long, default_value_t = 0.05)]
    pub miss_rate: f64,

    /// Where the session record is written
    #[arg(long, default_value = "bart_results.json")]
    pub output: PathBuf,

    /// Run on the wall clock instead of the virtual one
    #[arg(long)]
    pub realtime: bool,
}

pub struct App {
    args: Args,
    protocol: Protocol,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&args.miss_rate),
            "miss rate must lie within 0..=1, got {}",
            args.miss_rate
        );
        let mut settings = match &args.settings {
            Some(path) => TaskSettings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => TaskSettings::default(),
        };
        if let Some(seed) = args.seed {
            settings.seed = seed;
        }
        let protocol = settings
            .into_protocol()
            .context("settings do not describe a runnable task")?;
        Ok(Self { args, protocol })
    }

    pub fn run(self) -> Result<()> {
        info!("=== BART SESSION ===");
        info!("Platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);

        let record = if self.args.realtime {
            self.run_with(HighPrecisionTimer::new())
        } else {
            self.run_with(ManualTimer::new())
        };

        analyze_results(&record);
        write_results(&self.args.output, &record)?;

        if let SessionStatus::DeviceFailure { message } = &record.status {
            bail!("session stopped by device failure: {message}");
        }
        Ok(())
    }

    fn run_with<T: Timer>(&self, timer: T) -> SessionRecord {
        let participant = SimulatedParticipant::new(
            timer,
            self.protocol.settings().keys.clone(),
            self.args.participant_seed,
        )
        .with_miss_rate(self.args.miss_rate);
        SessionEngine::new(participant, LogTriggers).run(&self.protocol)
    }
}

/// Logs outcome counts and decision reaction times.
fn analyze_results(record: &SessionRecord) {
    let summary = record.summary();
    if summary.trials == 0 {
        warn!("no trials completed");
        return;
    }

    info!("Session {:?}", record.status);
    info!(
        "Trials: {}, cashed out {}, popped {}, timed out {}",
        summary.trials, summary.cashed_out, summary.popped, summary.timed_out
    );
    match summary.adjusted_mean_pumps {
        Some(mean) => info!("Adjusted mean pumps: {mean:.2}"),
        None => info!("Adjusted mean pumps: n/a"),
    }
    info!("Total score: {}", summary.total_score);

    let times: Vec<f64> = record
        .trials()
        .filter_map(|t| t.decision_rt_ns())
        .map(|ns| ns as f64 / 1_000_000.0)
        .collect();
    if times.is_empty() {
        return;
    }
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    info!("Decision RT: mean {mean:.3} ms, min {min:.3} ms, max {max:.3} ms");
}

fn write_results(path: &Path, record: &SessionRecord) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), record)
        .with_context(|| format!("cannot write {}", path.display()))?;
    info!("Results saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path) -> Args {
        Args {
            settings: None,
            seed: Some(17),
            participant_seed: 3,
            miss_rate: 0.0,
            output: dir.join("out.json"),
            realtime: false,
        }
    }

    #[test]
    fn writes_a_completed_session() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        let output = args.output.clone();
        App::new(args).unwrap().run().unwrap();

        let json = std::fs::read_to_string(output).unwrap();
        let record: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.seed, 17);
        assert_eq!(record.blocks.len(), 3);
        assert_eq!(record.trials().count(), 90);
    }

    #[test]
    fn settings_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "conditions": ["purple"] }"#).unwrap();
        let args = Args {
            settings: Some(path),
            ..args(dir.path())
        };
        assert!(App::new(args).is_err());
    }

    #[test]
    fn miss_rate_outside_unit_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for miss_rate in [f64::NAN, -0.1, 1.5, f64::INFINITY] {
            let args = Args {
                miss_rate,
                ..args(dir.path())
            };
            assert!(App::new(args).is_err(), "accepted {miss_rate}");
        }
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "total_blocks": 1, "trials_per_block": 4, "subject_id": "p7" }"#,
        )
        .unwrap();
        let args = Args {
            settings: Some(path),
            ..args(dir.path())
        };
        let output = args.output.clone();
        App::new(args).unwrap().run().unwrap();

        let record: SessionRecord =
            serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(record.subject_id.as_deref(), Some("p7"));
        assert_eq!(record.trials().count(), 4);
    }
}
