//! Offline training by replaying recorded episodes
//!
//! Each recorded episode is a sequence of physical snapshots. Workers share
//! one engine, step their own episodes through it and run the terminal
//! updates, so the value tables learn from every replay concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lander_core::PhysicalSnapshot;
use lander_rl::{Engine, EngineStats, EpisodeSummary, TableSnapshot};

use super::build_engine;
use crate::config::{Config, TrainingConfig};

#[derive(Args)]
pub struct ReplayArgs {
    /// Recorded episodes (JSON)
    pub episodes: PathBuf,

    /// Definitions file; falls back to storage.definitions
    #[arg(short, long)]
    pub definitions: Option<PathBuf>,

    /// Number of workers (overrides training.workers)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Passes over the recording (overrides training.passes)
    #[arg(short, long)]
    pub passes: Option<usize>,

    /// Base seed for episode RNGs (overrides training.seed)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory of stored tables (overrides storage.tables_dir)
    #[arg(long)]
    pub tables_dir: Option<PathBuf>,

    /// Train without writing tables back
    #[arg(long)]
    pub no_save: bool,
}

/// One recorded flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedEpisode {
    pub snapshots: Vec<PhysicalSnapshot>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordingFile {
    List(Vec<RecordedEpisode>),
    Wrapped { episodes: Vec<RecordedEpisode> },
}

pub fn load_recording(path: &Path) -> Result<Vec<RecordedEpisode>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: RecordingFile = serde_json::from_str(&text).context("Invalid recording")?;
    Ok(match file {
        RecordingFile::List(episodes) | RecordingFile::Wrapped { episodes } => episodes,
    })
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub episodes: usize,
    pub successes: usize,
    pub skipped: usize,
    pub stats: EngineStats,
}

pub async fn run(args: ReplayArgs, mut config: Config) -> Result<()> {
    if let Some(workers) = args.workers {
        config.training.workers = workers;
    }
    if let Some(passes) = args.passes {
        config.training.passes = passes;
    }
    if args.seed.is_some() {
        config.training.seed = args.seed;
    }
    if let Some(dir) = args.tables_dir {
        config.storage.tables_dir = dir;
    }

    let engine = build_engine(&config, args.definitions.as_deref())?;
    let attached = attach_tables(&engine, &config);
    let recording = Arc::new(load_recording(&args.episodes)?);
    info!(
        episodes = recording.len(),
        passes = config.training.passes,
        attached,
        "Starting replay"
    );

    let report = train(Arc::clone(&engine), recording, &config.training).await?;

    let written = if args.no_save { 0 } else { save_tables(&engine, &config)? };

    println!("Replay complete");
    println!("===============\n");
    println!("Episodes:       {} ({} skipped)", report.episodes, report.skipped);
    println!(
        "Successes:      {} ({:.1}%)",
        report.successes,
        report.stats.success_rate * 100.0
    );
    println!("Steps:          {}", report.stats.steps);
    println!("Decisions:      {}", report.stats.decisions);
    println!("TD updates:     {}", report.stats.td_updates);
    println!("MC updates:     {}", report.stats.mc_updates);
    println!("Populated:      {}", report.stats.populated_entries);
    println!("Tables written: {written}");
    Ok(())
}

/// Attach every stored table that fits its definition. Returns how many were attached.
pub fn attach_tables(engine: &Engine, config: &Config) -> usize {
    let mut attached = 0;
    for definition in engine.definitions() {
        let path = config.table_path(definition.name());
        if !path.exists() {
            continue;
        }
        match TableSnapshot::read_json(&path).and_then(|snapshot| engine.attach_table(&snapshot)) {
            Ok(()) => {
                debug!(path = %path.display(), "Attached table");
                attached += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring stored table"),
        }
    }
    attached
}

pub fn save_tables(engine: &Engine, config: &Config) -> Result<usize> {
    let mut written = 0;
    for definition in engine.definitions() {
        let path = config.table_path(definition.name());
        engine
            .export_table(definition.name())?
            .write_json(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    info!(written, dir = %config.storage.tables_dir.display(), "Tables saved");
    Ok(written)
}

/// Replay `passes` rounds of the recording across the configured workers.
pub async fn train(
    engine: Arc<Engine>,
    recording: Arc<Vec<RecordedEpisode>>,
    training: &TrainingConfig,
) -> Result<ReplayReport> {
    let total = recording.len() * training.passes;
    let workers = training.worker_count().min(total.max(1));

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let recording = Arc::clone(&recording);
            let seed = training.seed;
            tokio::task::spawn_blocking(move || -> Result<Vec<EpisodeSummary>> {
                let mut summaries = Vec::new();
                for job in (worker..total).step_by(workers) {
                    let recorded = &recording[job % recording.len()];
                    let seed = seed.map(|s| s.wrapping_add(job as u64));
                    if let Some(summary) = replay_episode(&engine, recorded, seed)? {
                        summaries.push(summary);
                    }
                }
                Ok(summaries)
            })
        })
        .collect();

    let mut episodes = 0;
    let mut successes = 0;
    for handle in handles {
        for summary in handle.await?? {
            episodes += 1;
            if summary.verdict.total() {
                successes += 1;
            }
        }
    }

    Ok(ReplayReport {
        episodes,
        successes,
        skipped: total - episodes,
        stats: engine.stats(),
    })
}

/// Step one recorded flight through the engine. Empty recordings are skipped.
fn replay_episode(engine: &Engine, recorded: &RecordedEpisode, seed: Option<u64>) -> Result<Option<EpisodeSummary>> {
    let mut episode = match seed {
        Some(seed) => engine.begin_episode_with_seed(seed),
        None => engine.begin_episode(),
    };

    let mut last = None;
    for snapshot in &recorded.snapshots {
        last = Some(engine.step(&mut episode, snapshot)?);
    }
    let Some(last) = last else {
        return Ok(None);
    };

    let verdict = engine.verdict(&last.states);
    Ok(Some(engine.finish_episode(episode, verdict)?))
}
