//! Stored table commands

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use lander_rl::{MdpDefinition, TableSnapshot};

use super::build_engine;
use crate::config::Config;

#[derive(Subcommand)]
pub enum TableCommands {
    /// Summarize a stored table and list its highest values
    Inspect {
        /// Table file written by `lander replay`
        path: PathBuf,

        /// Number of entries to list
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Definitions file used to decode entries; falls back to storage.definitions
        #[arg(short, long)]
        definitions: Option<PathBuf>,
    },
}

pub async fn run(cmd: TableCommands, config: &Config) -> Result<()> {
    match cmd {
        TableCommands::Inspect { path, top, definitions } => {
            let snapshot = TableSnapshot::read_json(&path)
                .with_context(|| format!("Failed to read table {}", path.display()))?;
            let engine = build_engine(config, definitions.as_deref()).ok();
            let definition = engine.as_ref().and_then(|e| e.definition(&snapshot.mdp_name).ok());
            print!("{}", inspect(&snapshot, definition.map(|d| &**d), top));
            Ok(())
        }
    }
}

fn inspect(snapshot: &TableSnapshot, definition: Option<&MdpDefinition>, top: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Table: {}", snapshot.mdp_name);
    let _ = writeln!(out, "Format version: {}", snapshot.format_version);
    let _ = writeln!(out, "Saved at: {}", snapshot.saved_at.to_rfc3339());
    let _ = writeln!(out, "Size: {} ({})", snapshot.size, snapshot.backing);

    let values: Vec<(u64, f32)> = snapshot.iter().filter(|(_, v)| *v != 0.0).collect();
    let _ = writeln!(out, "Non-zero entries: {}", values.len());
    if !values.is_empty() {
        let min = values.iter().map(|(_, v)| *v).fold(f32::INFINITY, f32::min);
        let max = values.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
        let mean = values.iter().map(|(_, v)| f64::from(*v)).sum::<f64>() / values.len() as f64;
        let _ = writeln!(out, "Min / mean / max: {min:.4} / {mean:.4} / {max:.4}");
    }

    if let Some(definition) = definition {
        match snapshot.check_shape(definition.name(), definition.table_size()) {
            Ok(()) => {
                let _ = writeln!(out, "Matches definition '{}'", definition.name());
            }
            Err(e) => {
                let _ = writeln!(out, "Does not match definition: {e}");
            }
        }
    }

    let mut ranked = values;
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    if !ranked.is_empty() && top > 0 {
        let _ = writeln!(out, "\n{:<12} {:>12}  {}", "INDEX", "VALUE", "STATE | ACTION");
        for (index, value) in ranked.into_iter().take(top) {
            let decoded = definition.map(|d| describe_index(d, index)).unwrap_or_default();
            let _ = writeln!(out, "{index:<12} {value:>12.4}  {decoded}");
        }
    }
    out
}

/// Field values addressed by a table index, as `state | action`.
fn describe_index(definition: &MdpDefinition, index: u64) -> String {
    let layout = definition.layout();
    let Some((state, action)) = layout.decode(index) else {
        return String::new();
    };
    let render = |ranges: &[lander_rl::index::FieldRange], buckets: &[i64]| {
        ranges
            .iter()
            .zip(buckets)
            .map(|(range, &bucket)| {
                let value = definition.quantizer(&range.name).value(bucket);
                format!("{}={}", range.name, round_for_display(value))
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!(
        "{} | {}",
        render(layout.state_ranges(), &state),
        render(layout.action_ranges(), &action)
    )
}

fn round_for_display(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
