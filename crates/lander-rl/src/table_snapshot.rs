//! Versioned value-table snapshots
//!
//! The persistence collaborator only ever sees [`TableSnapshot`]s: the
//! header records which definition the table belongs to and how large its
//! address space is, so a stale file is refused instead of being attached to
//! a definition whose layout changed.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lander_core::{LanderError, Result};

use crate::index::Backing;

/// Bumped whenever the snapshot layout changes.
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Table values, dense or as sorted `(index, value)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableEntries {
    Dense(Vec<f32>),
    Sparse(Vec<(u64, f32)>),
}

impl TableEntries {
    pub fn len(&self) -> usize {
        match self {
            TableEntries::Dense(values) => values.len(),
            TableEntries::Sparse(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub format_version: u32,
    pub mdp_name: String,
    pub size: u64,
    pub backing: Backing,
    pub saved_at: DateTime<Utc>,
    pub entries: TableEntries,
}

impl TableSnapshot {
    pub fn new(mdp_name: impl Into<String>, size: u64, backing: Backing, entries: TableEntries) -> Self {
        Self {
            format_version: TABLE_FORMAT_VERSION,
            mdp_name: mdp_name.into(),
            size,
            backing,
            saved_at: Utc::now(),
            entries,
        }
    }

    /// Refuse a snapshot that does not fit the named table.
    pub fn check_shape(&self, name: &str, size: u64) -> Result<()> {
        let mismatch = |expected: String, found: String| LanderError::TableShape {
            name: name.to_string(),
            expected,
            found,
        };

        if self.format_version != TABLE_FORMAT_VERSION {
            return Err(mismatch(
                format!("format version {TABLE_FORMAT_VERSION}"),
                format!("format version {}", self.format_version),
            ));
        }
        if self.mdp_name != name {
            return Err(mismatch(format!("definition '{name}'"), format!("definition '{}'", self.mdp_name)));
        }
        if self.size != size {
            return Err(mismatch(format!("{size} entries"), format!("{} entries", self.size)));
        }
        match &self.entries {
            TableEntries::Dense(values) if values.len() as u64 != size => Err(mismatch(
                format!("{size} dense values"),
                format!("{} dense values", values.len()),
            )),
            TableEntries::Sparse(pairs) => match pairs.iter().find(|(index, _)| *index >= size) {
                Some((index, _)) => Err(mismatch(format!("indices below {size}"), format!("index {index}"))),
                None => Ok(()),
            },
            TableEntries::Dense(_) => Ok(()),
        }
    }

    /// Every stored `(index, value)` pair.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (u64, f32)> + '_> {
        match &self.entries {
            TableEntries::Dense(values) => Box::new(values.iter().enumerate().map(|(i, v)| (i as u64, *v))),
            TableEntries::Sparse(pairs) => Box::new(pairs.iter().copied()),
        }
    }

    /// Entries holding a non-zero value.
    pub fn non_zero(&self) -> usize {
        self.iter().filter(|(_, v)| *v != 0.0).count()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape() {
        let snapshot = TableSnapshot::new("hover", 3, Backing::Dense, TableEntries::Dense(vec![0.0, 1.5, -2.0]));
        assert!(snapshot.check_shape("hover", 3).is_ok());
        assert!(matches!(snapshot.check_shape("hover", 4), Err(LanderError::TableShape { .. })));
        assert!(snapshot.check_shape("other", 3).is_err());

        let mut old = snapshot.clone();
        old.format_version = 0;
        assert!(old.check_shape("hover", 3).is_err());

        let sparse = TableSnapshot::new("hover", 3, Backing::Sparse, TableEntries::Sparse(vec![(7, 1.0)]));
        assert!(sparse.check_shape("hover", 3).is_err());
    }

    #[test]
    fn test_iter_and_non_zero() {
        let snapshot = TableSnapshot::new("hover", 3, Backing::Dense, TableEntries::Dense(vec![0.0, 1.5, -2.0]));
        let pairs: Vec<_> = snapshot.iter().collect();
        assert_eq!(pairs, vec![(0, 0.0), (1, 1.5), (2, -2.0)]);
        assert_eq!(snapshot.non_zero(), 2);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables").join("hover.table.json");
        let snapshot = TableSnapshot::new("hover", 10, Backing::Sparse, TableEntries::Sparse(vec![(2, 0.25), (9, -1.0)]));

        snapshot.write_json(&path).unwrap();
        let loaded = TableSnapshot::read_json(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }
}
