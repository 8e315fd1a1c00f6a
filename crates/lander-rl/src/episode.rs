//! Episodes and trajectories

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lander_core::{LanderError, Result};

use crate::definition::{Axis, MdpDefinition};
use crate::state::{Action, QuantizedRecord, State};

/// Unique identifier of one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId(Uuid);

impl EpisodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded decision and its precomputed table index.
#[derive(Debug, Clone)]
pub struct StateActionPair {
    pub state: State,
    pub action: Action,
    pub index: u64,
}

/// Trajectory key of a definition: its name plus the axis suffix, if any.
pub fn storage_key(name: &str, axis: Option<Axis>) -> String {
    Axis::tag(name, axis)
}

/// Ordered decisions of one definition node across one episode.
#[derive(Debug, Clone)]
pub struct Trajectory {
    key: String,
    definition: Arc<MdpDefinition>,
    pairs: Vec<StateActionPair>,
}

impl Trajectory {
    pub fn new(key: impl Into<String>, definition: Arc<MdpDefinition>) -> Self {
        Self {
            key: key.into(),
            definition,
            pairs: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn definition(&self) -> &Arc<MdpDefinition> {
        &self.definition
    }

    pub fn pairs(&self) -> &[StateActionPair] {
        &self.pairs
    }

    pub fn last(&self) -> Option<&StateActionPair> {
        self.pairs.last()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Append a decision unless its state repeats the last recorded one.
    ///
    /// Both records must belong to this trajectory's definition.
    pub fn record(&mut self, state: State, action: Action) -> Result<bool> {
        for owner in [state.definition().name(), action.definition().name()] {
            if owner != self.definition.name() {
                return Err(LanderError::DefinitionMismatch {
                    expected: self.definition.name().to_string(),
                    found: owner.to_string(),
                });
            }
        }
        if self.pairs.last().is_some_and(|last| last.state == state) {
            return Ok(false);
        }
        let index = self.definition.index_of(&state, &action)?;
        self.pairs.push(StateActionPair { state, action, index });
        Ok(true)
    }
}

/// Per-run bookkeeping owned by one worker.
#[derive(Debug)]
pub struct Episode {
    id: EpisodeId,
    rng: StdRng,
    trajectories: BTreeMap<String, Trajectory>,
    steps: u64,
}

impl Episode {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Episode whose random draws are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            id: EpisodeId::new(),
            rng,
            trajectories: BTreeMap::new(),
            steps: 0,
        }
    }

    pub fn id(&self) -> EpisodeId {
        self.id
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn advance(&mut self) {
        self.steps += 1;
    }

    pub fn trajectory(&self, key: &str) -> Option<&Trajectory> {
        self.trajectories.get(key)
    }

    pub fn trajectories(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.values()
    }

    #[cfg(test)]
    pub(crate) fn trajectory_mut(&mut self, key: &str, definition: &Arc<MdpDefinition>) -> &mut Trajectory {
        self.trajectories
            .entry(key.to_string())
            .or_insert_with(|| Trajectory::new(key, Arc::clone(definition)))
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut StdRng, &mut BTreeMap<String, Trajectory>) {
        (&mut self.rng, &mut self.trajectories)
    }

    pub(crate) fn into_parts(self) -> (EpisodeId, StdRng, BTreeMap<String, Trajectory>, u64) {
        (self.id, self.rng, self.trajectories, self.steps)
    }
}

impl Default for Episode {
    fn default() -> Self {
        Self::new()
    }
}

/// Success flags delivered at episode end: the root first, then children.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TerminationVerdict {
    pub successes: Vec<bool>,
}

impl TerminationVerdict {
    pub fn new(successes: Vec<bool>) -> Self {
        Self { successes }
    }

    /// Root (vertical) success; an empty verdict counts as success.
    pub fn root(&self) -> bool {
        self.successes.first().copied().unwrap_or(true)
    }

    /// Whether every child succeeded.
    pub fn children(&self) -> bool {
        self.successes.iter().skip(1).all(|s| *s)
    }

    pub fn total(&self) -> bool {
        self.successes.iter().all(|s| *s)
    }
}

/// Outcome of a finished episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub id: EpisodeId,
    pub steps: u64,
    pub trajectories: usize,
    pub recorded_pairs: usize,
    pub monte_carlo_updates: usize,
    pub verdict: TerminationVerdict,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FieldSpec, MdpDocument, DEFAULT_DENSE_TABLE_CAP};
    use lander_core::ExpressionEngine;

    fn definition(name: &str) -> Arc<MdpDefinition> {
        let doc = MdpDocument {
            state: vec![FieldSpec::new("altitude", 0.0, 10.0, 1.0)],
            action: vec![FieldSpec::new("thrust", 0.0, 1.0, 0.5)],
            ..MdpDocument::new(name)
        };
        Arc::new(doc.finalize(&ExpressionEngine::new(), DEFAULT_DENSE_TABLE_CAP).unwrap())
    }

    #[test]
    fn test_record_skips_repeated_state() {
        let def = definition("hover");
        let mut trajectory = Trajectory::new("hover", Arc::clone(&def));
        let state = |alt: f64| State::from_values(&def, &[("altitude", alt)], None);
        let action = |thrust: f64| Action::from_values(&def, &[("thrust", thrust)], None);

        assert!(trajectory.record(state(4.0), action(0.0)).unwrap());
        assert!(!trajectory.record(state(4.2), action(1.0)).unwrap());
        assert!(trajectory.record(state(3.0), action(1.0)).unwrap());
        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory.pairs()[1].index, 3 * 3 + 2);
    }

    #[test]
    fn test_record_rejects_foreign_definition() {
        let def = definition("hover");
        let other = definition("other");
        let mut trajectory = Trajectory::new("hover", Arc::clone(&def));
        let result = trajectory.record(
            State::from_values(&def, &[("altitude", 1.0)], None),
            Action::from_values(&other, &[("thrust", 0.5)], None),
        );
        assert!(matches!(result, Err(LanderError::DefinitionMismatch { .. })));
        assert!(trajectory.is_empty());
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("stabilizer", Some(Axis::Y)), "stabilizerY");
        assert_eq!(storage_key("lander", None), "lander");
    }

    #[test]
    fn test_verdict_flags() {
        let verdict = TerminationVerdict::new(vec![true, false, true]);
        assert!(verdict.root());
        assert!(!verdict.children());
        assert!(!verdict.total());

        let empty = TerminationVerdict::default();
        assert!(empty.root() && empty.children() && empty.total());
    }

    #[test]
    fn test_episode_trajectories() {
        let def = definition("hover");
        let mut episode = Episode::with_seed(3);
        episode.trajectory_mut("hover", &def);
        episode.trajectory_mut("hover", &def);
        assert_eq!(episode.trajectories().count(), 1);
        assert!(episode.trajectory("hover").is_some());
        assert_ne!(episode.id(), Episode::new().id());
    }
}
