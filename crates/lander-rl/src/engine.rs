//! Lander RL Engine - Coordinates definitions, value tables and episodes
//!
//! One [`Engine`] is built per definition set and shared by every training
//! worker. Workers own their [`Episode`]s and call [`Engine::step`] once per
//! simulated timestep, then [`Engine::finish_episode`] when the run ends.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lander_core::{ControlCommand, ExpressionEngine, LanderError, PhysicalSnapshot, Result};

use crate::algorithm::{monte_carlo, td_zero, LearningAlgorithm, UpdateContext};
use crate::coupled::{CoupledActions, CoupledStates};
use crate::definition::{Axis, MdpDefinition, MdpDocument, DEFAULT_DENSE_TABLE_CAP};
use crate::episode::{storage_key, Episode, EpisodeSummary, StateActionPair, TerminationVerdict, Trajectory};
use crate::policy::{candidate_actions, EpsilonGreedy};
use crate::state::{Action, QuantizedRecord, State};
use crate::store::{ValueStore, DEFAULT_SPARSE_SHARDS};
use crate::table_snapshot::TableSnapshot;

/// How many horizontal axes the simulation moves along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationDimension {
    /// Vertical only: axis-tagged children are never expanded.
    OneD,
    /// One horizontal axis: only children on the planar axis are expanded.
    TwoD,
    #[default]
    ThreeD,
}

impl SimulationDimension {
    /// Dimension forced by a `_1D`/`_2D`/`_3D` marker in a definition name.
    pub fn from_marker(name: &str) -> Option<Self> {
        if name.contains("_1D") {
            Some(SimulationDimension::OneD)
        } else if name.contains("_2D") {
            Some(SimulationDimension::TwoD)
        } else if name.contains("_3D") {
            Some(SimulationDimension::ThreeD)
        } else {
            None
        }
    }
}

impl fmt::Display for SimulationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationDimension::OneD => write!(f, "1D"),
            SimulationDimension::TwoD => write!(f, "2D"),
            SimulationDimension::ThreeD => write!(f, "3D"),
        }
    }
}

/// Engine knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dimension: SimulationDimension,
    /// Horizontal axis kept in two-dimensional runs.
    pub planar_axis: Axis,
    pub dense_table_cap: u64,
    pub sparse_shards: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: SimulationDimension::ThreeD,
            planar_axis: Axis::X,
            dense_table_cap: DEFAULT_DENSE_TABLE_CAP,
            sparse_shards: DEFAULT_SPARSE_SHARDS,
        }
    }
}

/// Result of one timestep.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub states: CoupledStates,
    pub actions: CoupledActions,
    pub command: ControlCommand,
}

#[derive(Debug, Default)]
struct Counters {
    episodes: AtomicU64,
    successes: AtomicU64,
    steps: AtomicU64,
    decisions: AtomicU64,
    td_updates: AtomicU64,
    mc_updates: AtomicU64,
}

/// Shared training context.
pub struct Engine {
    config: EngineConfig,
    dimension: SimulationDimension,
    expressions: ExpressionEngine,
    definitions: Vec<Arc<MdpDefinition>>,
    by_name: HashMap<String, usize>,
    stores: HashMap<String, Arc<ValueStore>>,
    counters: Counters,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dimension", &self.dimension)
            .field("definitions", &self.definitions.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Finalize `documents` and allocate one value table per definition.
    ///
    /// Definitions are ordered by priority (stable), the first being the root.
    pub fn new(documents: &[MdpDocument], config: EngineConfig) -> Result<Self> {
        if documents.is_empty() {
            return Err(LanderError::Definition("no definitions supplied".to_string()));
        }

        let expressions = ExpressionEngine::new();
        let mut definitions = Vec::with_capacity(documents.len());
        for document in documents {
            definitions.push(Arc::new(document.finalize(&expressions, config.dense_table_cap)?));
        }
        definitions.sort_by_key(|d| d.priority());

        let mut by_name = HashMap::new();
        for (position, definition) in definitions.iter().enumerate() {
            if by_name.insert(definition.name().to_string(), position).is_some() {
                return Err(LanderError::Definition(format!(
                    "definition '{}' declared twice",
                    definition.name()
                )));
            }
        }
        reject_cycles(&definitions, &by_name)?;

        let dimension = definitions
            .iter()
            .filter_map(|d| SimulationDimension::from_marker(d.name()))
            .fold(config.dimension, std::cmp::min);

        let stores = definitions
            .iter()
            .map(|d| {
                let store = ValueStore::new(d.name(), d.layout(), config.sparse_shards);
                (d.name().to_string(), Arc::new(store))
            })
            .collect();

        info!(
            definitions = definitions.len(),
            root = %definitions[0].name(),
            %dimension,
            "Engine ready"
        );

        Ok(Self {
            config,
            dimension,
            expressions,
            definitions,
            by_name,
            stores,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dimension after applying definition-name markers.
    pub fn dimension(&self) -> SimulationDimension {
        self.dimension
    }

    pub fn expressions(&self) -> &ExpressionEngine {
        &self.expressions
    }

    /// Definitions in priority order.
    pub fn definitions(&self) -> &[Arc<MdpDefinition>] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Result<&Arc<MdpDefinition>> {
        self.by_name
            .get(name)
            .map(|&position| &self.definitions[position])
            .ok_or_else(|| LanderError::UnknownDefinition(name.to_string()))
    }

    pub fn root(&self) -> &Arc<MdpDefinition> {
        &self.definitions[0]
    }

    /// Whether `name` is a loaded definition a selector may switch to.
    pub fn is_active(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn store(&self, name: &str) -> Result<&Arc<ValueStore>> {
        self.stores
            .get(name)
            .ok_or_else(|| LanderError::UnknownDefinition(name.to_string()))
    }

    pub fn build_state(&self, name: &str, snapshot: &PhysicalSnapshot, axis: Option<Axis>) -> Result<State> {
        Ok(State::from_snapshot(self.definition(name)?, snapshot, axis))
    }

    pub fn begin_episode(&self) -> Episode {
        Episode::new()
    }

    pub fn begin_episode_with_seed(&self, seed: u64) -> Episode {
        Episode::with_seed(seed)
    }

    fn expands(&self, axis: Option<Axis>) -> bool {
        match (self.dimension, axis) {
            (_, None) | (SimulationDimension::ThreeD, _) => true,
            (SimulationDimension::OneD, Some(_)) => false,
            (SimulationDimension::TwoD, Some(axis)) => axis == self.config.planar_axis,
        }
    }

    /// Run the policy for one timestep.
    ///
    /// Starting from the root, every node decides (or keeps its previous
    /// decision), records the pair, runs its TD(0) update and appends the
    /// children its action selects. The collected actions become one
    /// control command; later nodes override earlier ones on shared fields.
    pub fn step(&self, episode: &mut Episode, snapshot: &PhysicalSnapshot) -> Result<StepOutcome> {
        let mut states = CoupledStates::new();
        let mut actions = CoupledActions::new();
        states.push(State::from_snapshot(self.root(), snapshot, None))?;

        let (rng, trajectories) = episode.parts_mut();
        let mut cursor = 0;
        while cursor < states.len() {
            let state = states[cursor].clone();
            let definition = Arc::clone(state.definition());
            let key = storage_key(definition.name(), state.symmetry());
            let trajectory = trajectories
                .entry(key.clone())
                .or_insert_with(|| Trajectory::new(key, Arc::clone(&definition)));

            let action = match reusable_action(&state, trajectory.last()) {
                Some(action) => action,
                None => {
                    let store = self.store(definition.name())?;
                    let candidates = candidate_actions(&definition, &state, |name| self.is_active(name));
                    let action = EpsilonGreedy::for_definition(&definition).select(
                        store,
                        &definition,
                        &state,
                        candidates,
                        &mut *rng,
                    )?;
                    self.counters.decisions.fetch_add(1, Ordering::Relaxed);

                    if trajectory.record(state.clone(), action.clone())?
                        && definition.uses(LearningAlgorithm::TemporalDifference)
                        && td_zero(&UpdateContext::new(&definition, store), trajectory)?
                    {
                        self.counters.td_updates.fetch_add(1, Ordering::Relaxed);
                    }
                    action
                }
            };

            for (child, axis) in self.children_of(&definition, &action) {
                states.push(State::from_snapshot(child, snapshot, axis))?;
            }
            actions.push(action)?;
            cursor += 1;
        }

        states.freeze();
        actions.freeze();

        let mut command = ControlCommand::default();
        for action in &actions {
            for (field, value) in action.command_fields() {
                command.set(&field, value);
            }
        }

        episode.advance();
        self.counters.steps.fetch_add(1, Ordering::Relaxed);
        Ok(StepOutcome {
            states,
            actions,
            command,
        })
    }

    /// Child definitions selected by `action`, each with the axis it runs on.
    fn children_of<'a>(
        &'a self,
        definition: &'a MdpDefinition,
        action: &'a Action,
    ) -> impl Iterator<Item = (&'a Arc<MdpDefinition>, Option<Axis>)> + 'a {
        definition.selectors().iter().filter_map(move |selector| {
            let id = action.get(selector.field())?;
            let child = self.definition(definition.child_name(id)?).ok()?;
            let axis = selector.child_axis(action.symmetry(), definition.pass_down_symmetry());
            self.expands(axis).then_some((child, axis))
        })
    }

    /// Check every member state against its definition's success bounds.
    pub fn verdict(&self, states: &CoupledStates) -> TerminationVerdict {
        TerminationVerdict::new(
            states
                .iter()
                .map(|state| {
                    state
                        .definition()
                        .success()
                        .iter()
                        .all(|bounds| bounds.contains(state.get_double(&bounds.name)))
                })
                .collect(),
        )
    }

    /// Run the Monte Carlo terminal updates and fold the verdict into the stats.
    ///
    /// Trajectories are updated in a random order so that neither mirror of a
    /// symmetric definition always learns first.
    pub fn finish_episode(&self, episode: Episode, verdict: TerminationVerdict) -> Result<EpisodeSummary> {
        let (id, mut rng, trajectories, steps) = episode.into_parts();

        let mut order: Vec<&Trajectory> = trajectories.values().collect();
        order.shuffle(&mut rng);

        let mut updates = 0;
        for trajectory in order {
            let definition = trajectory.definition();
            if !definition.uses(LearningAlgorithm::MonteCarlo) {
                continue;
            }
            let store = self.store(definition.name())?;
            updates += monte_carlo(&UpdateContext::new(definition, store), trajectory)?;
        }

        self.counters.episodes.fetch_add(1, Ordering::Relaxed);
        self.counters.mc_updates.fetch_add(updates as u64, Ordering::Relaxed);
        if verdict.total() {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        }

        let summary = EpisodeSummary {
            id,
            steps,
            trajectories: trajectories.len(),
            recorded_pairs: trajectories.values().map(Trajectory::len).sum(),
            monte_carlo_updates: updates,
            verdict,
            finished_at: chrono::Utc::now(),
        };
        debug!(
            episode = %summary.id,
            steps,
            pairs = summary.recorded_pairs,
            updates,
            success = summary.verdict.total(),
            "Episode finished"
        );
        Ok(summary)
    }

    /// Learned value of a (state, action) pair.
    pub fn value(&self, state: &State, action: &Action) -> Result<f32> {
        let definition = state.definition();
        self.store(definition.name())?.get(definition.index_of(state, action)?)
    }

    pub fn export_table(&self, name: &str) -> Result<TableSnapshot> {
        Ok(self.store(name)?.export())
    }

    /// Attach a persisted table to the definition it names.
    pub fn attach_table(&self, snapshot: &TableSnapshot) -> Result<()> {
        self.store(&snapshot.mdp_name)?.import(snapshot)
    }

    pub fn stats(&self) -> EngineStats {
        let episodes = self.counters.episodes.load(Ordering::Relaxed);
        let successes = self.counters.successes.load(Ordering::Relaxed);
        EngineStats {
            definitions: self.definitions.len(),
            episodes,
            successes,
            success_rate: if episodes > 0 {
                successes as f64 / episodes as f64
            } else {
                0.0
            },
            steps: self.counters.steps.load(Ordering::Relaxed),
            decisions: self.counters.decisions.load(Ordering::Relaxed),
            td_updates: self.counters.td_updates.load(Ordering::Relaxed),
            mc_updates: self.counters.mc_updates.load(Ordering::Relaxed),
            populated_entries: self.stores.values().map(|s| s.populated()).sum(),
        }
    }
}

/// The previous action when the node does not need a new decision.
fn reusable_action(state: &State, last: Option<&StateActionPair>) -> Option<Action> {
    let last = last?;
    let keep = state.is_no_action() || (!state.definition().state_fields().is_empty() && last.state == *state);
    keep.then(|| last.action.clone())
}

fn reject_cycles(definitions: &[Arc<MdpDefinition>], by_name: &HashMap<String, usize>) -> Result<()> {
    fn visit(
        position: usize,
        definitions: &[Arc<MdpDefinition>],
        by_name: &HashMap<String, usize>,
        on_path: &mut Vec<usize>,
        done: &mut HashSet<usize>,
    ) -> Result<()> {
        if done.contains(&position) {
            return Ok(());
        }
        if on_path.contains(&position) {
            let path: Vec<&str> = on_path.iter().map(|&p| definitions[p].name()).collect();
            return Err(LanderError::Definition(format!(
                "child definitions form a cycle through '{}' ({})",
                definitions[position].name(),
                path.join(" -> ")
            )));
        }
        on_path.push(position);
        for child in definitions[position].child_names() {
            if let Some(&next) = by_name.get(child) {
                visit(next, definitions, by_name, on_path, done)?;
            }
        }
        on_path.pop();
        done.insert(position);
        Ok(())
    }

    let mut done = HashSet::new();
    for position in 0..definitions.len() {
        visit(position, definitions, by_name, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub definitions: usize,
    pub episodes: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub steps: u64,
    pub decisions: u64,
    pub td_updates: u64,
    pub mc_updates: u64,
    pub populated_entries: u64,
}
