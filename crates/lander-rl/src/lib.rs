//! Lander RL - Tabular learning over declarative MDP definitions
//!
//! This crate turns authored MDP documents into quantized state/action
//! spaces, keeps one concurrent value table per definition, and trains them
//! with Monte Carlo and TD(0) updates while an epsilon-greedy policy composes
//! hierarchical and symmetric sub-problems into one control command.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::float_cmp)]
#![allow(clippy::similar_names)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithm;
pub mod coupled;
pub mod definition;
pub mod engine;
pub mod episode;
pub mod index;
pub mod policy;
pub mod quantize;
pub mod state;
pub mod store;
pub mod table_snapshot;

pub use algorithm::{LearningAlgorithm, LearningParams, UpdateContext};
pub use coupled::{Coupled, CoupledActions, CoupledStates};
pub use definition::{Axis, MdpDefinition, MdpDocument};
pub use engine::{Engine, EngineConfig, EngineStats, SimulationDimension, StepOutcome};
pub use episode::{Episode, EpisodeId, EpisodeSummary, TerminationVerdict, Trajectory};
pub use index::{Backing, IndexLayout};
pub use policy::EpsilonGreedy;
pub use quantize::Quantizer;
pub use state::{Action, QuantizedRecord, State};
pub use store::ValueStore;
pub use table_snapshot::TableSnapshot;
