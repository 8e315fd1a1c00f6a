//! Lander Core - Core types, formula engine and shared functionality
//!
//! This crate provides the foundational types used across all lander components:
//! the error taxonomy, the declarative formula engine and the wire types
//! exchanged with the simulation stepper.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

pub mod error;
pub mod expression;
pub mod fields;
pub mod snapshot;
pub mod util;

pub use error::{LanderError, Result};
pub use expression::{Expression, ExpressionEngine, OperatorRegistry, Term};
pub use fields::FieldLookup;
pub use snapshot::{ControlCommand, PhysicalSnapshot, Quaternion};
