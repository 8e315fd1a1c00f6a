//! CLI command modules

pub mod definition;
pub mod formula;
pub mod replay;
pub mod table;

use std::sync::Arc;

use anyhow::{Context, Result};

use lander_rl::definition::load_documents;
use lander_rl::{Engine, MdpDocument};

use crate::config::Config;

/// Definition documents named on the command line, in the config, or the stock lander.
pub fn documents(config: &Config, explicit: Option<&std::path::Path>) -> Result<Vec<MdpDocument>> {
    match explicit.or(config.storage.definitions.as_deref()) {
        Some(path) => load_documents(path).with_context(|| format!("Failed to load definitions from {}", path.display())),
        None => Ok(vec![MdpDocument::default_lander()]),
    }
}

pub fn build_engine(config: &Config, explicit: Option<&std::path::Path>) -> Result<Arc<Engine>> {
    let documents = documents(config, explicit)?;
    let engine = Engine::new(&documents, config.engine.clone()).context("Invalid definitions")?;
    Ok(Arc::new(engine))
}
