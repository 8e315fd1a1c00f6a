//! Per-timestep sequences of coupled states and actions
//!
//! One member per active node of the definition tree, root first. A frozen
//! sequence rejects further pushes and exposes an identity string built from
//! its members' definition names.

use std::ops::Index;

use lander_core::{LanderError, Result};

use crate::state::{Action, QuantizedRecord, State};

/// Append-only list of records that can be frozen.
#[derive(Debug, Clone)]
pub struct Coupled<T> {
    members: Vec<T>,
    identity: Option<String>,
}

pub type CoupledStates = Coupled<State>;
pub type CoupledActions = Coupled<Action>;

impl<T> Default for Coupled<T> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            identity: None,
        }
    }
}

impl<T: QuantizedRecord> Coupled<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, member: T) -> Result<()> {
        if let Some(identity) = &self.identity {
            return Err(LanderError::Frozen(identity.clone()));
        }
        self.members.push(member);
        Ok(())
    }

    /// Freeze and return the identity string.
    pub fn freeze(&mut self) -> &str {
        let members = &self.members;
        self.identity
            .get_or_insert_with(|| members.iter().map(|m| m.definition().name()).collect())
    }

    pub fn is_frozen(&self) -> bool {
        self.identity.is_some()
    }

    /// Identity string, `None` until frozen.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.members.get(position)
    }

    pub fn root(&self) -> Option<&T> {
        self.members.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<T> Index<usize> for Coupled<T> {
    type Output = T;

    fn index(&self, position: usize) -> &T {
        &self.members[position]
    }
}

impl<'a, T: QuantizedRecord> IntoIterator for &'a Coupled<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FieldSpec, MdpDocument, DEFAULT_DENSE_TABLE_CAP};
    use lander_core::ExpressionEngine;
    use std::sync::Arc;

    fn definition(name: &str) -> Arc<crate::definition::MdpDefinition> {
        let doc = MdpDocument {
            state: vec![FieldSpec::new("x", 0.0, 1.0, 1.0)],
            ..MdpDocument::new(name)
        };
        Arc::new(doc.finalize(&ExpressionEngine::new(), DEFAULT_DENSE_TABLE_CAP).unwrap())
    }

    #[test]
    fn test_freeze_rejects_push() {
        let mut states = CoupledStates::new();
        states.push(State::from_values(&definition("root"), &[], None)).unwrap();
        states.push(State::from_values(&definition("stabilizer"), &[], None)).unwrap();
        assert!(!states.is_frozen());
        assert_eq!(states.identity(), None);

        assert_eq!(states.freeze(), "rootstabilizer");
        assert_eq!(states.freeze(), "rootstabilizer");
        let err = states.push(State::from_values(&definition("late"), &[], None)).unwrap_err();
        assert!(matches!(err, LanderError::Frozen(_)));
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].definition().name(), "stabilizer");
    }
}
