//! Candidate enumeration and epsilon-greedy action selection

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use lander_core::expression::is_truthy;
use lander_core::{LanderError, Result};

use crate::definition::{MdpDefinition, Selector};
use crate::state::{Action, QuantizedRecord, State};
use crate::store::ValueStore;

/// Child ids a selector may take in `state`.
///
/// Without rules every option is legal. With rules, the first rule whose
/// child is active and whose condition holds wins. When none holds, the last
/// rule's child is used; if that child is not active the rules are scanned
/// from the top for one that is. A chosen name without an id makes every
/// option legal again.
pub fn legal_children(
    definition: &MdpDefinition,
    selector: &Selector,
    state: &State,
    is_active: impl Fn(&str) -> bool,
) -> Vec<i64> {
    let all = || selector.option_ids().to_vec();

    let rules = selector.rules();
    let Some(last) = rules.last() else {
        return all();
    };

    let chosen = rules
        .iter()
        .find(|rule| is_active(rule.child.as_str()) && is_truthy(rule.condition.evaluate(state)))
        .or_else(|| {
            if is_active(last.child.as_str()) {
                None
            } else {
                rules.iter().find(|rule| is_active(rule.child.as_str()))
            }
        })
        .unwrap_or(last);

    match definition.child_id(&chosen.child) {
        Some(id) => vec![id],
        None => all(),
    }
}

/// Cross product of the legal values of every action field.
///
/// Selector fields take their legal child ids; selectors that are not
/// declared action fields still get a column so every candidate carries the
/// child choice.
pub fn candidate_actions(
    definition: &Arc<MdpDefinition>,
    state: &State,
    is_active: impl Fn(&str) -> bool,
) -> Vec<Action> {
    let mut columns: Vec<(String, Vec<i64>)> = Vec::new();

    for range in definition.layout().action_ranges() {
        let values = match definition.selector(&range.name) {
            Some(selector) => legal_children(definition, selector, state, &is_active),
            None => range.buckets().collect(),
        };
        columns.push((range.name.clone(), values));
    }
    for selector in definition.selectors().iter().filter(|s| !s.is_indexed()) {
        columns.push((
            selector.field().to_string(),
            legal_children(definition, selector, state, &is_active),
        ));
    }

    if columns.iter().any(|(_, values)| values.is_empty()) {
        return Vec::new();
    }

    let total: usize = columns.iter().map(|(_, values)| values.len()).product();
    let mut candidates = Vec::with_capacity(total);
    let mut digits = vec![0usize; columns.len()];
    loop {
        let buckets = columns
            .iter()
            .zip(&digits)
            .map(|((field, values), &digit)| (field.clone(), values[digit]));
        candidates.push(Action::from_buckets(definition, buckets, state.symmetry()));

        // Odometer increment, last column fastest.
        let mut position = columns.len();
        loop {
            if position == 0 {
                return candidates;
            }
            position -= 1;
            digits[position] += 1;
            if digits[position] < columns[position].1.len() {
                break;
            }
            digits[position] = 0;
        }
    }
}

/// Epsilon-greedy selection over a value table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonGreedy {
    pub exploration: f64,
}

impl EpsilonGreedy {
    pub fn new(exploration: f64) -> Self {
        Self { exploration }
    }

    pub fn for_definition(definition: &MdpDefinition) -> Self {
        Self::new(definition.params().exploration)
    }

    /// Pick one of `candidates`.
    ///
    /// With probability `exploration` the pick is uniform over all
    /// candidates. Otherwise it is uniform over those whose value equals the
    /// maximum exactly.
    pub fn select<R: Rng>(
        &self,
        store: &ValueStore,
        definition: &MdpDefinition,
        state: &State,
        mut candidates: Vec<Action>,
        rng: &mut R,
    ) -> Result<Action> {
        if candidates.is_empty() {
            return Err(LanderError::Definition(format!(
                "'{}' produced no candidate actions",
                definition.name()
            )));
        }

        let explore = rng.gen::<f64>() < self.exploration;
        let pool: Vec<usize> = if explore {
            (0..candidates.len()).collect()
        } else {
            let mut best = f32::NEG_INFINITY;
            let mut ties = Vec::new();
            for (position, action) in candidates.iter().enumerate() {
                let value = store.get(definition.index_of(state, action)?)?;
                if value > best {
                    best = value;
                    ties.clear();
                    ties.push(position);
                } else if value == best {
                    ties.push(position);
                }
            }
            if ties.is_empty() {
                // Every value was NaN.
                (0..candidates.len()).collect()
            } else {
                ties
            }
        };

        let position = pool.choose(rng).copied().unwrap_or(0);
        Ok(candidates.swap_remove(position))
    }
}
