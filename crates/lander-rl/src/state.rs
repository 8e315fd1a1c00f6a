//! Quantized states and actions
//!
//! Both records store integer buckets keyed by field name and share every
//! read/write path through [`FieldValues`]. Equality and hashing consider only
//! the fields the owning definition declares (state fields for a [`State`],
//! action fields for an [`Action`]), so noise in carried but undeclared
//! fields never splits two decisions apart.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lander_core::{FieldLookup, PhysicalSnapshot};

use crate::definition::{Axis, FieldSpec, MdpDefinition};

/// Bucketed field values owned by one definition.
#[derive(Debug, Clone)]
pub struct FieldValues {
    definition: Arc<MdpDefinition>,
    buckets: HashMap<String, i64>,
    symmetry: Option<Axis>,
}

impl FieldValues {
    fn new(definition: Arc<MdpDefinition>, symmetry: Option<Axis>) -> Self {
        Self {
            definition,
            buckets: HashMap::new(),
            symmetry,
        }
    }

    pub fn definition(&self) -> &Arc<MdpDefinition> {
        &self.definition
    }

    pub fn symmetry(&self) -> Option<Axis> {
        self.symmetry
    }

    /// Quantize `value` with the field's precision and range shift and store it.
    pub fn set_double(&mut self, field: &str, value: f64) {
        let bucket = self.definition.quantizer(field).bucket(value);
        self.buckets.insert(field.to_string(), bucket);
    }

    pub fn set_bucket(&mut self, field: &str, bucket: i64) {
        self.buckets.insert(field.to_string(), bucket);
    }

    pub fn get(&self, field: &str) -> Option<i64> {
        self.buckets.get(field).copied()
    }

    pub fn try_get_double(&self, field: &str) -> Option<f64> {
        self.get(field)
            .map(|bucket| self.definition.quantizer(field).value(bucket))
    }

    /// Physical value of a field, `0.0` when the record does not carry it.
    pub fn get_double(&self, field: &str) -> f64 {
        self.try_get_double(field).unwrap_or(0.0)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, i64)> {
        self.buckets.iter().map(|(name, bucket)| (name.as_str(), *bucket))
    }

    fn matches_on(&self, other: &FieldValues, declared: &[FieldSpec]) -> bool {
        self.definition.name() == other.definition.name()
            && declared.iter().all(|f| self.get(&f.name) == other.get(&f.name))
    }

    fn hash_on<H: Hasher>(&self, declared: &[FieldSpec], state: &mut H) {
        self.definition.name().hash(state);
        for field in declared {
            self.get(&field.name).hash(state);
        }
    }

    /// Re-quantize every carried value under another definition.
    fn requantized(&self, target: &Arc<MdpDefinition>) -> FieldValues {
        let mut copy = FieldValues::new(Arc::clone(target), self.symmetry);
        for (field, _) in self.fields() {
            copy.set_double(field, self.get_double(field));
        }
        copy
    }
}

impl FieldLookup for FieldValues {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.try_get_double(field)
    }
}

/// Behaviour shared by [`State`] and [`Action`].
pub trait QuantizedRecord {
    fn values(&self) -> &FieldValues;

    fn values_mut(&mut self) -> &mut FieldValues;

    /// Fields that take part in equality, hashing and indexing.
    fn declared_fields(&self) -> &[FieldSpec];

    fn definition(&self) -> &Arc<MdpDefinition> {
        self.values().definition()
    }

    fn symmetry(&self) -> Option<Axis> {
        self.values().symmetry()
    }

    fn get(&self, field: &str) -> Option<i64> {
        self.values().get(field)
    }

    fn get_double(&self, field: &str) -> f64 {
        self.values().get_double(field)
    }

    fn try_get_double(&self, field: &str) -> Option<f64> {
        self.values().try_get_double(field)
    }

    fn set_double(&mut self, field: &str, value: f64) {
        self.values_mut().set_double(field, value);
    }
}

// ============================================================================
// State
// ============================================================================

/// Quantized observation for one definition, optionally tagged with an axis.
#[derive(Debug, Clone)]
pub struct State {
    values: FieldValues,
}

impl State {
    /// Build from a physical snapshot.
    pub fn from_snapshot(
        definition: &Arc<MdpDefinition>,
        snapshot: &PhysicalSnapshot,
        symmetry: Option<Axis>,
    ) -> Self {
        let raw = PhysicalSnapshot::field_names().filter_map(|name| snapshot.field(name).map(|v| (name, v)));
        Self::derive(definition, raw, symmetry)
    }

    /// Build from explicit field values. Derived fields are still computed.
    pub fn from_values(definition: &Arc<MdpDefinition>, values: &[(&str, f64)], symmetry: Option<Axis>) -> Self {
        Self::derive(definition, values.iter().copied(), symmetry)
    }

    fn derive<'a>(
        definition: &Arc<MdpDefinition>,
        raw: impl Iterator<Item = (&'a str, f64)>,
        symmetry: Option<Axis>,
    ) -> Self {
        let mut values = FieldValues::new(Arc::clone(definition), symmetry);
        for (field, value) in raw {
            values.set_double(field, value);
        }
        let mut state = Self { values };
        state.apply_symmetry_and_formulas();
        state
    }

    /// Mirror axis-tagged fields onto their bare names, then evaluate formulas in order.
    fn apply_symmetry_and_formulas(&mut self) {
        let definition = Arc::clone(self.values.definition());

        if let Some(axis) = self.values.symmetry() {
            for field in definition.symmetry_axes() {
                let source = Axis::tag(field, Some(axis));
                if let Some(value) = self.values.try_get_double(&source) {
                    self.values.set_double(field, value);
                }
            }
        }

        for (name, formula) in definition.formulas() {
            if self.values.symmetry().is_some() && definition.is_symmetry_axis(name) {
                continue;
            }
            let value = formula.evaluate(&self.values);
            self.values.set_double(name, value);
        }
    }

    /// Copy under `target`, re-deriving mirrored and formula fields there.
    pub fn deep_copy_into(&self, target: &Arc<MdpDefinition>) -> State {
        let mut state = State {
            values: self.values.requantized(target),
        };
        state.apply_symmetry_and_formulas();
        state
    }

    /// Whether the state hits one of its definition's `no_action` values.
    pub fn is_no_action(&self) -> bool {
        let definition = self.values.definition();
        definition.no_action().iter().any(|spec| {
            let quantizer = definition.quantizer(&spec.name);
            self.values
                .get(&spec.name)
                .is_some_and(|bucket| spec.values.iter().any(|v| quantizer.bucket(*v) == bucket))
        })
    }
}

impl QuantizedRecord for State {
    fn values(&self) -> &FieldValues {
        &self.values
    }

    fn values_mut(&mut self) -> &mut FieldValues {
        &mut self.values
    }

    fn declared_fields(&self) -> &[FieldSpec] {
        self.values.definition().state_fields()
    }
}

impl FieldLookup for State {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.values.lookup(field)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.values.matches_on(&other.values, self.declared_fields())
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash_on(self.declared_fields(), state);
    }
}

// ============================================================================
// Action
// ============================================================================

/// Quantized decision for one definition.
#[derive(Debug, Clone)]
pub struct Action {
    values: FieldValues,
}

impl Action {
    /// Build from buckets, e.g. one element of the candidate cross product.
    pub fn from_buckets(
        definition: &Arc<MdpDefinition>,
        buckets: impl IntoIterator<Item = (String, i64)>,
        symmetry: Option<Axis>,
    ) -> Self {
        let mut values = FieldValues::new(Arc::clone(definition), symmetry);
        for (field, bucket) in buckets {
            values.set_bucket(&field, bucket);
        }
        Self { values }
    }

    pub fn from_values(definition: &Arc<MdpDefinition>, values: &[(&str, f64)], symmetry: Option<Axis>) -> Self {
        let mut fields = FieldValues::new(Arc::clone(definition), symmetry);
        for (field, value) in values {
            fields.set_double(field, *value);
        }
        Self { values: fields }
    }

    pub fn deep_copy_into(&self, target: &Arc<MdpDefinition>) -> Action {
        Action {
            values: self.values.requantized(target),
        }
    }

    /// Values as the actuator sees them: symmetric fields gain the axis suffix
    /// (`gimbal` on an X-tagged action drives `gimbalX`).
    pub fn command_fields(&self) -> Vec<(String, f64)> {
        let definition = self.values.definition();
        let symmetry = self.values.symmetry();
        self.values
            .fields()
            .map(|(field, _)| {
                let name = if definition.is_symmetry_axis(field) {
                    Axis::tag(field, symmetry)
                } else {
                    field.to_string()
                };
                (name, self.values.get_double(field))
            })
            .collect()
    }
}

impl QuantizedRecord for Action {
    fn values(&self) -> &FieldValues {
        &self.values
    }

    fn values_mut(&mut self) -> &mut FieldValues {
        &mut self.values
    }

    fn declared_fields(&self) -> &[FieldSpec] {
        self.values.definition().action_fields()
    }
}

impl FieldLookup for Action {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.values.lookup(field)
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.values.matches_on(&other.values, self.declared_fields())
    }
}

impl Eq for Action {}

impl Hash for Action {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash_on(self.declared_fields(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DerivedField, FieldSpec, MdpDocument, NoActionSpec, DEFAULT_DENSE_TABLE_CAP};
    use lander_core::ExpressionEngine;
    use std::collections::HashSet;

    fn definition(doc: MdpDocument) -> Arc<MdpDefinition> {
        Arc::new(doc.finalize(&ExpressionEngine::new(), DEFAULT_DENSE_TABLE_CAP).unwrap())
    }

    fn altitude() -> Arc<MdpDefinition> {
        definition(MdpDocument {
            state: vec![FieldSpec::new("altitude", 0.0, 10.0, 1.0)],
            action: vec![FieldSpec::new("thrust", 0.0, 1.0, 0.5)],
            formulas: vec![DerivedField {
                name: "altitude".to_string(),
                formula: "(positionZ)".to_string(),
            }],
            no_action: vec![NoActionSpec {
                name: "altitude".to_string(),
                values: vec![0.0],
            }],
            ..MdpDocument::new("altitude")
        })
    }

    fn stabilizer() -> Arc<MdpDefinition> {
        definition(MdpDocument {
            state: vec![FieldSpec::new("position", -4.0, 4.0, 1.0)],
            action: vec![FieldSpec::new("gimbal", -0.1, 0.1, 0.05)],
            symmetry_axes: vec!["position".to_string(), "gimbal".to_string()],
            formulas: vec![DerivedField {
                name: "position".to_string(),
                formula: "Add(Abs(positionX),Abs(positionY))".to_string(),
            }],
            ..MdpDocument::new("stabilizer")
        })
    }

    #[test]
    fn test_state_from_snapshot_runs_formulas() {
        let def = altitude();
        let mut snapshot = PhysicalSnapshot::default();
        snapshot.position.z = 6.6;
        let state = State::from_snapshot(&def, &snapshot, None);
        assert_eq!(state.get("altitude"), Some(7));
        assert_eq!(state.get_double("altitude"), 7.0);
        assert!((state.get_double("positionZ") - 6.6).abs() < 1e-6);
        assert_eq!(state.get_double("missing"), 0.0);
        assert_eq!(state.try_get_double("missing"), None);
    }

    #[test]
    fn test_equality_only_on_declared_fields() {
        let def = altitude();
        let a = State::from_values(&def, &[("positionZ", 5.2), ("velocityZ", 1.0)], None);
        let b = State::from_values(&def, &[("positionZ", 4.9), ("velocityZ", -3.0)], None);
        let c = State::from_values(&def, &[("positionZ", 6.0)], None);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<State> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_symmetric_state_mirrors_tagged_axis() {
        let def = stabilizer();
        let mut snapshot = PhysicalSnapshot::default();
        snapshot.position.x = 2.2;
        snapshot.position.y = -3.0;

        let x = State::from_snapshot(&def, &snapshot, Some(Axis::X));
        let y = State::from_snapshot(&def, &snapshot, Some(Axis::Y));
        let untagged = State::from_snapshot(&def, &snapshot, None);

        assert_eq!(x.get_double("position"), 2.0);
        assert_eq!(y.get_double("position"), -3.0);
        // Without a tag the formula named after the axis applies.
        assert_eq!(untagged.get_double("position"), 5.0);
    }

    #[test]
    fn test_no_action_state() {
        let def = altitude();
        assert!(State::from_values(&def, &[("positionZ", 0.2)], None).is_no_action());
        assert!(!State::from_values(&def, &[("positionZ", 3.0)], None).is_no_action());
    }

    #[test]
    fn test_action_command_fields_carry_axis() {
        let def = stabilizer();
        let action = Action::from_values(&def, &[("gimbal", 0.05)], Some(Axis::Y));
        let fields = action.command_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "gimbalY");
        assert!((fields[0].1 - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_deep_copy_into_other_definition() {
        let source = stabilizer();
        let target = altitude();
        let mut snapshot = PhysicalSnapshot::default();
        snapshot.position.z = 3.0;
        let state = State::from_snapshot(&source, &snapshot, None);

        let copy = state.deep_copy_into(&target);
        assert_eq!(copy.definition().name(), "altitude");
        assert_eq!(copy.get_double("altitude"), 3.0);
    }

    #[test]
    fn test_action_equality_by_definition() {
        let a = Action::from_values(&altitude(), &[("thrust", 0.5)], None);
        let b = Action::from_values(&altitude(), &[("thrust", 0.6)], None);
        let c = Action::from_values(&stabilizer(), &[("thrust", 0.5)], None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
