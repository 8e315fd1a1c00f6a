//! Field lookup abstraction shared by formulas and quantized records

use std::collections::HashMap;

/// Anything a formula can read named numeric fields from.
pub trait FieldLookup {
    /// Resolve a field to its current value, `None` when the field is unknown.
    fn lookup(&self, field: &str) -> Option<f64>;
}

impl FieldLookup for HashMap<String, f64> {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.get(field).copied()
    }
}

impl FieldLookup for [(&str, f64)] {
    fn lookup(&self, field: &str) -> Option<f64> {
        self.iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| *value)
    }
}

impl<T: FieldLookup + ?Sized> FieldLookup for &T {
    fn lookup(&self, field: &str) -> Option<f64> {
        (**self).lookup(field)
    }
}

/// Lookup that never resolves anything; handy for constant-only formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFields;

impl FieldLookup for NoFields {
    fn lookup(&self, _field: &str) -> Option<f64> {
        None
    }
}
