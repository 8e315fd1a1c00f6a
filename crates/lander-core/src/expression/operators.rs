//! Operator registry for the formula language
//!
//! Operators are looked up by the exact name written in the formula. The
//! `LogN` family is resolved on demand: `Log2`, `Log8`, `Log10` and so on
//! all map to a logarithm whose base is parsed from the name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Function backing an operator. Receives exactly `arity` evaluated arguments.
pub type OperatorFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Name of the identity operator used by assignment formulas such as `(positionX)`.
pub const IDENTITY: &str = "";

/// A resolved operator: fixed arity plus the function applied to its arguments.
#[derive(Clone)]
pub struct Operator {
    name: String,
    arity: usize,
    apply: OperatorFn,
}

impl Operator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn apply(&self, args: &[f64]) -> f64 {
        (self.apply)(args)
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// `f64::signum` reports 1.0 for +0.0; formulas expect 0.0 for a zero input.
fn signum(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value.signum()
    }
}

/// Registry of the operators a formula may call.
#[derive(Clone)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl OperatorRegistry {
    /// Registry with no operators at all.
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in arithmetic, trigonometric and boolean operators.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register(IDENTITY, 1, |a| a[0]);

        registry.register("Add", 2, |a| a[0] + a[1]);
        registry.register("Sub", 2, |a| a[0] - a[1]);
        registry.register("Mult", 2, |a| a[0] * a[1]);
        registry.register("Div", 2, |a| a[0] / a[1]);

        registry.register("Abs", 1, |a| a[0].abs());
        registry.register("Signum", 1, |a| signum(a[0]));
        registry.register("Sin", 1, |a| a[0].sin());
        registry.register("Asin", 1, |a| a[0].asin());
        registry.register("Cos", 1, |a| a[0].cos());
        registry.register("Acos", 1, |a| a[0].acos());
        registry.register("Tan", 1, |a| a[0].tan());
        registry.register("Atan", 1, |a| a[0].atan());
        registry.register("Atan2", 2, |a| a[0].atan2(a[1]));
        registry.register("Todeg", 1, |a| a[0].to_degrees());

        registry.register("Pow", 2, |a| a[0].powf(a[1]));
        registry.register("Exp", 1, |a| a[0].exp());

        registry.register("And", 2, |a| truth(a[0] != 0.0 && a[1] != 0.0));
        registry.register("Or", 2, |a| truth(a[0] != 0.0 || a[1] != 0.0));
        registry.register("Lt", 2, |a| truth(a[0] < a[1]));
        registry.register("Le", 2, |a| truth(a[0] <= a[1]));
        registry.register("Gt", 2, |a| truth(a[0] > a[1]));
        registry.register("Ge", 2, |a| truth(a[0] >= a[1]));

        registry
    }

    /// Register (or replace) an operator.
    pub fn register<F>(&mut self, name: &str, arity: usize, apply: F)
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.operators.insert(
            name.to_string(),
            Operator {
                name: name.to_string(),
                arity,
                apply: Arc::new(apply),
            },
        );
    }

    /// Resolve an operator by name, including the `LogN` family.
    pub fn resolve(&self, name: &str) -> Option<Operator> {
        if let Some(operator) = self.operators.get(name) {
            return Some(operator.clone());
        }

        let base: f64 = name.strip_prefix("Log")?.parse().ok()?;
        if base <= 0.0 || base == 1.0 || !base.is_finite() {
            return None;
        }
        let ln_base = base.ln();
        Some(Operator {
            name: name.to_string(),
            arity: 1,
            apply: Arc::new(move |a: &[f64]| a[0].ln() / ln_base),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Names of explicitly registered operators, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}
