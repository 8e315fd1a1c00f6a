//! Declarative formula language
//!
//! Formulas are prefix-call expressions over named fields, e.g.
//! `Add(Abs(positionZ),Mult(2,velocityZ))`. They are compiled once into a
//! [`Term`] tree and evaluated against any [`FieldLookup`].
//!
//! Evaluation never fails: a field that cannot be resolved reads as `0.0` and
//! an operator that was unknown at compile time evaluates to `-1.0`. Both are
//! logged so a broken definition is visible without aborting an episode.

mod engine;
pub mod operators;
mod parser;

use std::fmt;

use tracing::warn;

use crate::error::Result;
use crate::fields::FieldLookup;

pub use engine::ExpressionEngine;
pub use operators::{Operator, OperatorFn, OperatorRegistry};

/// Value produced by a call to an operator that was not registered.
pub const UNKNOWN_OPERATOR_VALUE: f64 = -1.0;

/// A node of a compiled formula.
#[derive(Debug, Clone)]
pub enum Term {
    /// Numeric literal or named constant. `text` is kept for printing.
    Literal {
        text: String,
        value: f64,
        negated: bool,
    },
    /// Reference to a named field.
    Field { name: String, negated: bool },
    /// Operator application. `operator` is `None` when the name did not resolve.
    Call {
        name: String,
        operator: Option<Operator>,
        args: Vec<Term>,
        negated: bool,
    },
}

impl Term {
    fn is_negated(&self) -> bool {
        match self {
            Term::Literal { negated, .. } | Term::Field { negated, .. } | Term::Call { negated, .. } => {
                *negated
            }
        }
    }

    fn evaluate_with<F>(&self, resolve: &F) -> f64
    where
        F: Fn(&str) -> f64,
    {
        let value = match self {
            Term::Literal { value, .. } => *value,
            Term::Field { name, .. } => resolve(name),
            Term::Call { operator, args, .. } => match operator {
                Some(operator) => {
                    let values: Vec<f64> = args.iter().map(|arg| arg.evaluate_with(resolve)).collect();
                    operator.apply(&values)
                }
                None => UNKNOWN_OPERATOR_VALUE,
            },
        };
        if self.is_negated() {
            -value
        } else {
            value
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Term::Literal { .. } => {}
            Term::Field { name, .. } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Term::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negated() {
            write!(f, "-")?;
        }
        match self {
            Term::Literal { text, .. } => write!(f, "{text}"),
            Term::Field { name, .. } => write!(f, "{name}"),
            Term::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A compiled formula.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Term,
}

impl Expression {
    /// Compile a formula with the built-in operator set and no caching.
    ///
    /// Prefer [`ExpressionEngine::compile`] when the same formulas are compiled repeatedly.
    pub fn parse(formula: &str) -> Result<Self> {
        Self::parse_with(formula, &OperatorRegistry::builtin())
    }

    pub(crate) fn parse_with(formula: &str, registry: &OperatorRegistry) -> Result<Self> {
        let source = strip_whitespace(formula);
        let root = parser::parse(&source, registry)?;
        Ok(Self { source, root })
    }

    /// The whitespace-free source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Term {
        &self.root
    }

    /// Evaluate against a single field source. Missing fields read as `0.0`.
    pub fn evaluate(&self, fields: &dyn FieldLookup) -> f64 {
        self.root.evaluate_with(&|name: &str| {
            fields.lookup(name).unwrap_or_else(|| {
                warn!(field = name, formula = %self.source, "Field not found, using 0");
                0.0
            })
        })
    }

    /// Evaluate with each field resolved from `primary` first, then `fallback`.
    ///
    /// Used for rewards, which may mention both state and action fields.
    pub fn evaluate_best_guess(&self, primary: &dyn FieldLookup, fallback: &dyn FieldLookup) -> f64 {
        self.root.evaluate_with(&|name: &str| {
            primary
                .lookup(name)
                .or_else(|| fallback.lookup(name))
                .unwrap_or_else(|| {
                    warn!(field = name, formula = %self.source, "Field not found in either record, using 0");
                    0.0
                })
        })
    }

    /// Field names referenced anywhere in the formula, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_fields(&mut out);
        out
    }

    /// Whether the formula is a bare identity call such as `(positionX)`.
    pub fn is_assignment(&self) -> bool {
        matches!(
            &self.root,
            Term::Call { name, args, negated: false, .. }
                if name.is_empty() && args.len() == 1 && matches!(args[0], Term::Field { .. })
        )
    }

    /// Symmetry axis carried by an assignment formula's source field, if any.
    pub fn assignment_axis(&self) -> Option<char> {
        if !self.is_assignment() {
            return None;
        }
        match &self.root {
            Term::Call { args, .. } => match &args[0] {
                Term::Field { name, .. } => axis_suffix(name),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// Trailing `X`/`Y` of a field name, the convention for planar symmetry axes.
pub fn axis_suffix(name: &str) -> Option<char> {
    match name.chars().last() {
        Some(c @ ('X' | 'Y')) if name.len() > 1 => Some(c),
        _ => None,
    }
}

/// Interpret a formula result as a boolean condition.
pub fn is_truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

pub(crate) fn strip_whitespace(formula: &str) -> String {
    formula.chars().filter(|c| !c.is_whitespace()).collect()
}
