//! Integration tests for the formula engine
//!
//! Canonicalization, operator coverage and the degrade-gracefully rules.

#![allow(clippy::float_cmp)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use lander_core::fields::NoFields;
use lander_core::{Expression, ExpressionEngine, LanderError, PhysicalSnapshot};

fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
}

#[test]
fn test_stringify_equals_whitespace_stripped_source() {
    let engine = ExpressionEngine::new();
    let sources = [
        "Add( Abs(positionZ) , Mult(2 , velocityZ) )",
        "  -Abs(thrust) ",
        "And(Lt(altitude,10),Gt(altitude, 2))",
        "Atan2(velocityX,\tvelocityZ)",
        "( gimbalX )",
        "Sub(TRUE, FALSE)",
        "Div(1e-3,-PI)",
    ];
    for source in sources {
        let expr = engine.compile(source).unwrap();
        let stripped: String = source.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(expr.to_string(), stripped, "source: {source}");
    }
}

#[test]
fn test_unbalanced_formula_is_reported() {
    let engine = ExpressionEngine::new();
    for source in ["Add(1,2", "Abs(x))", ")(", "Mult((a,b)"] {
        match engine.compile(source) {
            Err(LanderError::MalformedFormula { formula, .. }) => {
                assert!(!formula.is_empty());
            }
            other => panic!("expected malformed formula for {source}, got {other:?}"),
        }
    }
}

#[test]
fn test_end_to_end_reward_formulas() {
    let engine = ExpressionEngine::new();
    let reward = engine.compile("-Abs(thrust)").unwrap();
    let terminal = engine.compile("-Abs(altitude)").unwrap();

    assert_eq!(reward.evaluate(&values(&[("thrust", 1.0)])), -1.0);
    assert_eq!(reward.evaluate(&values(&[("thrust", 0.0)])), 0.0);
    assert_eq!(terminal.evaluate(&values(&[("altitude", 5.0)])), -5.0);
}

#[test]
fn test_trigonometry_and_logs() {
    let expr = Expression::parse("Add(Pow(Sin(x),2),Pow(Cos(x),2))").unwrap();
    let v = expr.evaluate(&values(&[("x", 0.7)]));
    assert!((v - 1.0).abs() < 1e-12);

    let log = Expression::parse("Log2(Exp(0))").unwrap();
    assert_eq!(log.evaluate(&NoFields), 0.0);

    let degrees = Expression::parse("Todeg(PI)").unwrap();
    assert!((degrees.evaluate(&NoFields) - 180.0).abs() < 1e-9);
}

#[test]
fn test_boolean_guard_formula() {
    let expr = Expression::parse("And(Gt(positionZ,1),Le(Abs(velocityZ),2))").unwrap();
    assert_eq!(expr.evaluate(&values(&[("positionZ", 3.0), ("velocityZ", -1.5)])), 1.0);
    assert_eq!(expr.evaluate(&values(&[("positionZ", 3.0), ("velocityZ", -2.5)])), 0.0);
}

#[test]
fn test_unknown_operator_and_missing_field_degrade() {
    let expr = Expression::parse("Add(Mystery(x),y)").unwrap();
    // Mystery(..) is -1, y is missing and reads 0.
    assert_eq!(expr.evaluate(&values(&[("x", 4.0)])), -1.0);
}

#[test]
fn test_best_guess_across_state_and_action() {
    let expr = Expression::parse("Sub(altitude,Mult(10,thrust))").unwrap();
    let state = values(&[("altitude", 20.0)]);
    let action = values(&[("thrust", 0.5), ("altitude", -99.0)]);
    assert_eq!(expr.evaluate_best_guess(&state, &action), 15.0);
    assert_eq!(expr.evaluate_best_guess(&NoFields, &NoFields), 0.0);
}

#[test]
fn test_formula_over_physical_snapshot() {
    let mut snapshot = PhysicalSnapshot::default();
    snapshot.position.z = 7.0;
    snapshot.velocity.z = -2.0;
    let expr = Expression::parse("Add(positionZ,velocityZ)").unwrap();
    assert_eq!(expr.evaluate(&snapshot), 5.0);
}

#[test]
fn test_shared_engine_across_threads() {
    let engine = Arc::new(ExpressionEngine::new());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let expr = engine.compile("Mult(x, 3)").unwrap();
                expr.evaluate(&values(&[("x", f64::from(i))]))
            })
        })
        .collect();

    let results: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![0.0, 3.0, 6.0, 9.0]);
    assert_eq!(engine.cached(), 1);
}
