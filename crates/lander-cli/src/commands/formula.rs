//! Formula commands

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use lander_core::{ExpressionEngine, PhysicalSnapshot};

#[derive(Subcommand)]
pub enum FormulaCommands {
    /// Compile and evaluate a formula
    Eval {
        /// Formula text, e.g. "Add(Abs(positionX),Abs(positionY))"
        formula: String,

        /// Field value as name=value (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, f64)>,

        /// Physical snapshot (JSON) consulted for fields not given with --field
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },
}

pub async fn run(cmd: FormulaCommands) -> Result<()> {
    match cmd {
        FormulaCommands::Eval {
            formula,
            fields,
            snapshot,
        } => {
            let snapshot = match snapshot {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
                    serde_json::from_str(&text).context("Invalid snapshot")?
                }
                None => PhysicalSnapshot::default(),
            };
            println!("{}", eval(&formula, fields, &snapshot)?);
            Ok(())
        }
    }
}

fn parse_field(arg: &str) -> Result<(String, f64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{arg}'"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn eval(formula: &str, fields: Vec<(String, f64)>, snapshot: &PhysicalSnapshot) -> Result<String> {
    let expression = ExpressionEngine::new().compile(formula)?;
    let fields: HashMap<String, f64> = fields.into_iter().collect();
    let value = expression.evaluate_best_guess(&fields, snapshot);

    let mut out = format!("{expression} = {value}");
    let referenced = expression.fields();
    if !referenced.is_empty() {
        out.push_str(&format!("\nfields: {}", referenced.join(", ")));
    }
    if let Some(axis) = expression.assignment_axis() {
        out.push_str(&format!("\nassignment axis: {axis}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(parse_field("altitude=2.5").unwrap(), ("altitude".to_string(), 2.5));
        assert!(parse_field("altitude").is_err());
        assert!(parse_field("altitude=high").is_err());
    }

    #[test]
    fn test_eval_prefers_explicit_fields() {
        let mut snapshot = PhysicalSnapshot::default();
        snapshot.position.x = -4.0;
        snapshot.position.y = 1.0;

        let out = eval(
            "Add(Abs(positionX),Abs(positionY))",
            vec![("positionY".to_string(), 3.0)],
            &snapshot,
        )
        .unwrap();
        assert!(out.contains("= 7"), "{out}");
        assert!(out.contains("fields: positionX, positionY"));
    }

    #[test]
    fn test_eval_reports_assignment_axis() {
        let out = eval("(positionX)", vec![], &PhysicalSnapshot::default()).unwrap();
        assert!(out.contains("assignment axis: X"));
    }

    #[test]
    fn test_malformed_formula_fails() {
        assert!(eval("Add(1,", vec![], &PhysicalSnapshot::default()).is_err());
    }
}
