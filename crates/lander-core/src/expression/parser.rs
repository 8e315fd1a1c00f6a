//! Recursive descent parser for formula strings
//!
//! Grammar:
//!
//! ```text
//! term     := ['-'] ( call | literal | field )
//! call     := Name '(' [ term { ',' term } ] ')'     (Name may be empty)
//! literal  := digit-leading number | all-uppercase constant (PI, E, TRUE, FALSE)
//! field    := lowercase-leading identifier
//! ```
//!
//! Input reaching this module has already had its whitespace removed.

use tracing::warn;

use super::operators::OperatorRegistry;
use super::Term;
use crate::error::{LanderError, Result};

/// Parse a whitespace-free formula into a term tree.
pub(crate) fn parse(formula: &str, registry: &OperatorRegistry) -> Result<Term> {
    check_balanced(formula)?;
    parse_term(formula, formula, registry)
}

fn check_balanced(formula: &str) -> Result<()> {
    let mut depth: i64 = 0;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(LanderError::malformed(formula, "unbalanced ')'"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(LanderError::malformed(
            formula,
            "mismatched number of open and closed parentheses",
        ));
    }
    Ok(())
}

/// Byte offset of the ')' closing the '(' at `open`.
fn matching_close(input: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in input[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split an argument list on the commas at parenthesis depth 0.
fn split_arguments(input: &str) -> Vec<&str> {
    if input.is_empty() {
        return Vec::new();
    }

    let mut arguments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (offset, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                arguments.push(&input[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    arguments.push(&input[start..]);
    arguments
}

/// Literal constants understood by the formula language.
pub(crate) fn parse_constant(text: &str) -> Option<f64> {
    match text {
        "PI" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        "TRUE" => Some(1.0),
        "FALSE" => Some(0.0),
        _ => text.parse().ok(),
    }
}

fn parse_term(input: &str, formula: &str, registry: &OperatorRegistry) -> Result<Term> {
    let (negated, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let first = body
        .chars()
        .next()
        .ok_or_else(|| LanderError::malformed(formula, "empty term"))?;

    if let Some(open) = body.find('(') {
        return parse_call(body, open, negated, formula, registry);
    }

    if body.contains(',') || body.contains(')') {
        return Err(LanderError::malformed(
            formula,
            format!("unexpected separator in '{body}'"),
        ));
    }

    if first.is_ascii_digit() || body == body.to_uppercase() {
        let value = parse_constant(body)
            .ok_or_else(|| LanderError::malformed(formula, format!("unknown constant '{body}'")))?;
        return Ok(Term::Literal {
            text: body.to_string(),
            value,
            negated,
        });
    }

    if first.is_lowercase() {
        return Ok(Term::Field {
            name: body.to_string(),
            negated,
        });
    }

    Err(LanderError::malformed(
        formula,
        format!("'{body}' is neither a lowercase field nor an uppercase constant"),
    ))
}

fn parse_call(
    body: &str,
    open: usize,
    negated: bool,
    formula: &str,
    registry: &OperatorRegistry,
) -> Result<Term> {
    let name = &body[..open];
    if name.starts_with(|c: char| !c.is_ascii_uppercase()) {
        return Err(LanderError::malformed(
            formula,
            format!("operator '{name}' must start with an uppercase letter"),
        ));
    }

    let close = matching_close(body, open)
        .ok_or_else(|| LanderError::malformed(formula, "unclosed '('"))?;
    if close != body.len() - 1 {
        return Err(LanderError::malformed(
            formula,
            format!("unexpected input after '{}'", &body[..=close]),
        ));
    }

    let args = split_arguments(&body[open + 1..close])
        .into_iter()
        .map(|argument| parse_term(argument, formula, registry))
        .collect::<Result<Vec<_>>>()?;

    let operator = registry.resolve(name);
    match &operator {
        Some(op) if op.arity() != args.len() => {
            return Err(LanderError::malformed(
                formula,
                format!(
                    "operator '{name}' takes {} argument(s), got {}",
                    op.arity(),
                    args.len()
                ),
            ));
        }
        Some(_) => {}
        None => {
            warn!(operator = name, formula, "Unknown operator, evaluates to -1.0");
        }
    }

    Ok(Term::Call {
        name: name.to_string(),
        operator,
        args,
        negated,
    })
}
