//! MDP definitions
//!
//! An [`MdpDocument`] is the authored, serde-friendly description of one
//! decision problem. [`MdpDocument::finalize`] validates it, compiles its
//! formulas and derives the transient tables (quantizers, child ids, index
//! layout) into an immutable [`MdpDefinition`] that episodes share.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use lander_core::expression::axis_suffix;
use lander_core::{Expression, ExpressionEngine, LanderError, PhysicalSnapshot, Result};

use crate::algorithm::{LearningAlgorithm, LearningParams};
use crate::index::{Backing, FieldRange, IndexLayout};
use crate::quantize::{declared_in_degrees, is_angle_field, Quantizer};
use crate::state::{Action, QuantizedRecord, State};

/// Dense tables are allocated up to this many entries.
pub const DEFAULT_DENSE_TABLE_CAP: u64 = 10_000_000;

/// Planar axis of a symmetric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::X, Axis::Y];

    pub fn suffix(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
        }
    }

    /// Axis named by a trailing `X`/`Y` on a field name.
    pub fn of_field(name: &str) -> Option<Axis> {
        match axis_suffix(name) {
            Some('X') => Some(Axis::X),
            Some('Y') => Some(Axis::Y),
            _ => None,
        }
    }

    /// `name` with the axis suffix appended, or `name` unchanged without an axis.
    pub fn tag(name: &str, axis: Option<Axis>) -> String {
        match axis {
            Some(axis) => format!("{name}{}", axis.suffix()),
            None => name.to_string(),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

// ============================================================================
// Authored document
// ============================================================================

/// One state or action field: declared range and bucket width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, min: f64, max: f64, precision: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            precision: Some(precision),
        }
    }
}

/// `when` evaluates truthy against the state => `child` is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRule {
    pub when: String,
    pub child: String,
}

/// Action field whose value names a child definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSelector {
    pub field: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SelectionRule>,
}

/// Derived field computed from a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    pub formula: String,
}

/// Inclusive bounds on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Field values at which no new action is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoActionSpec {
    pub name: String,
    pub values: Vec<f64>,
}

/// Authored MDP definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdpDocument {
    pub name: String,
    pub methods: Vec<LearningAlgorithm>,
    /// Lower runs first; the first definition after sorting is the root.
    pub priority: i32,
    pub reward: Option<String>,
    pub terminal_reward: Option<String>,
    pub discount: f64,
    pub step_discount: f64,
    pub alpha: f64,
    pub exploration: f64,
    pub symmetry_axes: Vec<String>,
    pub pass_down_symmetry: bool,
    pub state: Vec<FieldSpec>,
    pub action: Vec<FieldSpec>,
    pub children: Vec<ChildSelector>,
    pub formulas: Vec<DerivedField>,
    pub success: Vec<Bounds>,
    pub no_action: Vec<NoActionSpec>,
}

impl Default for MdpDocument {
    fn default() -> Self {
        let params = LearningParams::default();
        Self {
            name: String::new(),
            methods: vec![LearningAlgorithm::MonteCarlo],
            priority: 0,
            reward: None,
            terminal_reward: None,
            discount: params.discount,
            step_discount: params.step_discount,
            alpha: params.alpha,
            exploration: params.exploration,
            symmetry_axes: Vec::new(),
            pass_down_symmetry: false,
            state: Vec::new(),
            action: Vec::new(),
            children: Vec::new(),
            formulas: Vec::new(),
            success: Vec::new(),
            no_action: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    List(Vec<MdpDocument>),
    Wrapped { definitions: Vec<MdpDocument> },
}

impl DocumentFile {
    fn into_documents(self) -> Vec<MdpDocument> {
        match self {
            DocumentFile::List(documents) | DocumentFile::Wrapped { definitions: documents } => documents,
        }
    }
}

/// On-disk encoding of a definitions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Format implied by a file extension; anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse a definitions file: a list of documents or `{ definitions = [...] }`.
pub fn parse_documents(text: &str, format: DocumentFormat) -> Result<Vec<MdpDocument>> {
    let file: DocumentFile = match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Toml => toml::from_str(text)
            .map_err(|e| LanderError::Definition(format!("invalid TOML definitions: {e}")))?,
    };
    Ok(file.into_documents())
}

/// Read and parse a definitions file, picking the format from its extension.
pub fn load_documents(path: &Path) -> Result<Vec<MdpDocument>> {
    let text = std::fs::read_to_string(path)?;
    parse_documents(&text, DocumentFormat::from_path(path))
}

impl MdpDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Stock lander definition: vertical descent with two gimbal stabilizers.
    pub fn default_lander() -> Self {
        Self {
            name: "defaultLander".to_string(),
            priority: 1,
            reward: Some("-Div(Abs(thrust),100.0)".to_string()),
            terminal_reward: Some("-Abs(velocityZ)".to_string()),
            state: vec![
                FieldSpec::new("angle", -35.0, 35.0, 5.0),
                FieldSpec::new("log2PositionZ", 0.0, 5.6, 0.3),
                FieldSpec::new("log2VelocityZ", -5.0, 2.3, 0.3),
            ],
            action: vec![FieldSpec::new("thrust", 0.0, 1.0, 0.25)],
            children: ["gimbalMDPX", "gimbalMDPY"]
                .iter()
                .map(|field| {
                    let axis = &field[field.len() - 1..];
                    ChildSelector {
                        field: (*field).to_string(),
                        options: vec!["stabilizer".to_string(), "reacher".to_string()],
                        rules: vec![
                            SelectionRule {
                                when: format!("And(Gt(Abs(position{axis}),3.0),FALSE)"),
                                child: "reacher".to_string(),
                            },
                            SelectionRule {
                                when: format!(
                                    "And(Le(Abs(position{axis}),3.0),Le(Abs(angle{axis}),Asin(Div(PI,16))))"
                                ),
                                child: "stabilizer".to_string(),
                            },
                        ],
                    }
                })
                .collect(),
            formulas: vec![
                derived("position", "Add(Abs(positionX),Abs(positionY))"),
                derived("angle", "Add(Abs(angleX),Abs(angleY))"),
                derived("log2PositionZ", "Log2(Add(positionZ,1))"),
                derived("log8PositionZ", "Log8(Add(positionZ,1))"),
                derived("log2VelocityZ", "Mult(Signum(velocityZ),Log2(Add(Abs(velocityZ),1)))"),
                derived("log8VelocityZ", "Mult(Signum(velocityZ),Log8(Add(Abs(velocityZ),1)))"),
            ],
            success: vec![Bounds {
                name: "velocityZ".to_string(),
                min: -2.0,
                max: 2.0,
            }],
            ..Default::default()
        }
    }

    fn params(&self) -> LearningParams {
        LearningParams {
            discount: self.discount,
            step_discount: self.step_discount,
            alpha: self.alpha,
            exploration: self.exploration,
        }
    }

    /// Validate, compile and derive every transient table.
    ///
    /// Structural problems are errors. Formulas that fail to compile are logged
    /// and treated as absent.
    pub fn finalize(&self, expressions: &ExpressionEngine, dense_table_cap: u64) -> Result<MdpDefinition> {
        let invalid = |reason: String| LanderError::Definition(format!("'{}': {reason}", self.name));

        if self.name.trim().is_empty() {
            return Err(LanderError::Definition("definition without a name".to_string()));
        }
        let params = self.params();
        params.validate().map_err(invalid)?;

        let symmetry_axes: Vec<String> = self.symmetry_axes.clone();
        let symmetric: HashSet<&str> = symmetry_axes.iter().map(String::as_str).collect();

        // Child ids in order of first appearance across all option lists.
        let mut child_names: Vec<String> = Vec::new();
        for selector in &self.children {
            for option in &selector.options {
                if !child_names.contains(option) {
                    child_names.push(option.clone());
                }
            }
        }
        let child_id = |name: &str| child_names.iter().position(|n| n == name).map(|id| id as i64);

        let mut seen = HashSet::new();
        let mut quantizers = HashMap::new();
        let mut state_fields = Vec::with_capacity(self.state.len());
        let mut action_fields = Vec::with_capacity(self.action.len());
        let mut state_ranges = Vec::with_capacity(self.state.len());
        let mut action_ranges = Vec::with_capacity(self.action.len());

        for (spec, is_action) in self
            .state
            .iter()
            .map(|spec| (spec, false))
            .chain(self.action.iter().map(|spec| (spec, true)))
        {
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", spec.name)));
            }

            let selector = self.children.iter().find(|c| c.field == spec.name);
            let field = match selector {
                Some(selector) if is_action => {
                    let ids: Vec<i64> = selector.options.iter().filter_map(|o| child_id(o.as_str())).collect();
                    let (min, max) = match (ids.iter().min(), ids.iter().max()) {
                        (Some(&min), Some(&max)) => (min as f64, max as f64),
                        _ => return Err(invalid(format!("selector '{}' has no options", spec.name))),
                    };
                    FieldSpec::new(spec.name.clone(), min, max, 1.0)
                }
                _ => convert_field(spec).map_err(&invalid)?,
            };

            let precision = field.precision.unwrap_or(1.0);
            let quantizer = Quantizer::for_range(field.min, precision);
            let range = FieldRange::new(field.name.clone(), quantizer.bucket(field.min), quantizer.bucket(field.max));

            quantizers.insert(field.name.clone(), quantizer);
            if symmetric.contains(field.name.as_str()) {
                for suffix in ["X", "Y", "Z"] {
                    quantizers.insert(format!("{}{suffix}", field.name), quantizer);
                }
            }

            if is_action {
                action_fields.push(field);
                action_ranges.push(range);
            } else {
                state_fields.push(field);
                state_ranges.push(range);
            }
        }

        let mut selectors = Vec::with_capacity(self.children.len());
        for selector in &self.children {
            if selector.options.is_empty() {
                return Err(invalid(format!("selector '{}' has no options", selector.field)));
            }
            let indexed = action_fields.iter().any(|f| f.name == selector.field);
            if !indexed {
                quantizers.insert(selector.field.clone(), Quantizer::new(1.0, 0.0));
            }
            let rules = selector
                .rules
                .iter()
                .filter_map(|rule| {
                    compile_or_log(expressions, &self.name, "selection rule", &rule.when).map(|condition| {
                        CompiledRule {
                            condition,
                            child: rule.child.clone(),
                        }
                    })
                })
                .collect();
            let mut option_ids: Vec<i64> = Vec::with_capacity(selector.options.len());
            for id in selector.options.iter().filter_map(|o| child_id(o.as_str())) {
                if !option_ids.contains(&id) {
                    option_ids.push(id);
                }
            }
            selectors.push(Selector {
                field: selector.field.clone(),
                option_ids,
                options: selector.options.clone(),
                rules,
                indexed,
            });
        }

        let formulas: Vec<(String, Arc<Expression>)> = self
            .formulas
            .iter()
            .filter_map(|derived| {
                compile_or_log(expressions, &self.name, &derived.name, &derived.formula)
                    .map(|expr| (derived.name.clone(), expr))
            })
            .collect();

        let reward = self
            .reward
            .as_deref()
            .and_then(|f| compile_or_log(expressions, &self.name, "reward", f));
        let terminal_reward = self
            .terminal_reward
            .as_deref()
            .and_then(|f| compile_or_log(expressions, &self.name, "terminal reward", f));

        let mut success = Vec::with_capacity(self.success.len());
        for bounds in &self.success {
            if bounds.min > bounds.max {
                return Err(invalid(format!("success bounds of '{}' have min > max", bounds.name)));
            }
            let mut bounds = bounds.clone();
            if is_angle_field(&bounds.name) && declared_in_degrees(bounds.min, bounds.max, None) {
                bounds.min = bounds.min.to_radians();
                bounds.max = bounds.max.to_radians();
            }
            success.push(bounds);
        }

        let layout = IndexLayout::new(state_ranges, action_ranges, dense_table_cap).map_err(|e| match e {
            LanderError::Definition(reason) => invalid(reason),
            other => other,
        })?;

        let definition = MdpDefinition {
            name: self.name.clone(),
            methods: self.methods.clone(),
            priority: self.priority,
            params,
            reward,
            terminal_reward,
            formulas,
            symmetry_axes,
            pass_down_symmetry: self.pass_down_symmetry,
            state_fields,
            action_fields,
            quantizers,
            child_names,
            selectors,
            success,
            no_action: self.no_action.clone(),
            layout,
        };
        definition.warn_unresolved_fields();
        Ok(definition)
    }
}

fn derived(name: &str, formula: &str) -> DerivedField {
    DerivedField {
        name: name.to_string(),
        formula: formula.to_string(),
    }
}

/// Check a state/action field and apply the degree-to-radian conversion.
fn convert_field(spec: &FieldSpec) -> std::result::Result<FieldSpec, String> {
    let precision = spec
        .precision
        .ok_or_else(|| format!("field '{}' has no precision", spec.name))?;
    if !(precision > 0.0) || !precision.is_finite() {
        return Err(format!("field '{}' has non-positive precision {precision}", spec.name));
    }
    if !spec.min.is_finite() || !spec.max.is_finite() || spec.min > spec.max {
        return Err(format!(
            "field '{}' has invalid bounds [{}, {}]",
            spec.name, spec.min, spec.max
        ));
    }

    let mut field = spec.clone();
    if is_angle_field(&field.name) && declared_in_degrees(field.min, field.max, field.precision) {
        field.min = field.min.to_radians();
        field.max = field.max.to_radians();
        field.precision = Some(precision.to_radians());
    }
    Ok(field)
}

fn compile_or_log(
    expressions: &ExpressionEngine,
    definition: &str,
    what: &str,
    formula: &str,
) -> Option<Arc<Expression>> {
    match expressions.compile(formula) {
        Ok(expr) => Some(expr),
        Err(e) => {
            error!(definition, what, error = %e, "Formula rejected, treating as absent");
            None
        }
    }
}

// ============================================================================
// Finalized definition
// ============================================================================

/// Compiled selection rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub condition: Arc<Expression>,
    pub child: String,
}

/// Finalized child selector.
#[derive(Debug, Clone)]
pub struct Selector {
    field: String,
    options: Vec<String>,
    option_ids: Vec<i64>,
    rules: Vec<CompiledRule>,
    indexed: bool,
}

impl Selector {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn option_ids(&self) -> &[i64] {
        &self.option_ids
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Whether the selector is declared among the action fields and indexed.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Axis a child chosen here runs on, given the parent's own axis.
    pub fn child_axis(&self, parent: Option<Axis>, pass_down: bool) -> Option<Axis> {
        let field = if pass_down {
            Axis::tag(&self.field, parent)
        } else {
            self.field.clone()
        };
        Axis::of_field(&field)
    }
}

/// Immutable, finalized MDP definition shared by every episode.
#[derive(Debug)]
pub struct MdpDefinition {
    name: String,
    methods: Vec<LearningAlgorithm>,
    priority: i32,
    params: LearningParams,
    reward: Option<Arc<Expression>>,
    terminal_reward: Option<Arc<Expression>>,
    formulas: Vec<(String, Arc<Expression>)>,
    symmetry_axes: Vec<String>,
    pass_down_symmetry: bool,
    state_fields: Vec<FieldSpec>,
    action_fields: Vec<FieldSpec>,
    quantizers: HashMap<String, Quantizer>,
    child_names: Vec<String>,
    selectors: Vec<Selector>,
    success: Vec<Bounds>,
    no_action: Vec<NoActionSpec>,
    layout: IndexLayout,
}

impl MdpDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[LearningAlgorithm] {
        &self.methods
    }

    pub fn uses(&self, algorithm: LearningAlgorithm) -> bool {
        self.methods.contains(&algorithm)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn params(&self) -> &LearningParams {
        &self.params
    }

    pub fn reward(&self) -> Option<&Expression> {
        self.reward.as_deref()
    }

    pub fn terminal_reward(&self) -> Option<&Expression> {
        self.terminal_reward.as_deref()
    }

    /// Derived fields in evaluation order.
    pub fn formulas(&self) -> &[(String, Arc<Expression>)] {
        &self.formulas
    }

    pub fn symmetry_axes(&self) -> &[String] {
        &self.symmetry_axes
    }

    pub fn is_symmetric(&self) -> bool {
        !self.symmetry_axes.is_empty()
    }

    pub fn is_symmetry_axis(&self, field: &str) -> bool {
        self.symmetry_axes.iter().any(|axis| axis == field)
    }

    pub fn pass_down_symmetry(&self) -> bool {
        self.pass_down_symmetry
    }

    /// State fields after angle conversion, in declaration order.
    pub fn state_fields(&self) -> &[FieldSpec] {
        &self.state_fields
    }

    /// Action fields after angle conversion and selector re-bounding.
    pub fn action_fields(&self) -> &[FieldSpec] {
        &self.action_fields
    }

    pub fn is_state_field(&self, field: &str) -> bool {
        self.state_fields.iter().any(|f| f.name == field)
    }

    pub fn is_action_field(&self, field: &str) -> bool {
        self.action_fields.iter().any(|f| f.name == field)
    }

    /// Quantizer for a field: exact name, then without an X/Y suffix, then the default.
    pub fn quantizer(&self, field: &str) -> Quantizer {
        if let Some(q) = self.quantizers.get(field) {
            return *q;
        }
        if Axis::of_field(field).is_some() {
            if let Some(q) = self.quantizers.get(&field[..field.len() - 1]) {
                return *q;
            }
        }
        Quantizer::DEFAULT
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn selector(&self, field: &str) -> Option<&Selector> {
        self.selectors.iter().find(|s| s.field == field)
    }

    /// Child definition names referenced by any selector, in id order.
    pub fn child_names(&self) -> &[String] {
        &self.child_names
    }

    pub fn child_id(&self, name: &str) -> Option<i64> {
        self.child_names.iter().position(|n| n == name).map(|id| id as i64)
    }

    pub fn child_name(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.child_names.get(id))
            .map(String::as_str)
    }

    pub fn success(&self) -> &[Bounds] {
        &self.success
    }

    pub fn no_action(&self) -> &[NoActionSpec] {
        &self.no_action
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn table_size(&self) -> u64 {
        self.layout.total()
    }

    pub fn backing(&self) -> Backing {
        self.layout.backing()
    }

    /// Flattened table index of a (state, action) pair owned by this definition.
    pub fn index_of(&self, state: &State, action: &Action) -> Result<u64> {
        for owner in [state.definition().name(), action.definition().name()] {
            if owner != self.name {
                return Err(LanderError::DefinitionMismatch {
                    expected: self.name.clone(),
                    found: owner.to_string(),
                });
            }
        }

        let state_buckets: Vec<i64> = self
            .layout
            .state_ranges()
            .iter()
            .map(|range| state.get(&range.name).unwrap_or(range.min))
            .collect();
        let action_buckets: Vec<i64> = self
            .layout
            .action_ranges()
            .iter()
            .map(|range| action.get(&range.name).unwrap_or(range.min))
            .collect();
        Ok(self.layout.index(&state_buckets, &action_buckets))
    }

    fn known_field(&self, field: &str) -> bool {
        let base = match Axis::of_field(field) {
            Some(_) => &field[..field.len() - 1],
            None => field,
        };
        [field, base].iter().any(|name| {
            self.quantizers.contains_key(*name)
                || self.formulas.iter().any(|(derived, _)| derived.as_str() == *name)
                || PhysicalSnapshot::is_physical_field(name)
        })
    }

    fn warn_unresolved_fields(&self) {
        let mut expressions: Vec<(&str, &Expression)> = Vec::new();
        if let Some(reward) = &self.reward {
            expressions.push(("reward", reward.as_ref()));
        }
        if let Some(terminal) = &self.terminal_reward {
            expressions.push(("terminal reward", terminal.as_ref()));
        }
        for (name, expr) in &self.formulas {
            expressions.push((name.as_str(), expr.as_ref()));
        }
        for selector in &self.selectors {
            for rule in &selector.rules {
                expressions.push((selector.field.as_str(), rule.condition.as_ref()));
            }
        }

        for (what, expr) in expressions {
            for field in expr.fields() {
                if !self.known_field(field) {
                    warn!(
                        definition = %self.name,
                        what,
                        field,
                        "Formula references a field no record carries, it will read 0"
                    );
                }
            }
        }
    }
}

impl fmt::Display for MdpDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (priority {}, {} entries, {})",
            self.name,
            self.priority,
            self.layout.total(),
            self.layout.backing()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalize(doc: &MdpDocument) -> Result<MdpDefinition> {
        doc.finalize(&ExpressionEngine::new(), DEFAULT_DENSE_TABLE_CAP)
    }

    fn altitude_doc() -> MdpDocument {
        MdpDocument {
            state: vec![FieldSpec::new("altitude", 0.0, 10.0, 1.0)],
            action: vec![FieldSpec::new("thrust", 0.0, 1.0, 0.5)],
            reward: Some("-Abs(thrust)".to_string()),
            terminal_reward: Some("-Abs(altitude)".to_string()),
            ..MdpDocument::new("altitude")
        }
    }

    #[test]
    fn test_finalize_computes_layout() {
        let def = finalize(&altitude_doc()).unwrap();
        assert_eq!(def.table_size(), 11 * 3);
        assert_eq!(def.backing(), Backing::Dense);
        assert!(def.reward().is_some());
        assert_eq!(def.methods(), &[LearningAlgorithm::MonteCarlo]);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut doc = altitude_doc();
        doc.action.push(FieldSpec::new("altitude", 0.0, 1.0, 1.0));
        assert!(matches!(finalize(&doc), Err(LanderError::Definition(_))));
    }

    #[test]
    fn test_bad_precision_and_bounds_rejected() {
        let mut doc = altitude_doc();
        doc.state[0].precision = Some(0.0);
        assert!(finalize(&doc).is_err());

        let mut doc = altitude_doc();
        doc.state[0].min = 20.0;
        assert!(finalize(&doc).is_err());

        let mut doc = altitude_doc();
        doc.state[0].precision = None;
        assert!(finalize(&doc).is_err());
    }

    #[test]
    fn test_malformed_formula_treated_as_absent() {
        let mut doc = altitude_doc();
        doc.reward = Some("Add(thrust,".to_string());
        let def = finalize(&doc).unwrap();
        assert!(def.reward().is_none());
        assert!(def.terminal_reward().is_some());
    }

    #[test]
    fn test_angles_converted_to_radians() {
        let mut doc = altitude_doc();
        doc.state.push(FieldSpec::new("angle", -35.0, 35.0, 5.0));
        doc.success.push(Bounds {
            name: "angleX".to_string(),
            min: -10.0,
            max: 10.0,
        });
        let def = finalize(&doc).unwrap();
        let angle = def.state_fields().iter().find(|f| f.name == "angle").unwrap();
        assert!((angle.max - 35f64.to_radians()).abs() < 1e-12);
        assert!((def.quantizer("angle").precision - 5f64.to_radians()).abs() < 1e-12);
        assert!((def.success()[0].max - 10f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_quantizer_fallbacks() {
        let mut doc = altitude_doc();
        doc.state.push(FieldSpec::new("position", -10.0, 10.0, 2.0));
        doc.symmetry_axes = vec!["position".to_string()];
        let def = finalize(&doc).unwrap();

        assert_eq!(def.quantizer("positionX").precision, 2.0);
        assert_eq!(def.quantizer("positionZ").precision, 2.0);
        assert_eq!(def.quantizer("altitudeY").precision, 1.0);
        assert_eq!(def.quantizer("unknown"), Quantizer::DEFAULT);
    }

    #[test]
    fn test_child_ids_and_selector_rebounding() {
        let mut doc = altitude_doc();
        doc.children = vec![
            ChildSelector {
                field: "gimbalMDPX".to_string(),
                options: vec!["stabilizer".to_string(), "reacher".to_string()],
                rules: vec![],
            },
            ChildSelector {
                field: "lateralMDP".to_string(),
                options: vec!["reacher".to_string(), "hover".to_string()],
                rules: vec![],
            },
        ];
        doc.action.push(FieldSpec {
            name: "lateralMDP".to_string(),
            min: 0.0,
            max: 0.0,
            precision: None,
        });
        let def = finalize(&doc).unwrap();

        assert_eq!(def.child_id("stabilizer"), Some(0));
        assert_eq!(def.child_id("reacher"), Some(1));
        assert_eq!(def.child_id("hover"), Some(2));
        assert_eq!(def.child_name(2), Some("hover"));
        assert_eq!(def.child_name(-1), None);

        let lateral = def.action_fields().iter().find(|f| f.name == "lateralMDP").unwrap();
        assert_eq!((lateral.min, lateral.max, lateral.precision), (1.0, 2.0, Some(1.0)));
        assert!(def.selector("lateralMDP").unwrap().is_indexed());
        assert!(!def.selector("gimbalMDPX").unwrap().is_indexed());
        assert_eq!(def.table_size(), 11 * 3 * 2);
    }

    #[test]
    fn test_selector_axis() {
        let selector = Selector {
            field: "gimbalMDP".to_string(),
            options: vec![],
            option_ids: vec![],
            rules: vec![],
            indexed: false,
        };
        assert_eq!(selector.child_axis(Some(Axis::Y), true), Some(Axis::Y));
        assert_eq!(selector.child_axis(Some(Axis::Y), false), None);
    }

    #[test]
    fn test_parse_documents_json_and_toml() {
        let json = r#"[{"name": "a", "methods": ["MC", "TD0"], "state": [{"name": "x", "min": 0, "max": 1, "precision": 1}]}]"#;
        let docs = parse_documents(json, DocumentFormat::Json).unwrap();
        assert_eq!(docs[0].methods, vec![LearningAlgorithm::MonteCarlo, LearningAlgorithm::TemporalDifference]);
        assert_eq!(docs[0].alpha, 0.1);

        let wrapped = r#"{"definitions": [{"name": "b"}]}"#;
        assert_eq!(parse_documents(wrapped, DocumentFormat::Json).unwrap()[0].name, "b");

        let toml_text = r#"
            [[definitions]]
            name = "c"
            priority = 2
            reward = "-Abs(thrust)"

            [[definitions.action]]
            name = "thrust"
            min = 0.0
            max = 1.0
            precision = 0.25
        "#;
        let docs = parse_documents(toml_text, DocumentFormat::Toml).unwrap();
        assert_eq!(docs[0].priority, 2);
        assert_eq!(docs[0].action[0].precision, Some(0.25));
    }

    #[test]
    fn test_default_lander_finalizes() {
        let def = finalize(&MdpDocument::default_lander()).unwrap();
        assert_eq!(def.selectors().len(), 2);
        assert_eq!(def.child_names(), &["stabilizer".to_string(), "reacher".to_string()]);
        assert_eq!(def.formulas().len(), 6);
    }
}
