//! Configuration documents
//!
//! Three JSON documents describe a problem: the run environment (paths,
//! executables, simulation inputs), the parameter space, and the objective
//! space. They are read once at startup, validated, and never mutated.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::ana::RuleTemplate;
use crate::error::{Result, TrialError};
use crate::naming::Stage;

/// Read a JSON document, failing loudly if it does not exist
pub fn read_json_file(path: &Path) -> Result<Value> {
    if !path.is_file() {
        return Err(TrialError::ConfigMissing {
            what: format!("file {}", path.display()),
        });
    }
    let text = fs::read_to_string(path).map_err(|e| TrialError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| TrialError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn from_document<T: serde::de::DeserializeOwned>(value: Value, origin: &Path) -> Result<T> {
    serde_json::from_value(value).map_err(|source| {
        let message = source.to_string();
        match message.strip_prefix("missing field ") {
            Some(rest) => TrialError::ConfigMissing {
                what: format!(
                    "key {} in {}",
                    rest.split_whitespace().next().unwrap_or(rest),
                    origin.display()
                ),
            },
            None => TrialError::Json {
                path: origin.to_path_buf(),
                source,
            },
        }
    })
}

// ============================================================================
// Run configuration
// ============================================================================

/// Kind of primary generator a simulation input uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// Particle gun configured in the steering file
    Gun,
    /// Geant4 general particle source driven by a macro file
    Gps,
    /// Event-generator files read by the steering file
    Hepmc,
}

impl std::str::FromStr for InputType {
    type Err = TrialError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gun" => Ok(InputType::Gun),
            "gps" => Ok(InputType::Gps),
            "hepmc" => Ok(InputType::Hepmc),
            other => Err(TrialError::UnknownInputType(other.to_string())),
        }
    }
}

/// One named group of simulation inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimInput {
    /// Directory holding the steering files of the group
    pub location: PathBuf,
    /// Input type token (`gun`, `gps`, `hepmc`)
    #[serde(rename = "type")]
    pub input_type: String,
}

impl SimInput {
    pub fn kind(&self) -> Result<InputType> {
        self.input_type.parse()
    }
}

fn default_merge_exec() -> String {
    "hadd".to_string()
}

/// Run and environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root of the detector geometry description
    pub det_path: PathBuf,
    /// Top-level detector configuration, without `.xml`
    pub det_config: String,
    /// Script that sets up the detector installation
    pub epic_setup: String,
    /// Optional script that sets up a reconstruction installation
    #[serde(default)]
    pub eicrecon_setup: Option<String>,
    /// Where stage outputs go, one subdirectory per trial
    pub out_path: PathBuf,
    /// Where driver scripts go, one subdirectory per trial
    pub run_path: PathBuf,
    pub sim_exec: String,
    #[serde(default)]
    pub sim_args: Vec<String>,
    pub rec_exec: String,
    #[serde(default)]
    pub rec_args: Vec<String>,
    /// Collections the reconstruction writes out
    #[serde(default)]
    pub rec_collect: Vec<String>,
    /// Overlap checker; when set, trial scripts run the overlap gate
    #[serde(default)]
    pub overlap_check: Option<String>,
    #[serde(default = "default_merge_exec")]
    pub merge_exec: String,
    /// Container wrapper used to run trial scripts
    #[serde(default)]
    pub eic_shell: Option<String>,
    pub sim_input: IndexMap<String, SimInput>,
    /// Propagate renamed files through every file that includes them
    #[serde(default)]
    pub propagate_includes: bool,
    /// Options passed through untouched to the scheduler
    #[serde(default)]
    pub scheduler: IndexMap<String, Value>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: RunConfig = from_document(read_json_file(path)?, path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let config: RunConfig = from_document(value, Path::new("<run config>"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sim_input.is_empty() {
            return Err(TrialError::ConfigMissing {
                what: "at least one entry in sim_input".to_string(),
            });
        }
        for input in self.sim_input.values() {
            input.kind()?;
        }
        Ok(())
    }

    /// Output directory of a trial
    pub fn trial_out_dir(&self, tag: &str) -> PathBuf {
        self.out_path.join(tag)
    }

    /// Script directory of a trial
    pub fn trial_run_dir(&self, tag: &str) -> PathBuf {
        self.run_path.join(tag)
    }
}

// ============================================================================
// Parameter space
// ============================================================================

/// A proposed or declared parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Convert a plain JSON scalar
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ParamValue::Int(i)),
                None => n.as_f64().map(ParamValue::Float),
            },
            Value::String(s) => Some(ParamValue::Str(s.clone())),
            _ => None,
        }
    }

    /// Interpret a literal written as a string (`"1.5"`, `"3"`, `"True"`)
    pub fn parse_literal(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return ParamValue::Float(f);
        }
        match trimmed {
            "True" | "true" => ParamValue::Bool(true),
            "False" | "false" => ParamValue::Bool(false),
            _ => ParamValue::Str(trimmed.trim_matches(|c| c == '\'' || c == '"').to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Literal with units attached as `<value>*<units>`
    pub fn with_units(&self, units: &str) -> String {
        if units.is_empty() {
            self.to_string()
        } else {
            format!("{}*{}", self, units)
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => f.write_str(&float_literal(*v)),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

/// Shortest round-trip float literal, scientific below 1e-4 and from 1e16
///
/// `5.0`, `0.25`, `1e-05`, `1.5e+16`.
fn float_literal(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let scientific = format!("{:e}", v);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if (-4..16).contains(&exponent) {
        if v.fract() == 0.0 {
            format!("{:.1}", v)
        } else {
            format!("{}", v)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Range,
    Choice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    #[serde(alias = "string")]
    Str,
    Bool,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Bool => "bool",
        }
    }
}

/// Where a parameter's value lands
#[derive(Debug, Clone, PartialEq)]
pub enum ParamTarget {
    /// An attribute of an element inside a geometry file
    Compact {
        /// Geometry file, relative to the detector root
        compact: String,
        /// Element selector inside that file
        path: String,
        /// Attribute to set
        element: String,
        units: String,
    },
    /// A reconstruction argument, optionally one slot of a vector argument
    RecoArg {
        path: String,
        units: String,
        index: Option<usize>,
    },
}

/// A declared optimization parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParamType,
    pub value_type: ValueType,
    /// Inclusive bounds, present iff `param_type` is range
    pub bounds: Option<(ParamValue, ParamValue)>,
    /// Allowed values, present iff `param_type` is choice
    pub domain: Option<Vec<ParamValue>>,
    pub is_ordered: bool,
    pub target: ParamTarget,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    stage: String,
    param_type: ParamType,
    value_type: ValueType,
    #[serde(default)]
    lower: Option<Value>,
    #[serde(default)]
    upper: Option<Value>,
    #[serde(default)]
    domain: Option<Value>,
    #[serde(default)]
    is_ordered: Option<Value>,
    #[serde(default)]
    compact: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    element: Option<String>,
    #[serde(default)]
    units: String,
    #[serde(default)]
    is_vector: bool,
    #[serde(default)]
    index: Option<usize>,
}

fn scalar_from_json(name: &str, key: &str, value: &Value) -> Result<ParamValue> {
    match value {
        Value::String(s) => Ok(ParamValue::parse_literal(s)),
        other => ParamValue::from_json(other)
            .ok_or_else(|| TrialError::invalid(name, format!("{} must be a scalar", key))),
    }
}

fn domain_from_json(name: &str, value: &Value) -> Result<Vec<ParamValue>> {
    let list = match value {
        Value::Array(items) => items.clone(),
        Value::String(text) => {
            let normalized = text.replace('\'', "\"");
            match serde_json::from_str::<Value>(&normalized) {
                Ok(Value::Array(items)) => items,
                _ => {
                    return Err(TrialError::invalid(
                        name,
                        format!("domain '{}' is not a list literal", text),
                    ))
                }
            }
        }
        _ => return Err(TrialError::invalid(name, "domain must be a list")),
    };
    list.iter()
        .map(|item| scalar_from_json(name, "domain entry", item))
        .collect()
}

impl ParameterSpec {
    fn from_raw(name: &str, raw: RawParameter) -> Result<Self> {
        let stage: Stage = raw.stage.parse()?;

        let bounds = match raw.param_type {
            ParamType::Range => {
                let lower = raw
                    .lower
                    .as_ref()
                    .ok_or_else(|| TrialError::invalid(name, "range parameter needs 'lower'"))?;
                let upper = raw
                    .upper
                    .as_ref()
                    .ok_or_else(|| TrialError::invalid(name, "range parameter needs 'upper'"))?;
                let lower = scalar_from_json(name, "lower", lower)?;
                let upper = scalar_from_json(name, "upper", upper)?;
                match (lower.as_f64(), upper.as_f64()) {
                    (Some(lo), Some(hi)) if lo <= hi => Some((lower, upper)),
                    (Some(_), Some(_)) => {
                        return Err(TrialError::invalid(name, "lower bound exceeds upper bound"))
                    }
                    _ => return Err(TrialError::invalid(name, "range bounds must be numeric")),
                }
            }
            ParamType::Choice => None,
        };

        let domain = match raw.param_type {
            ParamType::Choice => {
                let value = raw
                    .domain
                    .as_ref()
                    .ok_or_else(|| TrialError::invalid(name, "choice parameter needs 'domain'"))?;
                let values = domain_from_json(name, value)?;
                if values.is_empty() {
                    return Err(TrialError::invalid(name, "domain must not be empty"));
                }
                Some(values)
            }
            ParamType::Range => None,
        };

        let is_ordered = match &raw.is_ordered {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match ParamValue::parse_literal(s) {
                ParamValue::Bool(b) => b,
                _ => return Err(TrialError::invalid(name, "is_ordered must be a boolean")),
            },
            Some(_) => return Err(TrialError::invalid(name, "is_ordered must be a boolean")),
        };

        let path = raw
            .path
            .ok_or_else(|| TrialError::invalid(name, "parameter needs 'path'"))?;

        let target = match stage {
            Stage::Sim => ParamTarget::Compact {
                compact: raw
                    .compact
                    .ok_or_else(|| TrialError::invalid(name, "sim parameter needs 'compact'"))?,
                path,
                element: raw
                    .element
                    .ok_or_else(|| TrialError::invalid(name, "sim parameter needs 'element'"))?,
                units: raw.units,
            },
            Stage::Rec => {
                if raw.is_vector && raw.index.is_none() {
                    return Err(TrialError::invalid(name, "vector parameter needs 'index'"));
                }
                ParamTarget::RecoArg {
                    path,
                    units: raw.units,
                    index: if raw.is_vector { raw.index } else { None },
                }
            }
            other => {
                return Err(TrialError::invalid(
                    name,
                    format!("parameters cannot target stage '{}'", other),
                ))
            }
        };

        Ok(Self {
            name: name.to_string(),
            param_type: raw.param_type,
            value_type: raw.value_type,
            bounds,
            domain,
            is_ordered,
            target,
        })
    }

    /// Pipeline stage that consumes this parameter
    pub fn stage(&self) -> Stage {
        match self.target {
            ParamTarget::Compact { .. } => Stage::Sim,
            ParamTarget::RecoArg { .. } => Stage::Rec,
        }
    }

    /// Parse a command-line value according to the declared value type
    pub fn coerce(&self, raw: &str) -> Result<ParamValue> {
        let bad = || TrialError::invalid(&self.name, format!("'{}' is not a valid {}", raw, self.value_type.as_str()));
        let raw = raw.trim();
        match self.value_type {
            ValueType::Int => raw.parse::<i64>().map(ParamValue::Int).map_err(|_| bad()),
            ValueType::Float => raw.parse::<f64>().map(ParamValue::Float).map_err(|_| bad()),
            ValueType::Bool => match ParamValue::parse_literal(raw) {
                ParamValue::Bool(b) => Ok(ParamValue::Bool(b)),
                ParamValue::Int(0) => Ok(ParamValue::Bool(false)),
                ParamValue::Int(1) => Ok(ParamValue::Bool(true)),
                _ => Err(bad()),
            },
            ValueType::Str => Ok(ParamValue::Str(raw.to_string())),
        }
    }

    /// Whether a value lies inside the declared bounds or domain
    pub fn admits(&self, value: &ParamValue) -> bool {
        if let Some((lower, upper)) = &self.bounds {
            return match (value.as_f64(), lower.as_f64(), upper.as_f64()) {
                (Some(v), Some(lo), Some(hi)) => lo <= v && v <= hi,
                _ => false,
            };
        }
        if let Some(domain) = &self.domain {
            return domain.iter().any(|allowed| {
                allowed == value
                    || matches!((allowed.as_f64(), value.as_f64()), (Some(a), Some(b)) if a == b)
            });
        }
        true
    }
}

/// The declared parameter space
#[derive(Debug, Clone, Default)]
pub struct ParameterSpace {
    pub parameters: IndexMap<String, ParameterSpec>,
    pub constraints: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawParameterSpace {
    parameters: IndexMap<String, RawParameter>,
    #[serde(default)]
    constraints: Vec<String>,
}

impl ParameterSpace {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_document(read_json_file(path)?, path)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Self::from_document(value, Path::new("<parameter config>"))
    }

    fn from_document(value: Value, origin: &Path) -> Result<Self> {
        let raw: RawParameterSpace = from_document(value, origin)?;
        let mut parameters = IndexMap::new();
        for (name, spec) in raw.parameters {
            let spec = ParameterSpec::from_raw(&name, spec)?;
            parameters.insert(name, spec);
        }
        Ok(Self {
            parameters,
            constraints: raw.constraints,
        })
    }

    pub fn get(&self, name: &str) -> Result<&ParameterSpec> {
        self.parameters
            .get(name)
            .ok_or_else(|| TrialError::UnknownParameter(name.to_string()))
    }
}

// ============================================================================
// Objective space
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Minimize,
    Maximize,
}

/// A declared objective
#[derive(Debug, Clone)]
pub struct ObjectiveSpec {
    pub name: String,
    pub goal: Goal,
    pub stage: Stage,
    /// Simulation input group the objective consumes
    pub input: String,
    /// Analysis executable name
    pub exec: String,
    /// Directory holding the executable
    pub path: String,
    /// Parsed command-line rule
    pub rule: RuleTemplate,
    pub threshold: Option<f64>,
    pub constraint: Option<String>,
}

impl ObjectiveSpec {
    /// Full path of the analysis executable
    pub fn exec_path(&self) -> String {
        if self.path.is_empty() {
            self.exec.clone()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), self.exec)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawObjective {
    goal: Goal,
    stage: String,
    input: String,
    exec: String,
    #[serde(default)]
    path: String,
    rule: String,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    constraint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawObjectiveSpace {
    objectives: IndexMap<String, RawObjective>,
}

/// The declared objective space
#[derive(Debug, Clone, Default)]
pub struct ObjectiveSpace {
    pub objectives: IndexMap<String, ObjectiveSpec>,
}

impl ObjectiveSpace {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_document(read_json_file(path)?, path)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Self::from_document(value, Path::new("<objective config>"))
    }

    fn from_document(value: Value, origin: &Path) -> Result<Self> {
        let raw: RawObjectiveSpace = from_document(value, origin)?;
        let mut objectives = IndexMap::new();
        for (name, obj) in raw.objectives {
            let stage: Stage = obj.stage.parse()?;
            if stage != Stage::Ana {
                return Err(TrialError::invalid(
                    &name,
                    format!("objectives must come from the ana stage, not '{}'", stage),
                ));
            }
            let rule = RuleTemplate::parse(&obj.rule)?;
            objectives.insert(
                name.clone(),
                ObjectiveSpec {
                    name,
                    goal: obj.goal,
                    stage,
                    input: obj.input,
                    exec: obj.exec,
                    path: obj.path,
                    rule,
                    threshold: obj.threshold,
                    constraint: obj.constraint,
                },
            );
        }
        Ok(Self { objectives })
    }

    /// Objectives computed from one input group, in declaration order
    pub fn for_input<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a ObjectiveSpec> + 'a {
        self.objectives
            .values()
            .filter(move |obj| obj.stage == Stage::Ana && obj.input == label)
    }
}

// ============================================================================
// Store
// ============================================================================

/// All three configuration documents, cross-validated
#[derive(Debug, Clone)]
pub struct ConfigStore {
    pub run: RunConfig,
    pub parameters: ParameterSpace,
    pub objectives: ObjectiveSpace,
}

impl ConfigStore {
    pub fn load(run: &Path, parameters: &Path, objectives: &Path) -> Result<Self> {
        Self::new(
            RunConfig::load(run)?,
            ParameterSpace::load(parameters)?,
            ObjectiveSpace::load(objectives)?,
        )
    }

    pub fn new(run: RunConfig, parameters: ParameterSpace, objectives: ObjectiveSpace) -> Result<Self> {
        for objective in objectives.objectives.values() {
            if !run.sim_input.contains_key(&objective.input) {
                return Err(TrialError::invalid(
                    &objective.name,
                    format!("input '{}' is not declared in sim_input", objective.input),
                ));
            }
        }
        log::debug!(
            "loaded {} parameters, {} objectives, {} input groups",
            parameters.parameters.len(),
            objectives.objectives.len(),
            run.sim_input.len()
        );
        Ok(Self {
            run,
            parameters,
            objectives,
        })
    }
}
