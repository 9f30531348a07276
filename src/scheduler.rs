//! Scheduler-facing views of the configuration
//!
//! The optimizer is an external Ax-style scheduler. It takes a list of
//! parameter definitions, a map of objective properties and optional
//! constraint expressions, or, through its simpler entry point, one
//! comma-joined string of objective names in which minimized objectives
//! carry a leading `-`.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ConfigStore, Goal, ObjectiveSpace, ParamType, ParamValue, ParameterSpace, ValueType};

/// Parameter definition in the scheduler's format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[ParamValue; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ParamValue>>,
    /// Only meaningful for choice parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ordered: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveProperties {
    pub minimize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// Everything the scheduler needs to set up an experiment
#[derive(Debug, Clone, Serialize)]
pub struct AxConfig {
    pub parameters: Vec<AxParameter>,
    pub parameter_constraints: Option<Vec<String>>,
    pub objectives: IndexMap<String, ObjectiveProperties>,
    pub objective_names: String,
    pub outcome_constraints: Option<Vec<String>>,
    /// Scheduler options passed through from the run configuration
    pub options: IndexMap<String, Value>,
}

fn non_empty(list: Vec<String>) -> Option<Vec<String>> {
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Parameter definitions and parameter constraints
pub fn parameter_list(space: &ParameterSpace) -> (Vec<AxParameter>, Option<Vec<String>>) {
    let parameters = space
        .parameters
        .values()
        .map(|spec| AxParameter {
            name: spec.name.clone(),
            param_type: spec.param_type,
            value_type: spec.value_type,
            bounds: spec.bounds.clone().map(|(lower, upper)| [lower, upper]),
            values: spec.domain.clone(),
            is_ordered: match spec.param_type {
                ParamType::Choice => Some(spec.is_ordered),
                ParamType::Range => None,
            },
        })
        .collect();
    (parameters, non_empty(space.constraints.clone()))
}

/// Objective properties and outcome constraints
pub fn objective_properties(
    space: &ObjectiveSpace,
) -> (IndexMap<String, ObjectiveProperties>, Option<Vec<String>>) {
    let mut objectives = IndexMap::new();
    let mut constraints = Vec::new();
    for objective in space.objectives.values() {
        objectives.insert(
            objective.name.clone(),
            ObjectiveProperties {
                minimize: objective.goal == Goal::Minimize,
                threshold: objective.threshold,
            },
        );
        if let Some(constraint) = &objective.constraint {
            constraints.push(constraint.clone());
        }
    }
    (objectives, non_empty(constraints))
}

/// Joined objective names, minimized ones negated: `"A,-B"`
pub fn objective_names(space: &ObjectiveSpace) -> (String, Option<Vec<String>>) {
    let names = space
        .objectives
        .values()
        .map(|objective| match objective.goal {
            Goal::Minimize => format!("-{}", objective.name),
            Goal::Maximize => objective.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(",");
    let constraints = space
        .objectives
        .values()
        .filter_map(|objective| objective.constraint.clone())
        .collect();
    (names, non_empty(constraints))
}

pub fn ax_config(store: &ConfigStore) -> AxConfig {
    let (parameters, parameter_constraints) = parameter_list(&store.parameters);
    let (objectives, outcome_constraints) = objective_properties(&store.objectives);
    let (objective_names, _) = objective_names(&store.objectives);
    AxConfig {
        parameters,
        parameter_constraints,
        objectives,
        objective_names,
        outcome_constraints,
        options: store.run.scheduler.clone(),
    }
}
