//! Trial orchestration
//!
//! A [`TrialManager`] turns one proposed parameter vector into the
//! geometry copies, commands and driver script of a trial:
//!
//! 1. geometry parameters are written into the trial's versioned compact
//!    files and the trial configuration is pointed at them
//! 2. reconstruction parameters are collected into the trial's arguments
//! 3. every steering file of every input group gets a simulation and a
//!    reconstruction command, followed per group by merges and one
//!    analysis per objective
//! 4. the whole chain is written as one script
//!
//! Nothing is written to the run directory until the full command list has
//! been assembled.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::commands::{AnaGenerator, AnalysisInputs, RecGenerator, RecoArgs, SimGenerator, Slot};
use crate::config::{ConfigStore, ParamValue, ParameterSpec};
use crate::error::{Result, TrialError};
use crate::geometry::GeometryEditor;
use crate::naming::{script_name, validate_tag, version_suffix, Stage};
use crate::results;
use crate::script::{ensure_dir, env_preamble, DriverScript};

/// Where a trial is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrialState {
    Created,
    GeometryEdited,
    ArgsSet,
    ScriptEmitted,
    ResultsExtracted,
}

impl TrialState {
    fn next(self) -> Option<Self> {
        match self {
            TrialState::Created => Some(TrialState::GeometryEdited),
            TrialState::GeometryEdited => Some(TrialState::ArgsSet),
            TrialState::ArgsSet => Some(TrialState::ScriptEmitted),
            TrialState::ScriptEmitted => Some(TrialState::ResultsExtracted),
            TrialState::ResultsExtracted => None,
        }
    }
}

/// One optimizer-proposed parameter vector and everything generated for it
#[derive(Debug, Clone)]
pub struct Trial {
    pub tag: String,
    pub params: IndexMap<String, ParamValue>,
    /// Detector configuration the trial's scripts export
    pub config: String,
    /// Versioned geometry files written for this trial
    pub geometry: Vec<PathBuf>,
    pub reco_args: RecoArgs,
    /// Analysis output per objective
    pub outputs: IndexMap<String, PathBuf>,
    /// End-to-end driver script
    pub script: PathBuf,
    state: TrialState,
}

impl Trial {
    fn new(tag: &str, params: &IndexMap<String, ParamValue>, config: String) -> Self {
        Self {
            tag: tag.to_string(),
            params: params.clone(),
            config,
            geometry: Vec::new(),
            reco_args: RecoArgs::new(),
            outputs: IndexMap::new(),
            script: PathBuf::new(),
            state: TrialState::Created,
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    /// Suffix of every versioned geometry file of this trial
    pub fn geometry_version(&self) -> String {
        version_suffix(&self.tag)
    }

    fn advance(&mut self, to: TrialState) {
        debug_assert_eq!(self.state.next(), Some(to), "trial states cannot be skipped");
        log::debug!("trial {}: {:?} -> {:?}", self.tag, self.state, to);
        self.state = to;
    }
}

/// Builds trials from a loaded configuration
#[derive(Debug, Clone)]
pub struct TrialManager {
    store: ConfigStore,
}

impl TrialManager {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn load(run: &Path, parameters: &Path, objectives: &Path) -> Result<Self> {
        Ok(Self::new(ConfigStore::load(run, parameters, objectives)?))
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Parse command-line style `name=value` strings into a parameter vector
    pub fn parse_params<'s>(
        &self,
        assignments: impl IntoIterator<Item = (&'s str, &'s str)>,
    ) -> Result<IndexMap<String, ParamValue>> {
        let mut params = IndexMap::new();
        for (name, raw) in assignments {
            let spec = self.store.parameters.get(name)?;
            params.insert(name.to_string(), spec.coerce(raw)?);
        }
        Ok(params)
    }

    /// Generate geometry, commands and the driver script of one trial
    pub fn make_trial_script(&self, tag: &str, params: &IndexMap<String, ParamValue>) -> Result<Trial> {
        validate_tag(tag)?;
        let run = &self.store.run;

        let mut sim_params: Vec<(&ParameterSpec, &ParamValue)> = Vec::new();
        let mut rec_params: Vec<(&ParameterSpec, &ParamValue)> = Vec::new();
        for (name, value) in params {
            let spec = self.store.parameters.get(name)?;
            if !spec.admits(value) {
                log::warn!("trial {}: {} = {} is outside its declared range", tag, name, value);
            }
            match spec.stage() {
                Stage::Sim => sim_params.push((spec, value)),
                _ => rec_params.push((spec, value)),
            }
        }

        let mut trial = Trial::new(tag, params, run.det_config.clone());

        let editor = GeometryEditor::new(run);
        for (spec, value) in &sim_params {
            let compact = editor.edit_compact(spec, value, tag)?;
            push_unique(&mut trial.geometry, compact);
            if run.propagate_includes {
                for related in editor.edit_related_files(spec, tag)? {
                    push_unique(&mut trial.geometry, related);
                }
            }
            let config = editor.edit_config(spec, tag)?;
            push_unique(&mut trial.geometry, config);
            trial.config = editor.config_name(tag);
        }
        trial.advance(TrialState::GeometryEdited);

        trial.reco_args.clear();
        for (spec, value) in &rec_params {
            trial.reco_args.add_param(spec, value)?;
        }
        trial.advance(TrialState::ArgsSet);

        let commands = self.trial_commands(&mut trial)?;

        ensure_dir(&run.trial_out_dir(tag))?;
        let path = run
            .trial_run_dir(tag)
            .join(script_name(tag, "", "", None, ""));
        let mut script = DriverScript::new().with_preamble(env_preamble(run, &trial.config, true));
        for command in commands {
            script.push(command);
        }
        trial.script = script.write(&path)?;
        trial.advance(TrialState::ScriptEmitted);

        log::info!(
            "trial {}: {} objectives, script {}",
            tag,
            trial.outputs.len(),
            trial.script.display()
        );
        Ok(trial)
    }

    /// Command chain of a trial, recording analysis outputs as it goes
    fn trial_commands(&self, trial: &mut Trial) -> Result<Vec<String>> {
        let run = &self.store.run;
        let tag = trial.tag.clone();
        let tag = tag.as_str();
        let sim = SimGenerator::new(run);
        let rec = RecGenerator::new(run);
        let ana = AnaGenerator::new(run);

        let mut commands = Vec::new();
        if let Some(gate) = sim.make_overlap_check_command(tag) {
            commands.push(gate);
        }

        for (label, input) in &run.sim_input {
            let kind = input.kind()?;
            let steering = steering_files(&input.location)?;
            if steering.is_empty() {
                log::warn!("input {}: no steering files in {}", label, input.location.display());
            }
            for steer in &steering {
                commands.push(sim.make_command(tag, label, &input.location, steer, kind));
                commands.push(rec.make_command(tag, label, steer, &trial.reco_args));
            }

            let objectives: Vec<_> = self.store.objectives.for_input(label).collect();
            let (merge_rec, merged_rec) = ana.make_merge_command(tag, label, Stage::Rec);
            commands.push(merge_rec);
            let mut inputs = AnalysisInputs {
                sim: None,
                reco: Some(merged_rec),
            };
            if objectives.iter().any(|obj| obj.rule.uses(Slot::Sim)) {
                let (merge_sim, merged_sim) = ana.make_merge_command(tag, label, Stage::Sim);
                commands.push(merge_sim);
                inputs.sim = Some(merged_sim);
            }

            for objective in objectives {
                let (command, output) = ana.make_command(tag, label, objective, &inputs)?;
                commands.push(command);
                trial.outputs.insert(objective.name.clone(), output);
            }
        }
        Ok(commands)
    }

    /// Read every objective of a finished trial
    ///
    /// Failures stay per objective; the trial moves to its final state
    /// either way.
    pub fn extract_results(&self, trial: &mut Trial) -> IndexMap<String, Result<f64>> {
        let values = results::extract_all(&trial.outputs);
        if trial.state == TrialState::ScriptEmitted {
            trial.advance(TrialState::ResultsExtracted);
        }
        values
    }
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

/// Steering files of an input group, sorted by name
///
/// Macro files (`.mac`) accompany general-particle-source steering files
/// and are not steering files themselves.
pub fn steering_files(location: &Path) -> Result<Vec<String>> {
    if !location.is_dir() {
        return Err(TrialError::SourceMissing(location.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(location)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| TrialError::io(location, std::io::Error::from(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.ends_with(".mac") {
            continue;
        }
        files.push(name);
    }
    Ok(files)
}
