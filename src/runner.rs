//! Optimizer-facing objective function
//!
//! The scheduler calls one function per trial: parameters in, objective
//! values out. [`ObjectiveRunner::run_objectives`] generates the trial
//! script, runs it and reads back every objective. Configuration problems
//! are returned as errors; anything that goes wrong inside the trial is
//! reported per objective so the scheduler can record a failed
//! observation and carry on.

use std::path::Path;
use std::process::Command;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::config::{ParamValue, RunConfig};
use crate::error::{Result, TrialError, OVERLAP_EXIT_CODE};
use crate::results;
use crate::trial::{Trial, TrialManager};

/// Executes a generated trial script
pub trait ScriptRunner {
    /// Run `script` to completion and return its exit code
    ///
    /// `None` means the script was terminated by a signal.
    fn run(&self, script: &Path) -> Result<Option<i32>>;
}

/// Runs scripts locally, optionally inside the container wrapper
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    wrapper: Option<String>,
}

impl ShellRunner {
    pub fn new(run: &RunConfig) -> Self {
        Self {
            wrapper: run.eic_shell.clone(),
        }
    }
}

impl ScriptRunner for ShellRunner {
    fn run(&self, script: &Path) -> Result<Option<i32>> {
        let mut command = match &self.wrapper {
            Some(shell) => {
                let mut command = Command::new(shell);
                command.arg("--").arg(script);
                command
            }
            None => Command::new(script),
        };
        log::info!("running {:?}", command);
        let status = command.status().map_err(|e| TrialError::io(script, e))?;
        Ok(status.code())
    }
}

/// Error for a script that did not exit cleanly
fn status_error(script: &Path, status: Option<i32>) -> TrialError {
    match status {
        Some(OVERLAP_EXIT_CODE) => TrialError::OverlapDetected {
            script: script.to_path_buf(),
        },
        status => TrialError::ScriptFailed {
            script: script.to_path_buf(),
            status,
        },
    }
}

/// Outcome of one trial
#[derive(Debug)]
pub struct ObjectiveRun {
    pub trial: Trial,
    pub values: IndexMap<String, f64>,
    pub failures: IndexMap<String, TrialError>,
}

impl ObjectiveRun {
    /// Whether every objective produced a value
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Objective values with `null` for failed objectives, in declaration order
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for name in self.trial.outputs.keys() {
            let value = self.values.get(name).map_or(Value::Null, |v| Value::from(*v));
            map.insert(name.clone(), value);
        }
        Value::Object(map)
    }
}

/// Generates, runs and harvests trials
pub struct ObjectiveRunner<R: ScriptRunner> {
    manager: TrialManager,
    runner: R,
    record_params: bool,
}

impl ObjectiveRunner<ShellRunner> {
    /// Runner executing scripts through the configured container wrapper
    pub fn with_shell(manager: TrialManager) -> Self {
        let runner = ShellRunner::new(&manager.store().run);
        Self::new(manager, runner)
    }
}

impl<R: ScriptRunner> ObjectiveRunner<R> {
    pub fn new(manager: TrialManager, runner: R) -> Self {
        Self {
            manager,
            runner,
            record_params: false,
        }
    }

    /// Append the trial's parameter values to each sidecar before reading it
    pub fn record_parameters(mut self, record: bool) -> Self {
        self.record_params = record;
        self
    }

    pub fn manager(&self) -> &TrialManager {
        &self.manager
    }

    /// Evaluate one parameter vector under the caller-chosen `tag`
    pub fn run_objectives(&self, tag: &str, params: &IndexMap<String, ParamValue>) -> Result<ObjectiveRun> {
        let mut trial = self.manager.make_trial_script(tag, params)?;
        let status = self.runner.run(&trial.script)?;

        let mut values = IndexMap::new();
        let mut failures = IndexMap::new();

        if status != Some(0) {
            log::warn!("trial {}: script exited with {:?}", tag, status);
            for name in trial.outputs.keys() {
                failures.insert(name.clone(), status_error(&trial.script, status));
            }
            return Ok(ObjectiveRun {
                trial,
                values,
                failures,
            });
        }

        if self.record_params {
            for (name, output) in &trial.outputs {
                if let Err(e) = results::append_parameters(output, &trial.params) {
                    log::warn!("trial {}: could not record parameters for {}: {}", tag, name, e);
                }
            }
        }

        for (name, value) in self.manager.extract_results(&mut trial) {
            match value {
                Ok(v) => {
                    values.insert(name, v);
                }
                Err(e) => {
                    log::warn!("trial {}: objective {} failed: {}", tag, name, e);
                    failures.insert(name, e);
                }
            }
        }
        Ok(ObjectiveRun {
            trial,
            values,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, ObjectiveSpace, ParameterSpace};
    use crate::trial::TrialState;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    struct FakeRunner {
        status: Option<i32>,
        sidecars: Vec<(PathBuf, &'static str)>,
    }

    impl ScriptRunner for FakeRunner {
        fn run(&self, script: &Path) -> Result<Option<i32>> {
            assert!(script.is_file());
            for (path, text) in &self.sidecars {
                fs::write(path, text).unwrap();
            }
            Ok(self.status)
        }
    }

    fn manager(root: &Path) -> TrialManager {
        fs::create_dir_all(root.join("steer")).unwrap();
        fs::write(root.join("steer/central.e20ele.py"), "").unwrap();
        let run = RunConfig::from_value(json!({
            "det_path": root.join("det"), "det_config": "epic", "epic_setup": "/setup.sh",
            "out_path": root.join("out"), "run_path": root.join("run"),
            "sim_exec": "npsim", "rec_exec": "eicrecon",
            "sim_input": { "electron": { "location": root.join("steer"), "type": "gun" } }
        }))
        .unwrap();
        let parameters = ParameterSpace::from_value(json!({
            "parameters": {
                "cut": {
                    "stage": "rec", "param_type": "range", "value_type": "float",
                    "lower": 0.0, "upper": 1.0, "path": "BTRK:cut"
                }
            }
        }))
        .unwrap();
        let objectives = ObjectiveSpace::from_value(json!({
            "objectives": {
                "Res": { "goal": "minimize", "stage": "ana", "input": "electron",
                         "exec": "res.C", "rule": "<EXEC> <RECO> <OUTPUT>" },
                "Eff": { "goal": "maximize", "stage": "ana", "input": "electron",
                         "exec": "eff.C", "rule": "<EXEC> <RECO> <OUTPUT>" }
            }
        }))
        .unwrap();
        TrialManager::new(ConfigStore::new(run, parameters, objectives).unwrap())
    }

    fn params() -> IndexMap<String, ParamValue> {
        let mut params = IndexMap::new();
        params.insert("cut".to_string(), ParamValue::Float(0.5));
        params
    }

    #[test]
    fn test_successful_trial_with_one_missing_result() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let runner = FakeRunner {
            status: Some(0),
            sidecars: vec![(root.join("out/T1/aid2e_T1_ana_electron_Res.txt"), "0.02\n0.001\n")],
        };
        let objective_runner = ObjectiveRunner::new(manager(root), runner).record_parameters(true);
        let outcome = objective_runner.run_objectives("T1", &params()).unwrap();

        assert_eq!(outcome.values["Res"], 0.02);
        assert!(matches!(outcome.failures["Eff"], TrialError::ResultMissing(_)));
        assert!(!outcome.is_complete());
        assert_eq!(outcome.trial.state(), TrialState::ResultsExtracted);
        assert_eq!(outcome.to_json(), json!({ "Res": 0.02, "Eff": null }));

        let sidecar = fs::read_to_string(root.join("out/T1/aid2e_T1_ana_electron_Res.txt")).unwrap();
        assert_eq!(sidecar, "0.02\n0.001\n\n0.5");
    }

    #[test]
    fn test_overlap_exit_fails_every_objective() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner {
            status: Some(OVERLAP_EXIT_CODE),
            sidecars: Vec::new(),
        };
        let outcome = ObjectiveRunner::new(manager(dir.path()), runner)
            .run_objectives("T2", &params())
            .unwrap();
        assert!(outcome.values.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .values()
            .all(|e| matches!(e, TrialError::OverlapDetected { .. })));
        assert_eq!(outcome.trial.state(), TrialState::ScriptEmitted);
    }

    #[test]
    fn test_status_error_mapping() {
        let script = Path::new("do.sh");
        assert!(matches!(status_error(script, Some(9)), TrialError::OverlapDetected { .. }));
        assert!(matches!(
            status_error(script, Some(1)),
            TrialError::ScriptFailed { status: Some(1), .. }
        ));
        assert!(matches!(
            status_error(script, None),
            TrialError::ScriptFailed { status: None, .. }
        ));
    }
}
