//! Reconstruction commands and their argument accumulator

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::config::{ParamTarget, ParamValue, ParameterSpec, RunConfig};
use crate::error::{Result, TrialError};
use crate::naming::{output_name, script_name, steering_tag, Stage};
use crate::script::{env_preamble, DriverScript};

#[derive(Debug, Clone, PartialEq)]
enum RecoArg {
    Scalar(String),
    /// One literal per index; unwritten slots stay empty
    Vector(Vec<String>),
}

impl RecoArg {
    fn render(&self) -> String {
        match self {
            RecoArg::Scalar(value) => value.clone(),
            RecoArg::Vector(slots) => slots.join(","),
        }
    }
}

/// Reconstruction arguments collected for one trial
///
/// Owned by the trial, never shared: each trial builds its own value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoArgs {
    args: IndexMap<String, RecoArg>,
}

impl RecoArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.args.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Record a parameter value
    ///
    /// Scalar arguments are overwritten. Vector arguments are padded with
    /// empty slots up to the parameter's index before that slot is set.
    pub fn add_param(&mut self, spec: &ParameterSpec, value: &ParamValue) -> Result<()> {
        let (key, units, index) = match &spec.target {
            ParamTarget::RecoArg { path, units, index } => (path, units, *index),
            ParamTarget::Compact { .. } => {
                return Err(TrialError::invalid(
                    &spec.name,
                    "geometry parameters cannot be passed to reconstruction",
                ))
            }
        };
        let literal = value.with_units(units);

        match index {
            None => {
                if let Some(RecoArg::Vector(_)) = self.args.get(key) {
                    return Err(TrialError::invalid(
                        &spec.name,
                        format!("argument '{}' is already set as a vector", key),
                    ));
                }
                self.args.insert(key.clone(), RecoArg::Scalar(literal));
            }
            Some(index) => {
                let entry = self
                    .args
                    .entry(key.clone())
                    .or_insert_with(|| RecoArg::Vector(Vec::new()));
                let RecoArg::Vector(slots) = entry else {
                    return Err(TrialError::invalid(
                        &spec.name,
                        format!("argument '{}' is already set as a scalar", key),
                    ));
                };
                if slots.len() <= index {
                    slots.resize(index + 1, String::new());
                }
                slots[index] = literal;
            }
        }
        Ok(())
    }

    /// Rendered value of one argument
    pub fn get(&self, key: &str) -> Option<String> {
        self.args.get(key).map(RecoArg::render)
    }

    /// Arguments in insertion order, rendered
    pub fn iter(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.args.iter().map(|(key, arg)| (key.as_str(), arg.render()))
    }
}

/// Generates reconstruction commands for a trial
pub struct RecGenerator<'a> {
    run: &'a RunConfig,
}

impl<'a> RecGenerator<'a> {
    pub fn new(run: &'a RunConfig) -> Self {
        Self { run }
    }

    /// Command reconstructing the simulation output of one steering file
    ///
    /// The input is located by recomputing the simulation stage's output
    /// name for the same tag, label and steering file.
    pub fn make_command(&self, tag: &str, label: &str, steer: &str, args: &RecoArgs) -> String {
        let steer_tag = steering_tag(steer);
        let out_dir = self.run.trial_out_dir(tag);
        let in_file = out_dir.join(output_name(Some(Stage::Sim), tag, label, &steer_tag, "", ""));
        let out_file = out_dir.join(output_name(Some(Stage::Rec), tag, label, &steer_tag, "", ""));

        let mut parts = vec![
            self.run.rec_exec.clone(),
            format!("-Ppodio:output_file={}", out_file.display()),
            format!("-Ppodio:output_collections={}", self.run.rec_collect.join(",")),
        ];
        parts.extend(self.run.rec_args.iter().cloned());
        parts.extend(args.iter().map(|(key, value)| format!("-P{}=\"{}\"", key, value)));
        parts.push(in_file.display().to_string());

        let command = parts.join(" ");
        log::debug!("reconstruction command for {}/{}: {}", tag, steer, command);
        command
    }

    /// Stand-alone driver script for one reconstruction
    pub fn make_script(
        &self,
        tag: &str,
        label: &str,
        steer: &str,
        config: &str,
        command: &str,
    ) -> Result<PathBuf> {
        let path = self.run.trial_run_dir(tag).join(script_name(
            tag,
            label,
            &steering_tag(steer),
            Some(Stage::Rec),
            "",
        ));
        DriverScript::new()
            .with_preamble(env_preamble(self.run, config, true))
            .with_command(command)
            .write(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::run_config;
    use crate::config::{ParamType, ValueType};

    fn reco_param(name: &str, path: &str, units: &str, index: Option<usize>) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            param_type: ParamType::Range,
            value_type: ValueType::Float,
            bounds: Some((ParamValue::Float(0.0), ParamValue::Float(10.0))),
            domain: None,
            is_ordered: true,
            target: ParamTarget::RecoArg {
                path: path.to_string(),
                units: units.to_string(),
                index,
            },
        }
    }

    #[test]
    fn test_vector_slot_padding() {
        let mut args = RecoArgs::new();
        let thr3 = reco_param("thr3", "EEMC:clusters:thresholds", "MeV", Some(3));
        let thr1 = reco_param("thr1", "EEMC:clusters:thresholds", "MeV", Some(1));

        args.add_param(&thr3, &ParamValue::Float(2.5)).unwrap();
        assert_eq!(args.get("EEMC:clusters:thresholds").unwrap(), ",,,2.5*MeV");

        args.add_param(&thr1, &ParamValue::Float(1.0)).unwrap();
        assert_eq!(args.get("EEMC:clusters:thresholds").unwrap(), ",1.0*MeV,,2.5*MeV");
    }

    #[test]
    fn test_scalar_overwrite_and_clear() {
        let mut args = RecoArgs::new();
        let cut = reco_param("cut", "BTRK:cut", "", None);
        args.add_param(&cut, &ParamValue::Float(1.0)).unwrap();
        args.add_param(&cut, &ParamValue::Float(2.0)).unwrap();
        assert_eq!(args.get("BTRK:cut").unwrap(), "2.0");
        args.clear();
        assert!(args.is_empty());
    }

    #[test]
    fn test_scalar_and_vector_conflict() {
        let mut args = RecoArgs::new();
        args.add_param(&reco_param("a", "K", "", None), &ParamValue::Int(1))
            .unwrap();
        let err = args
            .add_param(&reco_param("b", "K", "", Some(0)), &ParamValue::Int(2))
            .unwrap_err();
        assert!(matches!(err, TrialError::ConfigInvalid { .. }));

        let mut args = RecoArgs::new();
        args.add_param(&reco_param("c", "K", "", Some(2)), &ParamValue::Float(1.0))
            .unwrap();
        let err = args
            .add_param(&reco_param("d", "K", "", None), &ParamValue::Float(5.0))
            .unwrap_err();
        assert!(matches!(err, TrialError::ConfigInvalid { .. }));
        assert_eq!(args.get("K").unwrap(), ",,1.0");
    }

    #[test]
    fn test_command_layout() {
        let run = run_config();
        let mut args = RecoArgs::new();
        args.add_param(&reco_param("cut", "BTRK:cut", "mm", None), &ParamValue::Float(0.5))
            .unwrap();
        let command = RecGenerator::new(&run).make_command("T1", "electron", "central.e20ele.py", &args);
        assert_eq!(
            command,
            "eicrecon -Ppodio:output_file=/out/T1/aid2e_T1_rec_electron_central_e20ele.edm4eic.root \
             -Ppodio:output_collections=ReconstructedParticles,EcalEndcapNClusters \
             -Pjana:nevents=50 -PBTRK:cut=\"0.5*mm\" \
             /out/T1/aid2e_T1_sim_electron_central_e20ele.edm4hep.root"
        );
    }
}
