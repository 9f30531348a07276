//! Merge and analysis commands
//!
//! Analysis executables are described per objective by a rule such as
//! `root -l -b -q '<EXEC>("<RECO>", "<OUTPUT>")'`. The rule is parsed once
//! at load time into literal text and a closed set of slots, so a typo in
//! a slot name is a configuration error rather than a silently unreplaced
//! token.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{ObjectiveSpec, RunConfig};
use crate::error::{Result, TrialError};
use crate::naming::{output_name, script_name, Stage};
use crate::script::{env_preamble, DriverScript};

/// A substitution slot of an analysis rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Exec,
    Output,
    Sim,
    Reco,
}

impl Slot {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "EXEC" => Some(Slot::Exec),
            "OUTPUT" => Some(Slot::Output),
            "SIM" => Some(Slot::Sim),
            "RECO" => Some(Slot::Reco),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Slot::Exec => "EXEC",
            Slot::Output => "OUTPUT",
            Slot::Sim => "SIM",
            Slot::Reco => "RECO",
        };
        write!(f, "<{}>", token)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RulePart {
    Literal(String),
    Slot(Slot),
}

/// A parsed analysis rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTemplate {
    source: String,
    parts: Vec<RulePart>,
}

/// Concrete values for the slots of a rule
#[derive(Debug, Clone, Default)]
pub struct RuleValues<'a> {
    pub exec: &'a str,
    pub output: &'a str,
    pub sim: Option<&'a str>,
    pub reco: Option<&'a str>,
}

fn slot_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = Regex::new(r"<([A-Z][A-Z0-9_]*)>")
        .map_err(|e| TrialError::invalid("rule slot pattern", e.to_string()))?;
    Ok(PATTERN.get_or_init(|| pattern))
}

impl RuleTemplate {
    pub fn parse(rule: &str) -> Result<Self> {
        let malformed = |reason: String| TrialError::MalformedTemplate {
            rule: rule.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut last = 0;
        for caps in slot_pattern()?.captures_iter(rule) {
            let Some(whole) = caps.get(0) else { continue };
            let slot = Slot::from_token(&caps[1])
                .ok_or_else(|| malformed(format!("unknown slot <{}>", &caps[1])))?;
            if whole.start() > last {
                parts.push(RulePart::Literal(rule[last..whole.start()].to_string()));
            }
            parts.push(RulePart::Slot(slot));
            last = whole.end();
        }
        if last < rule.len() {
            parts.push(RulePart::Literal(rule[last..].to_string()));
        }

        let template = Self {
            source: rule.to_string(),
            parts,
        };
        for required in [Slot::Exec, Slot::Output] {
            if !template.uses(required) {
                return Err(malformed(format!("missing required slot {}", required)));
            }
        }
        Ok(template)
    }

    /// Whether the rule contains a slot
    pub fn uses(&self, slot: Slot) -> bool {
        self.parts.iter().any(|part| *part == RulePart::Slot(slot))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute every slot; `objective` only names the rule in errors
    pub fn render(&self, objective: &str, values: &RuleValues<'_>) -> Result<String> {
        let missing = |slot: Slot| TrialError::MissingInput {
            objective: objective.to_string(),
            slot: slot.to_string(),
        };
        let mut out = String::with_capacity(self.source.len() + 64);
        for part in &self.parts {
            match part {
                RulePart::Literal(text) => out.push_str(text),
                RulePart::Slot(Slot::Exec) => out.push_str(values.exec),
                RulePart::Slot(Slot::Output) => out.push_str(values.output),
                RulePart::Slot(Slot::Sim) => {
                    out.push_str(values.sim.ok_or_else(|| missing(Slot::Sim))?)
                }
                RulePart::Slot(Slot::Reco) => {
                    out.push_str(values.reco.ok_or_else(|| missing(Slot::Reco))?)
                }
            }
        }
        Ok(out)
    }
}

/// Inputs handed to an analysis
#[derive(Debug, Clone, Default)]
pub struct AnalysisInputs {
    pub sim: Option<PathBuf>,
    pub reco: Option<PathBuf>,
}

/// Generates merge and analysis commands for a trial
pub struct AnaGenerator<'a> {
    run: &'a RunConfig,
}

impl<'a> AnaGenerator<'a> {
    pub fn new(run: &'a RunConfig) -> Self {
        Self { run }
    }

    /// Command merging the per-steering-file outputs of one stage
    ///
    /// Returns the command and the path of the merged file.
    pub fn make_merge_command(&self, tag: &str, label: &str, stage: Stage) -> (String, PathBuf) {
        let out_dir = self.run.trial_out_dir(tag);
        let merged = out_dir.join(output_name(Some(stage), tag, label, "", "", "merge"));
        let pieces = out_dir.join(output_name(Some(stage), tag, label, "*", "", ""));
        let command = format!(
            "{} -f {} {}",
            self.run.merge_exec,
            merged.display(),
            pieces.display()
        );
        log::debug!("merge command for {}/{}: {}", tag, label, command);
        (command, merged)
    }

    /// Command running the analysis behind one objective
    ///
    /// Returns the command and the analysis output path; the scalar result
    /// is read later from that path's sidecar.
    pub fn make_command(
        &self,
        tag: &str,
        label: &str,
        objective: &ObjectiveSpec,
        inputs: &AnalysisInputs,
    ) -> Result<(String, PathBuf)> {
        let out_path = self
            .run
            .trial_out_dir(tag)
            .join(output_name(Some(Stage::Ana), tag, label, "", &objective.name, ""));

        let exec = objective.exec_path();
        let output = out_path.display().to_string();
        let sim = inputs.sim.as_deref().map(display);
        let reco = inputs.reco.as_deref().map(display);
        let command = objective.rule.render(
            &objective.name,
            &RuleValues {
                exec: &exec,
                output: &output,
                sim: sim.as_deref(),
                reco: reco.as_deref(),
            },
        )?;
        log::debug!("analysis command for {}: {}", objective.name, command);
        Ok((command, out_path))
    }

    /// Stand-alone driver script for one analysis
    pub fn make_script(
        &self,
        tag: &str,
        label: &str,
        objective: &str,
        command: &str,
    ) -> Result<PathBuf> {
        let path = self
            .run
            .trial_run_dir(tag)
            .join(script_name(tag, label, "", Some(Stage::Ana), objective));
        DriverScript::new()
            .with_preamble(env_preamble(self.run, &self.run.det_config, false))
            .with_command(command)
            .write(&path)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
