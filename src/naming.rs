//! Canonical file and script names
//!
//! Every stage of a trial locates the output of an earlier stage by
//! recomputing its name from the same inputs, so these functions are pure
//! and must stay bit-for-bit stable. Segments are always ordered
//! (stage, label, steering tag).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::TrialError;

/// Prefix shared by every generated output and geometry version
pub const NAME_PREFIX: &str = "aid2e";

/// One phase of the trial pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Geometry overlap check
    Geo,
    /// Geant4 simulation
    Sim,
    /// Reconstruction
    Rec,
    /// Analysis producing an objective
    Ana,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Geo => "geo",
            Stage::Sim => "sim",
            Stage::Rec => "rec",
            Stage::Ana => "ana",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TrialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geo" => Ok(Stage::Geo),
            "sim" => Ok(Stage::Sim),
            "rec" => Ok(Stage::Rec),
            "ana" => Ok(Stage::Ana),
            other => Err(TrialError::UnknownStage(other.to_string())),
        }
    }
}

/// File extension produced by a stage
///
/// `None` stands for "no stage" and yields an empty suffix, which callers
/// read as "this name does not describe a stage output".
pub fn suffix(stage: Option<Stage>, objective: &str) -> String {
    match stage {
        Some(Stage::Geo) => ".overlaps.txt".to_string(),
        Some(Stage::Sim) => ".edm4hep.root".to_string(),
        Some(Stage::Rec) => ".edm4eic.root".to_string(),
        Some(Stage::Ana) => format!("_{}.root", objective),
        None => String::new(),
    }
}

/// Join the non-empty segments, each prefixed with `_`
pub fn body(stage: Option<Stage>, label: &str, steer: &str) -> String {
    let stage = stage.map(|s| s.as_str()).unwrap_or("");
    [stage, label, steer]
        .iter()
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("_{}", segment))
        .collect()
}

/// Name of the file a stage writes for one trial
pub fn output_name(
    stage: Option<Stage>,
    tag: &str,
    label: &str,
    steer: &str,
    objective: &str,
    prefix: &str,
) -> String {
    let lead = if prefix.is_empty() {
        format!("{}_", NAME_PREFIX)
    } else {
        format!("{}_{}_", NAME_PREFIX, prefix)
    };
    format!(
        "{}{}{}{}",
        lead,
        tag,
        body(stage, label, steer),
        suffix(stage, objective)
    )
}

/// Name of a driver script
///
/// An objective, when given, is appended after the body so analysis
/// scripts for different objectives of one input never collide.
pub fn script_name(
    tag: &str,
    label: &str,
    steer: &str,
    stage: Option<Stage>,
    objective: &str,
) -> String {
    let mut name = format!("do_{}_{}{}", NAME_PREFIX, tag, body(stage, label, steer));
    if !objective.is_empty() {
        name.push('_');
        name.push_str(objective);
    }
    name.push_str(".sh");
    name
}

/// Tag derived from a steering file name
///
/// `backward.e18ele.py` becomes `backward_e18ele`.
pub fn steering_tag(steer: &str) -> String {
    let stem = Path::new(steer)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace('.', "_")
}

/// Suffix inserted before the extension of a versioned geometry file
pub fn version_suffix(tag: &str) -> String {
    format!("_{}_{}", NAME_PREFIX, tag)
}

/// Whether a file name already carries a version suffix
pub fn is_versioned_name(name: &str) -> bool {
    name.contains(&format!("_{}_", NAME_PREFIX))
}

/// Check that a trial tag can be used as a file-name segment
pub fn validate_tag(tag: &str) -> Result<(), TrialError> {
    if tag.is_empty() {
        return Err(TrialError::invalid("tag", "trial tag must not be empty"));
    }
    if tag
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '*' | '?' | '[' | ']') || c.is_whitespace())
    {
        return Err(TrialError::invalid(
            "tag",
            format!("trial tag '{}' contains a path separator, glob or whitespace", tag),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_per_stage() {
        assert_eq!(suffix(Some(Stage::Geo), ""), ".overlaps.txt");
        assert_eq!(suffix(Some(Stage::Sim), ""), ".edm4hep.root");
        assert_eq!(suffix(Some(Stage::Rec), ""), ".edm4eic.root");
        assert_eq!(suffix(Some(Stage::Ana), "EnergyRes"), "_EnergyRes.root");
        assert_eq!(suffix(None, "EnergyRes"), "");
    }

    #[test]
    fn test_body_skips_empty_segments() {
        assert_eq!(body(Some(Stage::Sim), "electron", "central_e20ele"), "_sim_electron_central_e20ele");
        assert_eq!(body(Some(Stage::Rec), "", "central_e20ele"), "_rec_central_e20ele");
        assert_eq!(body(None, "electron", ""), "_electron");
        assert_eq!(body(None, "", ""), "");
    }

    #[test]
    fn test_output_name() {
        assert_eq!(
            output_name(Some(Stage::Sim), "AxTrial7", "electron", "central_e20ele", "", ""),
            "aid2e_AxTrial7_sim_electron_central_e20ele.edm4hep.root"
        );
        assert_eq!(
            output_name(Some(Stage::Rec), "AxTrial7", "electron", "", "", "merge"),
            "aid2e_merge_AxTrial7_rec_electron.edm4eic.root"
        );
        assert_eq!(
            output_name(Some(Stage::Ana), "T1", "electron", "", "EnergyRes", ""),
            "aid2e_T1_ana_electron_EnergyRes.root"
        );
    }

    #[test]
    fn test_output_name_is_stable_and_tag_unique() {
        let a = output_name(Some(Stage::Rec), "T1", "pi", "s", "", "");
        let b = output_name(Some(Stage::Rec), "T1", "pi", "s", "", "");
        let c = output_name(Some(Stage::Rec), "T2", "pi", "s", "", "");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_script_name() {
        assert_eq!(script_name("T1", "", "", None, ""), "do_aid2e_T1.sh");
        assert_eq!(
            script_name("T1", "electron", "central_e20ele", Some(Stage::Sim), ""),
            "do_aid2e_T1_sim_electron_central_e20ele.sh"
        );
        assert_eq!(
            script_name("T1", "electron", "", Some(Stage::Ana), "EnergyRes"),
            "do_aid2e_T1_ana_electron_EnergyRes.sh"
        );
    }

    #[test]
    fn test_steering_tag() {
        assert_eq!(steering_tag("a.b.py"), "a_b");
        assert_eq!(steering_tag("/some/dir/backward.e18ele.py"), "backward_e18ele");
        assert_eq!(steering_tag("plain.py"), "plain");
    }

    #[test]
    fn test_stage_tokens() {
        assert_eq!("rec".parse::<Stage>().unwrap(), Stage::Rec);
        assert!(matches!(
            "reco".parse::<Stage>(),
            Err(TrialError::UnknownStage(token)) if token == "reco"
        ));
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("AxTrial7").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("a/b").is_err());
        assert!(validate_tag("a b").is_err());
        for tag in ["T*", "T?", "T[1]", "T]"] {
            assert!(validate_tag(tag).is_err(), "{} should be rejected", tag);
        }
    }
}
