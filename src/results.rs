//! Objective values from analysis sidecars
//!
//! Every analysis writes a plain-text sidecar next to its output, same
//! stem with a `.txt` extension. The first line holds the objective value;
//! any further lines (uncertainties, recorded parameters) are kept for
//! offline use and ignored here.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::config::ParamValue;
use crate::error::{Result, TrialError};

/// Sidecar text file of an analysis output
pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("txt")
}

/// Read the objective value recorded for an analysis output
pub fn extract(output: &Path) -> Result<f64> {
    let sidecar = sidecar_path(output);
    if !sidecar.is_file() {
        return Err(TrialError::ResultMissing(sidecar));
    }
    let text = fs::read_to_string(&sidecar).map_err(|e| TrialError::io(&sidecar, e))?;
    let line = text.lines().next().unwrap_or("").trim();
    let value = line.parse::<f64>().map_err(|_| TrialError::ResultParse {
        path: sidecar.clone(),
        line: line.to_string(),
    })?;
    log::info!("{} = {}", sidecar.display(), value);
    Ok(value)
}

/// Extract every objective, keeping failures per objective
pub fn extract_all(outputs: &IndexMap<String, PathBuf>) -> IndexMap<String, Result<f64>> {
    outputs
        .iter()
        .map(|(name, output)| (name.clone(), extract(output)))
        .collect()
}

/// Append the trial's parameter values to a sidecar, one per line
///
/// Values are appended in parameter order after the existing content so
/// results can be joined with their inputs offline.
pub fn append_parameters(output: &Path, params: &IndexMap<String, ParamValue>) -> Result<()> {
    let sidecar = sidecar_path(output);
    if !sidecar.is_file() {
        return Err(TrialError::ResultMissing(sidecar));
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(&sidecar)
        .map_err(|e| TrialError::io(&sidecar, e))?;
    let mut tail = String::new();
    for value in params.values() {
        tail.push('\n');
        tail.push_str(&value.to_string());
    }
    file.write_all(tail.as_bytes())
        .map_err(|e| TrialError::io(&sidecar, e))?;
    log::debug!("recorded {} parameters in {}", params.len(), sidecar.display());
    Ok(())
}
