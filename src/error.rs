//! Error taxonomy for trial generation
//!
//! Configuration and template errors are fatal and surface before any
//! script is written. Per-trial runtime failures (overlaps, missing or
//! malformed results) are reported per objective so the optimizer can
//! record a failed observation instead of aborting the whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Exit status the overlap gate uses when the geometry has illegal overlaps
pub const OVERLAP_EXIT_CODE: i32 = 9;

/// Errors raised while configuring, generating or harvesting a trial
#[derive(Debug, Error)]
pub enum TrialError {
    /// A required configuration file or key is absent
    #[error("missing configuration: {what}")]
    ConfigMissing { what: String },

    /// A configuration entry is present but inconsistent
    #[error("invalid configuration for '{key}': {reason}")]
    ConfigInvalid { key: String, reason: String },

    /// A proposed parameter is not declared in the parameter space
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// An unrecognized pipeline stage token
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// An unrecognized simulation input type token
    #[error("unknown input type '{0}'")]
    UnknownInputType(String),

    /// An original geometry file that should be copied does not exist
    #[error("source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    /// A selector matched zero or several elements
    #[error("selector '{selector}' matched {matches} elements in {} (expected exactly one)", .file.display())]
    ElementNotFound {
        selector: String,
        file: PathBuf,
        matches: usize,
    },

    /// A selector expression could not be parsed
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// An analysis rule template uses an unknown slot or lacks a required one
    #[error("malformed rule template '{rule}': {reason}")]
    MalformedTemplate { rule: String, reason: String },

    /// A rule template needs an input the caller did not provide
    #[error("rule for objective '{objective}' needs input {slot} which was not provided")]
    MissingInput { objective: String, slot: String },

    /// The geometry of a trial has illegal overlaps
    #[error("geometry overlaps detected while running {}", .script.display())]
    OverlapDetected { script: PathBuf },

    /// The trial script exited unsuccessfully for another reason
    #[error("script {} failed with status {status:?}", .script.display())]
    ScriptFailed { script: PathBuf, status: Option<i32> },

    /// The analysis sidecar for an objective was never written
    #[error("result file does not exist: {}", .0.display())]
    ResultMissing(PathBuf),

    /// The first line of a sidecar is not a number
    #[error("could not parse result in {}: {line:?}", .path.display())]
    ResultParse { path: PathBuf, line: String },

    /// A geometry document could not be parsed or written
    #[error("xml error in {}: {message}", .path.display())]
    Xml { path: PathBuf, message: String },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A driver script template failed to render
    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("json error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl TrialError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrialError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TrialError::ConfigInvalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error belongs to a single trial rather than the setup
    ///
    /// Trial failures are reported to the optimizer as failed observations.
    pub fn is_trial_failure(&self) -> bool {
        matches!(
            self,
            TrialError::OverlapDetected { .. }
                | TrialError::ScriptFailed { .. }
                | TrialError::ResultMissing(_)
                | TrialError::ResultParse { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TrialError>;
