//! Trial generation for detector-geometry optimization
//!
//! This crate turns parameter vectors proposed by an external
//! multi-objective optimizer into runnable trials: per-trial copies of the
//! detector geometry, a chain of simulation, reconstruction, merge and
//! analysis commands in one driver script, and the objective values read
//! back once the script has run.
//!
//! ```no_run
//! use eic_mobo_tools::{ParamValue, TrialManager};
//! use indexmap::IndexMap;
//! use std::path::Path;
//!
//! # fn main() -> eic_mobo_tools::Result<()> {
//! let manager = TrialManager::load(
//!     Path::new("configuration/run.config"),
//!     Path::new("configuration/parameters.config"),
//!     Path::new("configuration/objectives.config"),
//! )?;
//! let mut params = IndexMap::new();
//! params.insert("enable_staves_2".to_string(), ParamValue::Int(1));
//! let trial = manager.make_trial_script("AxTrial7", &params)?;
//! println!("{}", trial.script.display());
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod geometry;
pub mod naming;
pub mod results;
pub mod runner;
pub mod scheduler;
pub mod script;
pub mod trial;

pub use commands::{AnaGenerator, AnalysisInputs, RecGenerator, RecoArgs, RuleTemplate, SimGenerator};
pub use config::{
    ConfigStore, Goal, InputType, ObjectiveSpace, ObjectiveSpec, ParamTarget, ParamType, ParamValue,
    ParameterSpace, ParameterSpec, RunConfig, SimInput, ValueType,
};
pub use error::{Result, TrialError, OVERLAP_EXIT_CODE};
pub use geometry::GeometryEditor;
pub use naming::Stage;
pub use runner::{ObjectiveRun, ObjectiveRunner, ScriptRunner, ShellRunner};
pub use script::DriverScript;
pub use trial::{Trial, TrialManager, TrialState};
