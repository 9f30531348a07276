//! Driver script emission
//!
//! Scripts are rendered from `templates/trial.sh.j2`, written to a
//! temporary sibling and renamed into place, then made executable. A
//! script therefore either exists complete or not at all.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use askama::Template;

use crate::config::RunConfig;
use crate::error::{Result, TrialError};

#[derive(Template)]
#[template(path = "trial.sh.j2", escape = "none")]
struct ScriptTemplate<'a> {
    preamble: &'a [String],
    commands: &'a [String],
}

/// A shell script under construction
///
/// Rendered scripts always abort on the first failing command.
#[derive(Debug, Clone, Default)]
pub struct DriverScript {
    preamble: Vec<String>,
    commands: Vec<String>,
}

impl DriverScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment set-up lines written before any command
    pub fn with_preamble(mut self, lines: Vec<String>) -> Self {
        self.preamble = lines;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    pub fn push(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    pub fn render(&self) -> Result<String> {
        let template = ScriptTemplate {
            preamble: &self.preamble,
            commands: &self.commands,
        };
        Ok(template.render()?)
    }

    /// Render, write atomically and mark executable; returns `path`
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        let content = self.render()?;
        atomic_write(path, content.as_bytes())?;
        make_executable(path)?;
        log::info!("wrote script {} ({} commands)", path.display(), self.commands.len());
        Ok(path.to_path_buf())
    }
}

/// Lines that point the environment at a detector configuration
///
/// `with_reco` adds the reconstruction installation when one is configured.
pub fn env_preamble(run: &RunConfig, config: &str, with_reco: bool) -> Vec<String> {
    let mut lines = vec![
        format!("source {}", run.epic_setup),
        format!("export DETECTOR_CONFIG={}", config),
    ];
    if with_reco {
        if let Some(setup) = &run.eicrecon_setup {
            lines.push(format!("source {}", setup));
        }
    }
    lines
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| TrialError::io(path, e))
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let mut file = fs::File::create(&tmp).map_err(|e| TrialError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| TrialError::io(&tmp, e))?;
    file.sync_all().map_err(|e| TrialError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| TrialError::io(path, e))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(|e| TrialError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_starts_with_shebang_and_abort() {
        let script = DriverScript::new()
            .with_preamble(vec!["source /det/setup.sh".into(), "export DETECTOR_CONFIG=epic".into()])
            .with_command("npsim --help")
            .with_command("eicrecon --help");
        let text = script.render().unwrap();
        assert!(text.starts_with("#!/bin/bash\nset -e\n"));
        let setup = text.find("source /det/setup.sh").unwrap();
        let sim = text.find("npsim --help").unwrap();
        let rec = text.find("eicrecon --help").unwrap();
        assert!(setup < sim && sim < rec);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("T1").join("do_aid2e_T1.sh");
        DriverScript::new().with_command("echo hi").write(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
        assert!(fs::read_to_string(&path).unwrap().contains("echo hi"));
    }
}
