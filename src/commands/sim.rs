//! Simulation commands and the overlap gate

use std::path::{Path, PathBuf};

use crate::config::{InputType, RunConfig};
use crate::error::{Result, OVERLAP_EXIT_CODE};
use crate::naming::{output_name, script_name, steering_tag, Stage};
use crate::script::{env_preamble, DriverScript};

/// Compact file the environment currently points at
const ACTIVE_COMPACT: &str = "$DETECTOR_PATH/$DETECTOR_CONFIG.xml";

/// Line of the overlap checker's report carrying the overlap count
const OVERLAP_REPORT: &str = "Number of illegal overlaps/extrusions : ";

/// Generates simulation commands for a trial
pub struct SimGenerator<'a> {
    run: &'a RunConfig,
}

impl<'a> SimGenerator<'a> {
    pub fn new(run: &'a RunConfig) -> Self {
        Self { run }
    }

    /// Command running the overlap checker on the active configuration
    ///
    /// The checker's report goes to a log in the trial output directory; a
    /// guard then sums the reported overlap counts and exits with status 9
    /// if any were found. Returns `None` when no checker is configured.
    pub fn make_overlap_check_command(&self, tag: &str) -> Option<String> {
        let checker = self.run.overlap_check.as_ref()?;
        let log = self
            .run
            .trial_out_dir(tag)
            .join(output_name(Some(Stage::Geo), tag, "", "", "", ""));
        let log = log.display();
        Some(format!(
            "{checker} -c {compact} > {log} 2>&1 || true\n\
             n_overlaps=$(grep -o \"{report}[0-9]*\" {log} | awk '{{s += $NF}} END {{print s + 0}}')\n\
             if [ \"$n_overlaps\" -gt 0 ]; then echo \"found $n_overlaps illegal overlaps\" >&2; exit {code}; fi",
            checker = checker,
            compact = ACTIVE_COMPACT,
            log = log,
            report = OVERLAP_REPORT,
            code = OVERLAP_EXIT_CODE,
        ))
    }

    /// Command simulating one steering file
    ///
    /// Assumes `DETECTOR_CONFIG` already names the trial's configuration.
    pub fn make_command(
        &self,
        tag: &str,
        label: &str,
        steer_dir: &Path,
        steer: &str,
        input_type: InputType,
    ) -> String {
        let out_file = self
            .run
            .trial_out_dir(tag)
            .join(output_name(Some(Stage::Sim), tag, label, &steering_tag(steer), "", ""));
        let steer_path = steer_dir.join(steer);

        let mut parts = vec![
            self.run.sim_exec.clone(),
            format!("--compactFile {}", ACTIVE_COMPACT),
            format!("--steeringFile {}", steer_path.display()),
        ];
        parts.extend(self.run.sim_args.iter().cloned());
        match input_type {
            InputType::Gun => parts.push("-G".to_string()),
            InputType::Gps => {
                parts.push("--enableG4GPS".to_string());
                parts.push(format!(
                    "--macroFile {}",
                    steer_path.with_extension("mac").display()
                ));
            }
            InputType::Hepmc => {}
        }
        parts.push(format!("--outputFile {}", out_file.display()));

        let command = parts.join(" ");
        log::debug!("simulation command for {}/{}: {}", tag, steer, command);
        command
    }

    /// Stand-alone driver script for one simulation
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
            Some(Stage::Sim),
            "",
        ));
        DriverScript::new()
            .with_preamble(env_preamble(self.run, config, false))
            .with_command(command)
            .write(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::run_config;

    #[test]
    fn test_gun_command() {
        let run = run_config();
        let sim = SimGenerator::new(&run);
        let command = sim.make_command(
            "T1",
            "electron",
            Path::new("/steer/electron"),
            "central.e20ele.py",
            InputType::Gun,
        );
        assert_eq!(
            command,
            "npsim --compactFile $DETECTOR_PATH/$DETECTOR_CONFIG.xml \
             --steeringFile /steer/electron/central.e20ele.py -N 50 -G \
             --outputFile /out/T1/aid2e_T1_sim_electron_central_e20ele.edm4hep.root"
        );
    }

    #[test]
    fn test_gps_command_uses_macro() {
        let run = run_config();
        let sim = SimGenerator::new(&run);
        let command = sim.make_command("T1", "beam", Path::new("/steer/gps"), "beam.py", InputType::Gps);
        assert!(command.contains(" --enableG4GPS --macroFile /steer/gps/beam.mac "));
        assert!(command.ends_with("--outputFile /out/T1/aid2e_T1_sim_beam_beam.edm4hep.root"));
    }

    #[test]
    fn test_overlap_gate() {
        let mut run = run_config();
        assert!(SimGenerator::new(&run).make_overlap_check_command("T1").is_none());

        run.overlap_check = Some("checkOverlaps".into());
        let command = SimGenerator::new(&run).make_overlap_check_command("T1").unwrap();
        assert!(command.starts_with(
            "checkOverlaps -c $DETECTOR_PATH/$DETECTOR_CONFIG.xml > /out/T1/aid2e_T1_geo.overlaps.txt 2>&1 || true\n"
        ));
        assert!(command.contains("print s + 0"));
        assert!(command.ends_with("exit 9; fi"));
    }

    /// Run a trial script whose overlap checker reports `overlaps` and exits with `status`
    #[cfg(unix)]
    fn run_gate(overlaps: u32, status: i32) -> Option<i32> {
        let dir = tempfile::tempdir().unwrap();
        let checker = DriverScript::new()
            .with_command(format!("echo \"{}{}\"", OVERLAP_REPORT, overlaps))
            .with_command(format!("exit {}", status))
            .write(&dir.path().join("check_overlaps.sh"))
            .unwrap();

        let mut run = run_config();
        run.out_path = dir.path().join("out");
        run.overlap_check = Some(checker.display().to_string());
        std::fs::create_dir_all(run.trial_out_dir("T1")).unwrap();

        let gate = SimGenerator::new(&run).make_overlap_check_command("T1").unwrap();
        let script = DriverScript::new()
            .with_command(gate)
            .with_command("echo simulated")
            .write(&dir.path().join("do_aid2e_T1.sh"))
            .unwrap();
        std::process::Command::new("bash")
            .arg(&script)
            .status()
            .unwrap()
            .code()
    }

    #[cfg(unix)]
    #[test]
    fn test_gate_exit_code_survives_failing_checker() {
        assert_eq!(run_gate(3, 1), Some(OVERLAP_EXIT_CODE));
        assert_eq!(run_gate(2, 0), Some(OVERLAP_EXIT_CODE));
    }

    #[cfg(unix)]
    #[test]
    fn test_gate_passes_clean_geometry() {
        assert_eq!(run_gate(0, 0), Some(0));
        assert_eq!(run_gate(0, 1), Some(0));
    }
}
