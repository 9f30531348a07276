//! Per-stage command builders
//!
//! Each builder turns trial coordinates (tag, input label, steering file,
//! objective) into one shell command. Builders only compute strings; the
//! stand-alone `make_script` variants are the only place they touch disk.

pub mod ana;
pub mod rec;
pub mod sim;

pub use ana::{AnaGenerator, AnalysisInputs, RuleTemplate, RuleValues, Slot};
pub use rec::{RecGenerator, RecoArgs};
pub use sim::SimGenerator;

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use crate::config::RunConfig;

    pub(crate) fn run_config() -> RunConfig {
        RunConfig::from_value(json!({
            "det_path": "/det",
            "det_config": "epic",
            "epic_setup": "/det/install/setup.sh",
            "out_path": "/out",
            "run_path": "/run",
            "sim_exec": "npsim",
            "sim_args": ["-N 50"],
            "rec_exec": "eicrecon",
            "rec_args": ["-Pjana:nevents=50"],
            "rec_collect": ["ReconstructedParticles", "EcalEndcapNClusters"],
            "sim_input": {
                "electron": { "location": "/steer/electron", "type": "gun" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_command() {
        let run = run_config();
        let (command, merged) =
            super::AnaGenerator::new(&run).make_merge_command("T1", "electron", crate::naming::Stage::Rec);
        assert_eq!(
            command,
            "hadd -f /out/T1/aid2e_merge_T1_rec_electron.edm4eic.root /out/T1/aid2e_T1_rec_electron_*.edm4eic.root"
        );
        assert_eq!(
            merged,
            std::path::PathBuf::from("/out/T1/aid2e_merge_T1_rec_electron.edm4eic.root")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_stage_scripts() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut run = run_config();
        run.run_path = dir.path().join("run");
        run.eicrecon_setup = Some("/opt/eicrecon/setup.sh".into());
        let run_dir = dir.path().join("run/T1");

        let sim = super::SimGenerator::new(&run)
            .make_script("T1", "electron", "central.e20ele.py", "epic_aid2e_T1", "npsim --help")
            .unwrap();
        let rec = super::RecGenerator::new(&run)
            .make_script("T1", "electron", "central.e20ele.py", "epic_aid2e_T1", "eicrecon --help")
            .unwrap();
        let ana = super::AnaGenerator::new(&run)
            .make_script("T1", "electron", "EnergyRes", "root -b -q res.C")
            .unwrap();

        assert_eq!(sim, run_dir.join("do_aid2e_T1_sim_electron_central_e20ele.sh"));
        assert_eq!(rec, run_dir.join("do_aid2e_T1_rec_electron_central_e20ele.sh"));
        assert_eq!(ana, run_dir.join("do_aid2e_T1_ana_electron_EnergyRes.sh"));

        for (path, command) in [(&sim, "npsim --help"), (&rec, "eicrecon --help"), (&ana, "root -b -q res.C")] {
            let text = fs::read_to_string(path).unwrap();
            assert!(text.starts_with("#!/bin/bash\nset -e\n"), "{}", path.display());
            assert!(text.contains("source /det/install/setup.sh"));
            assert!(text.contains(command));
            let mode = fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o777);
        }

        let setup = "source /opt/eicrecon/setup.sh";
        assert!(fs::read_to_string(&rec).unwrap().contains(setup));
        assert!(!fs::read_to_string(&sim).unwrap().contains(setup));
        assert!(!fs::read_to_string(&ana).unwrap().contains(setup));
        assert!(fs::read_to_string(&sim)
            .unwrap()
            .contains("export DETECTOR_CONFIG=epic_aid2e_T1"));
        assert!(fs::read_to_string(&ana).unwrap().contains("export DETECTOR_CONFIG=epic"));
    }
}
