//! Steady-state NOE auto-analysis.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::interpreter::{Interpreter, UserFn};
use super::{run_protocol, subdir};
use crate::error::RelaxResult;
use crate::pipes::DataStore;

fn default_file_root() -> String {
    "noe".to_string()
}

fn default_true() -> bool {
    true
}

/// Calculates NOE ratios from saturated and reference peak intensities.
///
/// The pipe must hold the spin system with the `sat` and `ref`
/// intensities of each spin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoeCalc {
    /// Pipe holding all the data for the analysis
    pub pipe_name: String,

    /// Bundle for the analysis, also the name of its progress record
    pub pipe_bundle: String,

    #[serde(default = "default_file_root")]
    pub file_root: String,

    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Save the program state at the end
    #[serde(default = "default_true")]
    pub save_state: bool,
}

impl NoeCalc {
    pub fn new(pipe_name: impl Into<String>, pipe_bundle: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            pipe_bundle: pipe_bundle.into(),
            file_root: default_file_root(),
            results_dir: None,
            save_state: true,
        }
    }

    pub fn run(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        run_protocol(ds, &self.pipe_name, &self.pipe_bundle, "noe", || {
            self.execute(ds, interpreter)
        })
    }

    fn execute(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        let grace_dir = subdir(&self.results_dir, "grace");

        interpreter.apply(ds, UserFn::SpectrumErrorAnalysis)?;
        interpreter.apply(ds, UserFn::Calc)?;

        interpreter.apply(
            ds,
            UserFn::ValueWrite {
                param: "noe".to_string(),
                file: format!("{}.out", self.file_root),
                dir: self.results_dir.clone(),
            },
        )?;
        interpreter.apply(
            ds,
            UserFn::ResultsWrite {
                file: "results".to_string(),
                dir: self.results_dir.clone(),
            },
        )?;

        for (y_data_type, file) in [("peak_intensity", "intensities.agr"), ("noe", "noe.agr")] {
            interpreter.apply(
                ds,
                UserFn::GraceWrite {
                    y_data_type: y_data_type.to_string(),
                    file: file.to_string(),
                    dir: grace_dir.clone(),
                },
            )?;
        }

        if self.save_state {
            interpreter.apply(
                ds,
                UserFn::StateSave {
                    state: format!("{}.save", self.file_root),
                    dir: self.results_dir.clone(),
                },
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_analyses::HeadlessInterpreter;
    use crate::error::RelaxError;
    use crate::pipes::SpinContainer;
    use crate::status::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store() -> Arc<DataStore> {
        let ds = DataStore::new(Status::for_tests());
        ds.create("noe data", "noe", Some("NOE"), true).unwrap();
        ds.add_spin(
            None,
            SpinContainer::new(":2@N").with_intensity("ref", 200.0).with_intensity("sat", 150.0),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_call_sequence() {
        let ds = store();
        let mut interpreter = HeadlessInterpreter::dry_run();

        NoeCalc::new("noe data", "NOE").run(&ds, &mut interpreter).unwrap();

        assert_eq!(
            interpreter.call_names(),
            vec![
                "spectrum.error_analysis",
                "calc",
                "value.write",
                "results.write",
                "grace.write",
                "grace.write",
                "state.save"
            ]
        );
        assert!(ds.status().auto_analysis.get("NOE").unwrap().fin);
        assert!(!ds.status().exec_lock.locked());
    }

    #[test]
    fn test_results_written() {
        let dir = tempdir().unwrap();
        let ds = store();
        let analysis = NoeCalc {
            results_dir: Some(dir.path().to_path_buf()),
            ..NoeCalc::new("noe data", "NOE")
        };

        analysis.run(&ds, &mut HeadlessInterpreter::new()).unwrap();

        assert!(dir.path().join("noe.out").exists());
        assert!(dir.path().join("results.json").exists());
        assert!(dir.path().join("grace/noe.agr").exists());
        assert!(dir.path().join("noe.save").exists());

        let plot = std::fs::read_to_string(dir.path().join("grace/intensities.agr")).unwrap();
        assert!(plot.lines().any(|l| l == "1 200 0"));
        assert!(plot.lines().any(|l| l == "1 150 0"));
        assert_eq!(ds.get_pipe(None).unwrap().result_files.len(), 2);
    }

    #[test]
    fn test_status_notifications() {
        let ds = store();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        ds.status()
            .observers
            .auto_analyses
            .register("counter", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }, None)
            .unwrap();

        let analysis = NoeCalc {
            save_state: false,
            ..NoeCalc::new("noe data", "NOE")
        };
        analysis.run(&ds, &mut HeadlessInterpreter::dry_run()).unwrap();

        // Only the completion flag is written after initialisation
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_spins_releases_lock() {
        let ds = DataStore::new(Status::for_tests());
        ds.create("bare", "noe", None, true).unwrap();

        let err = NoeCalc::new("bare", "NOE")
            .run(&ds, &mut HeadlessInterpreter::dry_run())
            .unwrap_err();

        assert!(matches!(err, RelaxError::MissingData { .. }));
        assert!(!ds.status().exec_lock.locked());
        assert!(ds.status().auto_analysis.get("NOE").unwrap().fin);
    }
}
