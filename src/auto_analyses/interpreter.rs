//! Headless Interpreter
//!
//! The auto-analyses drive the data store through a fixed vocabulary of
//! user functions ([`UserFn`]) issued to an [`Interpreter`]. The
//! [`HeadlessInterpreter`] records each call, performs the data store side
//! of it and, unless in dry-run mode, writes the output files.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::error::{RelaxError, RelaxResult};
use crate::pipes::{DataStore, PipeType, ResultFile};

/// A user function issued by an auto-analysis.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "user_function", rename_all = "snake_case")]
pub enum UserFn {
    SpectrumErrorAnalysis,
    Calc,
    GridSearch { inc: usize },
    Minimise { algorithm: String },
    MonteCarloSetup { number: usize },
    MonteCarloCreateData,
    MonteCarloInitialValues,
    MonteCarloErrorAnalysis,
    Eliminate,
    SelectModel { model: String },
    ModelSelection {
        method: String,
        modsel_pipe: String,
        bundle: String,
        pipes: Vec<String>,
    },
    ValueWrite {
        param: String,
        file: String,
        dir: Option<PathBuf>,
    },
    ResultsWrite { file: String, dir: Option<PathBuf> },
    GraceWrite {
        y_data_type: String,
        file: String,
        dir: PathBuf,
    },
    StateSave { state: String, dir: Option<PathBuf> },
}

impl UserFn {
    /// The dotted user function name.
    pub fn name(&self) -> &'static str {
        match self {
            UserFn::SpectrumErrorAnalysis => "spectrum.error_analysis",
            UserFn::Calc => "calc",
            UserFn::GridSearch { .. } => "minimise.grid_search",
            UserFn::Minimise { .. } => "minimise.execute",
            UserFn::MonteCarloSetup { .. } => "monte_carlo.setup",
            UserFn::MonteCarloCreateData => "monte_carlo.create_data",
            UserFn::MonteCarloInitialValues => "monte_carlo.initial_values",
            UserFn::MonteCarloErrorAnalysis => "monte_carlo.error_analysis",
            UserFn::Eliminate => "eliminate",
            UserFn::SelectModel { .. } => "select_model",
            UserFn::ModelSelection { .. } => "model_selection",
            UserFn::ValueWrite { .. } => "value.write",
            UserFn::ResultsWrite { .. } => "results.write",
            UserFn::GraceWrite { .. } => "grace.write",
            UserFn::StateSave { .. } => "state.save",
        }
    }
}

impl fmt::Display for UserFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        match self {
            UserFn::GridSearch { inc } => write!(f, "inc={}", inc)?,
            UserFn::Minimise { algorithm } => write!(f, "'{}'", algorithm)?,
            UserFn::MonteCarloSetup { number } => write!(f, "number={}", number)?,
            UserFn::SelectModel { model } => write!(f, "model='{}'", model)?,
            UserFn::ModelSelection {
                method,
                modsel_pipe,
                ..
            } => write!(f, "method='{}', modsel_pipe='{}'", method, modsel_pipe)?,
            UserFn::ValueWrite { param, file, .. } => write!(f, "param='{}', file='{}'", param, file)?,
            UserFn::ResultsWrite { file, .. } => write!(f, "file='{}'", file)?,
            UserFn::GraceWrite { y_data_type, file, .. } => {
                write!(f, "y_data_type='{}', file='{}'", y_data_type, file)?
            }
            UserFn::StateSave { state, .. } => write!(f, "state='{}'", state)?,
            _ => {}
        }
        write!(f, ")")
    }
}

/// The Grace y-data type plotting peak intensities.
const PEAK_INTENSITY: &str = "peak_intensity";

type GracePoint = (usize, f64, Option<f64>);
type GraceSet = (String, Vec<GracePoint>);

/// Executes user functions against a data store.
pub trait Interpreter: Send {
    fn apply(&mut self, ds: &DataStore, uf: UserFn) -> RelaxResult<()>;

    /// Every user function applied so far, if recorded.
    fn calls(&self) -> &[UserFn] {
        &[]
    }
}

/// Interpreter used for batch and test runs.
#[derive(Debug, Default)]
pub struct HeadlessInterpreter {
    dry_run: bool,
    calls: Vec<UserFn>,
}

impl HeadlessInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips all file output.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            calls: Vec::new(),
        }
    }

    /// Names of the user functions applied so far.
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.iter().map(UserFn::name).collect()
    }

    fn current_pipe(ds: &DataStore) -> RelaxResult<String> {
        ds.cdp_name().ok_or(RelaxError::NoPipe(None))
    }

    fn write_file(&self, path: &Path, content: &str) -> RelaxResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Per-spin values of one parameter of the current pipe.
    fn spin_values(ds: &DataStore, param: &str) -> RelaxResult<Vec<(String, f64, Option<f64>)>> {
        ds.with_pipe(None, |pipe| {
            pipe.selected_spins()
                .filter_map(|spin| {
                    spin.params
                        .get(param)
                        .map(|v| (spin.id.clone(), *v, spin.errors.get(param).copied()))
                })
                .collect()
        })
    }

    /// Data sets of a Grace plot, x being the spin's position.
    ///
    /// Peak intensities give one set per spectrum ID, any other data type a
    /// single set of parameter values.
    fn grace_sets(ds: &DataStore, y_data_type: &str) -> RelaxResult<Vec<GraceSet>> {
        if y_data_type != PEAK_INTENSITY {
            let points = Self::spin_values(ds, y_data_type)?
                .into_iter()
                .enumerate()
                .map(|(i, (_, value, error))| (i + 1, value, error))
                .collect();
            return Ok(vec![(y_data_type.to_string(), points)]);
        }

        ds.with_pipe(None, |pipe| {
            let mut sets: BTreeMap<String, Vec<GracePoint>> = BTreeMap::new();
            for (i, spin) in pipe.selected_spins().enumerate() {
                for (spectrum, value) in &spin.intensities {
                    sets.entry(spectrum.clone()).or_default().push((i + 1, *value, None));
                }
            }
            sets.into_iter().collect()
        })
    }

    fn calc(ds: &DataStore) -> RelaxResult<()> {
        let pipe_name = Self::current_pipe(ds)?;
        if ds.get_type(None)? != PipeType::Noe {
            debug!("Nothing to calculate for the '{}' data pipe", pipe_name);
            return Ok(());
        }

        ds.with_pipe_mut(None, |pipe| {
            pipe.require_spins(&pipe_name)?;
            for spin in pipe.spins.iter_mut().filter(|s| s.select) {
                let (Some(sat), Some(reference)) =
                    (spin.intensities.get("sat"), spin.intensities.get("ref"))
                else {
                    debug!("Spin '{}' lacks the sat/ref intensities, skipping", spin.id);
                    continue;
                };
                if *reference == 0.0 {
                    continue;
                }
                let noe = sat / reference;
                spin.params.insert("noe".to_string(), noe);
            }
            Ok::<(), RelaxError>(())
        })?
    }

    fn model_selection(
        ds: &DataStore,
        modsel_pipe: &str,
        bundle: &str,
        pipes: &[String],
    ) -> RelaxResult<()> {
        let Some(first) = pipes.first() else {
            return Err(RelaxError::MissingArgument("pipes".to_string()));
        };
        for pipe in pipes {
            ds.test(Some(pipe))?;
        }

        if !ds.has_pipe(modsel_pipe) {
            ds.copy(Some(first), Some(modsel_pipe), Some(bundle))?;
        }
        ds.switch(modsel_pipe)
    }
}

fn target(dir: &Option<PathBuf>, file: &str) -> PathBuf {
    match dir {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

impl Interpreter for HeadlessInterpreter {
    fn apply(&mut self, ds: &DataStore, uf: UserFn) -> RelaxResult<()> {
        info!("relax> {}", uf);
        self.calls.push(uf.clone());

        match uf {
            UserFn::SpectrumErrorAnalysis => {
                let pipe_name = Self::current_pipe(ds)?;
                ds.with_pipe_mut(None, |pipe| {
                    pipe.require_spins(&pipe_name)?;
                    pipe.set_global("spectrum_errors", true);
                    Ok::<(), RelaxError>(())
                })?
            }
            UserFn::Calc => Self::calc(ds),
            UserFn::MonteCarloSetup { number } => {
                ds.with_pipe_mut(None, |pipe| pipe.set_global("sim_number", number))
            }
            UserFn::SelectModel { model } => {
                ds.with_pipe_mut(None, |pipe| pipe.set_global("model", model))
            }
            UserFn::ModelSelection {
                modsel_pipe,
                bundle,
                pipes,
                ..
            } => Self::model_selection(ds, &modsel_pipe, &bundle, &pipes),
            UserFn::ValueWrite { param, file, dir } => {
                if self.dry_run {
                    return Ok(());
                }
                let path = target(&dir, &file);
                let mut content = format!("# {:<18} {:>16} {:>16}\n", "Spin_ID", "Value", "Error");
                for (id, value, error) in Self::spin_values(ds, &param)? {
                    let error = error.map_or("None".to_string(), |e| e.to_string());
                    content.push_str(&format!("{:<20} {:>16} {:>16}\n", id, value, error));
                }
                self.write_file(&path, &content)
            }
            UserFn::ResultsWrite { file, dir } => {
                if self.dry_run {
                    return Ok(());
                }
                let pipe = ds.get_pipe(None)?;
                let path = target(&dir, &format!("{}.json", file));
                self.write_file(&path, &serde_json::to_string_pretty(&pipe)?)
            }
            UserFn::GraceWrite {
                y_data_type,
                file,
                dir,
            } => {
                if self.dry_run {
                    return Ok(());
                }
                let path = dir.join(&file);
                let mut content = format!("@    yaxis  label \"{}\"\n", y_data_type);
                for (set, (legend, points)) in Self::grace_sets(ds, &y_data_type)?.iter().enumerate() {
                    content.push_str(&format!("@    s{} legend \"{}\"\n", set, legend));
                    content.push_str(&format!("@target G0.S{}\n@type xydy\n", set));
                    for (x, value, error) in points {
                        content.push_str(&format!("{} {} {}\n", x, value, error.unwrap_or(0.0)));
                    }
                    content.push_str("&\n");
                }
                self.write_file(&path, &content)?;

                ds.add_result_file(
                    None,
                    ResultFile {
                        kind: "grace".to_string(),
                        label: "Grace".to_string(),
                        path,
                    },
                )
            }
            UserFn::StateSave { state, dir } => {
                if self.dry_run {
                    return Ok(());
                }
                ds.save_state(target(&dir, &state))
            }
            UserFn::GridSearch { .. }
            | UserFn::Minimise { .. }
            | UserFn::MonteCarloCreateData
            | UserFn::MonteCarloInitialValues
            | UserFn::MonteCarloErrorAnalysis
            | UserFn::Eliminate => {
                // Optimisation is external; the current pipe only needs to exist
                ds.test(None)
            }
        }
    }

    fn calls(&self) -> &[UserFn] {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::SpinContainer;
    use crate::status::Status;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn noe_store() -> Arc<DataStore> {
        let ds = DataStore::new(Status::for_tests());
        ds.create("noe", "noe", Some("noe bundle"), true).unwrap();
        ds.add_spin(
            None,
            SpinContainer::new(":1@N").with_intensity("ref", 100.0).with_intensity("sat", 80.0),
        )
        .unwrap();
        ds.add_spin(None, SpinContainer::new(":2@N").with_intensity("ref", 50.0))
            .unwrap();
        ds
    }

    #[test]
    fn test_calc_noe_ratio() {
        let ds = noe_store();
        let mut interpreter = HeadlessInterpreter::new();
        interpreter.apply(&ds, UserFn::Calc).unwrap();

        let pipe = ds.get_pipe(None).unwrap();
        assert!((pipe.spin(":1@N").unwrap().params["noe"] - 0.8).abs() < 1e-12);
        assert!(pipe.spin(":2@N").unwrap().params.get("noe").is_none());
    }

    #[test]
    fn test_error_analysis_needs_spins() {
        let ds = DataStore::new(Status::for_tests());
        ds.create("empty", "noe", None, true).unwrap();

        let err = HeadlessInterpreter::new()
            .apply(&ds, UserFn::SpectrumErrorAnalysis)
            .unwrap_err();
        assert!(matches!(err, RelaxError::MissingData { .. }));
    }

    #[test]
    fn test_writes_files() {
        let dir = tempdir().unwrap();
        let ds = noe_store();
        let mut interpreter = HeadlessInterpreter::new();

        interpreter.apply(&ds, UserFn::Calc).unwrap();
        interpreter
            .apply(
                &ds,
                UserFn::ValueWrite {
                    param: "noe".to_string(),
                    file: "noe.out".to_string(),
                    dir: Some(dir.path().to_path_buf()),
                },
            )
            .unwrap();
        interpreter
            .apply(
                &ds,
                UserFn::GraceWrite {
                    y_data_type: "noe".to_string(),
                    file: "noe.agr".to_string(),
                    dir: dir.path().join("grace"),
                },
            )
            .unwrap();

        let values = fs::read_to_string(dir.path().join("noe.out")).unwrap();
        assert!(values.contains(":1@N"));
        assert!(!values.contains(":2@N"));
        assert!(dir.path().join("grace/noe.agr").exists());
        assert_eq!(ds.get_pipe(None).unwrap().result_files.len(), 1);
        assert_eq!(interpreter.call_names(), vec!["calc", "value.write", "grace.write"]);
    }

    #[test]
    fn test_intensity_plot_has_data() {
        let dir = tempdir().unwrap();
        let ds = noe_store();

        HeadlessInterpreter::new()
            .apply(
                &ds,
                UserFn::GraceWrite {
                    y_data_type: "peak_intensity".to_string(),
                    file: "intensities.agr".to_string(),
                    dir: dir.path().to_path_buf(),
                },
            )
            .unwrap();

        let plot = fs::read_to_string(dir.path().join("intensities.agr")).unwrap();
        assert!(plot.contains("@    s0 legend \"ref\""));
        assert!(plot.contains("@    s1 legend \"sat\""));
        let data: Vec<&str> = plot
            .lines()
            .filter(|l| !l.starts_with('@') && !l.starts_with('&'))
            .collect();
        assert_eq!(data, vec!["1 100 0", "2 50 0", "1 80 0"]);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempdir().unwrap();
        let ds = noe_store();
        let mut interpreter = HeadlessInterpreter::dry_run();

        interpreter
            .apply(
                &ds,
                UserFn::StateSave {
                    state: "noe.save".to_string(),
                    dir: Some(dir.path().to_path_buf()),
                },
            )
            .unwrap();

        assert!(!dir.path().join("noe.save").exists());
        assert_eq!(interpreter.calls().len(), 1);
    }

    #[test]
    fn test_model_selection_copies_first_candidate() {
        let ds = DataStore::new(Status::for_tests());
        ds.create("m1 - mf", "mf", Some("mf"), true).unwrap();
        ds.create("m2 - mf", "mf", Some("mf"), true).unwrap();

        HeadlessInterpreter::new()
            .apply(
                &ds,
                UserFn::ModelSelection {
                    method: "AIC".to_string(),
                    modsel_pipe: "final - mf".to_string(),
                    bundle: "mf".to_string(),
                    pipes: vec!["m1 - mf".to_string(), "m2 - mf".to_string()],
                },
            )
            .unwrap();

        assert_eq!(ds.cdp_name().as_deref(), Some("final - mf"));
        assert_eq!(ds.get_bundle("final - mf").unwrap().as_deref(), Some("mf"));
    }

    #[test]
    fn test_display() {
        let uf = UserFn::GridSearch { inc: 11 };
        assert_eq!(uf.to_string(), "minimise.grid_search(inc=11)");
        assert_eq!(UserFn::Calc.to_string(), "calc()");
    }
}
