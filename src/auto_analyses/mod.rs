//! Auto-Analyses
//!
//! Multi-step protocols run against one pipe and its bundle:
//!
//! - [`NoeCalc`]: steady-state NOE ratios
//! - [`RelaxFit`]: exponential R1/R2 curve fitting
//! - [`ModelFree`]: model-free analysis with model selection
//! - [`RelaxDisp`]: relaxation dispersion with model selection
//!
//! Every protocol holds the execution lock for its whole run, keeps a
//! progress record under its bundle name and reports through the
//! `auto_analyses` observer channel.

pub mod interpreter;
pub mod model_free;
pub mod noe;
pub mod relax_disp;
pub mod relax_fit;

use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RelaxError, RelaxResult};
use crate::execution::RunAnalysis;
use crate::pipes::DataStore;
use crate::status::LockMode;

pub use interpreter::{HeadlessInterpreter, Interpreter, UserFn};
pub use model_free::ModelFree;
pub use noe::NoeCalc;
pub use relax_disp::RelaxDisp;
pub use relax_fit::RelaxFit;

/// Model selection techniques understood by the protocols.
pub const MODSEL_METHODS: &[&str] = &["AIC", "AICc", "BIC"];

pub(crate) fn check_modsel(method: &str) -> RelaxResult<()> {
    if MODSEL_METHODS.contains(&method) {
        return Ok(());
    }
    Err(RelaxError::InvalidModelSelection {
        method: method.to_string(),
    })
}

/// The frame shared by every protocol.
///
/// Takes the execution lock under the bundle name, creates the progress
/// record, checks and switches to the base pipe and runs `body`. The
/// completion flag is set and the lock released whether or not `body`
/// succeeds.
pub(crate) fn run_protocol<F>(
    ds: &DataStore,
    pipe_name: &str,
    pipe_bundle: &str,
    kind: &str,
    body: F,
) -> RelaxResult<()>
where
    F: FnOnce() -> RelaxResult<()>,
{
    if pipe_bundle.trim().is_empty() {
        return Err(RelaxError::MissingArgument("pipe_bundle".to_string()));
    }

    let status = ds.status();
    let _lock = status.exec_lock.lock(pipe_bundle, LockMode::AutoAnalysis)?;

    status.init_auto_analysis(pipe_bundle, kind);
    status.auto_analysis.set_current(Some(pipe_bundle));

    let outcome = check_pipe(ds, pipe_name).and_then(|_| body());

    let fin = status.auto_analysis.set_fin(pipe_bundle, true);
    status.auto_analysis.set_current(None);

    match (outcome, fin) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(_)) => {
            info!("The '{}' auto-analysis of '{}' is complete", kind, pipe_bundle);
            Ok(())
        }
    }
}

fn check_pipe(ds: &DataStore, pipe_name: &str) -> RelaxResult<()> {
    if !ds.has_pipe(pipe_name) {
        return Err(RelaxError::NoPipe(Some(pipe_name.to_string())));
    }
    if ds.cdp_name().as_deref() != Some(pipe_name) {
        ds.switch(pipe_name)?;
    }
    Ok(())
}

/// Pipe name of a model within a bundle.
pub(crate) fn model_pipe(model: &str, bundle: &str) -> String {
    format!("{} - {}", model, bundle)
}

pub(crate) fn subdir(dir: &Option<PathBuf>, name: &str) -> PathBuf {
    match dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Runs Monte Carlo simulations on the current pipe, updating the
/// progress record's simulation counter.
pub(crate) fn monte_carlo(
    ds: &DataStore,
    interpreter: &mut dyn Interpreter,
    pipe_bundle: &str,
    number: usize,
    algorithm: &str,
    eliminate: bool,
) -> RelaxResult<()> {
    let records = &ds.status().auto_analysis;

    interpreter.apply(ds, UserFn::MonteCarloSetup { number })?;
    interpreter.apply(ds, UserFn::MonteCarloCreateData)?;
    interpreter.apply(ds, UserFn::MonteCarloInitialValues)?;
    records.set_mc_number(pipe_bundle, Some(0))?;
    interpreter.apply(
        ds,
        UserFn::Minimise {
            algorithm: algorithm.to_string(),
        },
    )?;
    records.set_mc_number(pipe_bundle, Some(number))?;
    if eliminate {
        interpreter.apply(ds, UserFn::Eliminate)?;
    }
    interpreter.apply(ds, UserFn::MonteCarloErrorAnalysis)
}

/// One auto-analysis with its parameters, as listed in a batch file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum AnalysisSpec {
    #[serde(rename = "noe")]
    Noe(NoeCalc),
    #[serde(rename = "relax_fit")]
    RelaxFit(RelaxFit),
    #[serde(rename = "mf")]
    ModelFree(ModelFree),
    #[serde(rename = "relax_disp")]
    RelaxDisp(RelaxDisp),
}

impl AnalysisSpec {
    /// Analysis type name.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisSpec::Noe(_) => "noe",
            AnalysisSpec::RelaxFit(_) => "relax_fit",
            AnalysisSpec::ModelFree(_) => "mf",
            AnalysisSpec::RelaxDisp(_) => "relax_disp",
        }
    }

    pub fn pipe_name(&self) -> &str {
        match self {
            AnalysisSpec::Noe(a) => &a.pipe_name,
            AnalysisSpec::RelaxFit(a) => &a.pipe_name,
            AnalysisSpec::ModelFree(a) => &a.pipe_name,
            AnalysisSpec::RelaxDisp(a) => &a.pipe_name,
        }
    }

    pub fn pipe_bundle(&self) -> &str {
        match self {
            AnalysisSpec::Noe(a) => &a.pipe_bundle,
            AnalysisSpec::RelaxFit(a) => &a.pipe_bundle,
            AnalysisSpec::ModelFree(a) => &a.pipe_bundle,
            AnalysisSpec::RelaxDisp(a) => &a.pipe_bundle,
        }
    }

    /// Sets the results directory where the analysis has none.
    pub fn default_results_dir(&mut self, dir: PathBuf) {
        let slot = match self {
            AnalysisSpec::Noe(a) => &mut a.results_dir,
            AnalysisSpec::RelaxFit(a) => &mut a.results_dir,
            AnalysisSpec::ModelFree(a) => &mut a.results_dir,
            AnalysisSpec::RelaxDisp(a) => &mut a.results_dir,
        };
        if slot.is_none() {
            *slot = Some(dir);
        }
    }

    /// Monte Carlo simulation counts, for validation.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        match self {
            AnalysisSpec::Noe(_) => Vec::new(),
            AnalysisSpec::RelaxFit(a) => vec![("grid_inc", a.grid_inc), ("mc_sim_num", a.mc_sim_num)],
            AnalysisSpec::ModelFree(a) => vec![("grid_inc", a.grid_inc), ("mc_sim_num", a.mc_sim_num)],
            AnalysisSpec::RelaxDisp(a) => {
                let mut counts = vec![("mc_sim_num", a.mc_sim_num)];
                counts.extend(a.grid_inc.map(|g| ("grid_inc", g)));
                counts.extend(a.exp_mc_sim_num.map(|n| ("exp_mc_sim_num", n)));
                counts
            }
        }
    }

    /// Model selection technique, for validation.
    pub fn modsel(&self) -> Option<&str> {
        match self {
            AnalysisSpec::ModelFree(a) => Some(&a.modsel),
            AnalysisSpec::RelaxDisp(a) => Some(&a.modsel),
            _ => None,
        }
    }

    /// Model lists, for validation.
    pub fn models(&self) -> &[String] {
        match self {
            AnalysisSpec::ModelFree(a) => &a.models,
            AnalysisSpec::RelaxDisp(a) => &a.models,
            _ => &[],
        }
    }

    /// Runs the analysis.
    pub fn run(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        match self {
            AnalysisSpec::Noe(a) => a.run(ds, interpreter),
            AnalysisSpec::RelaxFit(a) => a.run(ds, interpreter),
            AnalysisSpec::ModelFree(a) => a.run(ds, interpreter),
            AnalysisSpec::RelaxDisp(a) => a.run(ds, interpreter),
        }
    }
}

/// An analysis paired with the interpreter it drives, ready for
/// [`crate::execution::Execute`].
pub struct AnalysisJob {
    spec: AnalysisSpec,
    interpreter: Box<dyn Interpreter>,
}

impl AnalysisJob {
    pub fn new(spec: AnalysisSpec, interpreter: Box<dyn Interpreter>) -> Self {
        Self { spec, interpreter }
    }

    /// A job driving a [`HeadlessInterpreter`].
    pub fn headless(spec: AnalysisSpec, dry_run: bool) -> Self {
        let interpreter = if dry_run {
            HeadlessInterpreter::dry_run()
        } else {
            HeadlessInterpreter::new()
        };
        Self::new(spec, Box::new(interpreter))
    }

    pub fn spec(&self) -> &AnalysisSpec {
        &self.spec
    }

    pub fn calls(&self) -> &[UserFn] {
        self.interpreter.calls()
    }
}

impl RunAnalysis for AnalysisJob {
    fn name(&self) -> String {
        self.spec.pipe_bundle().to_string()
    }

    fn run_analysis(&mut self, ds: &DataStore) -> RelaxResult<()> {
        if ds.status().exec_lock.locked() && !ds.status().exec_lock.is_owned_by_current_thread() {
            warn!(
                "Waiting for the execution lock before running '{}'",
                self.spec.pipe_bundle()
            );
        }
        self.spec.run(ds, self.interpreter.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execute;
    use crate::pipes::SpinContainer;
    use crate::status::Status;
    use std::sync::Arc;

    fn noe_store() -> Arc<DataStore> {
        let ds = DataStore::new(Status::for_tests());
        ds.create("noe", "noe", Some("NOE"), true).unwrap();
        ds.add_spin(
            None,
            SpinContainer::new(":5@N").with_intensity("ref", 10.0).with_intensity("sat", 7.5),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_protocol_frame_releases_lock_on_failure() {
        let ds = noe_store();
        let status = Arc::clone(ds.status());

        let err = run_protocol(&ds, "noe", "NOE", "noe", || {
            assert!(status.exec_lock.locked());
            assert_eq!(status.auto_analysis.current().as_deref(), Some("NOE"));
            Err(RelaxError::analysis("fit failed"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "fit failed");
        assert!(!status.exec_lock.locked());
        assert!(status.auto_analysis.get("NOE").unwrap().fin);
        assert!(status.auto_analysis.current().is_none());
    }

    #[test]
    fn test_protocol_frame_missing_pipe() {
        let ds = noe_store();
        let err = run_protocol(&ds, "ghost", "NOE", "noe", || Ok(())).unwrap_err();
        assert!(matches!(err, RelaxError::NoPipe(Some(ref n)) if n == "ghost"));
        assert!(!ds.status().exec_lock.locked());
    }

    #[test]
    fn test_protocol_frame_switches_pipe() {
        let ds = noe_store();
        ds.create("other", "mf", None, true).unwrap();

        run_protocol(&ds, "noe", "NOE", "noe", || Ok(())).unwrap();
        assert_eq!(ds.cdp_name().as_deref(), Some("noe"));
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = r#"
type: relax_disp
pipe_name: base
pipe_bundle: disp
models: ["R2eff", "No Rex", "LM63"]
grid_inc: 5
"#;
        let spec: AnalysisSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind(), "relax_disp");
        assert_eq!(spec.pipe_bundle(), "disp");
        assert_eq!(spec.models().len(), 3);
        assert!(spec.counts().contains(&("grid_inc", 5)));
    }

    #[test]
    fn test_default_results_dir_keeps_explicit() {
        let mut spec = AnalysisSpec::Noe(NoeCalc {
            results_dir: Some(PathBuf::from("mine")),
            ..NoeCalc::new("noe", "NOE")
        });
        spec.default_results_dir(PathBuf::from("other"));
        match spec {
            AnalysisSpec::Noe(a) => assert_eq!(a.results_dir, Some(PathBuf::from("mine"))),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_job_runs_on_worker_thread() {
        let ds = noe_store();
        let spec = AnalysisSpec::Noe(NoeCalc {
            save_state: false,
            ..NoeCalc::new("noe", "NOE")
        });

        let job = Execute::new(Arc::clone(&ds), AnalysisJob::headless(spec, true), 0, true)
            .start()
            .join()
            .unwrap();

        assert!(ds.status().exception_queue.is_empty());
        assert!(!ds.status().exec_lock.locked());
        assert_eq!(job.analysis().calls().first(), Some(&UserFn::SpectrumErrorAnalysis));
        let noe = ds.get_pipe(Some("noe")).unwrap().spin(":5@N").unwrap().params["noe"];
        assert!((noe - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_job_failure_is_queued() {
        let ds = noe_store();
        let spec = AnalysisSpec::Noe(NoeCalc::new("missing", "NOE"));

        Execute::new(Arc::clone(&ds), AnalysisJob::headless(spec, true), 2, true)
            .start()
            .join()
            .unwrap();

        let entry = ds.status().exception_queue.try_pop().unwrap();
        assert_eq!(entry.data_index, 2);
        assert!(matches!(entry.error, RelaxError::NoPipe(_)));
        assert!(!ds.status().exec_lock.locked());
    }
}
