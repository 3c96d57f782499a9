//! Relaxation dispersion auto-analysis.
//!
//! Every model is optimised in a copy of the base pipe placed in the
//! bundle. The `R2eff` model comes first and is never a candidate for
//! model selection, nor are the analytic models when only numeric models
//! are wanted. A lone model gets its own Monte Carlo simulations. When two or more models were optimised, model selection
//! creates the final pipe and the Monte Carlo simulations run on it.

use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use super::interpreter::{Interpreter, UserFn};
use super::{check_modsel, model_pipe, monte_carlo, run_protocol, subdir};
use crate::error::{RelaxError, RelaxResult};
use crate::pipes::DataStore;

/// The effective relaxation rate model.
pub const MODEL_R2EFF: &str = "R2eff";

/// The analytic dispersion models.
pub const MODEL_LIST_ANALYTIC: &[&str] = &[
    "LM63",
    "LM63 3-site",
    "CR72",
    "CR72 full",
    "IT99",
    "TSMFK01",
    "M61",
    "M61 skew",
    "DPL94",
    "TP02",
    "TAP03",
    "MMQ CR72",
    "MP05",
];

fn default_models() -> Vec<String> {
    vec![MODEL_R2EFF.to_string()]
}

fn default_grid_inc() -> Option<usize> {
    Some(11)
}

fn default_mc_sim_num() -> usize {
    500
}

fn default_modsel() -> String {
    "AIC".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelaxDisp {
    pub pipe_name: String,
    pub pipe_bundle: String,

    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Grid search increments, `None` skips the grid search
    #[serde(default = "default_grid_inc")]
    pub grid_inc: Option<usize>,

    #[serde(default = "default_mc_sim_num")]
    pub mc_sim_num: usize,

    /// Simulations for the R2eff model, defaults to `mc_sim_num`
    #[serde(default)]
    pub exp_mc_sim_num: Option<usize>,

    #[serde(default = "default_modsel")]
    pub modsel: String,

    /// Leave the analytic models out of model selection
    #[serde(default)]
    pub numeric_only: bool,

    /// Run Monte Carlo simulations for every model, not just the final one
    #[serde(default)]
    pub mc_sim_all_models: bool,

    /// Eliminate failed models and simulations
    #[serde(default = "default_true")]
    pub eliminate: bool,
}

impl RelaxDisp {
    pub fn new(pipe_name: impl Into<String>, pipe_bundle: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            pipe_bundle: pipe_bundle.into(),
            results_dir: None,
            models: default_models(),
            grid_inc: default_grid_inc(),
            mc_sim_num: default_mc_sim_num(),
            exp_mc_sim_num: None,
            modsel: default_modsel(),
            numeric_only: false,
            mc_sim_all_models: false,
            eliminate: true,
        }
    }

    /// Whether a model takes part in model selection.
    pub fn is_model_for_selection(&self, model: &str) -> bool {
        if model == MODEL_R2EFF {
            return false;
        }
        !(self.numeric_only && MODEL_LIST_ANALYTIC.contains(&model))
    }

    pub fn run(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        if self.models.is_empty() {
            return Err(RelaxError::MissingArgument("models".to_string()));
        }
        check_modsel(&self.modsel)?;

        run_protocol(ds, &self.pipe_name, &self.pipe_bundle, "relax_disp", || {
            self.execute(ds, interpreter)
        })
    }

    fn execute(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        if self.models.iter().any(|m| m == MODEL_R2EFF) {
            interpreter.apply(ds, UserFn::SpectrumErrorAnalysis)?;
        }

        let mut model_pipes = Vec::new();
        for model in &self.models {
            let pipe = model_pipe(model, &self.pipe_bundle);
            if self.is_model_for_selection(model) {
                model_pipes.push(pipe.clone());
            }

            ds.copy(Some(&self.pipe_name), Some(&pipe), Some(&self.pipe_bundle))?;
            ds.switch(&pipe)?;

            interpreter.apply(ds, UserFn::SelectModel { model: model.clone() })?;
            self.optimise(ds, interpreter, model)?;
            self.write_results(ds, interpreter, subdir(&self.results_dir, model))?;
        }

        if self.models.len() >= 2 {
            interpreter.apply(
                ds,
                UserFn::ModelSelection {
                    method: self.modsel.clone(),
                    modsel_pipe: model_pipe("final", &self.pipe_bundle),
                    bundle: self.pipe_bundle.clone(),
                    pipes: model_pipes,
                },
            )?;

            if !self.mc_sim_all_models {
                monte_carlo(
                    ds,
                    interpreter,
                    &self.pipe_bundle,
                    self.mc_sim_num,
                    "simplex",
                    self.eliminate,
                )?;
            }

            self.write_results(ds, interpreter, subdir(&self.results_dir, "final"))?;
        } else {
            warn!(
                "Model selection in the dispersion auto-analysis has been skipped as only {} model(s) have been optimised.",
                self.models.len()
            );
        }

        interpreter.apply(
            ds,
            UserFn::StateSave {
                state: "final_state".to_string(),
                dir: self.results_dir.clone(),
            },
        )
    }

    fn optimise(&self, ds: &DataStore, interpreter: &mut dyn Interpreter, model: &str) -> RelaxResult<()> {
        if let Some(inc) = self.grid_inc {
            interpreter.apply(ds, UserFn::GridSearch { inc })?;
        }
        interpreter.apply(
            ds,
            UserFn::Minimise {
                algorithm: "simplex".to_string(),
            },
        )?;
        if self.eliminate {
            interpreter.apply(ds, UserFn::Eliminate)?;
        }

        if self.mc_sim_all_models || self.models.len() < 2 || model == MODEL_R2EFF {
            let number = match (model, self.exp_mc_sim_num) {
                (MODEL_R2EFF, Some(n)) => n,
                _ => self.mc_sim_num,
            };
            monte_carlo(ds, interpreter, &self.pipe_bundle, number, "simplex", self.eliminate)?;
        }

        Ok(())
    }

    fn write_results(&self, ds: &DataStore, interpreter: &mut dyn Interpreter, dir: PathBuf) -> RelaxResult<()> {
        for param in ["r2eff", "chi2"] {
            interpreter.apply(
                ds,
                UserFn::ValueWrite {
                    param: param.to_string(),
                    file: format!("{}.out", param),
                    dir: Some(dir.clone()),
                },
            )?;
        }
        interpreter.apply(
            ds,
            UserFn::GraceWrite {
                y_data_type: "chi2".to_string(),
                file: "chi2.agr".to_string(),
                dir: dir.clone(),
            },
        )?;
        interpreter.apply(
            ds,
            UserFn::ResultsWrite {
                file: "results".to_string(),
                dir: Some(dir),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_analyses::HeadlessInterpreter;
    use crate::pipes::{Backends, SpinContainer};
    use crate::status::{Settings, Status};
    use std::sync::Arc;

    fn store() -> Arc<DataStore> {
        let ds = DataStore::new(Status::for_tests());
        ds.create("base pipe", "relax_disp", Some("disp"), true).unwrap();
        ds.add_spin(None, SpinContainer::new(":12@N")).unwrap();
        ds
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_model_selection_candidates() {
        let analysis = RelaxDisp {
            numeric_only: true,
            ..RelaxDisp::new("base pipe", "disp")
        };
        assert!(!analysis.is_model_for_selection("R2eff"));
        assert!(!analysis.is_model_for_selection("LM63"));
        assert!(!analysis.is_model_for_selection("CR72 full"));
        assert!(analysis.is_model_for_selection("No Rex"));
        assert!(analysis.is_model_for_selection("NS CPMG 2-site expanded"));

        let all = RelaxDisp::new("base pipe", "disp");
        assert!(all.is_model_for_selection("LM63"));
    }

    #[test]
    fn test_full_run() {
        let ds = store();
        let analysis = RelaxDisp {
            models: models(&["R2eff", "No Rex", "LM63"]),
            exp_mc_sim_num: Some(20),
            mc_sim_num: 100,
            ..RelaxDisp::new("base pipe", "disp")
        };

        let mut interpreter = HeadlessInterpreter::dry_run();
        analysis.run(&ds, &mut interpreter).unwrap();

        assert_eq!(
            ds.pipe_names(Some("disp")),
            vec!["LM63 - disp", "No Rex - disp", "R2eff - disp", "base pipe", "final - disp"]
        );
        assert_eq!(ds.cdp_name().as_deref(), Some("final - disp"));

        // R2eff simulations, then the final simulations
        let setups: Vec<_> = interpreter
            .calls()
            .iter()
            .filter_map(|uf| match uf {
                UserFn::MonteCarloSetup { number } => Some(*number),
                _ => None,
            })
            .collect();
        assert_eq!(setups, vec![20, 100]);

        // R2eff is excluded from model selection
        let selection = interpreter
            .calls()
            .iter()
            .find_map(|uf| match uf {
                UserFn::ModelSelection { pipes, .. } => Some(pipes.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(selection, vec!["No Rex - disp", "LM63 - disp"]);

        let record = ds.status().auto_analysis.get("disp").unwrap();
        assert_eq!(record.mc_number, Some(100));
        assert!(record.fin);
    }

    #[test]
    fn test_numeric_only_selection() {
        let ds = store();
        let analysis = RelaxDisp {
            models: models(&["R2eff", "No Rex", "LM63", "NS CPMG 2-site expanded"]),
            numeric_only: true,
            ..RelaxDisp::new("base pipe", "disp")
        };

        let mut interpreter = HeadlessInterpreter::dry_run();
        analysis.run(&ds, &mut interpreter).unwrap();

        let selection = interpreter
            .calls()
            .iter()
            .find_map(|uf| match uf {
                UserFn::ModelSelection { pipes, .. } => Some(pipes.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(selection, vec!["No Rex - disp", "NS CPMG 2-site expanded - disp"]);
    }

    #[test]
    fn test_lone_model_gets_simulations() {
        let ds = store();
        let analysis = RelaxDisp {
            models: models(&["No Rex"]),
            mc_sim_num: 50,
            ..RelaxDisp::new("base pipe", "disp")
        };

        let mut interpreter = HeadlessInterpreter::dry_run();
        analysis.run(&ds, &mut interpreter).unwrap();

        let setups: Vec<_> = interpreter
            .calls()
            .iter()
            .filter_map(|uf| match uf {
                UserFn::MonteCarloSetup { number } => Some(*number),
                _ => None,
            })
            .collect();
        assert_eq!(setups, vec![50]);
        assert!(!interpreter.call_names().contains(&"model_selection"));
        assert_eq!(ds.status().auto_analysis.get("disp").unwrap().mc_number, Some(50));
    }

    #[test]
    fn test_unknown_modsel_rejected() {
        let ds = store();
        let analysis = RelaxDisp {
            models: models(&["R2eff", "No Rex"]),
            modsel: "AICC".to_string(),
            ..RelaxDisp::new("base pipe", "disp")
        };

        let mut interpreter = HeadlessInterpreter::dry_run();
        let err = analysis.run(&ds, &mut interpreter).unwrap_err();
        assert!(matches!(err, RelaxError::InvalidModelSelection { ref method } if method == "AICC"));
        assert!(err.is_usage());
        assert!(interpreter.calls().is_empty());
        assert!(!ds.status().exec_lock.locked());
        assert!(ds.status().auto_analysis.get("disp").is_none());
    }

    #[test]
    fn test_single_model_skips_selection() {
        let ds = store();
        let analysis = RelaxDisp {
            grid_inc: None,
            ..RelaxDisp::new("base pipe", "disp")
        };

        let mut interpreter = HeadlessInterpreter::dry_run();
        analysis.run(&ds, &mut interpreter).unwrap();

        assert!(!ds.has_pipe("final - disp"));
        assert!(!interpreter.call_names().contains(&"model_selection"));
        assert!(!interpreter.call_names().contains(&"minimise.grid_search"));
        assert_eq!(interpreter.call_names().last(), Some(&"state.save"));
    }

    #[test]
    fn test_backend_missing() {
        let ds = DataStore::new(Status::new(Settings {
            backends: Backends::none(),
            ..Settings::default()
        }));
        assert!(matches!(
            ds.create("base pipe", "relax_disp", None, true),
            Err(RelaxError::BackendUnavailable { .. })
        ));

        let err = RelaxDisp::new("base pipe", "disp")
            .run(&ds, &mut HeadlessInterpreter::dry_run())
            .unwrap_err();
        assert!(matches!(err, RelaxError::NoPipe(_)));
        assert!(!ds.status().exec_lock.locked());
    }
}
