//! Relaxation curve-fitting auto-analysis (R1 and R2 rates).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::interpreter::{Interpreter, UserFn};
use super::{monte_carlo, run_protocol, subdir};
use crate::error::RelaxResult;
use crate::pipes::DataStore;

fn default_file_root() -> String {
    "rx".to_string()
}

fn default_grid_inc() -> usize {
    11
}

fn default_mc_sim_num() -> usize {
    500
}

fn default_true() -> bool {
    true
}

/// Fits two-parameter exponential decays to peak intensity series.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelaxFit {
    pub pipe_name: String,
    pub pipe_bundle: String,

    #[serde(default = "default_file_root")]
    pub file_root: String,

    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Grid search increments
    #[serde(default = "default_grid_inc")]
    pub grid_inc: usize,

    /// Monte Carlo simulations for error analysis
    #[serde(default = "default_mc_sim_num")]
    pub mc_sim_num: usize,

    #[serde(default = "default_true")]
    pub save_state: bool,
}

impl RelaxFit {
    pub fn new(pipe_name: impl Into<String>, pipe_bundle: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            pipe_bundle: pipe_bundle.into(),
            file_root: default_file_root(),
            results_dir: None,
            grid_inc: default_grid_inc(),
            mc_sim_num: default_mc_sim_num(),
            save_state: true,
        }
    }

    pub fn run(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        run_protocol(ds, &self.pipe_name, &self.pipe_bundle, "relax_fit", || {
            self.execute(ds, interpreter)
        })
    }

    fn execute(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        interpreter.apply(ds, UserFn::SpectrumErrorAnalysis)?;

        interpreter.apply(ds, UserFn::GridSearch { inc: self.grid_inc })?;
        interpreter.apply(
            ds,
            UserFn::Minimise {
                algorithm: "newton".to_string(),
            },
        )?;

        monte_carlo(ds, interpreter, &self.pipe_bundle, self.mc_sim_num, "newton", false)?;

        for param in ["rx", "i0"] {
            let file = if param == "rx" {
                format!("{}.out", self.file_root)
            } else {
                format!("{}.out", param)
            };
            interpreter.apply(
                ds,
                UserFn::ValueWrite {
                    param: param.to_string(),
                    file,
                    dir: self.results_dir.clone(),
                },
            )?;
        }

        interpreter.apply(
            ds,
            UserFn::ResultsWrite {
                file: "results".to_string(),
                dir: self.results_dir.clone(),
            },
        )?;

        let grace_dir = subdir(&self.results_dir, "grace");
        for param in ["rx", "i0"] {
            interpreter.apply(
                ds,
                UserFn::GraceWrite {
                    y_data_type: param.to_string(),
                    file: format!("{}.agr", param),
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
