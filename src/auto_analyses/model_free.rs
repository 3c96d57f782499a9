//! Model-free auto-analysis.
//!
//! Each candidate model is optimised in its own copy of the base pipe,
//! then model selection picks the final pipe, on which the Monte Carlo
//! error analysis is run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::interpreter::{Interpreter, UserFn};
use super::{check_modsel, model_pipe, monte_carlo, run_protocol, subdir};
use crate::error::{RelaxError, RelaxResult};
use crate::pipes::DataStore;

fn default_models() -> Vec<String> {
    (0..10).map(|i| format!("m{}", i)).collect()
}

fn default_grid_inc() -> usize {
    11
}

fn default_mc_sim_num() -> usize {
    500
}

fn default_modsel() -> String {
    "AIC".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelFree {
    pub pipe_name: String,
    pub pipe_bundle: String,

    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Model-free models to optimise
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    #[serde(default = "default_grid_inc")]
    pub grid_inc: usize,

    #[serde(default = "default_mc_sim_num")]
    pub mc_sim_num: usize,

    /// Model selection technique (AIC, AICc or BIC)
    #[serde(default = "default_modsel")]
    pub modsel: String,
}

impl ModelFree {
    pub fn new(pipe_name: impl Into<String>, pipe_bundle: impl Into<String>) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            pipe_bundle: pipe_bundle.into(),
            results_dir: None,
            models: default_models(),
            grid_inc: default_grid_inc(),
            mc_sim_num: default_mc_sim_num(),
            modsel: default_modsel(),
        }
    }

    pub fn run(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        if self.models.is_empty() {
            return Err(RelaxError::MissingArgument("models".to_string()));
        }
        check_modsel(&self.modsel)?;

        run_protocol(ds, &self.pipe_name, &self.pipe_bundle, "mf", || {
            self.execute(ds, interpreter)
        })
    }

    fn execute(&self, ds: &DataStore, interpreter: &mut dyn Interpreter) -> RelaxResult<()> {
        let mut model_pipes = Vec::with_capacity(self.models.len());

        for model in &self.models {
            let pipe = model_pipe(model, &self.pipe_bundle);
            ds.copy(Some(&self.pipe_name), Some(&pipe), Some(&self.pipe_bundle))?;
            ds.switch(&pipe)?;

            interpreter.apply(ds, UserFn::SelectModel { model: model.clone() })?;
            interpreter.apply(ds, UserFn::GridSearch { inc: self.grid_inc })?;
            interpreter.apply(
                ds,
                UserFn::Minimise {
                    algorithm: "newton".to_string(),
                },
            )?;
            interpreter.apply(
                ds,
                UserFn::ResultsWrite {
                    file: "results".to_string(),
                    dir: Some(subdir(&self.results_dir, model)),
                },
            )?;

            model_pipes.push(pipe);
        }

        let final_pipe = model_pipe("final", &self.pipe_bundle);
        interpreter.apply(
            ds,
            UserFn::ModelSelection {
                method: self.modsel.clone(),
                modsel_pipe: final_pipe,
                bundle: self.pipe_bundle.clone(),
                pipes: model_pipes,
            },
        )?;

        monte_carlo(ds, interpreter, &self.pipe_bundle, self.mc_sim_num, "newton", true)?;

        interpreter.apply(
            ds,
            UserFn::ResultsWrite {
                file: "results".to_string(),
                dir: Some(subdir(&self.results_dir, "final")),
            },
        )?;
        interpreter.apply(
            ds,
            UserFn::StateSave {
                state: "final_state".to_string(),
                dir: self.results_dir.clone(),
            },
        )
    }
}
