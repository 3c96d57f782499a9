//! Analysis Batch File Model
//!
//! # Example YAML Format
//!
//! ```yaml
//! results_dir: results
//!
//! pipes:
//!   - name: noe 600
//!     type: noe
//!     bundle: NOE 600
//!     spins:
//!       - id: ":2@N"
//!         intensities: {ref: 1.0e6, sat: 7.5e5}
//!
//! analyses:
//!   - type: noe
//!     pipe_name: noe 600
//!     pipe_bundle: NOE 600
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::auto_analyses::AnalysisSpec;
use crate::pipes::SpinContainer;

/// A pipe to create before the analyses run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipeSetup {
    pub name: String,

    /// Pipe type wire name (`noe`, `mf`, `relax_disp`, ...)
    #[serde(rename = "type")]
    pub pipe_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spins: Vec<SpinContainer>,
}

impl PipeSetup {
    pub fn new(name: impl Into<String>, pipe_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipe_type: pipe_type.into(),
            bundle: None,
            spins: Vec::new(),
        }
    }

    pub fn in_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_spin(mut self, spin: SpinContainer) -> Self {
        self.spins.push(spin);
        self
    }
}

/// A batch of pipes and the auto-analyses to run on them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AnalysisFile {
    /// Results directory for analyses which do not set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,

    #[serde(default)]
    pub pipes: Vec<PipeSetup>,

    #[serde(default)]
    pub analyses: Vec<AnalysisSpec>,
}

impl AnalysisFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipe(&self, name: &str) -> Option<&PipeSetup> {
        self.pipes.iter().find(|p| p.name == name)
    }
}
