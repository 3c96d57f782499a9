//! Data Pipe Containers
//!
//! The payload held by each data pipe: the spin system with its per-spin
//! parameters, global analysis values and the list of result files.
//!
//! Containers own all of their data, so cloning a pipe gives a fully
//! independent copy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::PipeType;
use crate::error::{RelaxError, RelaxResult};

/// A single spin of the molecular spin system.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpinContainer {
    /// Spin identification string (e.g. `:2@N`)
    pub id: String,

    /// Whether the spin takes part in analyses
    #[serde(default = "default_select")]
    pub select: bool,

    /// Fitted or calculated parameter values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,

    /// Errors of the parameter values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, f64>,

    /// Peak intensities keyed by spectrum ID
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub intensities: BTreeMap<String, f64>,
}

fn default_select() -> bool {
    true
}

impl SpinContainer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            select: true,
            params: BTreeMap::new(),
            errors: BTreeMap::new(),
            intensities: BTreeMap::new(),
        }
    }

    /// Sets a peak intensity for a spectrum.
    pub fn with_intensity(mut self, spectrum_id: impl Into<String>, value: f64) -> Self {
        self.intensities.insert(spectrum_id.into(), value);
        self
    }

    /// Sets a parameter value.
    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// A file produced by an analysis.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultFile {
    /// File category (e.g. `grace`, `text`, `state`)
    pub kind: String,
    /// Short label for display
    pub label: String,
    /// Location of the file
    pub path: PathBuf,
}

/// The analysis state held by one data pipe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipeContainer {
    pipe_type: PipeType,

    /// The spin system
    #[serde(default)]
    pub spins: Vec<SpinContainer>,

    /// Global analysis values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub globals: BTreeMap<String, Value>,

    /// Files written by analyses of this pipe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_files: Vec<ResultFile>,

    /// Pipes combined by a hybrid pipe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hybrid_pipes: Vec<String>,
}

impl PipeContainer {
    pub fn new(pipe_type: PipeType) -> Self {
        Self {
            pipe_type,
            spins: Vec::new(),
            globals: BTreeMap::new(),
            result_files: Vec::new(),
            hybrid_pipes: Vec::new(),
        }
    }

    pub fn pipe_type(&self) -> PipeType {
        self.pipe_type
    }

    /// Only the registry's type change operation may call this.
    pub(crate) fn set_pipe_type(&mut self, pipe_type: PipeType) {
        self.pipe_type = pipe_type;
    }

    /// Returns true if the pipe holds no analysis data.
    pub fn is_empty(&self) -> bool {
        self.spins.is_empty()
            && self.globals.is_empty()
            && self.result_files.is_empty()
            && self.hybrid_pipes.is_empty()
    }

    pub fn global(&self, key: &str) -> Option<&Value> {
        self.globals.get(key)
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(key.into(), value.into());
    }

    pub fn spin(&self, id: &str) -> Option<&SpinContainer> {
        self.spins.iter().find(|s| s.id == id)
    }

    pub fn spin_mut(&mut self, id: &str) -> Option<&mut SpinContainer> {
        self.spins.iter_mut().find(|s| s.id == id)
    }

    /// Iterates over the selected spins only.
    pub fn selected_spins(&self) -> impl Iterator<Item = &SpinContainer> {
        self.spins.iter().filter(|s| s.select)
    }

    /// Adds a spin, replacing any spin with the same ID.
    pub fn add_spin(&mut self, spin: SpinContainer) {
        match self.spin_mut(&spin.id) {
            Some(existing) => *existing = spin,
            None => self.spins.push(spin),
        }
    }

    /// Checks that at least one selected spin is present.
    pub fn require_spins(&self, pipe_name: &str) -> RelaxResult<()> {
        if self.selected_spins().next().is_none() {
            return Err(RelaxError::MissingData {
                pipe: pipe_name.to_string(),
                what: "spin system".to_string(),
            });
        }
        Ok(())
    }

    /// Returns a required global value.
    pub fn require_global(&self, pipe_name: &str, key: &str) -> RelaxResult<&Value> {
        self.globals.get(key).ok_or_else(|| RelaxError::MissingData {
            pipe: pipe_name.to_string(),
            what: format!("'{}'", key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_is_empty() {
        let pipe = PipeContainer::new(PipeType::Noe);
        assert_eq!(pipe.pipe_type(), PipeType::Noe);
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = PipeContainer::new(PipeType::ModelFree);
        original.add_spin(SpinContainer::new(":2@N").with_param("s2", 0.8));
        original.set_global("x", 1);

        let mut copy = original.clone();
        copy.set_global("x", 5);
        copy.spin_mut(":2@N").unwrap().params.insert("s2".to_string(), 0.1);

        assert_eq!(original.global("x"), Some(&Value::from(1)));
        assert_eq!(original.spin(":2@N").unwrap().params["s2"], 0.8);
    }

    #[test]
    fn test_add_spin_replaces() {
        let mut pipe = PipeContainer::new(PipeType::Noe);
        pipe.add_spin(SpinContainer::new(":1@N"));
        pipe.add_spin(SpinContainer::new(" :1@N ").with_intensity("ref", 10.0));

        assert_eq!(pipe.spins.len(), 1);
        assert_eq!(pipe.spins[0].intensities["ref"], 10.0);
    }

    #[test]
    fn test_require_spins_ignores_deselected() {
        let mut pipe = PipeContainer::new(PipeType::Noe);
        assert!(pipe.require_spins("p1").is_err());

        let mut spin = SpinContainer::new(":1@N");
        spin.select = false;
        pipe.add_spin(spin);
        assert!(pipe.require_spins("p1").is_err());

        pipe.add_spin(SpinContainer::new(":2@N"));
        assert!(pipe.require_spins("p1").is_ok());
    }

    #[test]
    fn test_require_global() {
        let mut pipe = PipeContainer::new(PipeType::RelaxDisp);
        let err = pipe.require_global("p1", "exp_type").unwrap_err();
        assert!(err.to_string().contains("'exp_type'"));

        pipe.set_global("exp_type", "CPMG");
        assert_eq!(pipe.require_global("p1", "exp_type").unwrap(), "CPMG");
    }

    #[test]
    fn test_container_serialization_defaults() {
        let json = r#"{"pipe_type": "relax_fit", "spins": [{"id": ":3@N"}]}"#;
        let pipe: PipeContainer = serde_json::from_str(json).unwrap();

        assert_eq!(pipe.pipe_type(), PipeType::RelaxFit);
        assert!(pipe.spins[0].select);
        assert!(pipe.result_files.is_empty());
    }
}
