//! Analysis File Parser
//!
//! Loads batch files from YAML, validates them and creates the declared
//! pipes in a data store.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::AnalysisFile;
use super::validator::validate_analysis_file;
use crate::error::{RelaxError, RelaxResult};
use crate::pipes::DataStore;

/// Loads and validates an analysis file.
///
/// # Arguments
///
/// * `path` - Path to the YAML file
/// * `loaded_pipes` - Pipes already in the data store, usable by analyses
///   without being declared
///
/// # Example
///
/// ```rust,no_run
/// use relaxcore::config::load_analysis_file;
///
/// fn main() -> relaxcore::RelaxResult<()> {
///     let file = load_analysis_file("noe.yaml", &[])?;
///     println!("Loaded {} analyses", file.analyses.len());
///     Ok(())
/// }
/// ```
pub fn load_analysis_file(path: impl AsRef<Path>, loaded_pipes: &[String]) -> RelaxResult<AnalysisFile> {
    let path = path.as_ref();
    info!("Loading the analysis file: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        RelaxError::Config(format!(
            "Failed to read the analysis file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let file = parse_analysis_file(&yaml_content)?;
    info!(
        "Parsed {} pipes and {} analyses",
        file.pipes.len(),
        file.analyses.len()
    );

    validate_analysis_file(&file, loaded_pipes)?;
    Ok(file)
}

/// Parses YAML text without validating it.
pub fn parse_analysis_file(yaml: &str) -> RelaxResult<AnalysisFile> {
    serde_yaml::from_str(yaml).map_err(|e| {
        RelaxError::Config(format!("Failed to parse the analysis YAML: {}. Check the file format.", e))
    })
}

/// Saves an analysis file as YAML.
pub fn save_analysis_file(file: &AnalysisFile, path: impl AsRef<Path>) -> RelaxResult<()> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(file)?;
    fs::write(path, yaml_content)?;
    info!("Analysis file saved to: {}", path.display());
    Ok(())
}

/// Creates every declared pipe, with its spins, in the data store.
///
/// The last pipe created becomes the current pipe.
pub fn setup_pipes(file: &AnalysisFile, ds: &DataStore) -> RelaxResult<()> {
    for setup in &file.pipes {
        ds.create(&setup.name, &setup.pipe_type, setup.bundle.as_deref(), true)?;
        for spin in &setup.spins {
            ds.add_spin(Some(&setup.name), spin.clone())?;
        }
        debug!(
            "Pipe '{}' set up with {} spin(s)",
            setup.name,
            setup.spins.len()
        );
    }

    info!("Set up {} data pipe(s)", file.pipes.len());
    Ok(())
}
