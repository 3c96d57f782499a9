//! Analysis Batch Configuration
//!
//! YAML files declaring the pipes to set up and the auto-analyses to run.
//!
//! - [`model`]: the file structure
//! - [`parser`]: loading, saving and applying files
//! - [`validator`]: consistency checks

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{AnalysisFile, PipeSetup};
pub use parser::{load_analysis_file, parse_analysis_file, save_analysis_file, setup_pipes};
pub use validator::{check_analysis_file, validate_analysis_file, ValidationError};
