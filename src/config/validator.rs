//! Analysis File Validation
//!
//! Checks a batch file before anything touches the data store:
//! - at least one analysis, with a unique, non-empty bundle
//! - unique, non-empty pipe names of known types
//! - every analysis refers to a declared (or already loaded) pipe of the
//!   matching type, declared in the analysis bundle
//! - positive grid and simulation counts, non-empty model lists and a known
//!   model selection technique

use std::collections::HashSet;

use log::{debug, info};

use super::model::AnalysisFile;
use crate::auto_analyses::MODSEL_METHODS;
use crate::error::{RelaxError, RelaxResult};
use crate::pipes::{PipeType, VALID_TYPES};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NoAnalyses,
    EmptyPipeName,
    DuplicatePipe(String),
    InvalidPipeType { pipe: String, pipe_type: String },
    EmptyBundle { analysis: usize },
    DuplicateBundle(String),
    UnknownPipe { bundle: String, pipe: String },
    TypeMismatch { bundle: String, pipe: String, expected: String },
    BundleMismatch { bundle: String, pipe: String, declared: Option<String> },
    ZeroCount { bundle: String, field: &'static str },
    NoModels(String),
    InvalidModsel { bundle: String, method: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAnalyses => write!(f, "The analysis file lists no analyses"),
            Self::EmptyPipeName => write!(f, "A pipe has an empty or whitespace-only name"),
            Self::DuplicatePipe(name) => write!(f, "Duplicate pipe name: '{}'", name),
            Self::InvalidPipeType { pipe, pipe_type } => write!(
                f,
                "Pipe '{}' has the invalid type '{}', expected one of {:?}",
                pipe, pipe_type, VALID_TYPES
            ),
            Self::EmptyBundle { analysis } => {
                write!(f, "Analysis {} has no pipe bundle", analysis + 1)
            }
            Self::DuplicateBundle(bundle) => {
                write!(f, "Two analyses share the pipe bundle '{}'", bundle)
            }
            Self::UnknownPipe { bundle, pipe } => {
                write!(f, "Analysis '{}' references unknown pipe '{}'", bundle, pipe)
            }
            Self::TypeMismatch {
                bundle,
                pipe,
                expected,
            } => write!(
                f,
                "Analysis '{}' needs a '{}' pipe but '{}' has another type",
                bundle, expected, pipe
            ),
            Self::BundleMismatch {
                bundle,
                pipe,
                declared: Some(declared),
            } => write!(
                f,
                "Analysis '{}' uses pipe '{}' which is declared in the bundle '{}'",
                bundle, pipe, declared
            ),
            Self::BundleMismatch {
                bundle,
                pipe,
                declared: None,
            } => write!(
                f,
                "Analysis '{}' uses pipe '{}' which is declared without a bundle",
                bundle, pipe
            ),
            Self::ZeroCount { bundle, field } => {
                write!(f, "Analysis '{}': {} must be positive", bundle, field)
            }
            Self::NoModels(bundle) => write!(f, "Analysis '{}' has an empty model list", bundle),
            Self::InvalidModsel { bundle, method } => write!(
                f,
                "Analysis '{}': the model selection technique '{}' is not one of {:?}",
                bundle, method, MODSEL_METHODS
            ),
        }
    }
}

/// Collects every problem in the file.
///
/// `loaded_pipes` names pipes already present in the data store (from a
/// restored state), which analyses may use without declaring them.
pub fn check_analysis_file(file: &AnalysisFile, loaded_pipes: &[String]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if file.analyses.is_empty() {
        errors.push(ValidationError::NoAnalyses);
    }

    let mut names: HashSet<&str> = HashSet::new();
    for pipe in &file.pipes {
        if pipe.name.trim().is_empty() {
            errors.push(ValidationError::EmptyPipeName);
            continue;
        }
        if !names.insert(pipe.name.as_str()) || loaded_pipes.contains(&pipe.name) {
            errors.push(ValidationError::DuplicatePipe(pipe.name.clone()));
        }
        if pipe.pipe_type.parse::<PipeType>().is_err() {
            errors.push(ValidationError::InvalidPipeType {
                pipe: pipe.name.clone(),
                pipe_type: pipe.pipe_type.clone(),
            });
        }
    }

    let mut bundles: HashSet<&str> = HashSet::new();
    for (index, analysis) in file.analyses.iter().enumerate() {
        let bundle = analysis.pipe_bundle();
        if bundle.trim().is_empty() {
            errors.push(ValidationError::EmptyBundle { analysis: index });
            continue;
        }
        if !bundles.insert(bundle) {
            errors.push(ValidationError::DuplicateBundle(bundle.to_string()));
        }

        let pipe = analysis.pipe_name();
        match file.pipe(pipe) {
            Some(setup) => {
                if setup.pipe_type != analysis.kind() {
                    errors.push(ValidationError::TypeMismatch {
                        bundle: bundle.to_string(),
                        pipe: pipe.to_string(),
                        expected: analysis.kind().to_string(),
                    });
                }
                if setup.bundle.as_deref() != Some(bundle) {
                    errors.push(ValidationError::BundleMismatch {
                        bundle: bundle.to_string(),
                        pipe: pipe.to_string(),
                        declared: setup.bundle.clone(),
                    });
                }
            }
            None if loaded_pipes.iter().any(|p| p == pipe) => {
                debug!("Analysis '{}' uses the loaded pipe '{}'", bundle, pipe);
            }
            None => errors.push(ValidationError::UnknownPipe {
                bundle: bundle.to_string(),
                pipe: pipe.to_string(),
            }),
        }

        for (field, count) in analysis.counts() {
            if count == 0 {
                errors.push(ValidationError::ZeroCount {
                    bundle: bundle.to_string(),
                    field,
                });
            }
        }

        if matches!(analysis.kind(), "mf" | "relax_disp") && analysis.models().is_empty() {
            errors.push(ValidationError::NoModels(bundle.to_string()));
        }

        if let Some(method) = analysis.modsel() {
            if !MODSEL_METHODS.contains(&method) {
                errors.push(ValidationError::InvalidModsel {
                    bundle: bundle.to_string(),
                    method: method.to_string(),
                });
            }
        }
    }

    errors
}

/// Validates the file, joining every problem into one report.
pub fn validate_analysis_file(file: &AnalysisFile, loaded_pipes: &[String]) -> RelaxResult<()> {
    info!(
        "Validating the analysis file ({} pipes, {} analyses)",
        file.pipes.len(),
        file.analyses.len()
    );

    let errors = check_analysis_file(file, loaded_pipes);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(RelaxError::Config(messages.join("\n")));
    }

    Ok(())
}
