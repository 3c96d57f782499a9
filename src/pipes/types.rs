//! Data Pipe Types
//!
//! The fixed set of analysis types a data pipe can hold, together with
//! the numeric backends some of them depend on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RelaxError, RelaxResult};

/// The wire strings of every valid pipe type, in display order.
pub const VALID_TYPES: &[&str] = &[
    "ct",
    "frame order",
    "jw",
    "hybrid",
    "mf",
    "N-state",
    "noe",
    "relax_disp",
    "relax_fit",
];

/// The analysis type of a data pipe.
///
/// Serializes to the exact strings in [`VALID_TYPES`] so saved states
/// round-trip unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipeType {
    #[serde(rename = "ct")]
    ConsistencyTesting,
    #[serde(rename = "frame order")]
    FrameOrder,
    #[serde(rename = "jw")]
    SpectralDensity,
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "mf")]
    ModelFree,
    #[serde(rename = "N-state")]
    NState,
    #[serde(rename = "noe")]
    Noe,
    #[serde(rename = "relax_disp")]
    RelaxDisp,
    #[serde(rename = "relax_fit")]
    RelaxFit,
}

impl PipeType {
    /// All pipe types, in the same order as [`VALID_TYPES`].
    pub const ALL: [PipeType; 9] = [
        PipeType::ConsistencyTesting,
        PipeType::FrameOrder,
        PipeType::SpectralDensity,
        PipeType::Hybrid,
        PipeType::ModelFree,
        PipeType::NState,
        PipeType::Noe,
        PipeType::RelaxDisp,
        PipeType::RelaxFit,
    ];

    /// The wire string of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipeType::ConsistencyTesting => "ct",
            PipeType::FrameOrder => "frame order",
            PipeType::SpectralDensity => "jw",
            PipeType::Hybrid => "hybrid",
            PipeType::ModelFree => "mf",
            PipeType::NState => "N-state",
            PipeType::Noe => "noe",
            PipeType::RelaxDisp => "relax_disp",
            PipeType::RelaxFit => "relax_fit",
        }
    }

    /// Human readable description of the analysis.
    pub fn description(&self) -> &'static str {
        match self {
            PipeType::ConsistencyTesting => "Consistency testing",
            PipeType::FrameOrder => "Frame Order theories",
            PipeType::SpectralDensity => "Reduced spectral density mapping",
            PipeType::Hybrid => "Special hybrid pipe",
            PipeType::ModelFree => "Model-free analysis",
            PipeType::NState => "N-state model or ensemble analysis",
            PipeType::Noe => "Steady state NOE calculation",
            PipeType::RelaxDisp => "Relaxation dispersion",
            PipeType::RelaxFit => "Relaxation curve fitting",
        }
    }

    /// The optional numeric backend this type cannot work without.
    pub fn required_backend(&self) -> Option<Backend> {
        match self {
            PipeType::RelaxFit => Some(Backend::ExpFn),
            PipeType::RelaxDisp | PipeType::FrameOrder => Some(Backend::Scientific),
            _ => None,
        }
    }
}

impl fmt::Display for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipeType {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RelaxError::InvalidType {
                pipe_type: s.to_string(),
            })
    }
}

/// Optional numeric backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Compiled exponential curve-fitting functions
    ExpFn,
    /// Scientific computing library
    Scientific,
}

/// Availability of the optional numeric backends.
///
/// Checked only when a pipe of a dependent type is created or a pipe is
/// changed to such a type, never at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub exp_fn: bool,
    pub scientific: bool,
}

impl Backends {
    /// Availability as compiled into this build.
    pub fn detect() -> Self {
        Self {
            exp_fn: cfg!(feature = "exp-fn"),
            scientific: cfg!(feature = "scientific"),
        }
    }

    /// Every backend available.
    pub fn all() -> Self {
        Self {
            exp_fn: true,
            scientific: true,
        }
    }

    /// No optional backend available.
    pub fn none() -> Self {
        Self {
            exp_fn: false,
            scientific: false,
        }
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        match backend {
            Backend::ExpFn => self.exp_fn,
            Backend::Scientific => self.scientific,
        }
    }

    /// Checks that a pipe type can be used with these backends.
    pub fn check(&self, pipe_type: PipeType) -> RelaxResult<()> {
        let Some(backend) = pipe_type.required_backend() else {
            return Ok(());
        };

        if self.is_available(backend) {
            return Ok(());
        }

        let message = match pipe_type {
            PipeType::RelaxFit => "Relaxation curve fitting is not available.  Try building with the 'exp-fn' feature.".to_string(),
            other => format!(
                "The {} analysis is not available.  Please build with the 'scientific' feature.",
                other.description().to_lowercase()
            ),
        };

        Err(RelaxError::BackendUnavailable {
            pipe_type: pipe_type.to_string(),
            message,
        })
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::detect()
    }
}

/// Parses and checks a pipe type string.
///
/// Fails with [`RelaxError::InvalidType`] for unknown strings and with
/// [`RelaxError::BackendUnavailable`] when the type's backend is missing.
pub fn check_type(pipe_type: &str, backends: &Backends) -> RelaxResult<PipeType> {
    let parsed: PipeType = pipe_type.parse()?;
    backends.check(parsed)?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings_match_valid_types() {
        let strings: Vec<&str> = PipeType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(strings, VALID_TYPES);
    }

    #[test]
    fn test_serde_uses_wire_strings() {
        for pipe_type in PipeType::ALL {
            let json = serde_json::to_string(&pipe_type).unwrap();
            assert_eq!(json, format!("\"{}\"", pipe_type.as_str()));

            let back: PipeType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, pipe_type);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert_eq!("N-state".parse::<PipeType>().unwrap(), PipeType::NState);
        assert!(matches!(
            "n-state".parse::<PipeType>(),
            Err(RelaxError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_backend_checks() {
        let none = Backends::none();
        assert!(check_type("noe", &none).is_ok());
        assert!(check_type("mf", &none).is_ok());

        let err = check_type("relax_fit", &none).unwrap_err();
        assert!(matches!(err, RelaxError::BackendUnavailable { .. }));
        assert!(err.to_string().contains("curve fitting"));

        let err = check_type("relax_disp", &none).unwrap_err();
        assert!(err.to_string().contains("relaxation dispersion"));

        assert!(check_type("relax_fit", &Backends::all()).is_ok());
        assert!(check_type("frame order", &Backends::all()).is_ok());
    }

    #[test]
    fn test_check_type_invalid() {
        let err = check_type("bogus", &Backends::all()).unwrap_err();
        assert!(matches!(err, RelaxError::InvalidType { .. }));
    }
}
