//! relaxcore - NMR Relaxation Analysis Core
//!
//! The coordination layer of a relaxation analysis program: a registry of
//! named data pipes grouped into bundles, a shared status context with an
//! execution lock and observer channels, a failure-capturing job wrapper and
//! the multi-step auto-analysis protocols built on top of them.
//!
//! # Architecture
//!
//! - [`status`]: observer channels, the execution and resource locks, and
//!   auto-analysis progress records
//! - [`pipes`]: the data pipe registry, pipe bundles and saved states
//! - [`execution`]: the job wrapper and the exception queue
//! - [`auto_analyses`]: NOE, relaxation curve-fitting, model-free and
//!   dispersion protocols
//! - [`controller`]: analysis tabs kept in step with the registry
//! - [`config`]: YAML analysis batch files
//! - [`monitoring`]: the analysis timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use relaxcore::auto_analyses::{AnalysisJob, AnalysisSpec, NoeCalc};
//! use relaxcore::execution::Execute;
//! use relaxcore::pipes::DataStore;
//! use relaxcore::status::Status;
//!
//! fn main() -> relaxcore::RelaxResult<()> {
//!     let ds = DataStore::new(Status::global());
//!     ds.create("noe 600", "noe", Some("NOE 600"), true)?;
//!
//!     let job = AnalysisJob::headless(AnalysisSpec::Noe(NoeCalc::new("noe 600", "NOE 600")), false);
//!     Execute::new(ds.clone(), job, 0, true).start().join()?;
//!
//!     for failure in ds.status().exception_queue.drain() {
//!         eprintln!("{}", failure.message());
//!     }
//!     Ok(())
//! }
//! ```

pub mod auto_analyses;
pub mod config;
pub mod controller;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod pipes;
pub mod status;

pub use config::{load_analysis_file, AnalysisFile};
pub use controller::{AnalysisController, AnalysisTab};
pub use error::{RelaxError, RelaxResult};
pub use execution::{Execute, RunAnalysis};
pub use pipes::{DataStore, PipeType};
pub use status::Status;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "relaxcore";
