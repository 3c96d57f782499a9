//! Data Pipes
//!
//! The named-container registry at the heart of the crate.
//!
//! # Components
//!
//! - [`types`]: the pipe type enumeration and backend availability checks
//! - [`container`]: the payload held by each pipe
//! - [`store`]: the [`DataStore`] registry (pipes, bundles, current pipe)
//! - [`state`]: JSON snapshots of the whole store

pub mod container;
pub mod state;
pub mod store;
pub mod types;

pub use container::{PipeContainer, ResultFile, SpinContainer};
pub use state::StoreSnapshot;
pub use store::{DataStore, PipeRow};
pub use types::{check_type, Backend, Backends, PipeType, VALID_TYPES};
