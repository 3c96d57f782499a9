//! Monitoring Module
//!
//! Tracks when auto-analyses start and finish.
//!
//! # Components
//!
//! - [`AnalysisTimeline`]: start/finish events and a Gantt chart report

pub mod timeline;

pub use timeline::{AnalysisTimeline, EventType, TimelineEvent};
