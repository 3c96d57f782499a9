//! Analysis Timeline
//!
//! Records when each auto-analysis starts and finishes so the end of a
//! batch run can report durations and a small Gantt chart.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// What happened to an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

/// A single timeline entry.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Analysis name (usually the pipe bundle)
    pub analysis: String,
    pub event_type: EventType,
    /// Monotonic time, used for durations
    pub at: Instant,
    /// Wall-clock time, used for reports
    pub wall_time: DateTime<Local>,
}

/// Start/finish events of every analysis in a session.
#[derive(Debug, Clone)]
pub struct AnalysisTimeline {
    events: Vec<TimelineEvent>,
    origin: Instant,
}

impl AnalysisTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            origin: Instant::now(),
        }
    }

    pub fn record(&mut self, analysis: &str, event_type: EventType) {
        self.events.push(TimelineEvent {
            analysis: analysis.to_string(),
            event_type,
            at: Instant::now(),
            wall_time: Local::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// The final state of an analysis, if it has finished.
    pub fn outcome(&self, analysis: &str) -> Option<EventType> {
        self.events
            .iter()
            .rev()
            .find(|e| e.analysis == analysis)
            .map(|e| e.event_type)
            .filter(|t| *t != EventType::Started)
    }

    /// Start and end offsets (from the timeline origin) of finished analyses.
    fn spans(&self) -> BTreeMap<String, (Duration, Duration)> {
        let mut starts: BTreeMap<&str, Duration> = BTreeMap::new();
        let mut spans = BTreeMap::new();

        for event in &self.events {
            let offset = event.at.duration_since(self.origin);
            match event.event_type {
                EventType::Started => {
                    starts.insert(&event.analysis, offset);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(event.analysis.as_str()) {
                        spans.insert(event.analysis.clone(), (*start, offset));
                    }
                }
            }
        }

        spans
    }

    /// Run time of every finished analysis.
    pub fn durations(&self) -> BTreeMap<String, Duration> {
        self.spans()
            .into_iter()
            .map(|(name, (start, end))| (name, end.saturating_sub(start)))
            .collect()
    }

    /// Renders an ASCII Gantt chart, 50 columns wide.
    pub fn gantt_chart(&self) -> String {
        let mut chart = String::from("\nAnalysis timeline:\n\n");

        let total = self.origin.elapsed().as_millis();
        if total == 0 {
            return chart;
        }
        let scale = 50.0 / total as f64;

        let mut spans: Vec<_> = self.spans().into_iter().collect();
        spans.sort_by_key(|(_, (start, _))| *start);

        for (name, (start, end)) in spans {
            let start_ms = start.as_millis();
            let run_ms = end.saturating_sub(start).as_millis();

            let offset = (start_ms as f64 * scale) as usize;
            let width = ((run_ms as f64 * scale).max(1.0)) as usize;

            chart.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                fit_label(&name, 16),
                " ".repeat(offset),
                "#".repeat(width),
                run_ms
            ));
        }

        chart.push_str(&format!("\nTotal: {} ms\n", total));
        chart
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.origin = Instant::now();
    }
}

impl Default for AnalysisTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or shortens a label to exactly `width` characters.
fn fit_label(label: &str, width: usize) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= width {
        format!("{:width$}", label, width = width)
    } else {
        let head: String = chars[..width - 3].iter().collect();
        format!("{}...", head)
    }
}
