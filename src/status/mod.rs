//! Status Context
//!
//! The process-wide coordination state shared by the data store, the job
//! wrapper, the auto-analyses and the analysis controller:
//!
//! - [`observer`]: named publish/subscribe channels
//! - [`lock`]: the execution lock and the reentrant resource locks
//! - [`auto_analysis`]: per-analysis progress records
//!
//! A [`Status`] is normally created once at start-up and handed to every
//! component as an `Arc<Status>`.

pub mod auto_analysis;
pub mod lock;
pub mod observer;

use std::sync::Arc;

use log::info;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{RelaxError, RelaxResult};
use crate::execution::exceptions::ExceptionQueue;
use crate::monitoring::AnalysisTimeline;
use crate::pipes::types::Backends;

pub use auto_analysis::{AutoAnalysis, AutoAnalysisRegistry};
pub use lock::{ExecLock, ExecLockGuard, LockMode, ResourceGuard, ResourceLock};
pub use observer::{Callback, Observer};

/// Names of every observer channel, in creation order.
pub const CHANNEL_NAMES: &[&str] = &[
    "auto_analyses",
    "pipe_alteration",
    "gui_uf",
    "gui_analysis",
    "reset",
    "exec_lock",
    "result_file",
    "state_load",
];

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Trace lock and observer activity
    pub debug: bool,
    /// Headless test execution (analyses run inline)
    pub test_mode: bool,
    /// Text wrapping width for reports
    pub text_width: usize,
    /// Scroll back limit of the log window
    pub controller_max_entries: usize,
    /// Optional numeric backends
    pub backends: Backends,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            test_mode: false,
            text_width: if cfg!(windows) { 79 } else { 100 },
            controller_max_entries: 100_000,
            backends: Backends::detect(),
        }
    }
}

/// The fixed set of observer channels.
#[derive(Debug)]
pub struct Observers {
    /// Status changes of the auto-analyses
    pub auto_analyses: Arc<Observer>,
    /// Pipe creation, deletion, switching and bundling
    pub pipe_alteration: Arc<Observer>,
    /// Completion of user functions issued by the front end
    pub gui_uf: Arc<Observer>,
    /// Changes to the analysis tabs
    pub gui_analysis: Arc<Observer>,
    /// Data store resets
    pub reset: Arc<Observer>,
    /// Execution lock acquisition and release
    pub exec_lock: Arc<Observer>,
    /// Creation of result files
    pub result_file: Arc<Observer>,
    /// Loading of a saved state
    pub state_load: Arc<Observer>,
}

impl Observers {
    fn new(debug: bool) -> Self {
        let make = |name: &str| Arc::new(Observer::new(name, debug));
        Self {
            auto_analyses: make("auto_analyses"),
            pipe_alteration: make("pipe_alteration"),
            gui_uf: make("gui_uf"),
            gui_analysis: make("gui_analysis"),
            reset: make("reset"),
            exec_lock: make("exec_lock"),
            result_file: make("result_file"),
            state_load: make("state_load"),
        }
    }

    fn all(&self) -> [&Arc<Observer>; 8] {
        [
            &self.auto_analyses,
            &self.pipe_alteration,
            &self.gui_uf,
            &self.gui_analysis,
            &self.reset,
            &self.exec_lock,
            &self.result_file,
            &self.state_load,
        ]
    }

    /// Looks a channel up by name.
    pub fn channel(&self, name: &str) -> RelaxResult<&Arc<Observer>> {
        self.all()
            .into_iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| RelaxError::UnknownChannel(name.to_string()))
    }

    /// Every channel with its registered keys.
    pub fn info(&self) -> Vec<(String, Vec<String>)> {
        self.all()
            .iter()
            .map(|o| (o.name().to_string(), o.keys()))
            .collect()
    }

    fn reset_all(&self) {
        for observer in self.all() {
            observer.reset();
        }
    }
}

/// The status context.
pub struct Status {
    settings: Settings,
    /// The execution lock
    pub exec_lock: ExecLock,
    /// Guards the data pipe registry
    pub pipe_lock: ResourceLock,
    /// Guards the spin systems held in the pipes
    pub spin_lock: ResourceLock,
    pub observers: Observers,
    /// Progress records of the auto-analyses
    pub auto_analysis: AutoAnalysisRegistry,
    /// Failures captured from background analyses
    pub exception_queue: ExceptionQueue,
    timeline: Mutex<AnalysisTimeline>,
}

static GLOBAL: Lazy<Arc<Status>> = Lazy::new(|| Status::new(Settings::default()));

impl Status {
    /// Creates a fresh status context.
    pub fn new(settings: Settings) -> Arc<Self> {
        let observers = Observers::new(settings.debug);
        let exec_lock = ExecLock::new(Arc::clone(&observers.exec_lock), settings.debug);
        let auto_analysis = AutoAnalysisRegistry::new(Arc::clone(&observers.auto_analyses));

        Arc::new(Self {
            exec_lock,
            pipe_lock: ResourceLock::new("pipe_lock", settings.debug),
            spin_lock: ResourceLock::new("spin_lock", settings.debug),
            observers,
            auto_analysis,
            exception_queue: ExceptionQueue::new(),
            timeline: Mutex::new(AnalysisTimeline::new()),
            settings,
        })
    }

    /// A status context for headless tests, with every backend available.
    pub fn for_tests() -> Arc<Self> {
        Self::new(Settings {
            test_mode: true,
            backends: Backends::all(),
            ..Settings::default()
        })
    }

    /// The process-wide instance, created with default settings on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn debug(&self) -> bool {
        self.settings.debug
    }

    /// Creates the progress record of an auto-analysis.
    pub fn init_auto_analysis(&self, name: &str, kind: &str) {
        self.auto_analysis.init(name, kind);
    }

    /// Access to the analysis timeline.
    pub fn timeline(&self) -> MutexGuard<'_, AnalysisTimeline> {
        self.timeline.lock()
    }

    /// Returns the context to its initial state.
    ///
    /// Clears the analysis records, the exception queue and the timeline,
    /// and drops every observer registration. Refused while the execution
    /// lock is held.
    pub fn reset(&self) -> RelaxResult<()> {
        if let Some((holder, _)) = self.exec_lock.holder() {
            return Err(RelaxError::ExecutionLocked { holder });
        }

        self.auto_analysis.clear();
        self.exception_queue.clear();
        self.timeline().clear();
        self.observers.reset_all();

        info!("Status context reset");
        Ok(())
    }
}

impl std::fmt::Debug for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Status")
            .field("settings", &self.settings)
            .field("exec_lock", &self.exec_lock)
            .field("exception_queue", &self.exception_queue)
            .finish()
    }
}
