//! Analysis Job Wrapper
//!
//! Runs one auto-analysis either on a background worker thread or inline
//! in the caller's thread, inside a failure boundary:
//! - errors and panics from `run_analysis` are captured, never re-raised
//! - captured failures go to the exception queue and the diagnostic stream
//! - an execution lock left held by the failing thread is released once

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use super::exceptions::CapturedException;
use crate::error::{RelaxError, RelaxResult};
use crate::monitoring::EventType;
use crate::pipes::DataStore;

/// The hook every concrete analysis supplies.
pub trait RunAnalysis: Send {
    /// Name used in the timeline and log messages.
    fn name(&self) -> String {
        "analysis".to_string()
    }

    /// Runs the analysis against the data store.
    ///
    /// The default implementation always fails, concrete analyses must
    /// override it.
    fn run_analysis(&mut self, _ds: &DataStore) -> RelaxResult<()> {
        Err(RelaxError::Unimplemented("run_analysis".to_string()))
    }
}

/// One invocation of an analysis.
pub struct Execute<A: RunAnalysis + 'static> {
    ds: Arc<DataStore>,
    analysis: A,
    data_index: usize,
    thread: bool,
}

impl<A: RunAnalysis + 'static> Execute<A> {
    /// Wraps an analysis.
    ///
    /// # Arguments
    ///
    /// * `ds` - The data store the analysis runs against
    /// * `analysis` - The analysis and its parameters
    /// * `data_index` - Index reported with any captured failure
    /// * `thread` - Run on a worker thread (false runs inline on `start`)
    pub fn new(ds: Arc<DataStore>, analysis: A, data_index: usize, thread: bool) -> Self {
        Self {
            ds,
            analysis,
            data_index,
            thread,
        }
    }

    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }

    pub fn into_analysis(self) -> A {
        self.analysis
    }

    /// Starts the job.
    ///
    /// With threading disabled the job runs to completion before this
    /// returns.
    pub fn start(mut self) -> JobHandle<A> {
        if !self.thread {
            self.run();
            return JobHandle {
                state: HandleState::Finished(self),
            };
        }

        debug!(
            "Starting '{}' (index {}) on a worker thread",
            self.analysis.name(),
            self.data_index
        );
        let handle = thread::spawn(move || {
            self.run();
            self
        });

        JobHandle {
            state: HandleState::Running(handle),
        }
    }

    /// Runs the analysis inside the failure boundary.
    ///
    /// Never fails. Check the exception queue for the outcome.
    pub fn run(&mut self) {
        let name = self.analysis.name();
        let status = Arc::clone(self.ds.status());
        status.timeline().record(&name, EventType::Started);

        let ds = &self.ds;
        let analysis = &mut self.analysis;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| analysis.run_analysis(ds)));

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(RelaxError::Panic(panic_message(&*payload))),
        };

        match failure {
            None => {
                info!("Analysis '{}' completed", name);
                status.timeline().record(&name, EventType::Completed);
            }
            Some(error) => {
                self.capture(&name, error);
                status.timeline().record(&name, EventType::Failed);
            }
        }
    }

    fn capture(&self, name: &str, failure: RelaxError) {
        let backtrace = Backtrace::force_capture().to_string();
        let status = self.ds.status();

        error!(
            "Analysis '{}' (index {}) failed: {}",
            name, self.data_index, failure
        );
        error!("{}", backtrace);

        status
            .exception_queue
            .put(CapturedException::new(self.data_index, failure, backtrace));

        match status.exec_lock.release_if_owned() {
            Ok(true) => warn!("The execution lock was still held after the failure and has been released"),
            Ok(false) => {}
            Err(e) => warn!("Could not release the execution lock: {}", e),
        }
    }
}

enum HandleState<A: RunAnalysis + 'static> {
    Running(JoinHandle<Execute<A>>),
    Finished(Execute<A>),
}

/// Handle to a started job.
pub struct JobHandle<A: RunAnalysis + 'static> {
    state: HandleState<A>,
}

impl<A: RunAnalysis + 'static> JobHandle<A> {
    /// True once the job has finished.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Running(handle) => handle.is_finished(),
            HandleState::Finished(_) => true,
        }
    }

    /// Waits for the job and hands the wrapper back.
    pub fn join(self) -> RelaxResult<Execute<A>> {
        match self.state {
            HandleState::Finished(job) => Ok(job),
            HandleState::Running(handle) => handle
                .join()
                .map_err(|payload| RelaxError::Panic(panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
