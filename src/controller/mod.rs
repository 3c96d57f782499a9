//! Analysis Controller
//!
//! Keeps a list of analysis tabs in step with the data pipe registry. Each
//! tab owns one pipe bundle: switching to a pipe selects the tab of its
//! bundle, deleting the last pipe of a bundle closes the tab, and a store
//! reset closes every tab.
//!
//! The controller listens on the `pipe_alteration`, `reset` and
//! `state_load` channels and announces its own changes on `gui_analysis`.
//! Its callbacks only hold weak references, so dropping the controller
//! detaches it from the store.

use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::error::{RelaxError, RelaxResult};
use crate::execution::{Execute, JobHandle, RunAnalysis};
use crate::pipes::{DataStore, PipeType};

const PAGE_SWITCHER: &str = "notebook page switcher";
const PIPE_DELETION: &str = "notebook pipe deletion";
const GUI_ANALYSES: &str = "gui analyses";

/// Analysis types which can be opened in a tab.
pub const ANALYSIS_TYPES: &[&str] = &["noe", "r1", "r2", "mf", "relax_disp"];

/// One open analysis.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AnalysisTab {
    /// One of [`ANALYSIS_TYPES`]
    pub analysis_type: String,
    pub analysis_name: String,
    pub pipe_name: String,
    pub pipe_bundle: String,
}

impl AnalysisTab {
    pub fn new(
        analysis_type: impl Into<String>,
        analysis_name: impl Into<String>,
        pipe_name: impl Into<String>,
        pipe_bundle: impl Into<String>,
    ) -> Self {
        Self {
            analysis_type: analysis_type.into(),
            analysis_name: analysis_name.into(),
            pipe_name: pipe_name.into(),
            pipe_bundle: pipe_bundle.into(),
        }
    }

    /// The pipe type backing this kind of analysis.
    pub fn pipe_type(&self) -> RelaxResult<PipeType> {
        match self.analysis_type.as_str() {
            "noe" => Ok(PipeType::Noe),
            "r1" | "r2" => Ok(PipeType::RelaxFit),
            "mf" => Ok(PipeType::ModelFree),
            "relax_disp" => Ok(PipeType::RelaxDisp),
            other => Err(RelaxError::analysis(format!(
                "The analysis type '{}' is unknown, expected one of {:?}.",
                other, ANALYSIS_TYPES
            ))),
        }
    }
}

#[derive(Default)]
struct Tabs {
    tabs: Vec<AnalysisTab>,
    current: Option<usize>,
}

/// The headless tab coordinator.
///
/// The tab list is never locked while the data store is being changed, as
/// every change notifies back into the controller.
pub struct AnalysisController {
    ds: Arc<DataStore>,
    state: Mutex<Tabs>,
}

impl AnalysisController {
    /// Creates the controller and registers its observers.
    pub fn new(ds: Arc<DataStore>) -> RelaxResult<Arc<Self>> {
        let controller = Arc::new(Self {
            ds,
            state: Mutex::new(Tabs::default()),
        });

        let observers = &controller.ds.status().observers;

        let weak = Arc::downgrade(&controller);
        observers.pipe_alteration.register(
            PAGE_SWITCHER,
            move || with_controller(&weak, |c| c.pipe_switch()),
            Some("pipe_switch"),
        )?;

        let weak = Arc::downgrade(&controller);
        observers.pipe_alteration.register(
            PIPE_DELETION,
            move || with_controller(&weak, |c| c.pipe_deletion()),
            Some("pipe_deletion"),
        )?;

        let weak = Arc::downgrade(&controller);
        observers.reset.register(
            GUI_ANALYSES,
            move || with_controller(&weak, |c| c.post_reset()),
            Some("post_reset"),
        )?;

        let weak = Arc::downgrade(&controller);
        observers.state_load.register(
            GUI_ANALYSES,
            move || with_controller(&weak, |c| c.pipe_switch()),
            Some("pipe_switch"),
        )?;

        Ok(controller)
    }

    fn tabs(&self) -> MutexGuard<'_, Tabs> {
        self.state.lock()
    }

    fn notify(&self) -> RelaxResult<()> {
        self.ds.status().observers.gui_analysis.notify()
    }

    /// Opens a new analysis tab and makes it current.
    ///
    /// The pipe is created within the bundle unless it already exists.
    /// Returns the index of the new tab.
    pub fn new_analysis(&self, tab: AnalysisTab) -> RelaxResult<usize> {
        let pipe_type = tab.pipe_type()?;
        self.ds.status().settings().backends.check(pipe_type)?;

        if tab.pipe_name.trim().is_empty() {
            return Err(RelaxError::MissingArgument("pipe_name".to_string()));
        }
        if tab.pipe_bundle.trim().is_empty() {
            return Err(RelaxError::MissingArgument("pipe_bundle".to_string()));
        }
        if self.page_index_from_bundle(&tab.pipe_bundle).is_some() {
            return Err(RelaxError::analysis(format!(
                "An analysis for the pipe bundle '{}' is already open.",
                tab.pipe_bundle
            )));
        }

        if !self.ds.has_pipe(&tab.pipe_name) {
            self.ds.create(
                &tab.pipe_name,
                pipe_type.as_str(),
                Some(&tab.pipe_bundle),
                true,
            )?;
        } else {
            match self.ds.get_bundle(&tab.pipe_name)? {
                None => self.ds.bundle(&tab.pipe_bundle, &tab.pipe_name)?,
                Some(bundle) if bundle != tab.pipe_bundle => {
                    return Err(RelaxError::AlreadyBundled {
                        pipe: tab.pipe_name.clone(),
                        bundle,
                    });
                }
                Some(_) => {}
            }
        }

        let index = {
            let mut state = self.tabs();
            state.tabs.push(tab);
            state.tabs.len() - 1
        };
        info!("Opened analysis tab {}", index);

        self.switch_page(index)?;
        Ok(index)
    }

    /// Closes a tab and deletes every pipe of its bundle.
    pub fn delete_analysis(&self, index: usize) -> RelaxResult<()> {
        let (tab, next) = {
            let mut state = self.tabs();
            if index >= state.tabs.len() {
                return Err(RelaxError::analysis(format!(
                    "There is no analysis tab with index {}.",
                    index
                )));
            }

            let tab = state.tabs.remove(index);
            let remaining = state.tabs.len();

            let current = state.current;
            let (current, next) = match current {
                _ if remaining == 0 => (None, None),
                Some(current) if current > index => (Some(current - 1), None),
                Some(current) if current == index => (None, Some(index.min(remaining - 1))),
                other => (other, None),
            };
            state.current = current;
            (tab, next)
        };
        info!(
            "Closing the '{}' analysis tab (bundle '{}')",
            tab.analysis_name, tab.pipe_bundle
        );

        for pipe in self.ds.pipe_names(Some(&tab.pipe_bundle)) {
            if self.ds.has_pipe(&pipe) {
                self.ds.delete(Some(&pipe))?;
            }
        }

        match next {
            Some(next) if next < self.len() => self.switch_page(next),
            _ => self.notify(),
        }
    }

    /// Index of the tab owning a bundle.
    pub fn page_index_from_bundle(&self, bundle: &str) -> Option<usize> {
        self.tabs().tabs.iter().position(|t| t.pipe_bundle == bundle)
    }

    /// Name of the tab owning a bundle.
    pub fn page_name_from_bundle(&self, bundle: &str) -> Option<String> {
        self.tabs()
            .tabs
            .iter()
            .find(|t| t.pipe_bundle == bundle)
            .map(|t| t.analysis_name.clone())
    }

    /// Closes the tabs whose bundle has disappeared from the store.
    fn pipe_deletion(&self) -> RelaxResult<()> {
        let bundles: Vec<String> = self.tabs().tabs.iter().map(|t| t.pipe_bundle.clone()).collect();

        for (index, bundle) in bundles.iter().enumerate().rev() {
            if !self.ds.has_bundle(bundle) {
                debug!("The bundle '{}' of analysis tab {} no longer exists", bundle, index);
                self.delete_analysis(index)?;
            }
        }
        Ok(())
    }

    /// Selects the tab whose bundle holds the current pipe.
    fn pipe_switch(&self) -> RelaxResult<()> {
        let Some(pipe) = self.ds.cdp_name() else {
            return Ok(());
        };
        let Some(bundle) = self.ds.get_bundle(&pipe).ok().flatten() else {
            return Ok(());
        };
        let Some(index) = self.page_index_from_bundle(&bundle) else {
            return Ok(());
        };

        if self.current_index() == Some(index) {
            return Ok(());
        }

        debug!("Pipe '{}' selects analysis tab {}", pipe, index);
        self.tabs().current = Some(index);
        self.notify()
    }

    fn post_reset(&self) -> RelaxResult<()> {
        let closed = {
            let mut state = self.tabs();
            state.current = None;
            std::mem::take(&mut state.tabs).len()
        };
        if closed > 0 {
            info!("Closed {} analysis tab(s) after the reset", closed);
        }
        Ok(())
    }

    /// Makes a tab current, switching to its pipe.
    pub fn switch_page(&self, index: usize) -> RelaxResult<()> {
        let pipe = {
            let mut state = self.tabs();
            let Some(tab) = state.tabs.get(index) else {
                return Err(RelaxError::analysis(format!(
                    "There is no analysis tab with index {}.",
                    index
                )));
            };
            let pipe = tab.pipe_name.clone();
            state.current = Some(index);
            pipe
        };

        if self.ds.cdp_name().as_deref() != Some(pipe.as_str()) {
            if self.ds.has_pipe(&pipe) {
                self.ds.switch(&pipe)?;
            } else {
                warn!("The data pipe '{}' of analysis tab {} is missing", pipe, index);
            }
        }

        self.notify()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.tabs().current
    }

    pub fn analysis_names(&self) -> Vec<String> {
        self.tabs()
            .tabs
            .iter()
            .map(|t| t.analysis_name.clone())
            .collect()
    }

    pub fn tab(&self, index: usize) -> Option<AnalysisTab> {
        self.tabs().tabs.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.tabs().tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts an analysis for a tab through the job wrapper.
    ///
    /// Refused while anything holds the execution lock.
    pub fn execute<A: RunAnalysis + 'static>(
        &self,
        index: usize,
        analysis: A,
        thread: bool,
    ) -> RelaxResult<JobHandle<A>> {
        if let Some((holder, _)) = self.ds.status().exec_lock.holder() {
            return Err(RelaxError::ExecutionLocked { holder });
        }
        if index >= self.len() {
            return Err(RelaxError::analysis(format!(
                "There is no analysis tab with index {}.",
                index
            )));
        }

        Ok(Execute::new(Arc::clone(&self.ds), analysis, index, thread).start())
    }
}

impl Drop for AnalysisController {
    fn drop(&mut self) {
        let observers = &self.ds.status().observers;
        observers.pipe_alteration.unregister(PAGE_SWITCHER);
        observers.pipe_alteration.unregister(PIPE_DELETION);
        observers.reset.unregister(GUI_ANALYSES);
        observers.state_load.unregister(GUI_ANALYSES);
    }
}

fn with_controller<F>(weak: &Weak<AnalysisController>, f: F) -> RelaxResult<()>
where
    F: FnOnce(&AnalysisController) -> RelaxResult<()>,
{
    match weak.upgrade() {
        Some(controller) => f(&controller),
        None => Ok(()),
    }
}
