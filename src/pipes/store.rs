//! The Data Store
//!
//! Registry of named data pipes, their bundles and the current pipe
//! pointer. All mutations:
//! - validate their arguments before touching anything
//! - run under the `pipe_lock` resource lock
//! - notify the `pipe_alteration` channel once, after the lock is gone
//!
//! so observers always see a consistent registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use super::container::{PipeContainer, ResultFile, SpinContainer};
use super::types::{check_type, PipeType};
use crate::error::{RelaxError, RelaxResult};
use crate::status::Status;

/// Registry contents.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreInner {
    pub(crate) pipes: BTreeMap<String, PipeContainer>,
    pub(crate) bundles: BTreeMap<String, Vec<String>>,
    pub(crate) current: Option<String>,
}

impl StoreInner {
    fn test(&self, name: Option<&str>) -> RelaxResult<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.current.clone().ok_or(RelaxError::NoPipe(None))?,
        };

        if !self.pipes.contains_key(&name) {
            return Err(RelaxError::NoPipe(Some(name)));
        }
        Ok(name)
    }

    fn bundle_of(&self, pipe: &str) -> Option<&str> {
        self.bundles
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == pipe))
            .map(|(bundle, _)| bundle.as_str())
    }

    /// Adds an existing pipe to a bundle, creating the bundle as needed.
    fn bundle(&mut self, bundle: &str, pipe: &str) -> RelaxResult<()> {
        self.test(Some(pipe))?;

        if let Some(existing) = self.bundle_of(pipe) {
            return Err(RelaxError::AlreadyBundled {
                pipe: pipe.to_string(),
                bundle: existing.to_string(),
            });
        }

        self.bundles
            .entry(bundle.to_string())
            .or_default()
            .push(pipe.to_string());
        Ok(())
    }

    /// Removes a pipe, pruning its bundle and clearing the current pointer.
    fn remove(&mut self, pipe: &str) {
        if let Some(bundle) = self.bundle_of(pipe).map(str::to_string) {
            let now_empty = match self.bundles.get_mut(&bundle) {
                Some(members) => {
                    members.retain(|m| m != pipe);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                debug!("Removing the empty bundle '{}'", bundle);
                self.bundles.remove(&bundle);
            }
        }

        self.pipes.remove(pipe);

        if self.current.as_deref() == Some(pipe) {
            self.current = None;
        }
    }
}

/// One row of the [`DataStore::display`] table.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PipeRow {
    pub name: String,
    pub pipe_type: PipeType,
    pub bundle: Option<String>,
    pub current: bool,
}

fn require_name<'a>(value: Option<&'a str>, argument: &str) -> RelaxResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RelaxError::MissingArgument(argument.to_string())),
    }
}

/// The data pipe registry.
pub struct DataStore {
    status: Arc<Status>,
    inner: Mutex<StoreInner>,
}

impl DataStore {
    /// Creates an empty store bound to a status context.
    pub fn new(status: Arc<Status>) -> Arc<Self> {
        Arc::new(Self {
            status,
            inner: Mutex::new(StoreInner::default()),
        })
    }

    pub fn status(&self) -> &Arc<Status> {
        &self.status
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock()
    }

    fn notify_alteration(&self) -> RelaxResult<()> {
        self.status.observers.pipe_alteration.notify()
    }

    /// Creates a new data pipe.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the new pipe
    /// * `pipe_type` - One of the wire strings in [`super::types::VALID_TYPES`]
    /// * `bundle` - Optional bundle to place the pipe in
    /// * `switch` - Make the new pipe the current pipe
    pub fn create(
        &self,
        name: &str,
        pipe_type: &str,
        bundle: Option<&str>,
        switch: bool,
    ) -> RelaxResult<()> {
        let pipe_type = check_type(pipe_type, &self.status.settings().backends)?;
        let name = require_name(Some(name), "pipe_name")?;
        if let Some(bundle) = bundle {
            require_name(Some(bundle), "bundle")?;
        }

        {
            let _lock = self.status.pipe_lock.acquire("create");
            let mut inner = self.inner();

            if inner.pipes.contains_key(name) {
                return Err(RelaxError::DuplicatePipe(name.to_string()));
            }

            inner
                .pipes
                .insert(name.to_string(), PipeContainer::new(pipe_type));

            if let Some(bundle) = bundle {
                inner.bundle(bundle, name)?;
            }

            if switch {
                inner.current = Some(name.to_string());
            }
        }

        info!("Created the '{}' data pipe ({})", name, pipe_type.description());
        self.notify_alteration()
    }

    /// Deletes one pipe, or every pipe when `name` is `None`.
    ///
    /// Observers are notified once per call, after all deletions.
    pub fn delete(&self, name: Option<&str>) -> RelaxResult<()> {
        if let Some(name) = name {
            require_name(Some(name), "pipe_name")?;
        }

        {
            let _lock = self.status.pipe_lock.acquire("delete");
            let mut inner = self.inner();

            let doomed: Vec<String> = match name {
                Some(name) => vec![inner.test(Some(name))?],
                None => inner.pipes.keys().cloned().collect(),
            };

            for pipe in &doomed {
                inner.remove(pipe);
                debug!("Deleted the '{}' data pipe", pipe);
            }
        }

        self.notify_alteration()
    }

    /// Makes an existing pipe the current pipe.
    pub fn switch(&self, name: &str) -> RelaxResult<()> {
        require_name(Some(name), "pipe_name")?;

        {
            let _lock = self.status.pipe_lock.acquire("switch");
            let mut inner = self.inner();

            let name = inner.test(Some(name))?;
            inner.current = Some(name);
        }

        self.notify_alteration()
    }

    /// Deep copies a pipe into a new pipe.
    ///
    /// The source defaults to the current pipe. The copy shares no data
    /// with its source.
    pub fn copy(
        &self,
        pipe_from: Option<&str>,
        pipe_to: Option<&str>,
        bundle_to: Option<&str>,
    ) -> RelaxResult<()> {
        if let Some(target) = pipe_to {
            if self.has_pipe(target) {
                return Err(RelaxError::DuplicatePipe(target.to_string()));
            }
        }
        if pipe_from.is_none() && pipe_to.is_none() {
            return Err(RelaxError::MissingArgument("pipe_from and pipe_to".to_string()));
        }
        let target = require_name(pipe_to, "pipe_to")?;
        if let Some(bundle) = bundle_to {
            require_name(Some(bundle), "bundle_to")?;
        }

        {
            let _lock = self.status.pipe_lock.acquire("copy");
            let mut inner = self.inner();

            // Re-check under the lock
            if inner.pipes.contains_key(target) {
                return Err(RelaxError::DuplicatePipe(target.to_string()));
            }

            let source = inner.test(pipe_from)?;
            let clone = inner.pipes[&source].clone();
            inner.pipes.insert(target.to_string(), clone);

            if let Some(bundle) = bundle_to {
                inner.bundle(bundle, target)?;
            }

            debug!("Copied the '{}' data pipe to '{}'", source, target);
        }

        self.notify_alteration()
    }

    /// Adds a pipe to a bundle, creating the bundle as needed.
    pub fn bundle(&self, bundle: &str, pipe: &str) -> RelaxResult<()> {
        require_name(Some(bundle), "bundle")?;
        {
            let _lock = self.status.pipe_lock.acquire("bundle");
            self.inner().bundle(bundle, pipe)?;
        }

        self.notify_alteration()
    }

    /// The bundle a pipe belongs to.
    pub fn get_bundle(&self, pipe: &str) -> RelaxResult<Option<String>> {
        let inner = self.inner();
        inner.test(Some(pipe))?;
        Ok(inner.bundle_of(pipe).map(str::to_string))
    }

    pub fn has_bundle(&self, bundle: &str) -> bool {
        self.inner().bundles.contains_key(bundle)
    }

    pub fn bundle_names(&self) -> Vec<String> {
        self.inner().bundles.keys().cloned().collect()
    }

    /// Sorted pipe names, optionally restricted to one bundle.
    pub fn pipe_names(&self, bundle: Option<&str>) -> Vec<String> {
        let inner = self.inner();
        let mut names: Vec<String> = match bundle {
            Some(bundle) => inner.bundles.get(bundle).cloned().unwrap_or_default(),
            None => inner.pipes.keys().cloned().collect(),
        };
        names.sort();
        names
    }

    /// Checks that a pipe (or, for `None`, the current pipe) exists.
    pub fn test(&self, name: Option<&str>) -> RelaxResult<()> {
        self.inner().test(name).map(|_| ())
    }

    /// Changes the type of the current pipe.
    pub fn change_type(&self, pipe_type: &str) -> RelaxResult<()> {
        let pipe_type = check_type(pipe_type, &self.status.settings().backends)?;

        let _lock = self.status.pipe_lock.acquire("change_type");
        let mut inner = self.inner();
        let name = inner.test(None)?;
        if let Some(pipe) = inner.pipes.get_mut(&name) {
            pipe.set_pipe_type(pipe_type);
        }
        info!("Changed the type of the '{}' data pipe to '{}'", name, pipe_type);
        Ok(())
    }

    /// Name of the current pipe.
    pub fn cdp_name(&self) -> Option<String> {
        self.inner().current.clone()
    }

    /// Logs and returns the name of the current pipe.
    pub fn current(&self) -> Option<String> {
        let name = self.cdp_name();
        match name {
            Some(ref name) => info!("{}", name),
            None => info!("None"),
        }
        name
    }

    pub fn has_pipe(&self, name: &str) -> bool {
        self.inner().pipes.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.inner().pipes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner().pipes.len()
    }

    /// Type of a pipe (the current pipe for `None`).
    pub fn get_type(&self, name: Option<&str>) -> RelaxResult<PipeType> {
        self.with_pipe(name, |pipe| pipe.pipe_type())
    }

    /// An independent copy of a pipe's contents.
    pub fn get_pipe(&self, name: Option<&str>) -> RelaxResult<PipeContainer> {
        self.with_pipe(name, PipeContainer::clone)
    }

    /// Runs a closure on a pipe under the resource lock.
    ///
    /// The closure must not call back into the store.
    pub fn with_pipe<R, F>(&self, name: Option<&str>, f: F) -> RelaxResult<R>
    where
        F: FnOnce(&PipeContainer) -> R,
    {
        let _lock = self.status.pipe_lock.acquire("with_pipe");
        let inner = self.inner();
        let name = inner.test(name)?;
        Ok(f(&inner.pipes[&name]))
    }

    /// Runs a closure with mutable access to a pipe's payload.
    ///
    /// The pipe type cannot be changed this way. The closure must not call
    /// back into the store.
    pub fn with_pipe_mut<R, F>(&self, name: Option<&str>, f: F) -> RelaxResult<R>
    where
        F: FnOnce(&mut PipeContainer) -> R,
    {
        let _lock = self.status.pipe_lock.acquire("with_pipe_mut");
        let mut inner = self.inner();
        let name = inner.test(name)?;
        let pipe = inner
            .pipes
            .get_mut(&name)
            .ok_or_else(|| RelaxError::NoPipe(Some(name.clone())))?;
        Ok(f(pipe))
    }

    /// Visits every pipe, in name order, under the resource lock.
    pub fn pipe_loop<F>(&self, mut f: F)
    where
        F: FnMut(&str, &PipeContainer),
    {
        let _lock = self.status.pipe_lock.acquire("pipe_loop");
        let inner = self.inner();
        for (name, pipe) in &inner.pipes {
            f(name, pipe);
        }
    }

    /// Tabulates every pipe with its type, bundle and current marker.
    pub fn display(&self, sort: bool, rev: bool) -> Vec<PipeRow> {
        let mut rows = Vec::new();
        {
            let _lock = self.status.pipe_lock.acquire("display");
            let inner = self.inner();
            for (name, pipe) in &inner.pipes {
                rows.push(PipeRow {
                    name: name.clone(),
                    pipe_type: pipe.pipe_type(),
                    bundle: inner.bundle_of(name).map(str::to_string),
                    current: inner.current.as_deref() == Some(name.as_str()),
                });
            }
        }

        if sort {
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            if rev {
                rows.reverse();
            }
        }

        info!("{:<24} {:<16} {:<24} {}", "Data pipe name", "Data pipe type", "Bundle", "Current");
        for row in &rows {
            info!(
                "{:<24} {:<16} {:<24} {}",
                format!("'{}'", row.name),
                row.pipe_type.as_str(),
                row.bundle.as_deref().map_or("None".to_string(), |b| format!("'{}'", b)),
                if row.current { "*" } else { "" }
            );
        }

        rows
    }

    /// Adds (or replaces) a spin in a pipe.
    pub fn add_spin(&self, pipe: Option<&str>, spin: SpinContainer) -> RelaxResult<()> {
        let _spins = self.status.spin_lock.acquire("add_spin");
        self.with_pipe_mut(pipe, |p| p.add_spin(spin))
    }

    /// Selects or deselects a spin.
    pub fn select_spin(&self, pipe: Option<&str>, spin_id: &str, select: bool) -> RelaxResult<()> {
        let _spins = self.status.spin_lock.acquire("select_spin");
        let pipe_name = self.inner().test(pipe)?;

        self.with_pipe_mut(Some(&pipe_name), |p| match p.spin_mut(spin_id) {
            Some(spin) => {
                spin.select = select;
                Ok(())
            }
            None => Err(RelaxError::MissingData {
                pipe: pipe_name.clone(),
                what: format!("spin '{}'", spin_id),
            }),
        })?
    }

    /// Records a result file on a pipe and notifies `result_file`.
    pub fn add_result_file(&self, pipe: Option<&str>, file: ResultFile) -> RelaxResult<()> {
        self.with_pipe_mut(pipe, |p| p.result_files.push(file))?;
        self.status.observers.result_file.notify()
    }

    /// Empties the store and notifies the `reset` channel.
    pub fn reset(&self) -> RelaxResult<()> {
        {
            let _lock = self.status.pipe_lock.acquire("reset");
            *self.inner() = StoreInner::default();
        }

        info!("Data store reset");
        self.status.observers.reset.notify()
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner();
        f.debug_struct("DataStore")
            .field("pipes", &inner.pipes.keys().collect::<Vec<_>>())
            .field("bundles", &inner.bundles)
            .field("current", &inner.current)
            .finish()
    }
}
