//! Observer Channels
//!
//! Named publish/subscribe lists used to tell interested components that
//! some piece of state has changed.
//!
//! Callbacks are invoked synchronously, in registration order. A failing
//! callback stops the notification and its error is returned to whoever
//! called [`Observer::notify`].

use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::error::{RelaxError, RelaxResult};

/// A registered observer callback.
pub type Callback = Arc<dyn Fn() -> RelaxResult<()> + Send + Sync>;

struct Entry {
    key: String,
    callback: Callback,
    label: Option<String>,
}

/// A single named observer channel.
pub struct Observer {
    name: String,
    entries: Mutex<Vec<Entry>>,
    debug: bool,
}

impl Observer {
    /// Creates an empty channel.
    pub fn new(name: impl Into<String>, debug: bool) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(Vec::new()),
            debug,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock()
    }

    /// Registers a callback under a unique key.
    ///
    /// # Arguments
    ///
    /// * `key` - Identifier of the observer, unique on this channel
    /// * `callback` - Function to invoke on every notification
    /// * `label` - Optional method name used in debugging output
    pub fn register<F>(&self, key: &str, callback: F, label: Option<&str>) -> RelaxResult<()>
    where
        F: Fn() -> RelaxResult<()> + Send + Sync + 'static,
    {
        if key.trim().is_empty() {
            return Err(RelaxError::InvalidObserverKey {
                channel: self.name.clone(),
            });
        }

        let mut entries = self.entries();
        if entries.iter().any(|e| e.key == key) {
            return Err(RelaxError::DuplicateObserverKey {
                channel: self.name.clone(),
                key: key.to_string(),
            });
        }

        if self.debug {
            match label {
                Some(label) => debug!(
                    "Observer: '{}' registering the '{}' method {}().",
                    self.name, key, label
                ),
                None => debug!("Observer: '{}' registering '{}'.", self.name, key),
            }
        }

        entries.push(Entry {
            key: key.to_string(),
            callback: Arc::new(callback),
            label: label.map(str::to_string),
        });
        Ok(())
    }

    /// Removes the callback for a key.
    ///
    /// Unknown keys are ignored, so several cleanup paths may unregister
    /// the same observer.
    pub fn unregister(&self, key: &str) {
        if self.debug {
            debug!("Observer: '{}' unregistering '{}'.", self.name, key);
        }

        let mut entries = self.entries();
        match entries.iter().position(|e| e.key == key) {
            Some(index) => {
                entries.remove(index);
            }
            None => {
                if self.debug {
                    debug!("The key '{}' does not exist.", key);
                }
            }
        }
    }

    /// Invokes every callback in registration order.
    ///
    /// The callback list is snapshotted first, so callbacks may register
    /// or unregister observers (on any channel) while running.
    pub fn notify(&self) -> RelaxResult<()> {
        let snapshot: Vec<(String, Option<String>, Callback)> = self
            .entries()
            .iter()
            .map(|e| (e.key.clone(), e.label.clone(), Arc::clone(&e.callback)))
            .collect();

        for (key, label, callback) in snapshot {
            if self.debug {
                match label {
                    Some(ref label) => debug!(
                        "Observer: '{}' notifying the '{}' method {}().",
                        self.name, key, label
                    ),
                    None => debug!("Observer: '{}' notifying '{}'.", self.name, key),
                }
            }

            callback().map_err(|e| RelaxError::ObserverCallback {
                channel: self.name.clone(),
                key,
                source: Box::new(e),
            })?;
        }

        Ok(())
    }

    /// Removes all registrations.
    pub fn reset(&self) {
        if self.debug {
            debug!("Resetting observer '{}'.", self.name);
        }
        self.entries().clear();
    }

    /// Registered keys, in notification order.
    pub fn keys(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.key.clone()).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().iter().any(|e| e.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}
