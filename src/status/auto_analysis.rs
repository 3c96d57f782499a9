//! Auto-analysis status records.
//!
//! One record per pipe bundle. Every write goes through
//! [`AutoAnalysisRegistry`], which notifies the `auto_analyses` channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use super::observer::Observer;
use crate::error::RelaxResult;

/// Progress of one auto-analysis.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AutoAnalysis {
    pub name: String,
    /// Analysis type (`noe`, `relax_fit`, `mf`, `relax_disp`)
    pub kind: String,
    /// Completion flag
    pub fin: bool,
    /// Monte Carlo simulation progress, if simulations are running
    pub mc_number: Option<usize>,
}

impl AutoAnalysis {
    fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            fin: false,
            mc_number: None,
        }
    }
}

/// All auto-analysis records plus the name of the running analysis.
pub struct AutoAnalysisRegistry {
    records: Mutex<Records>,
    observer: Arc<Observer>,
}

#[derive(Default)]
struct Records {
    analyses: BTreeMap<String, AutoAnalysis>,
    current: Option<String>,
}

impl AutoAnalysisRegistry {
    pub fn new(observer: Arc<Observer>) -> Self {
        Self {
            records: Mutex::new(Records::default()),
            observer,
        }
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock()
    }

    /// Creates (or replaces) the record for an analysis.
    pub fn init(&self, name: &str, kind: &str) {
        self.records()
            .analyses
            .insert(name.to_string(), AutoAnalysis::new(name, kind));
    }

    /// Applies a change to a record, then notifies observers.
    ///
    /// Returns false without notifying if the record does not exist.
    pub fn update<F>(&self, name: &str, change: F) -> RelaxResult<bool>
    where
        F: FnOnce(&mut AutoAnalysis),
    {
        {
            let mut records = self.records();
            let Some(record) = records.analyses.get_mut(name) else {
                return Ok(false);
            };
            change(record);
        }

        self.observer.notify()?;
        Ok(true)
    }

    pub fn set_fin(&self, name: &str, fin: bool) -> RelaxResult<bool> {
        self.update(name, |r| r.fin = fin)
    }

    pub fn set_mc_number(&self, name: &str, mc_number: Option<usize>) -> RelaxResult<bool> {
        self.update(name, |r| r.mc_number = mc_number)
    }

    pub fn get(&self, name: &str) -> Option<AutoAnalysis> {
        self.records().analyses.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.records().analyses.keys().cloned().collect()
    }

    pub fn current(&self) -> Option<String> {
        self.records().current.clone()
    }

    pub fn set_current(&self, name: Option<&str>) {
        self.records().current = name.map(str::to_string);
    }

    pub fn clear(&self) {
        let mut records = self.records();
        records.analyses.clear();
        records.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> (AutoAnalysisRegistry, Arc<AtomicUsize>) {
        let observer = Arc::new(Observer::new("auto_analyses", false));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        observer
            .register("counter", move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }, None)
            .unwrap();
        (AutoAnalysisRegistry::new(observer), count)
    }

    #[test]
    fn test_init_record() {
        let (registry, notified) = registry();
        registry.init("noe bundle", "noe");

        let record = registry.get("noe bundle").unwrap();
        assert_eq!(record.kind, "noe");
        assert!(!record.fin);
        assert_eq!(record.mc_number, None);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_write_notifies() {
        let (registry, notified) = registry();
        registry.init("rx", "relax_fit");

        registry.set_mc_number("rx", Some(0)).unwrap();
        registry.set_mc_number("rx", Some(500)).unwrap();
        registry.set_fin("rx", true).unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 3);
        let record = registry.get("rx").unwrap();
        assert!(record.fin);
        assert_eq!(record.mc_number, Some(500));
    }

    #[test]
    fn test_update_missing_record() {
        let (registry, notified) = registry();
        assert!(!registry.set_fin("absent", true).unwrap());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_current_and_clear() {
        let (registry, _) = registry();
        registry.init("mf", "mf");
        registry.set_current(Some("mf"));
        assert_eq!(registry.current(), Some("mf".to_string()));

        registry.clear();
        assert!(registry.current().is_none());
        assert!(registry.names().is_empty());
    }
}
