//! Dependency health state.
//!
//! Each probe cycle publishes a complete snapshot, swapped in atomically, so
//! a heartbeat reader sees either the whole previous cycle or the whole new
//! one.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Last known health of each dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    dependencies: BTreeMap<String, bool>,
}

impl HealthSnapshot {
    /// True when every dependency was healthy on its last check.
    pub fn all_healthy(&self) -> bool {
        self.dependencies.values().all(|healthy| *healthy)
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.dependencies.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.dependencies.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for HealthSnapshot {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self {
            dependencies: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Shared, atomically replaced health state.
#[derive(Debug)]
pub struct HealthState {
    current: ArcSwap<HealthSnapshot>,
}

impl HealthState {
    /// All named dependencies start unhealthy until the first probe cycle.
    pub fn new<I, S>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let snapshot: HealthSnapshot = dependencies.into_iter().map(|d| (d, false)).collect();
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// The aggregate answer served by the heartbeat.
    pub fn is_healthy(&self) -> bool {
        self.current.load().all_healthy()
    }

    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.current.load_full()
    }

    /// Replace the whole state with the results of one probe cycle.
    pub fn publish(&self, snapshot: HealthSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}
