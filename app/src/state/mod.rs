mod render;

pub use render::device_states;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::device::DeviceRegistry;

/// Last known payload of every monitored bus topic.
///
/// All operations are individually atomic and can be called from any task. There is no
/// multi-operation transaction: reconciliation has to use [`StateCache::try_add`] and
/// [`StateCache::try_remove`] so it never overwrites a value that arrived concurrently.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    values: Arc<DashMap<String, String>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks every state topic of the registry plus the control topic, all with an empty value.
    pub fn seeded(registry: &DeviceRegistry, control_topic: &str) -> Self {
        let cache = Self::new();

        for topic in registry.state_topics() {
            cache.try_add(topic, "");
        }
        cache.try_add(control_topic, "");

        cache
    }

    pub fn get(&self, topic: &str) -> Option<String> {
        self.values.get(topic).map(|v| v.value().clone())
    }

    pub fn set(&self, topic: impl Into<String>, value: impl Into<String>) {
        self.values.insert(topic.into(), value.into());
    }

    /// Overwrites the value only if the topic is tracked and returns the previous value.
    /// Never creates an entry, so a bus message racing a removal cannot resurrect the topic.
    pub fn update(&self, topic: &str, value: &str) -> Option<String> {
        self.values
            .get_mut(topic)
            .map(|mut entry| std::mem::replace(entry.value_mut(), value.to_string()))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.values.contains_key(topic)
    }

    /// Inserts the default only if the topic is not tracked yet. Returns `false` if an entry
    /// already existed, which is then left untouched.
    pub fn try_add(&self, topic: impl Into<String>, default: impl Into<String>) -> bool {
        match self.values.entry(topic.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(default.into());
                true
            }
        }
    }

    pub fn try_remove(&self, topic: &str) -> bool {
        self.values.remove(topic).is_some()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.values.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
