use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{DeviceConfigError, DeviceRegistry};

/// Holds the current device configuration generation.
///
/// Readers take a snapshot and keep working with it; a reload swaps in a complete new
/// registry, so nobody ever sees a half-updated device list.
pub struct DeviceStore {
    current: RwLock<Arc<DeviceRegistry>>,
}

impl DeviceStore {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<DeviceRegistry> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swaps in the new registry and returns the topic changes relative to the previous one.
    pub fn replace(&self, registry: DeviceRegistry) -> TopicDiff {
        let registry = Arc::new(registry);

        let mut current = match self.current.write() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };

        let diff = TopicDiff::between(&current, &registry);
        *current = registry;
        diff
    }

    /// Reads and validates the device file, then swaps it in. On any error the current
    /// configuration stays active.
    pub async fn reload(&self, path: impl AsRef<Path>) -> anyhow::Result<TopicDiff> {
        let registry = DeviceRegistry::load(path).await?;
        let diff = self.replace(registry);

        tracing::info!(
            "Device configuration reloaded: {} topics added, {} removed",
            diff.added().len(),
            diff.removed().len()
        );

        Ok(diff)
    }
}

/// Change of the monitored state topics between two configuration generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDiff {
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl TopicDiff {
    pub fn new(
        added: impl IntoIterator<Item = String>,
        removed: impl IntoIterator<Item = String>,
    ) -> Result<Self, DeviceConfigError> {
        let added: BTreeSet<String> = added.into_iter().collect();
        let removed: BTreeSet<String> = removed.into_iter().collect();

        if let Some(topic) = added.intersection(&removed).next() {
            return Err(DeviceConfigError::ContradictoryDiff { topic: topic.clone() });
        }

        Ok(Self { added, removed })
    }

    /// A topic is only removed when no device of the new generation references it anymore.
    pub fn between(old: &DeviceRegistry, new: &DeviceRegistry) -> Self {
        let old_topics = old.state_topics();
        let new_topics = new.state_topics();

        Self {
            added: new_topics.difference(&old_topics).cloned().collect(),
            removed: old_topics.difference(&new_topics).cloned().collect(),
        }
    }

    pub fn added(&self) -> &BTreeSet<String> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::device::test;

    fn sensor(id: &str, topic: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "action.devices.types.SENSOR",
            "traits": [ {
                "trait": "action.devices.traits.SensorState",
                "state": { "currentSensorStateData.rawValue": { "topic": topic, "googleType": "numeric" } }
            } ]
        })
    }

    fn registry(devices: serde_json::Value) -> DeviceRegistry {
        DeviceRegistry::from_json(&devices.to_string()).unwrap()
    }

    #[test]
    fn test_diff_between_generations() {
        let old = registry(json!({ "a": sensor("a", "t/a"), "b": sensor("b", "t/b") }));
        let new = registry(json!({ "a": sensor("a", "t/a"), "c": sensor("c", "t/c") }));

        let diff = TopicDiff::between(&old, &new);

        assert_eq!(diff.added(), &BTreeSet::from(["t/c".to_string()]));
        assert_eq!(diff.removed(), &BTreeSet::from(["t/b".to_string()]));
    }

    #[test]
    fn test_diff_never_removes_topic_still_referenced_by_other_device() {
        let old = registry(json!({ "a": sensor("a", "shared"), "b": sensor("b", "shared") }));
        let new = registry(json!({ "b": sensor("b", "shared") }));

        let diff = TopicDiff::between(&old, &new);

        assert!(diff.is_empty());
    }

    #[test]
    fn test_contradictory_diff_is_rejected() {
        let result = TopicDiff::new(["x".to_string(), "y".to_string()], ["y".to_string()]);

        assert_eq!(
            result,
            Err(DeviceConfigError::ContradictoryDiff { topic: "y".to_string() })
        );
    }

    #[test]
    fn test_diff_deduplicates() {
        let diff = TopicDiff::new(["x".to_string(), "x".to_string()], Vec::new()).unwrap();

        assert_eq!(diff.added().len(), 1);
    }

    #[test]
    fn test_replace_swaps_snapshot() {
        let store = DeviceStore::new(test::registry());
        let before = store.snapshot();

        let diff = store.replace(DeviceRegistry::default());

        assert_eq!(before.len(), 4);
        assert!(store.snapshot().is_empty());
        assert_eq!(diff.removed(), &before.state_topics());
        assert!(diff.added().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_configuration() {
        let store = DeviceStore::new(test::registry());

        assert!(store.reload("/nonexistent/devices.json").await.is_err());
        assert_eq!(store.snapshot().len(), 4);
    }
}
