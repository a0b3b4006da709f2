//! Topic set diffing used by reconciliation.

use std::collections::BTreeSet;

use crate::types::topic_config::TopicConfig;

/// Start and stop sets that converge the running topics onto a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDiff {
    /// Topics named by the configuration that are not running, in configuration order.
    pub to_start: Vec<String>,
    /// Running topics the configuration no longer names, sorted.
    pub to_stop: Vec<String>,
}

impl TopicDiff {
    /// Compute `desired - running` and `running - desired`.
    ///
    /// Topics present in both sets appear in neither list.
    ///
    /// ```
    /// use nsq_indexer_shared::{TopicConfig, TopicDiff};
    ///
    /// let running = vec!["a".to_string(), "b".to_string()];
    /// let desired = TopicConfig {
    ///     topics: vec!["b".to_string(), "c".to_string()],
    ///     ..Default::default()
    /// };
    ///
    /// let diff = TopicDiff::between(&running, &desired);
    /// assert_eq!(diff.to_start, vec!["c"]);
    /// assert_eq!(diff.to_stop, vec!["a"]);
    /// ```
    pub fn between<'a, I>(running: I, desired: &TopicConfig) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let running: BTreeSet<&str> = running.into_iter().map(String::as_str).collect();
        let wanted = desired.unique_topics();
        let wanted_set: BTreeSet<&str> = wanted.iter().copied().collect();

        let to_start = wanted
            .iter()
            .filter(|topic| !running.contains(*topic))
            .map(|topic| topic.to_string())
            .collect();

        let to_stop = running
            .difference(&wanted_set)
            .map(|topic| topic.to_string())
            .collect();

        Self { to_start, to_stop }
    }

    /// True when applying the diff would not start or stop anything.
    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty()
    }
}
