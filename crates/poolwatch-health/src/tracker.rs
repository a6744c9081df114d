use std::collections::HashMap;

/// What the maintenance phase does with one tracked endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistAction {
    /// Last probe succeeded: make sure the endpoint is not blacklisted
    Remove,
    /// Failure count reached the threshold: make sure it is blacklisted
    Add,
    /// Failing, but below the threshold: leave membership as it is
    Keep,
}

/// Consecutive-failure counts per endpoint name
///
/// A missing entry means zero. Entries are created by the first probe of an
/// endpoint and only disappear through `retain`.
#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: HashMap<String, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, name: &str) {
        self.counts.insert(name.to_string(), 0);
    }

    /// Returns the new consecutive-failure count
    pub fn record_failure(&mut self, name: &str) -> u32 {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn count(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.counts.contains_key(name)
    }

    /// Drop entries whose name fails `keep`, returning the dropped names sorted
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut pruned: Vec<String> = self
            .counts
            .keys()
            .filter(|name| !keep(name))
            .cloned()
            .collect();
        pruned.sort();
        for name in &pruned {
            self.counts.remove(name);
        }
        pruned
    }

    /// Blacklist action for every tracked endpoint, sorted by name
    pub fn decisions(&self, threshold: u32) -> Vec<(String, u32, BlacklistAction)> {
        let mut decisions: Vec<_> = self
            .counts
            .iter()
            .map(|(name, &count)| (name.clone(), count, action_for(count, threshold)))
            .collect();
        decisions.sort_by(|a, b| a.0.cmp(&b.0));
        decisions
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

fn action_for(count: u32, threshold: u32) -> BlacklistAction {
    if count == 0 {
        BlacklistAction::Remove
    } else if count >= threshold {
        BlacklistAction::Add
    } else {
        BlacklistAction::Keep
    }
}
