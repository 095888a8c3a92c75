//! Per-rule match counters.
//!
//! The key set is fixed when the counters are built from the compiled rules,
//! so the map itself is never mutated and increments are plain atomic adds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::rules::RuleSet;

/// Lock-free match counters keyed by rule name.
///
/// Rule sets sharing a name share a counter.
#[derive(Debug)]
pub struct MatchCounters {
    slots: Vec<(String, AtomicU64)>,
    by_name: HashMap<String, usize>,
    slot_of_rule: Vec<usize>,
}

impl MatchCounters {
    /// Builds one counter per distinct rule name.
    #[must_use]
    pub fn for_rules(rules: &[RuleSet]) -> Self {
        let mut slots: Vec<(String, AtomicU64)> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut slot_of_rule = Vec::with_capacity(rules.len());

        for rule in rules {
            let slot = *by_name.entry(rule.name.clone()).or_insert_with(|| {
                slots.push((rule.name.clone(), AtomicU64::new(0)));
                slots.len() - 1
            });
            slot_of_rule.push(slot);
        }

        Self {
            slots,
            by_name,
            slot_of_rule,
        }
    }

    /// Records a match of the rule at `rule_index` (declaration order).
    pub fn record_index(&self, rule_index: usize) {
        if let Some(&slot) = self.slot_of_rule.get(rule_index) {
            self.slots[slot].1.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a match by rule name. Unknown names are ignored.
    pub fn record(&self, name: &str) {
        if let Some(&slot) = self.by_name.get(name) {
            self.slots[slot].1.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current count for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.by_name
            .get(name)
            .map(|&slot| self.slots[slot].1.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every counter, in first-declaration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.slots
            .iter()
            .map(|(name, count)| (name.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }
}
