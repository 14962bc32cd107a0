//! Per-run bookkeeping of addresses suspected of SYN scanning.
use super::containers::{Ratio, SuspectEntry};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;

/// Maps an address to its SYN / SYN-ACK counters.
///
/// Both counters accumulate under the address of the suspected prober: SYNs
/// under their source, SYN-ACKs under their destination.
#[derive(Clone, Debug)]
pub struct SuspectTracker<A = IpAddr> {
    entries: HashMap<A, SuspectEntry>,
}

impl<A> Default for SuspectTracker<A> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<A: Eq + Hash + Clone> SuspectTracker<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_syn(&mut self, source: &A) {
        self.entry_for(source).syn_count += 1;
    }

    pub fn record_synack(&mut self, destination: &A) {
        self.entry_for(destination).synack_count += 1;
    }

    /// Drops every entry that no longer satisfies the ratio. Returns how many
    /// entries were removed.
    pub fn prune(&mut self, ratio: Ratio) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_suspicious(ratio));
        before - self.entries.len()
    }

    pub fn get(&self, address: &A) -> Option<&SuspectEntry> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&A, &SuspectEntry)> {
        self.entries.iter()
    }

    fn entry_for(&mut self, address: &A) -> &mut SuspectEntry {
        self.entries.entry(address.clone()).or_default()
    }
}
