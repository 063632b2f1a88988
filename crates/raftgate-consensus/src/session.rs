//! Client sessions used to deduplicate retried proposals.
//!
//! A session binds a write series to an owner ID. Every proposal carries
//! the session's `(owner_id, sequence)` pair, and the engine applies a given
//! pair at most once. The no-op session opts out of deduplication and can be
//! shared freely between concurrent writers.

use std::collections::HashMap;

/// Owner ID reserved for the no-op session.
pub const NOOP_OWNER_ID: u64 = 0;

/// Sequence number of the first proposal of a tracked session.
pub const FIRST_SEQUENCE: u64 = 1;

/// A proposal session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    cluster_id: u64,
    owner_id: u64,
    sequence: u64,
}

impl Session {
    /// Creates the no-op session for a cluster.
    pub fn noop(cluster_id: u64) -> Self {
        Self {
            cluster_id,
            owner_id: NOOP_OWNER_ID,
            sequence: 0,
        }
    }

    pub(crate) fn tracked(cluster_id: u64, owner_id: u64) -> Self {
        Self {
            cluster_id,
            owner_id,
            sequence: FIRST_SEQUENCE,
        }
    }

    /// Cluster the session belongs to.
    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    /// Owner of the write series.
    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    /// Sequence number the next proposal will carry.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns true for the no-op session.
    pub fn is_noop(&self) -> bool {
        self.owner_id == NOOP_OWNER_ID
    }

    /// Advances to the next sequence number.
    ///
    /// Call after a proposal completed successfully. Retrying a failed or
    /// timed out proposal without advancing keeps it deduplicated.
    pub fn proposal_completed(&mut self) {
        if !self.is_noop() {
            self.sequence += 1;
        }
    }
}

/// Outcome of checking a proposal against the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dedup {
    /// Not seen before, apply it.
    Fresh,
    /// Already applied, answer from the table.
    Duplicate,
    /// Owner not registered.
    Unknown,
}

/// Highest applied sequence number per registered owner.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    applied: HashMap<u64, u64>,
}

impl SessionTable {
    /// Registers a new owner with a random, unused ID.
    pub(crate) fn register(&mut self) -> u64 {
        loop {
            let owner_id = rand::random::<u64>();
            if owner_id != NOOP_OWNER_ID && !self.applied.contains_key(&owner_id) {
                self.applied.insert(owner_id, FIRST_SEQUENCE - 1);
                return owner_id;
            }
        }
    }

    /// Releases an owner. Returns false if it was not registered.
    pub(crate) fn close(&mut self, owner_id: u64) -> bool {
        self.applied.remove(&owner_id).is_some()
    }

    pub(crate) fn check(&self, owner_id: u64, sequence: u64) -> Dedup {
        match self.applied.get(&owner_id) {
            None => Dedup::Unknown,
            Some(&last) if sequence <= last => Dedup::Duplicate,
            Some(_) => Dedup::Fresh,
        }
    }

    pub(crate) fn record(&mut self, owner_id: u64, sequence: u64) {
        if let Some(last) = self.applied.get_mut(&owner_id) {
            *last = (*last).max(sequence);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.applied.len()
    }
}
