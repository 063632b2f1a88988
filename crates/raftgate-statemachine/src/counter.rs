//! In-memory counter state machine.

use crate::command::{Command, Operation, ReadQuery};
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::traits::{ApplyOutcome, StateMachine, StateMachineFactory};
use crate::{Result, StateMachineError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How `apply` treats a verb that is neither an increment nor a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownVerbPolicy {
    /// Fail with [`StateMachineError::InvalidEntrySyntax`].
    #[default]
    Reject,
    /// Treat the entry as an increment.
    Increment,
}

/// Map of counters keyed by `"<cluster_id>:<node_id>:<key>"`.
///
/// Missing keys read as zero. Increments saturate at `u64::MAX`.
#[derive(Debug)]
pub struct CounterStateMachine {
    data: RwLock<BTreeMap<String, u64>>,
    key_prefix: String,
    unknown_verbs: UnknownVerbPolicy,
    closed: AtomicBool,
}

impl CounterStateMachine {
    /// Creates an empty counter for the given replica.
    pub fn new(cluster_id: u64, node_id: u64) -> Self {
        Self::with_policy(cluster_id, node_id, UnknownVerbPolicy::default())
    }

    /// Creates an empty counter with an explicit unknown-verb policy.
    pub fn with_policy(cluster_id: u64, node_id: u64, unknown_verbs: UnknownVerbPolicy) -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            key_prefix: format!("{}:{}:", cluster_id, node_id),
            unknown_verbs,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a factory building one counter per replica.
    pub fn factory() -> StateMachineFactory {
        Self::factory_with_policy(UnknownVerbPolicy::default())
    }

    /// Returns a factory building counters with the given policy.
    pub fn factory_with_policy(policy: UnknownVerbPolicy) -> StateMachineFactory {
        Arc::new(move |cluster_id, node_id| {
            Box::new(Self::with_policy(cluster_id, node_id, policy)) as Box<dyn StateMachine>
        })
    }

    /// Namespace prepended to every key of this replica.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Current value of `key`, zero when absent.
    pub fn get(&self, key: &str) -> u64 {
        self.data
            .read()
            .get(&self.namespaced(key))
            .copied()
            .unwrap_or(0)
    }

    /// Number of non-zero counters.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no counter is set.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StateMachineError::Closed);
        }
        Ok(())
    }
}

impl StateMachine for CounterStateMachine {
    fn query(&self, query: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let query = ReadQuery::decode(query)?;
        Ok(self.get(&query.key).to_string().into_bytes())
    }

    fn apply(&self, entry: &[u8]) -> Result<ApplyOutcome> {
        self.ensure_open()?;
        let command = Command::decode(entry)?;

        let delete = match command.verb.operation() {
            Operation::Delete => true,
            Operation::Increment => false,
            Operation::Unknown => match self.unknown_verbs {
                UnknownVerbPolicy::Increment => false,
                UnknownVerbPolicy::Reject => {
                    return Err(StateMachineError::InvalidEntrySyntax(format!(
                        "unknown verb {:?}",
                        command.verb.as_str()
                    )));
                }
            },
        };

        let key = self.namespaced(&command.key);
        let mut data = self.data.write();
        if delete {
            data.remove(&key);
        } else {
            let counter = data.entry(key).or_insert(0);
            *counter = counter.saturating_add(1);
        }

        tracing::trace!(verb = %command.verb, key = %command.key, "applied entry");
        Ok(ApplyOutcome)
    }

    fn save_snapshot(&self, sink: &mut dyn Write, stop: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        let data = self.data.read();
        let records = data.iter().map(|(key, value)| {
            (
                key.strip_prefix(self.key_prefix.as_str())
                    .unwrap_or(key.as_str()),
                *value,
            )
        });
        write_snapshot(sink, stop, data.len(), records)?;

        tracing::debug!(prefix = %self.key_prefix, entries = data.len(), "saved snapshot");
        Ok(())
    }

    fn restore_from_snapshot(
        &self,
        source: &mut dyn Read,
        stop: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        let restored: BTreeMap<String, u64> = read_snapshot(source, stop)?
            .into_iter()
            .map(|(key, value)| (self.namespaced(&key), value))
            .collect();

        let entries = restored.len();
        *self.data.write() = restored;

        tracing::debug!(prefix = %self.key_prefix, entries, "restored snapshot");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(prefix = %self.key_prefix, "closed state machine");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Verb;

    fn entry(verb: &str, key: &str) -> Vec<u8> {
        Command::new(Verb::parse(verb), key).unwrap().encode()
    }

    fn read(sm: &CounterStateMachine, key: &str) -> String {
        let bytes = sm.query(&ReadQuery::new(key).unwrap().encode()).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    fn snapshot_bytes(sm: &CounterStateMachine) -> Vec<u8> {
        let mut buf = Vec::new();
        sm.save_snapshot(&mut buf, &CancellationToken::new()).unwrap();
        buf
    }

    #[test]
    fn test_missing_key_reads_zero() {
        let sm = CounterStateMachine::new(1, 1);
        assert_eq!(read(&sm, "/never/written"), "0");
        assert!(sm.is_empty());
    }

    #[test]
    fn test_increment_verbs() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(&entry("POST", "/a")).unwrap();
        sm.apply(&entry("PUT", "/a")).unwrap();
        sm.apply(&entry("PATCH", "/a")).unwrap();
        assert_eq!(read(&sm, "/a"), "3");
        assert_eq!(sm.get("/a"), 3);
    }

    #[test]
    fn test_body_is_ignored() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(b"POST /a\n{\"anything\": true}").unwrap();
        assert_eq!(read(&sm, "/a"), "1");
    }

    #[test]
    fn test_delete_reads_as_never_written() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(&entry("POST", "/a")).unwrap();
        sm.apply(&entry("DELETE", "/a")).unwrap();
        assert_eq!(read(&sm, "/a"), "0");
        assert!(sm.is_empty());

        // deleting a missing key is fine
        sm.apply(&entry("DELETE", "/missing")).unwrap();
    }

    #[test]
    fn test_write_sequence_scenario() {
        let sm = CounterStateMachine::new(1, 1);
        for verb in ["POST", "POST", "DELETE", "POST"] {
            sm.apply(&entry(verb, "/a")).unwrap();
        }
        assert_eq!(read(&sm, "/a"), "1");
    }

    #[test]
    fn test_malformed_entry_leaves_state_unchanged() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(&entry("POST", "/a")).unwrap();
        let before = snapshot_bytes(&sm);

        let err = sm.apply(b"BADVERB").unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidEntrySyntax(_)));
        assert_eq!(snapshot_bytes(&sm), before);
    }

    #[test]
    fn test_empty_query_is_an_error() {
        let sm = CounterStateMachine::new(1, 1);
        let err = sm.query(b"").unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidQuerySyntax(_)));
    }

    #[test]
    fn test_unknown_verb_policy() {
        let strict = CounterStateMachine::new(1, 1);
        let err = strict.apply(b"PURGE /a").unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidEntrySyntax(_)));
        assert_eq!(read(&strict, "/a"), "0");

        let permissive = CounterStateMachine::with_policy(1, 1, UnknownVerbPolicy::Increment);
        permissive.apply(b"PURGE /a").unwrap();
        assert_eq!(read(&permissive, "/a"), "1");
    }

    #[test]
    fn test_keys_are_namespaced() {
        let sm = CounterStateMachine::new(7, 3);
        assert_eq!(sm.key_prefix(), "7:3:");
        sm.apply(&entry("POST", "/a")).unwrap();
        assert!(sm.data.read().contains_key("7:3:/a"));
    }

    #[test]
    fn test_increment_saturates() {
        let sm = CounterStateMachine::new(1, 1);
        sm.data.write().insert("1:1:/max".into(), u64::MAX);
        sm.apply(&entry("POST", "/max")).unwrap();
        assert_eq!(sm.get("/max"), u64::MAX);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let sm = CounterStateMachine::new(1, 1);
        for key in ["/a", "/b", "/b", "/c/d", "/c/d", "/c/d"] {
            sm.apply(&entry("POST", key)).unwrap();
        }
        let snapshot = snapshot_bytes(&sm);

        let restored = CounterStateMachine::new(1, 1);
        restored
            .restore_from_snapshot(&mut &snapshot[..], &CancellationToken::new())
            .unwrap();

        assert_eq!(*restored.data.read(), *sm.data.read());
        assert_eq!(snapshot_bytes(&restored), snapshot);
    }

    #[test]
    fn test_snapshot_transfers_across_replicas() {
        let leader = CounterStateMachine::new(1, 1);
        leader.apply(&entry("POST", "/a")).unwrap();
        let snapshot = snapshot_bytes(&leader);

        let follower = CounterStateMachine::new(1, 2);
        follower.apply(&entry("POST", "/stale")).unwrap();
        follower
            .restore_from_snapshot(&mut &snapshot[..], &CancellationToken::new())
            .unwrap();

        assert_eq!(read(&follower, "/a"), "1");
        assert_eq!(read(&follower, "/stale"), "0");
        assert!(follower.data.read().contains_key("1:2:/a"));
    }

    #[test]
    fn test_corrupt_restore_leaves_state_unchanged() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(&entry("POST", "/a")).unwrap();

        let err = sm
            .restore_from_snapshot(&mut &b"garbage"[..], &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_snapshot_failure());
        assert_eq!(read(&sm, "/a"), "1");
    }

    #[test]
    fn test_save_snapshot_honours_stop() {
        let sm = CounterStateMachine::new(1, 1);
        sm.apply(&entry("POST", "/a")).unwrap();

        let stop = CancellationToken::new();
        stop.cancel();
        let err = sm.save_snapshot(&mut Vec::new(), &stop).unwrap_err();
        assert!(matches!(err, StateMachineError::SnapshotStopped));
    }

    #[test]
    fn test_close_is_idempotent() {
        let sm = CounterStateMachine::new(1, 1);
        sm.close().unwrap();
        sm.close().unwrap();

        assert!(matches!(
            sm.apply(&entry("POST", "/a")),
            Err(StateMachineError::Closed)
        ));
        assert!(matches!(
            sm.query(b"GET /a"),
            Err(StateMachineError::Closed)
        ));
    }

    #[test]
    fn test_factory_builds_independent_replicas() {
        let factory = CounterStateMachine::factory();
        let a = factory(1, 1);
        let b = factory(1, 2);

        a.apply(&entry("POST", "/a")).unwrap();
        assert_eq!(a.query(b"GET /a").unwrap(), b"1");
        assert_eq!(b.query(b"GET /a").unwrap(), b"0");
    }

    /// Decodes a snapshot, checking the announced count against the records.
    fn decode_consistent(bytes: &[u8]) -> BTreeMap<String, u64> {
        let text = std::str::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        let header: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        let records: Vec<serde_json::Value> = lines
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(header["entries"].as_u64().unwrap(), records.len() as u64);

        records
            .iter()
            .map(|r| {
                (
                    r["key"].as_str().unwrap().to_string(),
                    r["value"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_snapshot_is_not_interleaved_with_apply() {
        const WRITES: u64 = 4_000;
        let sm = Arc::new(CounterStateMachine::new(1, 1));

        let writer = {
            let sm = sm.clone();
            std::thread::spawn(move || {
                for i in 0..WRITES {
                    sm.apply(&entry("POST", &format!("/k{}", i % 8))).unwrap();
                }
            })
        };

        let mut previous: BTreeMap<String, u64> = BTreeMap::new();
        let mut previous_total = 0;
        while !writer.is_finished() {
            let snapshot = decode_consistent(&snapshot_bytes(&sm));
            for (key, value) in &previous {
                assert!(snapshot.get(key).copied().unwrap_or(0) >= *value, "{} went back", key);
            }

            // keys are written round robin, so a whole snapshot is never
            // more than one increment apart between keys
            let max = snapshot.values().copied().max().unwrap_or(0);
            let min = snapshot.values().copied().min().unwrap_or(0);
            assert!(max - min <= 1, "torn snapshot: {:?}", snapshot);
            if snapshot.len() < 8 {
                assert!(max <= 1);
            }

            let total: u64 = snapshot.values().sum();
            assert!(total >= previous_total);
            previous_total = total;
            previous = snapshot;
        }
        writer.join().unwrap();

        let last = decode_consistent(&snapshot_bytes(&sm));
        assert_eq!(last.values().sum::<u64>(), WRITES);
    }
}
