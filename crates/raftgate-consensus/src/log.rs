//! In-memory committed log with prefix compaction.

use bytes::Bytes;
use std::collections::VecDeque;

/// One committed entry.
#[derive(Debug, Clone)]
pub(crate) struct LogRecord {
    pub(crate) index: u64,
    pub(crate) owner_id: u64,
    pub(crate) sequence: u64,
    pub(crate) entry: Bytes,
}

/// Committed entries with contiguous indices starting at `first_index`.
#[derive(Debug)]
pub(crate) struct Log {
    entries: VecDeque<LogRecord>,
    first_index: u64,
}

impl Log {
    /// Creates an empty log whose next entry gets index `after + 1`.
    pub(crate) fn new(after: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            first_index: after + 1,
        }
    }

    pub(crate) fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Index of the last entry, or `first_index - 1` when empty.
    pub(crate) fn last_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64 - 1
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn append(&mut self, owner_id: u64, sequence: u64, entry: Bytes) -> u64 {
        let index = self.last_index() + 1;
        self.entries.push_back(LogRecord {
            index,
            owner_id,
            sequence,
            entry,
        });
        index
    }

    /// Entries from `index` onward, or `None` if some were compacted away.
    pub(crate) fn entries_from(&self, index: u64) -> Option<impl Iterator<Item = &LogRecord>> {
        if index < self.first_index {
            return None;
        }
        let skip = (index - self.first_index) as usize;
        Some(self.entries.iter().skip(skip))
    }

    /// Drops every entry with an index up to and including `through`.
    pub(crate) fn compact(&mut self, through: u64) -> usize {
        let mut removed = 0;
        while self
            .entries
            .front()
            .is_some_and(|record| record.index <= through)
        {
            self.entries.pop_front();
            self.first_index += 1;
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: u64) -> Log {
        let mut log = Log::new(0);
        for i in 0..n {
            log.append(7, i + 1, Bytes::from(format!("POST /{}", i)));
        }
        log
    }

    #[test]
    fn test_indices_are_contiguous() {
        let log = filled(3);
        assert_eq!(log.first_index(), 1);
        assert_eq!(log.last_index(), 3);

        let indices: Vec<_> = log.entries_from(2).unwrap().map(|r| r.index).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(log.entries_from(4).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_log_after_snapshot() {
        let mut log = Log::new(10);
        assert_eq!(log.first_index(), 11);
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.append(0, 0, Bytes::from_static(b"POST /a")), 11);
    }

    #[test]
    fn test_compaction() {
        let mut log = filled(10);
        assert_eq!(log.compact(6), 6);
        assert_eq!(log.first_index(), 7);
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.len(), 4);
        assert!(log.entries_from(5).is_none());
        assert_eq!(log.entries_from(7).unwrap().count(), 4);

        // compacting below the first index is a no-op
        assert_eq!(log.compact(3), 0);
        assert_eq!(log.append(0, 0, Bytes::from_static(b"POST /a")), 11);
    }
}
