//! Server-side write-log: per-path sequences of buffered writes.
//!
//! Buffered WRITEs append in arrival order; COMMIT sorts by offset (stable,
//! so arrival order survives ties) and coalesces overlapping or adjacent
//! records into the minimum set of disjoint intervals, the later arrival
//! winning on overlapped bytes. Records leave the log only on a fully
//! successful flush or when the process dies with them.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl WriteRecord {
    pub fn new(offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }

    /// One past the last byte this record covers.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct WriteLog {
    entries: Mutex<HashMap<String, Vec<WriteRecord>>>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffered write for `path` in arrival order.
    pub fn append(&self, path: &str, record: WriteRecord) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(path.to_string()).or_default().push(record);
    }

    /// Clone the pending records for `path` (empty when none). The entry
    /// stays in the log until `clear` confirms a successful flush.
    pub fn snapshot(&self, path: &str) -> Vec<WriteRecord> {
        let entries = self.entries.lock().unwrap();
        entries.get(path).cloned().unwrap_or_default()
    }

    /// Number of pending records for `path`.
    pub fn pending(&self, path: &str) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.get(path).map(|v| v.len()).unwrap_or(0)
    }

    /// Drop the entry for `path` after a successful flush.
    pub fn clear(&self, path: &str) {
        self.entries.lock().unwrap().remove(path);
    }
}

/// Reduce a record list to disjoint intervals.
///
/// `b` folds into `a` when `b.offset <= a.end()`; the merged record spans
/// `a.offset .. max(a.end, b.end)` with `b`'s bytes overwriting the overlap.
pub fn coalesce(mut records: Vec<WriteRecord>) -> Vec<WriteRecord> {
    records.sort_by_key(|r| r.offset);

    let mut merged: Vec<WriteRecord> = Vec::with_capacity(records.len());
    for record in records {
        match merged.last_mut() {
            Some(current) if record.offset <= current.end() => {
                let end = current.end().max(record.end());
                current.data.resize((end - current.offset) as usize, 0);
                let overlap_start = (record.offset - current.offset) as usize;
                current.data[overlap_start..overlap_start + record.data.len()]
                    .copy_from_slice(&record.data);
            }
            _ => merged.push(record),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disjoint_records_stay_separate() {
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(10, *b"BBBB"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], WriteRecord::new(0, *b"AAAA"));
        assert_eq!(merged[1], WriteRecord::new(10, *b"BBBB"));
    }

    #[test]
    fn test_adjacent_records_coalesce() {
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(4, *b"BBBB"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"AAAABBBB")]);
    }

    #[test]
    fn test_later_record_wins_on_overlap() {
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(2, *b"XX"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"AAXX")]);
    }

    #[test]
    fn test_contained_record_overwrites_window() {
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAAAAAA"),
            WriteRecord::new(2, *b"XX"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"AAXXAAAA")]);
    }

    #[test]
    fn test_overlap_extending_past_end() {
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(3, *b"BBBB"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"AAABBBB")]);
    }

    #[test]
    fn test_equal_offsets_keep_arrival_order() {
        // Stable sort: the later arrival overwrites the earlier one.
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(0, *b"BB"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"BBAA")]);
    }

    #[test]
    fn test_unsorted_arrivals_merge_by_offset() {
        let merged = coalesce(vec![
            WriteRecord::new(8, *b"CC"),
            WriteRecord::new(0, *b"AAAA"),
            WriteRecord::new(4, *b"BBBB"),
        ]);
        assert_eq!(merged, vec![WriteRecord::new(0, *b"AAAABBBBCC")]);
    }

    #[test]
    fn test_merge_window_bytes() {
        // For every position in the merged interval: b's bytes inside b's
        // window, a's bytes elsewhere.
        let merged = coalesce(vec![
            WriteRecord::new(0, *b"aaaaaaaa"),
            WriteRecord::new(3, *b"bbb"),
        ]);
        let record = &merged[0];
        for (i, byte) in record.data.iter().enumerate() {
            let expect = if (3..6).contains(&i) { b'b' } else { b'a' };
            assert_eq!(*byte, expect, "byte {}", i);
        }
    }

    #[test]
    fn test_log_snapshot_and_clear() {
        let log = WriteLog::new();
        log.append("/f", WriteRecord::new(0, *b"AAAA"));
        log.append("/f", WriteRecord::new(4, *b"BBBB"));
        assert_eq!(log.pending("/f"), 2);

        let records = log.snapshot("/f");
        assert_eq!(records.len(), 2);
        // snapshot leaves the entry in place
        assert_eq!(log.pending("/f"), 2);

        log.clear("/f");
        assert_eq!(log.pending("/f"), 0);
        assert!(log.snapshot("/f").is_empty());
    }

    #[test]
    fn test_log_paths_are_independent() {
        let log = WriteLog::new();
        log.append("/a", WriteRecord::new(0, *b"A"));
        log.append("/b", WriteRecord::new(0, *b"B"));
        log.clear("/a");
        assert_eq!(log.pending("/a"), 0);
        assert_eq!(log.pending("/b"), 1);
    }
}
