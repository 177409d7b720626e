//! Tags, queued records and batches.

use crate::LogRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Identifier assigned to a record when it is admitted to the queue.
///
/// Unique among every record that is pending or in flight. Used only for
/// bookkeeping; never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag(pub u64);

impl Tag {
    /// The tag that follows this one.
    pub fn next(self) -> Tag {
        Tag(self.0 + 1)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record together with the time it entered the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    pub record: LogRecord,
    /// Unix timestamp in milliseconds of the first admission. Survives
    /// re-insertion so age-based eviction sees the real age.
    pub enqueued_at: i64,
}

/// An immutable snapshot of queued records, ordered by tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: BTreeMap<Tag, QueuedRecord>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn get(&self, tag: Tag) -> Option<&LogRecord> {
        self.entries.get(&tag).map(|q| &q.record)
    }

    /// Tags in ascending order.
    pub fn tags(&self) -> Vec<Tag> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tag, &QueuedRecord)> {
        self.entries.iter().map(|(tag, q)| (*tag, q))
    }

    /// Split off the records whose tags are not in `acknowledged`.
    ///
    /// Acknowledged tags that are not part of the batch are ignored.
    pub fn without(&self, acknowledged: &HashSet<Tag>) -> Batch {
        self.entries
            .iter()
            .filter(|(tag, _)| !acknowledged.contains(tag))
            .map(|(tag, q)| (*tag, q.clone()))
            .collect()
    }
}

impl FromIterator<(Tag, QueuedRecord)> for Batch {
    fn from_iter<I: IntoIterator<Item = (Tag, QueuedRecord)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = (Tag, QueuedRecord);
    type IntoIter = std::collections::btree_map::IntoIter<Tag, QueuedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(message: &str) -> QueuedRecord {
        QueuedRecord {
            record: LogRecord::from_pairs([("message", json!(message))]),
            enqueued_at: 0,
        }
    }

    #[test]
    fn test_batch_is_ordered_by_tag() {
        let batch: Batch = vec![(Tag(3), queued("c")), (Tag(1), queued("a")), (Tag(2), queued("b"))]
            .into_iter()
            .collect();
        assert_eq!(batch.tags(), vec![Tag(1), Tag(2), Tag(3)]);
    }

    #[test]
    fn test_without_removes_acknowledged_and_ignores_unknown() {
        let batch: Batch = vec![(Tag(1), queued("a")), (Tag(2), queued("b")), (Tag(3), queued("c"))]
            .into_iter()
            .collect();
        let acked: HashSet<Tag> = [Tag(1), Tag(3), Tag(99)].into_iter().collect();

        let unsent = batch.without(&acked);
        assert_eq!(unsent.tags(), vec![Tag(2)]);
        assert_eq!(unsent.get(Tag(2)).and_then(|r| r.message()), Some("b"));
        // the original snapshot is untouched
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_tag_next() {
        assert_eq!(Tag(41).next(), Tag(42));
        assert_eq!(Tag(5).to_string(), "5");
    }
}
