//! Bounded ring of a pipeline's previous transformed batch sets.

use std::collections::VecDeque;

use elasticetl_core::TransformedBatch;

/// FIFO of prior ticks' batches. Pushing beyond capacity evicts the
/// oldest entry; a zero capacity ring is never populated.
#[derive(Debug, Default)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<Vec<TransformedBatch>>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        HistoryRing {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, batches: Vec<TransformedBatch>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(batches);
    }

    /// Owned copy, oldest first; never aliases internal storage.
    pub fn snapshot(&self) -> Vec<Vec<TransformedBatch>> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use elasticetl_core::{ExtractMetadata, FlatMap};

    fn batch(tag: &str) -> TransformedBatch {
        TransformedBatch {
            timestamp: Utc::now(),
            source: tag.to_string(),
            metadata: ExtractMetadata {
                endpoint_index: 0,
                endpoint: tag.to_string(),
                cluster: "test".into(),
                processed_query: "{}".into(),
                original_query: "{}".into(),
                response_bytes: 2,
            },
            transformed_data: FlatMap::new(),
            csv_headers: None,
            csv_rows: None,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut ring = HistoryRing::new(2);
        ring.push(vec![batch("a")]);
        ring.push(vec![batch("b")]);
        ring.push(vec![batch("c")]);
        assert_eq!(ring.len(), 2);
        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0][0].source, "b");
        assert_eq!(snapshot[1][0].source, "c");
    }

    #[test]
    fn zero_capacity_never_populates() {
        let mut ring = HistoryRing::new(0);
        ring.push(vec![batch("a")]);
        assert!(ring.is_empty());
    }
}
