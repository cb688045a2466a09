//! Chat history with duplicate suppression.

use crate::domain::ChatHistoryEntry;

#[derive(Clone, Debug)]
pub struct ChatHistory {
    entries: Vec<ChatHistoryEntry>,
    limit: usize,
}

impl ChatHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Restore from storage, keeping only the newest `limit` entries.
    pub fn from_entries(mut entries: Vec<ChatHistoryEntry>, limit: usize) -> Self {
        let limit = limit.max(1);
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Self { entries, limit }
    }

    pub fn entries(&self) -> &[ChatHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append unless identical to the last entry. Returns whether it was kept.
    pub fn append(&mut self, entry: ChatHistoryEntry) -> bool {
        if self.entries.last() == Some(&entry) {
            return false;
        }
        self.entries.push(entry);
        if self.entries.len() > self.limit {
            self.entries.remove(0);
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatEntryKind;

    fn entry(ts: i64, text: &str) -> ChatHistoryEntry {
        ChatHistoryEntry {
            text: Some(text.to_string()),
            kind: ChatEntryKind::Received,
            sender: "Ana".into(),
            timestamp: ts,
            image_url: None,
        }
    }

    #[test]
    fn identical_consecutive_entry_is_dropped() {
        let mut h = ChatHistory::new(10);
        assert!(h.append(entry(1, "hola")));
        assert!(!h.append(entry(1, "hola")));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn same_text_at_different_time_is_kept() {
        let mut h = ChatHistory::new(10);
        assert!(h.append(entry(1, "hola")));
        assert!(h.append(entry(2, "hola")));
        // Only the *last* entry is compared.
        assert!(h.append(entry(1, "hola")));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn history_is_capped_to_newest_entries() {
        let mut h = ChatHistory::new(2);
        h.append(entry(1, "a"));
        h.append(entry(2, "b"));
        h.append(entry(3, "c"));
        let texts: Vec<_> = h.entries().iter().filter_map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["b", "c"]);

        let restored = ChatHistory::from_entries(h.entries().to_vec(), 1);
        assert_eq!(restored.len(), 1);
    }
}
