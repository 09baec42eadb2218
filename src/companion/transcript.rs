//! Bounded conversation log shown next to the avatar.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Avatar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Utc>,
}

/// FIFO log that keeps the most recent `capacity` entries.
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    capacity: usize,
    entries: VecDeque<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TranscriptEntry {
            text: text.into(),
            speaker,
            timestamp: Utc::now(),
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let mut log = TranscriptLog::new(11);
        for i in 0..25 {
            log.push(Speaker::User, format!("mensaje {}", i));
            assert!(log.len() <= 11);
        }
        assert_eq!(log.len(), 11);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut log = TranscriptLog::new(3);
        log.push(Speaker::User, "a");
        log.push(Speaker::Avatar, "b");
        log.push(Speaker::User, "c");
        log.push(Speaker::Avatar, "d");

        let texts: Vec<String> = log.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["b", "c", "d"]);
        assert_eq!(log.entries()[0].speaker, Speaker::Avatar);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = TranscriptLog::new(0);
        log.push(Speaker::User, "x");
        log.push(Speaker::User, "y");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_speaker_serialization() {
        assert_eq!(serde_json::to_string(&Speaker::Avatar).unwrap(), "\"avatar\"");
    }
}
