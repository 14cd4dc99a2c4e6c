use super::{render_entries, Author, ConversationHistory, DEFAULT_MAX_MESSAGES};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Eviction limits for [`BoundedHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Messages kept per conversation; older ones are dropped first.
    pub max_messages: usize,
    /// Conversations kept in memory; the least recently used is dropped.
    pub max_conversations: usize,
    /// Entries older than this are dropped on access.
    pub ttl: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_conversations: 10_000,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct Entry {
    author: Author,
    text: String,
    at: Instant,
}

/// In-process history: an LRU of conversations, each a ring buffer.
pub struct BoundedHistory {
    limits: HistoryLimits,
    conversations: Mutex<LruCache<String, VecDeque<Entry>>>,
}

impl BoundedHistory {
    pub fn new(limits: HistoryLimits) -> Result<Self> {
        if limits.max_messages == 0 {
            return Err(AppError::Configuration(
                "history max_messages must be at least 1".to_string(),
            ));
        }
        let capacity = NonZeroUsize::new(limits.max_conversations).ok_or_else(|| {
            AppError::Configuration("history max_conversations must be at least 1".to_string())
        })?;
        Ok(Self {
            limits,
            conversations: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Number of conversations currently held.
    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, entries: &mut VecDeque<Entry>) {
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|e| now.duration_since(e.at) > self.limits.ttl)
        {
            entries.pop_front();
        }
    }
}

impl Default for BoundedHistory {
    fn default() -> Self {
        let limits = HistoryLimits::default();
        Self {
            limits,
            conversations: Mutex::new(LruCache::new(
                NonZeroUsize::new(limits.max_conversations).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }
}

#[async_trait]
impl ConversationHistory for BoundedHistory {
    async fn render(&self, key: &str) -> Result<String> {
        let mut conversations = self.conversations.lock();
        let Some(entries) = conversations.get_mut(key) else {
            return Ok(String::new());
        };
        self.expire(entries);
        if entries.is_empty() {
            conversations.pop(key);
            return Ok(String::new());
        }
        Ok(render_entries(
            entries.iter().map(|e| (e.author, e.text.as_str())),
        ))
    }

    async fn append(&self, key: &str, author: Author, text: &str) -> Result<()> {
        let mut conversations = self.conversations.lock();
        if !conversations.contains(key) {
            conversations.put(key.to_string(), VecDeque::new());
        }
        if let Some(entries) = conversations.get_mut(key) {
            self.expire(entries);
            entries.push_back(Entry {
                author,
                text: text.to_string(),
                at: Instant::now(),
            });
            while entries.len() > self.limits.max_messages {
                entries.pop_front();
            }
        }
        tracing::trace!(conversation = key, author = author.label(), "History appended");
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.conversations.lock().pop(key);
        Ok(())
    }
}
