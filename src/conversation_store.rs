use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Maps a conversation id to the continuation token of its last completed response.
///
/// Reads and writes never fail; an absent binding means the next upstream call
/// starts a fresh exchange.
pub trait ConversationStore: Send + Sync {
    fn get(&self, conversation_id: &str) -> Option<String>;

    /// Overwrites any previous binding for `conversation_id`.
    fn set(&self, conversation_id: &str, token: String);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded process-lifetime store. Bindings are never evicted.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    bindings: DashMap<String, String>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn get(&self, conversation_id: &str) -> Option<String> {
        self.bindings.get(conversation_id).map(|t| t.value().clone())
    }

    fn set(&self, conversation_id: &str, token: String) {
        self.bindings.insert(conversation_id.to_string(), token);
    }

    fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// The write-order queue is compacted once it exceeds twice the larger of
/// this and the live binding count.
const COMPACT_FLOOR: usize = 64;

#[derive(Debug)]
struct Binding {
    token: String,
    written_at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct BoundedState {
    bindings: HashMap<String, Binding>,
    // oldest write first; an entry is stale once its binding is rewritten or removed
    order: VecDeque<(String, u64)>,
    next_generation: u64,
}

impl BoundedState {
    fn forget(&mut self, conversation_id: &str) {
        self.bindings.remove(conversation_id);
    }

    fn is_current(&self, conversation_id: &str, generation: u64) -> bool {
        self.bindings
            .get(conversation_id)
            .is_some_and(|b| b.generation == generation)
    }

    fn compact(&mut self) {
        let bindings = &self.bindings;
        self.order.retain(|(id, generation)| {
            bindings
                .get(id)
                .is_some_and(|b| b.generation == *generation)
        });
    }
}

/// Store with a capacity limit and an optional time-to-live.
///
/// When a write pushes the store over capacity the binding written longest ago
/// is dropped. A binding older than the TTL reads as absent.
#[derive(Debug)]
pub struct BoundedConversationStore {
    capacity: usize,
    ttl: Option<Duration>,
    state: Mutex<BoundedState>,
}

impl BoundedConversationStore {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        assert!(capacity > 0, "store capacity must be non-zero");
        Self {
            capacity,
            ttl,
            state: Mutex::new(BoundedState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_expired(&self, binding: &Binding, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(binding.written_at) >= ttl,
            None => false,
        }
    }
}

impl ConversationStore for BoundedConversationStore {
    fn get(&self, conversation_id: &str) -> Option<String> {
        let mut state = self.state.lock();
        let now = Instant::now();
        match state.bindings.get(conversation_id) {
            Some(binding) if !self.is_expired(binding, now) => {
                return Some(binding.token.clone());
            }
            Some(_) => {}
            None => return None,
        }
        log::debug!("Conversation {} expired", conversation_id);
        state.forget(conversation_id);
        None
    }

    fn set(&self, conversation_id: &str, token: String) {
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.bindings.insert(
            conversation_id.to_string(),
            Binding {
                token,
                written_at: Instant::now(),
                generation,
            },
        );
        state
            .order
            .push_back((conversation_id.to_string(), generation));

        while state.bindings.len() > self.capacity {
            let Some((oldest, generation)) = state.order.pop_front() else {
                break;
            };
            if state.is_current(&oldest, generation) {
                log::debug!("Evicting conversation {}", oldest);
                state.bindings.remove(&oldest);
            }
        }

        if state.order.len() > 2 * state.bindings.len().max(COMPACT_FLOOR) {
            state.compact();
        }
    }

    fn len(&self) -> usize {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .bindings
            .values()
            .filter(|b| !self.is_expired(b, now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONV: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn test_memory_store_absent_then_set() {
        let store = MemoryConversationStore::new();
        assert_eq!(store.get(CONV), None);
        assert!(store.is_empty());

        store.set(CONV, "resp_1".to_string());
        assert_eq!(store.get(CONV).as_deref(), Some("resp_1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_last_writer_wins() {
        let store = MemoryConversationStore::new();
        store.set(CONV, "resp_1".to_string());
        store.set(CONV, "resp_2".to_string());
        assert_eq!(store.get(CONV).as_deref(), Some("resp_2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_keys_are_independent() {
        let store = MemoryConversationStore::new();
        store.set("a", "resp_a".to_string());
        store.set("b", "resp_b".to_string());
        assert_eq!(store.get("a").as_deref(), Some("resp_a"));
        assert_eq!(store.get("b").as_deref(), Some("resp_b"));
        assert_eq!(store.get("c"), None);
    }

    #[test]
    fn test_bounded_store_evicts_oldest() {
        let store = BoundedConversationStore::new(2, None);
        store.set("a", "1".to_string());
        store.set("b", "2".to_string());
        store.set("c", "3".to_string());

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b").as_deref(), Some("2"));
        assert_eq!(store.get("c").as_deref(), Some("3"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_bounded_store_rewrite_refreshes_position() {
        let store = BoundedConversationStore::new(2, None);
        store.set("a", "1".to_string());
        store.set("b", "2".to_string());
        store.set("a", "1b".to_string());
        store.set("c", "3".to_string());

        assert_eq!(store.get("a").as_deref(), Some("1b"));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_bounded_store_repeated_rewrites_stay_bounded() {
        let store = BoundedConversationStore::new(2, None);
        store.set("b", "b".to_string());
        for turn in 0..1000 {
            store.set("a", format!("a{}", turn));
        }
        assert!(store.state.lock().order.len() <= 2 * COMPACT_FLOOR);
        assert_eq!(store.len(), 2);

        store.set("c", "c".to_string());
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("a").as_deref(), Some("a999"));
        assert_eq!(store.get("c").as_deref(), Some("c"));
    }

    #[test]
    fn test_bounded_store_ttl_expiry() {
        let store = BoundedConversationStore::new(8, Some(Duration::from_millis(20)));
        store.set(CONV, "resp_1".to_string());
        assert_eq!(store.get(CONV).as_deref(), Some("resp_1"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get(CONV), None);
        assert!(store.is_empty());
    }

    #[test]
    #[should_panic(expected = "store capacity must be non-zero")]
    fn test_bounded_store_rejects_zero_capacity() {
        let _ = BoundedConversationStore::new(0, None);
    }
}
