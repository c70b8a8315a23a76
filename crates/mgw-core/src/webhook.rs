use std::sync::RwLock;

/// Single-slot destination for relayed inbound messages.
///
/// Last write wins; there is no history.
pub trait WebhookStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, url: String);
}

#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    url: RwLock<Option<String>>,
}

impl InMemoryWebhookStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            url: RwLock::new(initial),
        }
    }
}

impl WebhookStore for InMemoryWebhookStore {
    fn get(&self) -> Option<String> {
        self.url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, url: String) {
        *self
            .url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_empty_unless_seeded() {
        assert_eq!(InMemoryWebhookStore::default().get(), None);
        let seeded = InMemoryWebhookStore::new(Some("http://a.test/hook".into()));
        assert_eq!(seeded.get().as_deref(), Some("http://a.test/hook"));
    }

    #[test]
    fn repeated_identical_sets_are_idempotent() {
        let store = InMemoryWebhookStore::default();
        store.set("http://a.test/hook".into());
        store.set("http://a.test/hook".into());
        assert_eq!(store.get().as_deref(), Some("http://a.test/hook"));
    }

    #[test]
    fn last_write_wins() {
        let store = InMemoryWebhookStore::default();
        store.set("http://a.test/1".into());
        store.set("http://a.test/2".into());
        assert_eq!(store.get().as_deref(), Some("http://a.test/2"));
    }

    #[test]
    fn concurrent_writers_leave_one_complete_value() {
        let store = Arc::new(InMemoryWebhookStore::default());
        let candidates: Vec<String> = (0..16).map(|i| format!("http://w{i}.test/hook")).collect();

        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|url| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.set(url.clone());
                        let seen = store.get().unwrap();
                        assert!(seen.starts_with("http://w") && seen.ends_with(".test/hook"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let last = store.get().unwrap();
        assert!(candidates.contains(&last));
    }
}
