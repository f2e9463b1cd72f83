//! Typed aggregate repository over a [`KeyValueStore`].
//!
//! Each aggregate type lives under its own key prefix. Writers go through
//! [`Repository::modify`], which reads the raw document, applies a pure
//! transition function and commits with compare-and-swap against the exact
//! bytes it read. A lost race re-reads and re-applies, so the transition
//! function may run more than once and must not perform side effects.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::kv::KeyValueStore;
use crate::error::{Result, StoreError};

/// Attempts before a contended write gives up.
const MAX_CAS_ATTEMPTS: usize = 64;

/// Escape one component of a composite id.
///
/// Ids are joined with `/` (`<user>/<badge>`), and per-user listings scan the
/// `<user>/` prefix, so a component must never contain a bare `/`.
pub fn key_segment(raw: &str) -> Cow<'_, str> {
    if raw.contains(|c| c == '/' || c == '%') {
        Cow::Owned(raw.replace('%', "%25").replace('/', "%2F"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Result of a [`Repository::modify`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    /// The transition declined to write; carries the current value.
    Unchanged(Option<T>),
    /// The transition was committed.
    Written { previous: Option<T>, current: T },
}

impl<T> Mutation<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, Mutation::Written { .. })
    }

    /// The value as it stands after the call.
    pub fn current(&self) -> Option<&T> {
        match self {
            Mutation::Unchanged(value) => value.as_ref(),
            Mutation::Written { current, .. } => Some(current),
        }
    }

    pub fn into_current(self) -> Option<T> {
        match self {
            Mutation::Unchanged(value) => value,
            Mutation::Written { current, .. } => Some(current),
        }
    }
}

/// Keyed storage for one aggregate type.
pub struct Repository<T> {
    store: Arc<dyn KeyValueStore>,
    prefix: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix,
            _marker: PhantomData,
        }
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &'static str) -> Self {
        Self {
            store,
            prefix,
            _marker: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, id)
    }

    fn decode(key: &str, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|source| {
            StoreError::Corrupt {
                key: key.to_string(),
                source,
            }
            .into()
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<T>> {
        let key = self.key(id);
        match self.store.get(&key)? {
            Some(raw) => Ok(Some(Self::decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.store.get(&self.key(id))?.is_some())
    }

    /// Insert only if nothing is stored under `id`. Returns whether it was inserted.
    pub fn insert_new(&self, id: &str, value: &T) -> Result<bool> {
        let raw = serde_json::to_string(value)?;
        Ok(self.store.compare_and_swap(&self.key(id), None, &raw)?)
    }

    /// Unconditional overwrite. Only for documents with a single writer.
    pub fn put(&self, id: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        Ok(self.store.put(&self.key(id), &raw)?)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(&self.key(id))?)
    }

    /// Atomically transition the aggregate under `id`.
    ///
    /// `transition` receives the current value (if any) and returns the new
    /// value, or `None` to leave the aggregate untouched.
    pub fn modify<F>(&self, id: &str, mut transition: F) -> Result<Mutation<T>>
    where
        F: FnMut(Option<&T>) -> Option<T>,
    {
        let key = self.key(id);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let raw = self.store.get(&key)?;
            let previous = match raw.as_deref() {
                Some(r) => Some(Self::decode(&key, r)?),
                None => None,
            };

            let Some(next) = transition(previous.as_ref()) else {
                return Ok(Mutation::Unchanged(previous));
            };

            let encoded = serde_json::to_string(&next)?;
            if self
                .store
                .compare_and_swap(&key, raw.as_deref(), &encoded)?
            {
                return Ok(Mutation::Written {
                    previous,
                    current: next,
                });
            }
            trace!(%key, attempt, "compare-and-swap lost, retrying");
        }

        Err(StoreError::Contention {
            key,
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    /// All aggregates whose id starts with `id_prefix`, ordered by key.
    pub fn list(&self, id_prefix: &str) -> Result<Vec<T>> {
        let prefix = format!("{}/{}", self.prefix, id_prefix);
        self.store
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, raw)| Self::decode(&key, &raw))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    fn repo() -> Repository<Counter> {
        Repository::new(Arc::new(MemoryStore::new()), "counter")
    }

    #[test]
    fn modify_creates_lazily() {
        let repo = repo();
        let result = repo
            .modify("a", |cur| Some(Counter { n: cur.map_or(0, |c| c.n) + 1 }))
            .unwrap();
        assert!(result.is_written());
        assert_eq!(repo.get("a").unwrap(), Some(Counter { n: 1 }));
    }

    #[test]
    fn declined_transition_reports_current_value() {
        let repo = repo();
        repo.put("a", &Counter { n: 5 }).unwrap();
        let result = repo.modify("a", |_| None).unwrap();
        assert_eq!(result, Mutation::Unchanged(Some(Counter { n: 5 })));
    }

    #[test]
    fn insert_new_refuses_to_overwrite() {
        let repo = repo();
        assert!(repo.insert_new("a", &Counter { n: 1 }).unwrap());
        assert!(!repo.insert_new("a", &Counter { n: 2 }).unwrap());
        assert_eq!(repo.get("a").unwrap(), Some(Counter { n: 1 }));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let repo = repo();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        repo.modify("shared", |cur| {
                            Some(Counter { n: cur.map_or(0, |c| c.n) + 1 })
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(repo.get("shared").unwrap(), Some(Counter { n: 200 }));
    }

    #[test]
    fn key_segment_escapes_separator() {
        assert_eq!(key_segment("alice"), "alice");
        assert_eq!(key_segment("alice/x"), "alice%2Fx");
        // '%' is escaped first so an escaped id cannot collide with a literal one
        assert_eq!(key_segment("alice%2Fx"), "alice%252Fx");
    }

    #[test]
    fn escaped_prefix_scan_stays_within_one_owner() {
        let repo = repo();
        repo.put(&format!("{}/a", key_segment("alice")), &Counter { n: 1 }).unwrap();
        repo.put(&format!("{}/b", key_segment("alice/x")), &Counter { n: 2 }).unwrap();
        let owned = repo.list(&format!("{}/", key_segment("alice"))).unwrap();
        assert_eq!(owned, vec![Counter { n: 1 }]);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.put("counter/bad", "not json").unwrap();
        let repo: Repository<Counter> = Repository::new(store, "counter");
        let err = repo.get("bad").unwrap_err();
        assert!(err.to_string().contains("counter/bad"));
    }
}
