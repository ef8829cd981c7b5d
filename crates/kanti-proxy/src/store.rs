//! Bounded, in-memory ring of the most recently captured exchanges.

use std::sync::RwLock;

use crate::capture::RequestDetails;

struct Inner {
    buf: Vec<Option<RequestDetails>>,
    head: usize,
    len: usize,
}

/// Fixed-capacity FIFO of [`RequestDetails`]. `append` overwrites the
/// oldest slot once full; `update_by_id` patches an existing record in
/// place (a no-op if it was already evicted or never stored).
pub struct CaptureStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl CaptureStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                buf: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
            }),
        }
    }

    pub fn append(&self, record: RequestDetails) {
        let mut inner = self.inner.write().unwrap();
        let capacity = self.capacity;
        let tail = (inner.head + inner.len) % capacity;
        inner.buf[tail] = Some(record);
        if inner.len < capacity {
            inner.len += 1;
        } else {
            inner.head = (inner.head + 1) % capacity;
        }
    }

    pub fn update_by_id(&self, id: i64, patch: impl FnOnce(&mut RequestDetails)) -> bool {
        let mut inner = self.inner.write().unwrap();
        let capacity = self.capacity;
        for i in 0..inner.len {
            let idx = (inner.head + i) % capacity;
            if let Some(record) = inner.buf[idx].as_mut() {
                if record.id == id {
                    patch(record);
                    return true;
                }
            }
        }
        false
    }

    /// Newest-first snapshot of all live records.
    pub fn snapshot(&self) -> Vec<RequestDetails> {
        let inner = self.inner.read().unwrap();
        let capacity = self.capacity;
        (0..inner.len)
            .rev()
            .filter_map(|i| {
                let idx = (inner.head + i) % capacity;
                inner.buf[idx].clone()
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        for slot in inner.buf.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.len = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Protocol;
    use std::collections::BTreeMap;

    fn record(id_hint: &str) -> RequestDetails {
        let mut r = RequestDetails::new_request(
            id_hint.to_string(),
            "GET".into(),
            "/".into(),
            String::new(),
            BTreeMap::new(),
            Protocol::Http,
            String::new(),
        );
        r.id = crate::capture::next_id();
        r
    }

    #[test]
    fn snapshot_is_newest_first() {
        let store = CaptureStore::new(10);
        store.append(record("a"));
        store.append(record("b"));
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].id > snap[1].id);
    }

    #[test]
    fn eviction_drops_oldest_when_full() {
        let store = CaptureStore::new(2);
        store.append(record("a"));
        store.append(record("b"));
        store.append(record("c"));
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].host, "c");
        assert_eq!(snap[1].host, "b");
    }

    #[test]
    fn update_by_id_patches_in_place() {
        let store = CaptureStore::new(4);
        let rec = record("a");
        let id = rec.id;
        store.append(rec);
        let found = store.update_by_id(id, |r| r.complete_with_error("boom", 5));
        assert!(found);
        let snap = store.snapshot();
        assert_eq!(snap[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn update_by_id_on_missing_id_is_a_noop() {
        let store = CaptureStore::new(4);
        assert!(!store.update_by_id(999, |_| {}));
    }

    #[test]
    fn clear_empties_the_store() {
        let store = CaptureStore::new(4);
        store.append(record("a"));
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.snapshot().is_empty());
    }
}
