use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};

type Leaf = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

struct Inner {
    entries: HashMap<String, Leaf>,
    order: VecDeque<String>,
}

/// Bounded domain -> leaf-cert cache. When the cache would grow past
/// `capacity`, the oldest half of entries are dropped in one pass rather
/// than evicting one at a time.
pub struct LeafCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LeafCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, domain: &str) -> Option<Leaf> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(domain).cloned()
    }

    pub fn insert(&self, domain: String, leaf: Leaf) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(&domain) {
            inner.order.push_back(domain.clone());
        }
        inner.entries.insert(domain, leaf);

        if inner.entries.len() >= self.capacity {
            let target = self.capacity / 2;
            while inner.entries.len() > target {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
