//! Batches captured exchanges and fans them out to subscribed observers.
//!
//! A batch flushes when it reaches [`EventBus`]'s configured size, or
//! `batch_interval` after the first item lands in an otherwise-empty pair
//! of buffers — whichever happens first. Each observer has its own bounded
//! channel; a slow observer only ever loses events for itself, never
//! blocks the bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::capture::RequestDetails;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Vec<RequestDetails>,
}

struct BusState {
    req_batch: Vec<RequestDetails>,
    resp_batch: Vec<RequestDetails>,
    generation: u64,
}

struct ObserverSlot {
    id: u64,
    tx: mpsc::Sender<Event>,
}

pub struct EventBus {
    state: Mutex<BusState>,
    observers: RwLock<Vec<ObserverSlot>>,
    next_observer_id: AtomicU64,
    batch_size: usize,
    batch_interval: Duration,
}

impl EventBus {
    pub fn new(batch_size: usize, batch_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState {
                req_batch: Vec::new(),
                resp_batch: Vec::new(),
                generation: 0,
            }),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            batch_size,
            batch_interval,
        })
    }

    pub fn emit_request(self: &Arc<Self>, record: RequestDetails) {
        self.emit(record, true);
    }

    pub fn emit_response(self: &Arc<Self>, record: RequestDetails) {
        self.emit(record, false);
    }

    fn emit(self: &Arc<Self>, record: RequestDetails, is_request: bool) {
        let mut state = self.state.lock().unwrap();
        let was_empty = state.req_batch.is_empty() && state.resp_batch.is_empty();
        if is_request {
            state.req_batch.push(record);
        } else {
            state.resp_batch.push(record);
        }

        if state.req_batch.len() >= self.batch_size || state.resp_batch.len() >= self.batch_size {
            state.generation += 1;
            let req = std::mem::take(&mut state.req_batch);
            let resp = std::mem::take(&mut state.resp_batch);
            drop(state);
            self.dispatch(req, resp);
        } else if was_empty {
            let generation = state.generation;
            drop(state);
            let bus = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(bus.batch_interval).await;
                bus.flush_if_unchanged(generation);
            });
        }
    }

    fn flush_if_unchanged(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            return;
        }
        if state.req_batch.is_empty() && state.resp_batch.is_empty() {
            return;
        }
        state.generation += 1;
        let req = std::mem::take(&mut state.req_batch);
        let resp = std::mem::take(&mut state.resp_batch);
        drop(state);
        self.dispatch(req, resp);
    }

    /// Flushes unconditionally, e.g. when the proxy stops.
    pub fn flush_now(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        state.generation += 1;
        let req = std::mem::take(&mut state.req_batch);
        let resp = std::mem::take(&mut state.resp_batch);
        drop(state);
        self.dispatch(req, resp);
    }

    fn dispatch(&self, req: Vec<RequestDetails>, resp: Vec<RequestDetails>) {
        if !req.is_empty() {
            self.broadcast(Event {
                kind: "proxy-request-batch",
                data: req,
            });
        }
        if !resp.is_empty() {
            self.broadcast(Event {
                kind: "proxy-response-batch",
                data: resp,
            });
        }
    }

    fn broadcast(&self, event: Event) {
        let observers = self.observers.read().unwrap();
        for observer in observers.iter() {
            if observer.tx.try_send(event.clone()).is_err() {
                tracing::warn!(observer_id = observer.id, "dropping event for slow observer");
            }
        }
    }

    /// Registers a new observer with a bounded channel of `depth` events.
    pub fn subscribe(self: &Arc<Self>, depth: usize) -> Observer {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(depth);
        self.observers.write().unwrap().push(ObserverSlot { id, tx });
        Observer {
            id,
            rx,
            bus: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.observers.write().unwrap().retain(|o| o.id != id);
    }
}

/// An event-stream subscriber's receive handle. Dropping it deregisters
/// the observer from the bus.
pub struct Observer {
    id: u64,
    rx: mpsc::Receiver<Event>,
    bus: Arc<EventBus>,
}

impl Observer {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
