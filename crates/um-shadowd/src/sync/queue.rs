//! Bounded coalescing queue of pending sync requests.
//!
//! At most one entry exists per (thing, shadow) key: inserting a request
//! whose key is already queued merges the two in place, keeping the
//! original arrival position. Across distinct keys the queue is FIFO by
//! first appearance.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::sync::requests::{RequestMerger, ShadowKey, SyncRequest};

pub const DEFAULT_CAPACITY: usize = 1024;

pub struct RequestQueue {
    inner: Mutex<VecDeque<SyncRequest>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    merger: RequestMerger,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            merger: RequestMerger,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert, awaiting space when the queue is full of distinct keys.
    pub async fn put(&self, request: SyncRequest) {
        let mut request = request;
        loop {
            {
                let mut queue = self.inner.lock().await;
                match self.insert_locked(&mut queue, request) {
                    Ok(()) => {
                        self.not_empty.notify_one();
                        return;
                    }
                    Err(rejected) => request = rejected,
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Non-blocking insert. Returns false when the queue is full and the
    /// key is not already present to merge into.
    pub async fn offer(&self, request: SyncRequest) -> bool {
        let mut queue = self.inner.lock().await;
        match self.insert_locked(&mut queue, request) {
            Ok(()) => {
                self.not_empty.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Pop the oldest request without waiting.
    pub async fn poll(&self) -> Option<SyncRequest> {
        let request = self.inner.lock().await.pop_front();
        if request.is_some() {
            self.not_full.notify_one();
        }
        request
    }

    /// Pop the oldest request, awaiting one when empty.
    pub async fn take(&self) -> SyncRequest {
        loop {
            if let Some(request) = self.poll().await {
                return request;
            }
            self.not_empty.notified().await;
        }
    }

    /// Atomic exchange used by workers to grab work while inserting.
    ///
    /// Empty queue: hands the request straight back. Head with the same
    /// key: removes the head and returns the merged pair. Head with a
    /// different key: inserts the request (merging in place when its key
    /// exists deeper in the queue) and returns the head.
    pub async fn put_and_take(&self, request: SyncRequest, prefer_new: bool) -> SyncRequest {
        let mut queue = self.inner.lock().await;

        if queue.is_empty() {
            return request;
        }

        if queue.front().is_some_and(|head| head.key == request.key) {
            let existing = queue.pop_front().expect("head checked above");
            self.not_full.notify_one();
            return if prefer_new {
                self.merger.merge(request, existing)
            } else {
                self.merger.merge(existing, request)
            };
        }

        let head = queue.pop_front().expect("queue non-empty");
        // Popping the head guarantees room for the incoming request.
        let _ = self.insert_locked(&mut queue, request);
        self.not_empty.notify_one();
        self.not_full.notify_one();
        head
    }

    /// Remove a pending request by key.
    pub async fn remove(&self, key: &ShadowKey) -> Option<SyncRequest> {
        let mut queue = self.inner.lock().await;
        let position = queue.iter().position(|r| &r.key == key)?;
        let removed = queue.remove(position);
        self.not_full.notify_one();
        removed
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
        self.not_full.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.inner.lock().await.len() >= self.capacity
    }

    /// Merge in place when the key is present, else push back when there
    /// is room. Hands the request back when the queue is full.
    fn insert_locked(
        &self,
        queue: &mut VecDeque<SyncRequest>,
        request: SyncRequest,
    ) -> Result<(), SyncRequest> {
        if let Some(position) = queue.iter().position(|r| r.key == request.key) {
            let existing = queue
                .remove(position)
                .expect("position from iterator is valid");
            let merged = self.merger.merge(existing, request);
            queue.insert(position, merged);
            return Ok(());
        }
        if queue.len() >= self.capacity {
            return Err(request);
        }
        queue.push_back(request);
        Ok(())
    }
}
