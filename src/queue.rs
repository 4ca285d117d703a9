//! Connection queues.
//!
//! Opens and deletes against one (storage key, name) pair are serialized: each
//! request waits until every request queued before it has been processed.

use std::collections::HashMap;

use crate::types::{RequestId, StorageKey};

/// FIFO of open/delete requests for one database name
#[derive(Debug, Default)]
pub(crate) struct ConnectionQueue {
    requests: Vec<RequestId>,
}

impl ConnectionQueue {
    /// Add a request, first dropping leading entries that are already processed
    pub(crate) fn append(&mut self, request: RequestId, is_processed: impl Fn(RequestId) -> bool) {
        let settled = self
            .requests
            .iter()
            .take_while(|id| is_processed(**id))
            .count();
        self.requests.drain(..settled);
        self.requests.push(request);
    }

    /// Whether every request queued before `request` has been processed
    pub(crate) fn all_previous_processed(&self, request: RequestId, is_processed: impl Fn(RequestId) -> bool) -> bool {
        self.requests
            .iter()
            .take_while(|id| **id != request)
            .all(|id| is_processed(*id))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Process-wide registry of connection queues, created lazily
#[derive(Debug, Default)]
pub(crate) struct ConnectionQueues {
    queues: HashMap<(StorageKey, String), ConnectionQueue>,
}

impl ConnectionQueues {
    pub(crate) fn for_key_and_name(&mut self, storage_key: &StorageKey, name: &str) -> &mut ConnectionQueue {
        self.queues
            .entry((storage_key.clone(), name.to_owned()))
            .or_default()
    }

    pub(crate) fn get(&self, storage_key: &StorageKey, name: &str) -> Option<&ConnectionQueue> {
        self.queues.get(&(storage_key.clone(), name.to_owned()))
    }

    pub(crate) fn clear(&mut self) {
        self.queues.clear();
    }
}
