//! Asynchronous request execution.
//!
//! An operation waits until its request is the first unprocessed one of its
//! transaction, runs against the stores, and has its result delivered from a
//! separate task. Delivery re-activates the transaction for the duration of the
//! "success" or "error" handlers so they can chain more requests.

use log::trace;

use crate::constants::RequestFlags;
use crate::env::Environment;
use crate::error::Result;
use crate::event::{Event, EventKind, EventTarget};
use crate::request::{Request, RequestResult, RequestSource};
use crate::types::{RequestId, TransactionId, TransactionState};
use crate::value::HostValue;

impl<V: HostValue> Environment<V> {
    pub(crate) fn create_request(&mut self, source: RequestSource, txn: TransactionId) -> RequestId {
        self.requests.insert(Request::new(Some(source), Some(txn)))
    }

    /// Queue `operation` as `request` at the end of the transaction's request list
    pub(crate) fn execute_request<F>(&mut self, request: RequestId, txn: TransactionId, operation: F)
    where
        F: FnOnce(&mut Environment<V>) -> Result<RequestResult<V>> + 'static,
    {
        if let Some(req) = self.requests.get_mut(request) {
            req.reset();
        }
        if let Some(transaction) = self.transactions.get_mut(txn) {
            transaction.requests.retain(|id| *id != request);
            transaction.requests.push(request);
        }
        trace!("request {:?} queued on {:?}", request, txn);

        self.spin_until(
            "request: wait for earlier requests",
            move |env| env.request_ready(txn, request),
            move |env| env.run_request(txn, request, operation),
        );
    }

    /// Whether `request` is the first unprocessed request of its transaction, or
    /// has been settled some other way
    fn request_ready(&self, txn: TransactionId, request: RequestId) -> bool {
        let processed = |id: RequestId| self.requests.get(id).map_or(true, |r| r.is_processed());
        if processed(request) {
            return true;
        }
        let Some(transaction) = self.transactions.get(txn) else {
            return true;
        };
        transaction.requests.iter().copied().find(|id| !processed(*id)) == Some(request)
    }

    fn run_request<F>(&mut self, txn: TransactionId, request: RequestId, operation: F)
    where
        F: FnOnce(&mut Environment<V>) -> Result<RequestResult<V>>,
    {
        if self.requests.get(request).map_or(true, |r| r.is_processed()) {
            return;
        }
        if self.transactions.get(txn).map_or(true, |t| t.is_finished()) {
            self.discard_request(request);
            return;
        }

        let outcome = operation(self);
        trace!("request {:?} ran: {:?}", request, outcome.as_ref().map(|_| ()));
        if let Some(req) = self.requests.get_mut(request) {
            req.flags.insert(RequestFlags::PROCESSED);
        }
        self.queue_task(move |env| env.deliver(txn, request, outcome));
    }

    /// Complete a request and fire "success" or "error" with the transaction active
    fn deliver(&mut self, txn: TransactionId, request: RequestId, outcome: Result<RequestResult<V>>) {
        // An abort delivers its own error
        if self.transactions.get(txn).map_or(true, |t| t.was_aborted()) {
            return;
        }
        let Some(req) = self.requests.get_mut(request) else {
            return;
        };
        if req.is_done() {
            return;
        }

        let event = match &outcome {
            Ok(_) => Event::new(EventKind::Success, EventTarget::Request(request)),
            Err(error) => Event::new(EventKind::Error, EventTarget::Request(request)).with_error(Some(error.clone())),
        };
        req.complete(outcome);

        let activated = match self.transactions.get_mut(txn) {
            Some(transaction) if transaction.state == TransactionState::Inactive => {
                transaction.set_state(TransactionState::Active);
                true
            }
            _ => false,
        };

        self.dispatch(event);

        if activated {
            if let Some(transaction) = self.transactions.get_mut(txn) {
                if transaction.state == TransactionState::Active {
                    transaction.set_state(TransactionState::Inactive);
                }
            }
        }
        self.maybe_autocommit(txn);
    }
}
