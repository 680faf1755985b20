//! Correlation engine - matches responses to outstanding calls by wire id.
//!
//! Each outbound call registers a one-shot resolver keyed by a fresh [`WireId`].
//! The inbound dispatcher resolves it when the paired response arrives. Entries
//! are removed before they are fulfilled, so a duplicate or late response finds
//! nothing and is dropped.
//!
//! There is no timeout here. A call that is never answered stays pending until
//! the store is dropped or the entry is cancelled by a layer above
//! (see [`crate::caller`]).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::bridge::protocol::{RpcResponse, WireId};
use crate::error::WireError;

/// Owned map of outstanding calls for one wire.
#[derive(Default)]
pub struct CorrelationStore {
    pending: DashMap<WireId, oneshot::Sender<RpcResponse>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding call under a fresh wire id.
    pub fn issue(&self) -> (WireId, PendingResponse) {
        loop {
            let wire_id = WireId::generate();
            if let Some(pending) = self.register(wire_id.clone()) {
                return (wire_id, pending);
            }
            tracing::warn!(%wire_id, "Generated wire id collided with a live entry");
        }
    }

    /// Register under a caller-chosen id. Returns `None` if the id is taken.
    pub(crate) fn register(&self, wire_id: WireId) -> Option<PendingResponse> {
        match self.pending.entry(wire_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Some(PendingResponse { wire_id, rx })
            }
        }
    }

    /// Fulfill the call registered under `wire_id`.
    ///
    /// Returns `false` if no such call is outstanding (already resolved, never
    /// issued, or cancelled).
    pub fn resolve(&self, wire_id: &WireId, response: RpcResponse) -> bool {
        let Some((_, tx)) = self.pending.remove(wire_id) else {
            tracing::debug!(%wire_id, "No pending call for response");
            return false;
        };
        if tx.send(response).is_err() {
            tracing::debug!(%wire_id, "Caller stopped waiting before response arrived");
        }
        true
    }

    /// Drop the entry without fulfilling it. The waiter sees [`WireError::Abandoned`].
    pub fn cancel(&self, wire_id: &WireId) -> bool {
        self.pending.remove(wire_id).is_some()
    }

    pub fn contains(&self, wire_id: &WireId) -> bool {
        self.pending.contains_key(wire_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Awaitable response for one outstanding call.
#[derive(Debug)]
pub struct PendingResponse {
    wire_id: WireId,
    rx: oneshot::Receiver<RpcResponse>,
}

impl PendingResponse {
    pub fn wire_id(&self) -> &WireId {
        &self.wire_id
    }
}

impl Future for PendingResponse {
    type Output = Result<RpcResponse, WireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| WireError::Abandoned))
    }
}
