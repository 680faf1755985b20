//! Interface lifecycle tracking.
//!
//! A spawned interface moves through three states:
//! - **Requested**: `iface.init` sent, keyed by its wire id
//! - **Active**: `iface.init-res` received, close resolver keyed by interface id
//! - **Closed**: `iface.close` received, close future fulfilled, entry removed
//!
//! There is no Requested -> Closed transition; an init can only be abandoned
//! by the caller dropping its [`PendingInterface`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::bridge::protocol::{InterfaceId, InterfaceResponse, WireId};
use crate::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Active,
    Closed,
}

/// A spawned interface. `close` resolves once, when the interface terminates.
#[derive(Debug)]
pub struct InterfaceHandle {
    pub id: InterfaceId,
    pub close: CloseFuture,
}

/// Owned maps of requested and active interfaces for one wire.
#[derive(Default)]
pub struct InterfaceTracker {
    requested: DashMap<WireId, oneshot::Sender<InterfaceHandle>>,
    active: DashMap<InterfaceId, oneshot::Sender<InterfaceResponse>>,
}

impl InterfaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the Requested state under a fresh wire id.
    pub fn request(&self) -> (WireId, PendingInterface) {
        loop {
            let wire_id = WireId::generate();
            if let Some(pending) = self.register(wire_id.clone()) {
                return (wire_id, pending);
            }
        }
    }

    pub(crate) fn register(&self, wire_id: WireId) -> Option<PendingInterface> {
        match self.requested.entry(wire_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Some(PendingInterface { wire_id, rx })
            }
        }
    }

    /// Requested -> Active.
    ///
    /// The close resolver is registered before the init waiter wakes, so a
    /// close that races the handle's delivery is never lost.
    ///
    /// If `interface_id` is already active, the new resolver replaces the old
    /// one and the earlier [`CloseFuture`] resolves to [`WireError::Abandoned`]
    /// instead of staying pending. Later closes for that id reach only the
    /// newest handle.
    pub fn activate(&self, wire_id: &WireId, interface_id: InterfaceId) -> bool {
        let Some((_, init_tx)) = self.requested.remove(wire_id) else {
            tracing::debug!(%wire_id, %interface_id, "No pending init for init response");
            return false;
        };

        let (close_tx, close_rx) = oneshot::channel();
        if self.active.insert(interface_id.clone(), close_tx).is_some() {
            tracing::warn!(
                %interface_id,
                "Interface id reused while active; previous close future abandoned"
            );
        }
        tracing::debug!(%wire_id, %interface_id, "Interface active");

        let handle = InterfaceHandle {
            id: interface_id.clone(),
            close: CloseFuture {
                interface_id: interface_id.clone(),
                rx: close_rx,
            },
        };
        if init_tx.send(handle).is_err() {
            tracing::debug!(%interface_id, "Init caller stopped waiting; interface still tracked");
        }
        true
    }

    /// Active -> Closed. Fulfills the close future exactly once.
    pub fn close(&self, interface_id: &InterfaceId, response: InterfaceResponse) -> bool {
        let Some((_, close_tx)) = self.active.remove(interface_id) else {
            tracing::debug!(%interface_id, "Close for untracked interface");
            return false;
        };
        tracing::debug!(%interface_id, job = %response.job, ok = response.outcome.is_ok(), "Interface closed");
        let _ = close_tx.send(response);
        true
    }

    /// Abandon a Requested init. The waiter sees [`WireError::Abandoned`].
    pub fn cancel(&self, wire_id: &WireId) -> bool {
        self.requested.remove(wire_id).is_some()
    }

    pub fn state(&self, interface_id: &InterfaceId) -> InterfaceState {
        if self.active.contains_key(interface_id) {
            InterfaceState::Active
        } else {
            InterfaceState::Closed
        }
    }

    pub fn pending_inits(&self) -> usize {
        self.requested.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Awaitable handle for an `iface.init` awaiting its `iface.init-res`.
#[derive(Debug)]
pub struct PendingInterface {
    wire_id: WireId,
    rx: oneshot::Receiver<InterfaceHandle>,
}

impl PendingInterface {
    pub fn wire_id(&self) -> &WireId {
        &self.wire_id
    }
}

impl Future for PendingInterface {
    type Output = Result<InterfaceHandle, WireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| WireError::Abandoned))
    }
}

/// Resolves with the interface's final outcome.
#[derive(Debug)]
pub struct CloseFuture {
    interface_id: InterfaceId,
    rx: oneshot::Receiver<InterfaceResponse>,
}

impl CloseFuture {
    pub fn interface_id(&self) -> &InterfaceId {
        &self.interface_id
    }
}

impl Future for CloseFuture {
    type Output = Result<InterfaceResponse, WireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| WireError::Abandoned))
    }
}
