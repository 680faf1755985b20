//! Inbound dispatcher - the single entry point for channel messages.
//!
//! Every message is checked against the configured peer, decoded into an
//! [`Envelope`], and routed:
//! - `rpc.send` -> local [`CallExecutor`], answered with exactly one `rpc.send-res`
//! - `rpc.res` / `rpc.send-res` -> [`CorrelationStore::resolve`]
//! - `iface.init-res` -> [`InterfaceTracker::activate`]
//! - `iface.close` -> [`InterfaceTracker::close`] (requires a non-empty `from`)
//!
//! Anything else is dropped without error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::bridge::protocol::{
    Envelope, InterfaceClose, InterfaceId, PeerId, RpcCall, RpcErrorBody, RpcResponse, WireId,
    WireSend, WireSendResponse,
};
use crate::bridge::transport::Outbound;
use crate::correlation::CorrelationStore;
use crate::error::ExecutorError;
use crate::lifecycle::InterfaceTracker;

/// One raw message from the channel, with the identity of whoever delivered it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub source: PeerId,
    pub data: serde_json::Value,
}

impl InboundMessage {
    pub fn new(source: PeerId, data: serde_json::Value) -> Self {
        Self { source, data }
    }
}

/// Predicate deciding which senders are trusted.
#[derive(Clone)]
pub struct PeerFilter(Arc<dyn Fn(&PeerId) -> bool + Send + Sync>);

impl PeerFilter {
    /// Accept only messages delivered by `peer`.
    pub fn exact(peer: PeerId) -> Self {
        Self(Arc::new(move |source| *source == peer))
    }

    /// Accept every sender. Only for point-to-point channels.
    pub fn any() -> Self {
        Self(Arc::new(|_| true))
    }

    pub fn from_fn(f: impl Fn(&PeerId) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn accepts(&self, source: &PeerId) -> bool {
        (self.0)(source)
    }
}

impl std::fmt::Debug for PeerFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeerFilter(..)")
    }
}

/// A routed call delivered to this context.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    pub wire_id: WireId,
    pub call: RpcCall,
    /// Origin as stamped by the relay.
    pub from: Option<InterfaceId>,
    pub to: Option<InterfaceId>,
}

/// Host-supplied handler answering inbound routed calls.
#[async_trait::async_trait]
pub trait CallExecutor: Send + Sync + 'static {
    async fn execute(&self, call: IncomingCall) -> Result<RpcResponse, ExecutorError>;
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender is not the configured peer.
    UnknownPeer,
    /// Not a recognized envelope.
    Malformed,
    /// `iface.close` without a usable `from`.
    MissingOrigin,
    /// A request only the manager answers (`rpc.call`, `iface.init`).
    ManagerRequest,
}

/// What the dispatcher did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dropped(DropReason),
    /// Response matched an outstanding call.
    Resolved,
    /// Response or lifecycle message with no matching entry.
    Unmatched,
    /// Inbound call handed to the executor.
    Executing,
    Activated,
    Closed,
}

pub struct Dispatcher {
    peer: PeerFilter,
    correlations: Arc<CorrelationStore>,
    interfaces: Arc<InterfaceTracker>,
    executor: Arc<dyn CallExecutor>,
    outbound: Arc<dyn Outbound>,
}

impl Dispatcher {
    pub fn new(
        peer: PeerFilter,
        correlations: Arc<CorrelationStore>,
        interfaces: Arc<InterfaceTracker>,
        executor: Arc<dyn CallExecutor>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            peer,
            correlations,
            interfaces,
            executor,
            outbound,
        }
    }

    /// Route one inbound message. Must be called from within a tokio runtime.
    pub fn dispatch(&self, message: InboundMessage) -> Disposition {
        if !self.peer.accepts(&message.source) {
            tracing::trace!(source = %message.source, "Dropping message from unexpected peer");
            return Disposition::Dropped(DropReason::UnknownPeer);
        }

        let envelope: Envelope = match serde_json::from_value(message.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::trace!(error = %e, "Dropping malformed message");
                return Disposition::Dropped(DropReason::Malformed);
            }
        };
        tracing::trace!(kind = envelope.kind(), wire_id = ?envelope.wire_id(), "Dispatching envelope");

        match envelope {
            Envelope::Send(msg) => {
                self.spawn_execution(msg);
                Disposition::Executing
            }
            Envelope::Response(msg) => self.resolve(&msg.wire_id, msg.response),
            Envelope::SendResponse(msg) => self.resolve(&msg.wire_id, msg.response),
            Envelope::InterfaceInitResponse(msg) => {
                if self.interfaces.activate(&msg.wire_id, msg.interface_id) {
                    Disposition::Activated
                } else {
                    Disposition::Unmatched
                }
            }
            Envelope::InterfaceClose(msg) => self.close(msg),
            Envelope::Call(_) | Envelope::InterfaceInit(_) => {
                tracing::debug!("Dropping manager-bound request received by child context");
                Disposition::Dropped(DropReason::ManagerRequest)
            }
        }
    }

    fn resolve(&self, wire_id: &WireId, response: RpcResponse) -> Disposition {
        if self.correlations.resolve(wire_id, response) {
            Disposition::Resolved
        } else {
            Disposition::Unmatched
        }
    }

    fn close(&self, msg: InterfaceClose) -> Disposition {
        let Some(from) = msg.from.filter(|id| !id.is_empty()) else {
            tracing::trace!(job = %msg.response.job, "Dropping close without origin");
            return Disposition::Dropped(DropReason::MissingOrigin);
        };
        if self.interfaces.close(&from, msg.response) {
            Disposition::Closed
        } else {
            Disposition::Unmatched
        }
    }

    /// Run the executor on its own task so the dispatch loop stays free to
    /// deliver responses to calls the executor itself makes.
    fn spawn_execution(&self, msg: WireSend) {
        let executor = Arc::clone(&self.executor);
        let outbound = Arc::clone(&self.outbound);

        tokio::spawn(async move {
            let WireSend {
                wire_id,
                call,
                from,
                to,
            } = msg;
            let request = call.request.clone();
            let incoming = IncomingCall {
                wire_id: wire_id.clone(),
                call,
                from: from.clone(),
                to: to.clone(),
            };

            let outcome = AssertUnwindSafe(executor.execute(incoming))
                .catch_unwind()
                .await;
            let response = match outcome {
                Ok(Ok(response)) => ensure_error_message(response),
                Ok(Err(e)) => {
                    tracing::warn!(%wire_id, %request, error = %e, "Call executor failed");
                    RpcResponse::err(e.into_error_body())
                }
                Err(_) => {
                    tracing::error!(%wire_id, %request, "Call executor panicked");
                    RpcResponse::err(RpcErrorBody::new("call executor panicked"))
                }
            };

            let reply = Envelope::SendResponse(WireSendResponse {
                wire_id: wire_id.clone(),
                response,
                from,
                to,
            });
            if let Err(e) = outbound.post(reply) {
                tracing::error!(%wire_id, error = %e, "Failed to send call response");
            }
        });
    }
}

fn ensure_error_message(response: RpcResponse) -> RpcResponse {
    match response {
        RpcResponse::Err(mut body) if body.message.is_empty() => {
            body.message = RpcErrorBody::UNKNOWN.to_string();
            RpcResponse::Err(body)
        }
        other => other,
    }
}
