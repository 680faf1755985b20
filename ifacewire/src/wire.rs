//! Wire - the protocol engine for one channel.
//!
//! Flow:
//! 1. Create the correlation store and interface tracker (owned by this wire)
//! 2. Spawn the dispatch loop over the inbound stream
//! 3. Outbound calls register a pending entry, then post their envelope
//! 4. The loop resolves entries as responses arrive, in whatever order
//! 5. `end()` (or dropping every clone) stops the loop; pending entries stay pending

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::bridge::protocol::{
    Envelope, InterfaceClose, InterfaceId, InterfaceInit, InterfaceInitCall, InterfaceResponse,
    RpcCall,
};
use crate::bridge::transport::Outbound;
use crate::correlation::{CorrelationStore, PendingResponse};
use crate::dispatcher::{CallExecutor, Dispatcher, InboundMessage, PeerFilter};
use crate::error::WireError;
use crate::lifecycle::{InterfaceTracker, PendingInterface};
use crate::routing::Destination;

#[derive(Debug, Clone)]
pub struct WireConfig {
    pub peer: PeerFilter,
    /// Applied by [`crate::caller::RpcCaller`]; `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub label: String,
}

impl WireConfig {
    pub fn new(peer: PeerFilter) -> Self {
        Self {
            peer,
            call_timeout: None,
            label: "wire".to_string(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

struct WireInner {
    correlations: Arc<CorrelationStore>,
    interfaces: Arc<InterfaceTracker>,
    outbound: Arc<dyn Outbound>,
    call_timeout: Option<Duration>,
    label: String,
    ended: AtomicBool,
    shutdown: CancellationToken,
    finished: CancellationToken,
}

impl Drop for WireInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to a running wire. Clones share the same stores and loop.
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

impl Wire {
    /// Start processing `inbound`. Must be called from within a tokio runtime.
    pub fn spawn<S>(
        config: WireConfig,
        outbound: Arc<dyn Outbound>,
        inbound: S,
        executor: Arc<dyn CallExecutor>,
    ) -> Self
    where
        S: Stream<Item = InboundMessage> + Send + 'static,
    {
        let correlations = Arc::new(CorrelationStore::new());
        let interfaces = Arc::new(InterfaceTracker::new());
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();

        let dispatcher = Dispatcher::new(
            config.peer,
            Arc::clone(&correlations),
            Arc::clone(&interfaces),
            executor,
            Arc::clone(&outbound),
        );

        let span = tracing::info_span!("wire", label = %config.label);
        tokio::spawn(
            run_dispatch_loop(inbound, dispatcher, shutdown.clone(), finished.clone())
                .instrument(span),
        );

        Self {
            inner: Arc::new(WireInner {
                correlations,
                interfaces,
                outbound,
                call_timeout: config.call_timeout,
                label: config.label,
                ended: AtomicBool::new(false),
                shutdown,
                finished,
            }),
        }
    }

    /// Call the manager itself (`rpc.call`).
    pub fn send_rpc(&self, call: RpcCall) -> Result<PendingResponse, WireError> {
        self.send(Destination::Manager, call)
    }

    pub fn send_to_parent(&self, call: RpcCall) -> Result<PendingResponse, WireError> {
        self.send(Destination::Parent, call)
    }

    pub fn send_to_child(
        &self,
        child: InterfaceId,
        call: RpcCall,
    ) -> Result<PendingResponse, WireError> {
        self.send(Destination::Child(child), call)
    }

    /// Register a pending entry and post the call envelope.
    pub fn send(
        &self,
        destination: Destination,
        call: RpcCall,
    ) -> Result<PendingResponse, WireError> {
        self.ensure_running()?;

        let (wire_id, pending) = self.inner.correlations.issue();
        let request = call.request.clone();
        let envelope = destination.envelope(wire_id.clone(), call);

        if let Err(e) = self.inner.outbound.post(envelope) {
            self.inner.correlations.cancel(&wire_id);
            tracing::error!(label = %self.inner.label, %wire_id, %destination, %request, error = %e, "Failed to post call");
            return Err(e);
        }
        tracing::debug!(label = %self.inner.label, %wire_id, %destination, %request, "Call sent");
        Ok(pending)
    }

    /// Ask the manager to spawn a child interface for `call.job`.
    pub fn start_interface(&self, call: InterfaceInitCall) -> Result<PendingInterface, WireError> {
        self.ensure_running()?;

        let (wire_id, pending) = self.inner.interfaces.request();
        let job = call.job.clone();
        let envelope = Envelope::InterfaceInit(InterfaceInit {
            wire_id: wire_id.clone(),
            call,
        });

        if let Err(e) = self.inner.outbound.post(envelope) {
            self.inner.interfaces.cancel(&wire_id);
            tracing::error!(label = %self.inner.label, %wire_id, %job, error = %e, "Failed to post interface init");
            return Err(e);
        }
        tracing::debug!(label = %self.inner.label, %wire_id, %job, "Interface requested");
        Ok(pending)
    }

    /// Report this context's own termination. `from` is left for the relay to stamp.
    pub fn close(&self, response: InterfaceResponse) -> Result<(), WireError> {
        tracing::debug!(label = %self.inner.label, job = %response.job, ok = response.outcome.is_ok(), "Closing interface");
        self.inner
            .outbound
            .post(Envelope::InterfaceClose(InterfaceClose {
                from: None,
                response,
            }))
    }

    /// Release the inbound subscription. Returns `true` only for the call that ended it.
    ///
    /// Outstanding entries are not rejected.
    pub fn end(&self) -> bool {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(
            label = %self.inner.label,
            pending_calls = self.inner.correlations.len(),
            pending_inits = self.inner.interfaces.pending_inits(),
            active_interfaces = self.inner.interfaces.active_count(),
            "Ending wire"
        );
        self.inner.shutdown.cancel();
        true
    }

    /// Wait until the dispatch loop has stopped.
    pub async fn closed(&self) {
        self.inner.finished.cancelled().await;
    }

    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled() && !self.inner.finished.is_cancelled()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.inner.call_timeout
    }

    pub fn correlations(&self) -> &CorrelationStore {
        &self.inner.correlations
    }

    pub fn interfaces(&self) -> &InterfaceTracker {
        &self.inner.interfaces
    }

    fn ensure_running(&self) -> Result<(), WireError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(WireError::Ended)
        }
    }
}

async fn run_dispatch_loop<S>(
    inbound: S,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    finished: CancellationToken,
) where
    S: Stream<Item = InboundMessage> + Send + 'static,
{
    let mut inbound = std::pin::pin!(inbound);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::debug!("Subscription released");
                break;
            }

            message = inbound.next() => {
                match message {
                    Some(message) => {
                        let disposition = dispatcher.dispatch(message);
                        tracing::trace!(?disposition, "Message dispatched");
                    }
                    None => {
                        tracing::warn!("Inbound channel closed");
                        break;
                    }
                }
            }
        }
    }

    finished.cancel();
    tracing::info!("Dispatch loop exiting");
}
