//! Calling convention for application code.
//!
//! Unwraps responses so that `ok: false` surfaces as an [`RpcError`], and
//! optionally bounds every wait with the wire's `call_timeout`. On expiry the
//! pending entry is cancelled so it cannot leak.

use std::future::Future;
use std::time::Duration;

use crate::bridge::protocol::{InterfaceInitCall, RpcCall, RpcResponse, WireId};
use crate::error::{CallError, RpcError, WireError};
use crate::lifecycle::InterfaceHandle;
use crate::routing::Destination;
use crate::wire::Wire;

impl RpcResponse {
    /// Re-raise a failed response as an error.
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self {
            RpcResponse::Ok(result) => Ok(result),
            RpcResponse::Err(body) => Err(RpcError::from(body)),
        }
    }
}

#[derive(Clone)]
pub struct RpcCaller {
    wire: Wire,
    timeout: Option<Duration>,
}

impl RpcCaller {
    /// Uses the wire's configured `call_timeout`.
    pub fn new(wire: Wire) -> Self {
        let timeout = wire.call_timeout();
        Self { wire, timeout }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn wire(&self) -> &Wire {
        &self.wire
    }

    pub async fn call(
        &self,
        destination: Destination,
        request: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        let pending = self
            .wire
            .send(destination, RpcCall::new(request, payload))?;
        let wire_id = pending.wire_id().clone();
        let response = self
            .bounded(pending, || {
                self.wire.correlations().cancel(&wire_id);
            })
            .await?;
        Ok(response.into_result()?)
    }

    pub async fn call_manager(
        &self,
        request: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        self.call(Destination::Manager, request, payload).await
    }

    pub async fn call_parent(
        &self,
        request: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CallError> {
        self.call(Destination::Parent, request, payload).await
    }

    /// Spawn a child interface. Only the init is bounded by the timeout; the
    /// returned close future waits for as long as the interface lives.
    pub async fn start_interface(
        &self,
        job: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<InterfaceHandle, CallError> {
        let pending = self
            .wire
            .start_interface(InterfaceInitCall::new(job, metadata))?;
        let wire_id: WireId = pending.wire_id().clone();
        let handle = self
            .bounded(pending, || {
                self.wire.interfaces().cancel(&wire_id);
            })
            .await?;
        Ok(handle)
    }

    async fn bounded<T, F>(&self, pending: F, on_timeout: impl FnOnce()) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, WireError>>,
    {
        let Some(limit) = self.timeout else {
            return Ok(pending.await?);
        };
        match tokio::time::timeout(limit, pending).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                on_timeout();
                tracing::warn!(timeout = ?limit, "Call timed out");
                Err(CallError::Timeout(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bridge::protocol::{Envelope, PeerId, RpcErrorBody};
    use crate::dispatcher::{CallExecutor, InboundMessage, IncomingCall, PeerFilter};
    use crate::error::ExecutorError;
    use crate::wire::WireConfig;
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Refuse;

    #[async_trait::async_trait]
    impl CallExecutor for Refuse {
        async fn execute(&self, _call: IncomingCall) -> Result<RpcResponse, ExecutorError> {
            Err(ExecutorError::new("not accepting calls"))
        }
    }

    fn make_caller(
        config: WireConfig,
    ) -> (
        RpcCaller,
        mpsc::UnboundedReceiver<Envelope>,
        fmpsc::UnboundedSender<InboundMessage>,
    ) {
        let (out_tx, sent) = mpsc::unbounded_channel();
        let (deliver, inbound) = fmpsc::unbounded();
        let wire = Wire::spawn(config, Arc::new(out_tx), inbound, Arc::new(Refuse));
        (RpcCaller::new(wire), sent, deliver)
    }

    fn reply(deliver: &fmpsc::UnboundedSender<InboundMessage>, data: serde_json::Value) {
        deliver
            .unbounded_send(InboundMessage::new(PeerId::new("parent"), data))
            .unwrap();
    }

    #[test]
    fn into_result_reraises_failure() {
        let err = RpcResponse::err(RpcErrorBody::new("quota exceeded").with_status(429))
            .into_result()
            .unwrap_err();
        assert_eq!(err.message, "quota exceeded");
        assert_eq!(err.status, Some(429));

        let ok = RpcResponse::ok(json!([1, 2])).into_result().unwrap();
        assert_eq!(ok, json!([1, 2]));
    }

    #[tokio::test]
    async fn failed_call_rejects_at_call_site() {
        let (caller, mut sent, deliver) =
            make_caller(WireConfig::new(PeerFilter::exact(PeerId::new("parent"))));

        let call = tokio::spawn({
            let caller = caller.clone();
            async move { caller.call_manager("start", json!({"action": "a"})).await }
        });

        let env = sent.recv().await.unwrap();
        let wire_id = env.wire_id().unwrap().clone();
        reply(
            &deliver,
            json!({
                "type": "rpc.res",
                "wireId": wire_id.as_str(),
                "ok": false,
                "error": {"message": "quota exceeded", "status": 429, "details": {"limit": 5}}
            }),
        );

        let err = call.await.unwrap().unwrap_err();
        let rpc = err.as_rpc().unwrap();
        assert_eq!(rpc.message, "quota exceeded");
        assert_eq!(rpc.status, Some(429));
        assert_eq!(rpc.details, Some(json!({"limit": 5})));
    }

    #[tokio::test]
    async fn successful_call_returns_result() {
        let (caller, mut sent, deliver) = make_caller(WireConfig::new(PeerFilter::any()));

        let call = tokio::spawn({
            let caller = caller.clone();
            async move { caller.call_parent("getRun", json!({"run_id": "r1"})).await }
        });

        let wire_id = sent.recv().await.unwrap().wire_id().unwrap().clone();
        reply(
            &deliver,
            json!({"type": "rpc.send-res", "wireId": wire_id.as_str(), "ok": true, "result": {"status": "done"}}),
        );

        assert_eq!(call.await.unwrap().unwrap(), json!({"status": "done"}));
    }

    #[tokio::test]
    async fn timeout_cancels_pending_entry() {
        let (caller, mut sent, deliver) = make_caller(
            WireConfig::new(PeerFilter::any()).with_call_timeout(Duration::from_millis(20)),
        );

        let err = caller
            .call_manager("getMetadata", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, CallError::Timeout(Duration::from_millis(20)));
        assert!(caller.wire().correlations().is_empty());

        // A response arriving after the timeout is simply unmatched.
        let wire_id = sent.recv().await.unwrap().wire_id().unwrap().clone();
        reply(
            &deliver,
            json!({"type": "rpc.res", "wireId": wire_id.as_str(), "ok": true}),
        );
        tokio::task::yield_now().await;
        assert!(caller.wire().correlations().is_empty());
    }

    #[tokio::test]
    async fn start_interface_times_out_on_missing_init_response() {
        let (caller, _sent, _deliver) = make_caller(
            WireConfig::new(PeerFilter::any()).with_call_timeout(Duration::from_millis(20)),
        );

        let err = caller
            .start_interface("J", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout(_)));
        assert_eq!(caller.wire().interfaces().pending_inits(), 0);
    }

    #[tokio::test]
    async fn start_interface_yields_handle() {
        let (caller, mut sent, deliver) = make_caller(WireConfig::new(PeerFilter::any()));

        let start = tokio::spawn({
            let caller = caller.clone();
            async move { caller.start_interface("J", json!({"kind": "log"})).await }
        });

        let wire_id = sent.recv().await.unwrap().wire_id().unwrap().clone();
        reply(
            &deliver,
            json!({"type": "iface.init-res", "wireId": wire_id.as_str(), "interfaceId": "X"}),
        );
        let handle = start.await.unwrap().unwrap();
        assert_eq!(handle.id.as_str(), "X");

        reply(
            &deliver,
            json!({"type": "iface.close", "from": "X", "job": "J", "ok": false, "error": {"message": "crashed"}}),
        );
        let closed = handle.close.await.unwrap();
        assert_eq!(closed.job, "J");
        assert_eq!(
            closed.outcome.into_result().unwrap_err().message,
            "crashed"
        );
    }
}
