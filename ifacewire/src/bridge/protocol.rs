//! Wire protocol types for child-manager communication.
//!
//! Every message on the channel is an [`Envelope`], tagged by `type`:
//! - **RPC**: `rpc.call`/`rpc.res` to the manager, `rpc.send`/`rpc.send-res`
//!   routed to the parent or a named child
//! - **Interface lifecycle**: `iface.init`, `iface.init-res`, `iface.close`

use serde::{Deserialize, Serialize};

/// Correlation token linking a request envelope to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireId(String);

impl WireId {
    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WireId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WireId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identifier of a spawned interface (sub-context).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(String);

impl InterfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for InterfaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the party that delivered a message to us.
///
/// Assigned by the transport, never read from message contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub request: String,
    pub payload: serde_json::Value,
}

impl RpcCall {
    pub fn new(request: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request: request.into(),
            payload,
        }
    }
}

/// Error half of a response.
///
/// Decoding never fails: the sending peer is not trusted to get the shape
/// right, and a rejected body would leave the caller waiting forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct RpcErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RpcErrorBody {
    pub const UNKNOWN: &'static str = "Unknown error";

    /// Build an error body; an empty message becomes [`Self::UNKNOWN`].
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: if message.is_empty() {
                Self::UNKNOWN.to_string()
            } else {
                message
            },
            status: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<serde_json::Value> for RpcErrorBody {
    fn from(value: serde_json::Value) -> Self {
        // A bare string or number carries no message of its own.
        let mut fields = match value {
            serde_json::Value::Object(fields) => fields,
            other => return Self::new(Self::UNKNOWN).with_details(other),
        };
        let message = match fields.remove("message") {
            Some(serde_json::Value::String(message)) => message,
            _ => String::new(),
        };
        Self {
            status: fields.get("status").and_then(status_code),
            details: fields.remove("details").filter(|d| !d.is_null()),
            ..Self::new(message)
        }
    }
}

/// Integral JSON numbers in u16 range, including `429.0`.
fn status_code(value: &serde_json::Value) -> Option<u16> {
    let code = match value.as_u64() {
        Some(code) => code,
        None => value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0)? as u64,
    };
    u16::try_from(code).ok()
}

/// Outcome of an RPC call: exactly one of a result or an error.
///
/// Wire form is `{ok: true, result}` or `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResponse", into = "RawResponse")]
pub enum RpcResponse {
    Ok(serde_json::Value),
    Err(RpcErrorBody),
}

impl RpcResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self::Ok(result)
    }

    pub fn err(error: RpcErrorBody) -> Self {
        Self::Err(error)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

#[derive(Serialize, Deserialize)]
struct RawResponse {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

impl From<RawResponse> for RpcResponse {
    fn from(raw: RawResponse) -> Self {
        if raw.ok {
            Self::Ok(raw.result.unwrap_or(serde_json::Value::Null))
        } else {
            Self::Err(
                raw.error
                    .unwrap_or_else(|| RpcErrorBody::new(RpcErrorBody::UNKNOWN)),
            )
        }
    }
}

impl From<RpcResponse> for RawResponse {
    fn from(response: RpcResponse) -> Self {
        match response {
            RpcResponse::Ok(result) => Self {
                ok: true,
                result: Some(result),
                error: None,
            },
            RpcResponse::Err(error) => Self {
                ok: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

/// Outcome of a terminated interface, reported to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceResponse {
    pub job: String,
    #[serde(flatten)]
    pub outcome: RpcResponse,
}

impl InterfaceResponse {
    pub fn new(job: impl Into<String>, outcome: RpcResponse) -> Self {
        Self {
            job: job.into(),
            outcome,
        }
    }
}

/// Request to spawn a child interface for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInitCall {
    pub job: String,
    pub metadata: serde_json::Value,
}

impl InterfaceInitCall {
    pub fn new(job: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            job: job.into(),
            metadata,
        }
    }
}

/// Call addressed to the immediate counterpart (the manager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCall {
    pub wire_id: WireId,
    #[serde(flatten)]
    pub call: RpcCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    pub wire_id: WireId,
    #[serde(flatten)]
    pub response: RpcResponse,
}

/// Routed call. `to: None` addresses the parent; `from` is stamped by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSend {
    pub wire_id: WireId,
    #[serde(flatten)]
    pub call: RpcCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<InterfaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<InterfaceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSendResponse {
    pub wire_id: WireId,
    #[serde(flatten)]
    pub response: RpcResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<InterfaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<InterfaceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInit {
    pub wire_id: WireId,
    #[serde(flatten)]
    pub call: InterfaceInitCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInitResponse {
    pub wire_id: WireId,
    pub interface_id: InterfaceId,
}

/// Termination notice for an interface. `from` is stamped by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceClose {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<InterfaceId>,
    #[serde(flatten)]
    pub response: InterfaceResponse,
}

/// Every message exchanged on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "rpc.call")]
    Call(WireCall),
    #[serde(rename = "rpc.res")]
    Response(WireResponse),
    #[serde(rename = "rpc.send")]
    Send(WireSend),
    #[serde(rename = "rpc.send-res")]
    SendResponse(WireSendResponse),
    #[serde(rename = "iface.init")]
    InterfaceInit(InterfaceInit),
    #[serde(rename = "iface.init-res")]
    InterfaceInitResponse(InterfaceInitResponse),
    #[serde(rename = "iface.close")]
    InterfaceClose(InterfaceClose),
}

impl Envelope {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "rpc.call",
            Self::Response(_) => "rpc.res",
            Self::Send(_) => "rpc.send",
            Self::SendResponse(_) => "rpc.send-res",
            Self::InterfaceInit(_) => "iface.init",
            Self::InterfaceInitResponse(_) => "iface.init-res",
            Self::InterfaceClose(_) => "iface.close",
        }
    }

    /// Correlation id, if this envelope carries one (`iface.close` does not).
    pub fn wire_id(&self) -> Option<&WireId> {
        match self {
            Self::Call(m) => Some(&m.wire_id),
            Self::Response(m) => Some(&m.wire_id),
            Self::Send(m) => Some(&m.wire_id),
            Self::SendResponse(m) => Some(&m.wire_id),
            Self::InterfaceInit(m) => Some(&m.wire_id),
            Self::InterfaceInitResponse(m) => Some(&m.wire_id),
            Self::InterfaceClose(_) => None,
        }
    }
}
