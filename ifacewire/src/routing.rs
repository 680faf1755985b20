//! Routing addressing - logical destinations to envelope fields.
//!
//! | destination | envelope   | `to`      |
//! |-------------|------------|-----------|
//! | Manager     | `rpc.call` | -         |
//! | Parent      | `rpc.send` | omitted   |
//! | Child(id)   | `rpc.send` | `id`      |
//!
//! `from` is never set by the sender. The relaying party stamps it with
//! [`stamp_origin`] on arrival.

use crate::bridge::protocol::{Envelope, InterfaceId, RpcCall, WireCall, WireId, WireSend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The immediate counterpart itself.
    Manager,
    /// The context that spawned this one.
    Parent,
    /// A child interface spawned by this context.
    Child(InterfaceId),
}

impl Destination {
    pub fn envelope(&self, wire_id: WireId, call: RpcCall) -> Envelope {
        match self {
            Self::Manager => Envelope::Call(WireCall { wire_id, call }),
            Self::Parent => Envelope::Send(WireSend {
                wire_id,
                call,
                from: None,
                to: None,
            }),
            Self::Child(id) => Envelope::Send(WireSend {
                wire_id,
                call,
                from: None,
                to: Some(id.clone()),
            }),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manager => f.write_str("manager"),
            Self::Parent => f.write_str("parent"),
            Self::Child(id) => write!(f, "child:{id}"),
        }
    }
}

/// Overwrite the sender-supplied `from` with the origin the relay observed.
///
/// Envelopes without a `from` field pass through unchanged.
pub fn stamp_origin(envelope: Envelope, origin: &InterfaceId) -> Envelope {
    match envelope {
        Envelope::Send(mut m) => {
            m.from = Some(origin.clone());
            Envelope::Send(m)
        }
        Envelope::SendResponse(mut m) => {
            m.from = Some(origin.clone());
            Envelope::SendResponse(m)
        }
        Envelope::InterfaceClose(mut m) => {
            m.from = Some(origin.clone());
            Envelope::InterfaceClose(m)
        }
        other => other,
    }
}
